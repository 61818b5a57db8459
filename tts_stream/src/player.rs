//! Segment player: serializes variable-length audio segments onto one
//! playback device.
//!
//! A producer task splits the incoming [`PlayerFrame`] stream into
//! segments. Each segment gets its own bounded handoff channel and its
//! handle is queued FIFO. The consumer loop (the [`SegmentPlayer::run`]
//! future) drains one segment at a time into the device, waits the settle
//! delay, reports the segment complete and moves on. When the queue is
//! closed and empty the device is stopped and released; the next write
//! opens a fresh one.
//!
//! Only the consumer loop writes to the device. Writes may block on
//! hardware buffering, so each one runs on the blocking pool and the slot
//! lock is never held across it: [`PlayerControl`] can always reach a
//! device that is stuck in `write`.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::frame::PlayerFrame;
use crate::metrics::PipelineMetrics;

/// The output device audio is rendered to.
///
/// Calls arrive from different threads, and `play`/`pause`/`stop` may be
/// issued while another thread is blocked in `write`.
pub trait PlaybackDevice: Send + Sync {
    /// Blocking write of encoded or raw audio, depending on the device's
    /// configured format.
    fn write(&self, data: &[u8]) -> anyhow::Result<usize>;

    fn play(&self);

    fn pause(&self);

    fn flush(&self);

    fn stop(&self);

    /// Free the device. A write blocked in the device must return.
    fn release(&self);
}

pub trait DeviceFactory: Send + Sync {
    fn open(&self) -> anyhow::Result<Arc<dyn PlaybackDevice>>;
}

impl<F> DeviceFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn PlaybackDevice>> + Send + Sync,
{
    fn open(&self) -> anyhow::Result<Arc<dyn PlaybackDevice>> {
        self()
    }
}

struct DeviceSlot {
    factory: Arc<dyn DeviceFactory>,
    device: Option<Arc<dyn PlaybackDevice>>,
    playing: bool,
}

impl DeviceSlot {
    fn get_or_open(&mut self) -> Result<Arc<dyn PlaybackDevice>, PlayerError> {
        if let Some(device) = &self.device {
            return Ok(Arc::clone(device));
        }
        debug!("opening playback device");
        let device = self.factory.open().map_err(PlayerError::DeviceOpen)?;
        self.device = Some(Arc::clone(&device));
        Ok(device)
    }

    fn take(&mut self) -> Option<Arc<dyn PlaybackDevice>> {
        self.playing = false;
        self.device.take()
    }
}

/// Play/pause overlay, independent of the drain loop.
#[derive(Clone)]
pub struct PlayerControl {
    slot: Arc<Mutex<DeviceSlot>>,
}

impl PlayerControl {
    /// Start the device, opening it if needed. No-op while playing.
    pub fn play(&self) -> Result<(), PlayerError> {
        let mut slot = self.slot.lock();
        if slot.playing {
            return Ok(());
        }
        slot.get_or_open()?.play();
        slot.playing = true;
        Ok(())
    }

    /// Pause and flush the device. The drain loop keeps writing.
    pub fn pause(&self) {
        let mut slot = self.slot.lock();
        if let Some(device) = &slot.device {
            device.pause();
            device.flush();
        }
        slot.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.slot.lock().playing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    pub segments: usize,
    pub chunks: usize,
    pub bytes: usize,
    pub failed_writes: usize,
}

/// One queued segment: its arrival index and the receiving end of its
/// handoff.
struct Segment {
    index: usize,
    chunks: mpsc::Receiver<Bytes>,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ReleaseOnDrop(Arc<Mutex<DeviceSlot>>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let device = self.0.lock().take();
        if let Some(device) = device {
            debug!("releasing playback device");
            device.stop();
            device.release();
        }
    }
}

pub struct SegmentPlayer {
    slot: Arc<Mutex<DeviceSlot>>,
    config: PlayerConfig,
    metrics: PipelineMetrics,
}

impl SegmentPlayer {
    pub fn new(factory: Arc<dyn DeviceFactory>, config: PlayerConfig) -> Self {
        // Channel capacities of zero are not constructible.
        let config = PlayerConfig {
            handoff_capacity: config.handoff_capacity.max(1),
            segment_queue_depth: config.segment_queue_depth.max(1),
            ..config
        };
        Self {
            slot: Arc::new(Mutex::new(DeviceSlot {
                factory,
                device: None,
                playing: false,
            })),
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Report played segments into shared counters.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn control(&self) -> PlayerControl {
        PlayerControl {
            slot: Arc::clone(&self.slot),
        }
    }

    pub async fn run<S, F>(&mut self, frames: S, on_completed: F) -> Result<PlaybackReport, PlayerError>
    where
        S: Stream<Item = PlayerFrame> + Send + 'static,
        F: FnMut(usize),
    {
        self.run_until_cancelled(frames, on_completed, CancellationToken::new())
            .await
    }

    /// Play every segment of `frames` in arrival order, calling
    /// `on_completed(index)` a settle delay after each segment's last
    /// chunk was written.
    ///
    /// On return, whether the stream ended, `cancel` fired or the future
    /// was dropped, the producer task is aborted, every handoff and the
    /// segment queue are closed, and the device is released. A write still
    /// blocked in the device at that point is left to finish on the
    /// blocking pool once the release unblocks it.
    pub async fn run_until_cancelled<S, F>(
        &mut self,
        frames: S,
        mut on_completed: F,
        cancel: CancellationToken,
    ) -> Result<PlaybackReport, PlayerError>
    where
        S: Stream<Item = PlayerFrame> + Send + 'static,
        F: FnMut(usize),
    {
        let (queue_tx, mut queue_rx) = mpsc::channel::<Segment>(self.config.segment_queue_depth);
        let _producer = AbortOnDrop(tokio::spawn(produce_segments(
            frames,
            queue_tx,
            self.config.handoff_capacity,
        )));
        let _release = ReleaseOnDrop(Arc::clone(&self.slot));

        let mut report = PlaybackReport::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
                next = queue_rx.recv() => next,
            };
            let Some(mut segment) = next else {
                break;
            };
            debug!(segment = segment.index, "playing segment");

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
                    chunk = segment.chunks.recv() => chunk,
                };
                let Some(chunk) = chunk else {
                    break;
                };
                self.write_chunk(chunk, &cancel, &mut report).await?;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
                _ = tokio::time::sleep(self.config.settle_delay) => {}
            }
            report.segments += 1;
            on_completed(segment.index);
        }

        info!(
            segments = report.segments,
            bytes = report.bytes,
            "segment stream drained"
        );
        self.metrics.record_playback(&report);
        Ok(report)
    }

    async fn write_chunk(
        &self,
        chunk: Bytes,
        cancel: &CancellationToken,
        report: &mut PlaybackReport,
    ) -> Result<(), PlayerError> {
        let device = {
            let mut slot = self.slot.lock();
            slot.get_or_open()?
        };
        let len = chunk.len();
        let write = tokio::task::spawn_blocking(move || device.write(&chunk));

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
            written = write => written,
        };
        match written {
            Ok(Ok(_)) => {
                report.chunks += 1;
                report.bytes += len;
            }
            Ok(Err(e)) => {
                warn!("playback device rejected {len} bytes: {e:#}");
                report.failed_writes += 1;
            }
            Err(e) => {
                warn!("playback device write did not complete: {e}");
                report.failed_writes += 1;
            }
        }
        Ok(())
    }
}

/// Split `frames` into segments and hand them to the consumer.
///
/// The current segment's sender is owned here alone; dropping it closes
/// that segment's handoff. Returning closes the segment queue.
async fn produce_segments<S>(frames: S, queue: mpsc::Sender<Segment>, capacity: usize)
where
    S: Stream<Item = PlayerFrame> + Send + 'static,
{
    futures::pin_mut!(frames);
    let mut current: Option<mpsc::Sender<Bytes>> = None;
    let mut next_index = 0;

    while let Some(frame) = frames.next().await {
        match frame {
            PlayerFrame::EndOfSegment => {
                if current.take().is_none() {
                    warn!("end-of-segment marker without an open segment");
                }
            }
            PlayerFrame::Chunk(data) => {
                let sender = match current.take() {
                    Some(sender) => sender,
                    None => {
                        let (tx, rx) = mpsc::channel(capacity);
                        let segment = Segment {
                            index: next_index,
                            chunks: rx,
                        };
                        if queue.send(segment).await.is_err() {
                            debug!("segment consumer gone, stopping producer");
                            return;
                        }
                        next_index += 1;
                        tx
                    }
                };
                if sender.send(data).await.is_err() {
                    debug!("segment consumer gone, stopping producer");
                    return;
                }
                current = Some(sender);
            }
        }
    }

    if current.is_some() {
        warn!("segment stream ended inside a segment, closing it");
    }
}
