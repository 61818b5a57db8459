//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tts_stream::{
    ActiveVoice, AudioMetadata, Engine, EngineFactory, EngineFrame, EngineFrameStream,
    MemoryVoiceStore, PcmPassthrough, PipelineConfig, PlaybackDevice, SampleFormat, Sink,
    SinkError, Synthesizer, VoiceSelector,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn data(bytes: &'static [u8]) -> Bytes {
    Bytes::from_static(bytes)
}

pub fn test_voice() -> ActiveVoice {
    ActiveVoice {
        locale: "en-US".to_string(),
        name: "Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)".to_string(),
        suggested_codec: "raw-24khz-16bit-mono-pcm".to_string(),
    }
}

pub fn voice_store() -> MemoryVoiceStore {
    let store = MemoryVoiceStore::new();
    store.set_active(Some(test_voice()));
    store
}

#[derive(Debug, Clone, Copy)]
pub enum RunBehavior {
    /// Run until `stop()` is called.
    UntilStopped,
    /// Exit cleanly straight away.
    ExitCleanly,
    /// Fail after the given delay.
    FailAfter(Duration),
}

/// Engine that replays a fixed frame script.
pub struct ScriptedEngine {
    script: Vec<EngineFrame>,
    hang_after_script: bool,
    fail_submit: bool,
    run: RunBehavior,
    stop_token: CancellationToken,
    pub submitted: Mutex<Vec<(String, AudioMetadata)>>,
    pub pulled: Arc<AtomicUsize>,
    pub stop_calls: AtomicUsize,
    pub run_finished: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<EngineFrame>) -> Self {
        Self {
            script,
            hang_after_script: false,
            fail_submit: false,
            run: RunBehavior::UntilStopped,
            stop_token: CancellationToken::new(),
            submitted: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
            stop_calls: AtomicUsize::new(0),
            run_finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Keep the frame stream open after the script is exhausted.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn with_run(mut self, run: RunBehavior) -> Self {
        self.run = run;
        self
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn run_finished(&self) -> bool {
        self.run_finished.load(Ordering::SeqCst)
    }
}

struct FinishFlag(Arc<AtomicBool>);

impl Drop for FinishFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn submit(&self, text: &str, metadata: &AudioMetadata) -> anyhow::Result<()> {
        if self.fail_submit {
            anyhow::bail!("engine refused text");
        }
        self.submitted
            .lock()
            .push((text.to_string(), metadata.clone()));
        Ok(())
    }

    fn frames(&self) -> EngineFrameStream {
        let pulled = Arc::clone(&self.pulled);
        let script = futures::stream::iter(self.script.clone()).inspect(move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        });
        if self.hang_after_script {
            Box::pin(script.chain(futures::stream::pending()))
        } else {
            Box::pin(script)
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let _finished = FinishFlag(Arc::clone(&self.run_finished));
        match self.run {
            RunBehavior::UntilStopped => {
                self.stop_token.cancelled().await;
                Ok(())
            }
            RunBehavior::ExitCleanly => Ok(()),
            RunBehavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                anyhow::bail!("engine connection lost")
            }
        }
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_token.cancel();
    }
}

/// Hands out the same scripted engine and counts creations.
pub struct ScriptedFactory {
    pub engine: Arc<ScriptedEngine>,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(engine: ScriptedEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self) -> anyhow::Result<Arc<dyn Engine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let engine: Arc<dyn Engine> = self.engine.clone();
        Ok(engine)
    }
}

pub fn synthesizer(
    factory: &Arc<ScriptedFactory>,
    store: &MemoryVoiceStore,
    config: PipelineConfig,
) -> Synthesizer {
    let engines: Arc<dyn EngineFactory> = factory.clone();
    Synthesizer::new(
        engines,
        Arc::new(PcmPassthrough),
        VoiceSelector::new(store),
        config,
    )
}

/// Sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub max: usize,
    pub started: Option<(u32, SampleFormat, u16)>,
    pub writes: Vec<(usize, usize)>,
    pub payload: Vec<u8>,
    pub fail_on_write: Option<usize>,
    pub fail_start: bool,
    pub done: usize,
    pub error: usize,
}

impl RecordingSink {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            ..Default::default()
        }
    }

    pub fn failing_write(mut self, index: usize) -> Self {
        self.fail_on_write = Some(index);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn terminal_signals(&self) -> usize {
        self.done + self.error
    }
}

impl Sink for RecordingSink {
    fn max_chunk_size(&self) -> usize {
        self.max
    }

    fn start(&mut self, sample_rate: u32, format: SampleFormat, channels: u16) -> Result<(), SinkError> {
        if self.fail_start {
            return Err(SinkError::Unavailable("audio track busy".to_string()));
        }
        self.started = Some((sample_rate, format, channels));
        Ok(())
    }

    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), SinkError> {
        let index = self.writes.len();
        self.writes.push((offset, len));
        if self.fail_on_write == Some(index) {
            return Err(SinkError::Rejected { offset, len });
        }
        self.payload.extend_from_slice(&data[offset..offset + len]);
        Ok(())
    }

    fn done(&mut self) {
        self.done += 1;
    }

    fn error(&mut self) {
        self.error += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Open,
    Write(Bytes),
    Play,
    Pause,
    Flush,
    Stop,
    Release,
}

/// Shared log of everything done to the playback devices of one test.
#[derive(Clone, Default)]
pub struct DeviceLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
    fail_writes: Arc<Mutex<Vec<usize>>>,
    writes_seen: Arc<AtomicUsize>,
}

impl DeviceLog {
    pub fn record(&self, event: DeviceEvent) {
        self.events.lock().push(event);
    }

    /// Make the write with this zero-based index fail.
    pub fn fail_write(&self, index: usize) {
        self.fail_writes.lock().push(index);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &DeviceEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn written(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Write(data) => Some(data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn factory(&self) -> impl Fn() -> anyhow::Result<Arc<dyn PlaybackDevice>> + Send + Sync + 'static {
        let log = self.clone();
        move || {
            log.record(DeviceEvent::Open);
            Ok(Arc::new(RecordingDevice { log: log.clone() }) as Arc<dyn PlaybackDevice>)
        }
    }
}

pub struct RecordingDevice {
    log: DeviceLog,
}

impl PlaybackDevice for RecordingDevice {
    fn write(&self, data: &[u8]) -> anyhow::Result<usize> {
        let index = self.log.writes_seen.fetch_add(1, Ordering::SeqCst);
        if self.log.fail_writes.lock().contains(&index) {
            anyhow::bail!("device underrun");
        }
        self.log.record(DeviceEvent::Write(Bytes::copy_from_slice(data)));
        Ok(data.len())
    }

    fn play(&self) {
        self.log.record(DeviceEvent::Play);
    }

    fn pause(&self) {
        self.log.record(DeviceEvent::Pause);
    }

    fn flush(&self) {
        self.log.record(DeviceEvent::Flush);
    }

    fn stop(&self) {
        self.log.record(DeviceEvent::Stop);
    }

    fn release(&self) {
        self.log.record(DeviceEvent::Release);
    }
}

/// Device whose `write` blocks until it is started, like a streaming audio
/// track with a full hardware buffer. `release` unblocks a pending write
/// with an error.
#[derive(Default)]
pub struct GatedDevice {
    state: Mutex<GateState>,
    gate: Condvar,
    blocked_writes: AtomicUsize,
    pub written: Mutex<Vec<u8>>,
}

#[derive(Default)]
struct GateState {
    playing: bool,
    released: bool,
}

impl GatedDevice {
    /// Writes currently waiting for `play()`.
    pub fn blocked_writes(&self) -> usize {
        self.blocked_writes.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn factory(
        self: &Arc<Self>,
    ) -> impl Fn() -> anyhow::Result<Arc<dyn PlaybackDevice>> + Send + Sync + 'static {
        let device = Arc::clone(self);
        move || Ok(Arc::clone(&device) as Arc<dyn PlaybackDevice>)
    }
}

impl PlaybackDevice for GatedDevice {
    fn write(&self, data: &[u8]) -> anyhow::Result<usize> {
        let mut state = self.state.lock();
        if !state.playing && !state.released {
            self.blocked_writes.fetch_add(1, Ordering::SeqCst);
            while !state.playing && !state.released {
                self.gate.wait(&mut state);
            }
            self.blocked_writes.fetch_sub(1, Ordering::SeqCst);
        }
        if state.released {
            anyhow::bail!("device released");
        }
        self.written.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn play(&self) {
        self.state.lock().playing = true;
        self.gate.notify_all();
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn flush(&self) {}

    fn stop(&self) {
        self.state.lock().playing = false;
    }

    fn release(&self) {
        self.state.lock().released = true;
        self.gate.notify_all();
    }
}
