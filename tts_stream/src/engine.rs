//! Engine and decoder collaborator boundaries.
//!
//! The synthesis engine and the codec live outside this crate. The
//! pipeline only relies on the traits below: an [`Engine`] is created per
//! request through an [`EngineFactory`] and owned by an [`EngineLease`]
//! for exactly the lifetime of that request.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::frame::{CodecFrame, EngineFrame};
use crate::voice::ActiveVoice;

pub type EngineFrameStream = Pin<Box<dyn Stream<Item = EngineFrame> + Send>>;
pub type CodecInput = Pin<Box<dyn Stream<Item = CodecFrame> + Send>>;
pub type CodecOutput = Pin<Box<dyn Stream<Item = anyhow::Result<CodecFrame>> + Send>>;

/// Host scale value meaning "no change" for pitch and speech rate.
pub const NEUTRAL_PROSODY: i32 = 100;

/// Pitch and rate offsets from the neutral baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prosody {
    pub pitch: i32,
    pub rate: i32,
}

impl Prosody {
    /// Convert host-scale values (100 = neutral) into offsets.
    pub fn from_host_scale(pitch: i32, speech_rate: i32) -> Self {
        Self {
            pitch: pitch - NEUTRAL_PROSODY,
            rate: speech_rate - NEUTRAL_PROSODY,
        }
    }

    pub fn pitch_param(&self) -> String {
        format!("{:+}Hz", self.pitch)
    }

    pub fn rate_param(&self) -> String {
        format!("{:+}%", self.rate)
    }
}

/// Everything the engine needs to voice one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub locale: String,
    pub voice_name: String,
    pub volume: String,
    pub output_format: String,
    pub pitch: String,
    pub rate: String,
}

impl AudioMetadata {
    pub fn new(voice: &ActiveVoice, prosody: Prosody, volume: &str) -> Self {
        Self {
            locale: voice.locale.clone(),
            voice_name: voice.name.clone(),
            volume: volume.to_string(),
            output_format: voice.suggested_codec.clone(),
            pitch: prosody.pitch_param(),
            rate: prosody.rate_param(),
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Queue text for synthesis.
    async fn submit(&self, text: &str, metadata: &AudioMetadata) -> anyhow::Result<()>;

    /// Lazily yield frames until `AudioCompleted`. The consumer may stop
    /// pulling at any point.
    fn frames(&self) -> EngineFrameStream;

    /// Drive the engine's internal processing until stopped.
    async fn run(&self) -> anyhow::Result<()>;

    /// Release the engine's resources. Must be safe to call before the
    /// frame stream has ended, and more than once.
    fn stop(&self);
}

pub trait EngineFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Arc<dyn Engine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn Engine>> + Send + Sync,
{
    fn create(&self) -> anyhow::Result<Arc<dyn Engine>> {
        self()
    }
}

pub trait Decoder: Send + Sync {
    /// Turn encoded frames into raw PCM frames. The returned stream may be
    /// dropped before it reaches `EndOfStream`.
    fn decode(&self, input: CodecInput) -> CodecOutput;
}

/// Decoder for engines configured to emit raw PCM already.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmPassthrough;

impl Decoder for PcmPassthrough {
    fn decode(&self, input: CodecInput) -> CodecOutput {
        Box::pin(input.map(Ok))
    }
}

/// Sole owner of one request's engine and its run-loop task.
///
/// Dropping the lease stops the engine and aborts the task, so disposal
/// also happens when the request future is dropped mid-flight.
pub(crate) struct EngineLease {
    engine: Arc<dyn Engine>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
    stopped: bool,
}

impl EngineLease {
    pub(crate) fn start(engine: Arc<dyn Engine>) -> Self {
        let runner = Arc::clone(&engine);
        let task = tokio::spawn(async move { runner.run().await });
        Self {
            engine,
            task: Some(task),
            stopped: false,
        }
    }

    pub(crate) fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    /// Resolve when the run loop exits. A clean exit is not an error: the
    /// frames it produced may still be in flight. Pending forever once the
    /// task has been observed.
    pub(crate) async fn finished(&mut self) -> Result<(), SynthesisError> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = task.await;
        self.task = None;
        match joined {
            Ok(Ok(())) => {
                debug!("engine run loop exited");
                Ok(())
            }
            Ok(Err(e)) => Err(SynthesisError::EngineFailure(e)),
            Err(e) if e.is_cancelled() => Err(SynthesisError::Cancelled),
            Err(e) => Err(SynthesisError::EngineFailure(anyhow::anyhow!(
                "engine task panicked: {e}"
            ))),
        }
    }

    fn stop_engine(&mut self) {
        if !self.stopped {
            self.engine.stop();
            self.stopped = true;
        }
    }

    /// Stop the engine, cancel its run loop and wait until the task has
    /// terminated.
    pub(crate) async fn shutdown(mut self) {
        self.stop_engine();
        if let Some(task) = self.task.take() {
            task.abort();
            match task.await {
                Ok(Err(e)) => warn!("engine run loop ended with error during shutdown: {e:#}"),
                Err(e) if e.is_panic() => warn!("engine task panicked during shutdown: {e}"),
                _ => {}
            }
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.stop_engine();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
