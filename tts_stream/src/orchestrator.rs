//! Per-request synthesis driver.
//!
//! [`Synthesizer::synthesize`] takes one request from validation to a
//! single terminal signal on the caller's sink. The engine for a request
//! is created through the factory, owned by an [`EngineLease`] and
//! disposed of on every exit path.

use std::future::pending;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::bridge::FrameBridge;
use crate::config::PipelineConfig;
use crate::delivery::{ChunkedDelivery, DeliveryReport};
use crate::engine::{
    AudioMetadata, CodecInput, Decoder, EngineFactory, EngineLease, Prosody, NEUTRAL_PROSODY,
};
use crate::error::SynthesisError;
use crate::metrics::PipelineMetrics;
use crate::sink::{SampleFormat, Sink, Terminal};
use crate::voice::{ActiveVoice, VoiceSelector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    /// Host scale, 100 is neutral.
    pub pitch: i32,
    /// Host scale, 100 is neutral.
    pub speech_rate: i32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pitch: NEUTRAL_PROSODY,
            speech_rate: NEUTRAL_PROSODY,
        }
    }

    pub fn with_pitch(mut self, pitch: i32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_speech_rate(mut self, speech_rate: i32) -> Self {
        self.speech_rate = speech_rate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Preparing,
    Synthesizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Blank text: the sink got `done()` and nothing else.
    Silent,
    Completed(DeliveryReport),
}

pub struct Synthesizer {
    engines: Arc<dyn EngineFactory>,
    decoder: Arc<dyn Decoder>,
    voices: VoiceSelector,
    config: PipelineConfig,
    phase: watch::Sender<Phase>,
    metrics: PipelineMetrics,
}

impl Synthesizer {
    pub fn new(
        engines: Arc<dyn EngineFactory>,
        decoder: Arc<dyn Decoder>,
        voices: VoiceSelector,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engines,
            decoder,
            voices,
            config,
            phase: watch::channel(Phase::Idle).0,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn voices(&self) -> &VoiceSelector {
        &self.voices
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Phase of the most recent request.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub async fn synthesize<S>(
        &self,
        request: &SynthesisRequest,
        sink: &mut S,
    ) -> Result<SynthesisOutcome, SynthesisError>
    where
        S: Sink + ?Sized,
    {
        self.synthesize_until_cancelled(request, sink, &CancellationToken::new())
            .await
    }

    /// Run one request to completion, signalling exactly one of
    /// `done()`/`error()` on `sink`.
    ///
    /// Dropping the returned future before it resolves signals `error()`
    /// and stops the engine.
    pub async fn synthesize_until_cancelled<S>(
        &self,
        request: &SynthesisRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome, SynthesisError>
    where
        S: Sink + ?Sized,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("synthesis", %request_id);
        self.run_request(request, sink, cancel).instrument(span).await
    }

    async fn run_request<S>(
        &self,
        request: &SynthesisRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome, SynthesisError>
    where
        S: Sink + ?Sized,
    {
        let started = Instant::now();
        let mut terminal = Terminal::new(sink);
        self.phase.send_replace(Phase::Preparing);

        let Some(voice) = self.voices.current() else {
            error!("no voice configured, rejecting request");
            terminal.error();
            self.phase.send_replace(Phase::Failed);
            self.metrics.record_error(elapsed_ms(started));
            return Err(SynthesisError::NotPrepared);
        };

        if request.text.trim().is_empty() {
            debug!("blank text, nothing to synthesize");
            terminal.done();
            self.phase.send_replace(Phase::Completed);
            self.metrics.record_silent();
            return Ok(SynthesisOutcome::Silent);
        }

        info!(
            voice = %voice.name,
            chars = request.text.chars().count(),
            "synthesis request"
        );

        match self.stream_audio(request, &voice, terminal.sink(), cancel).await {
            Ok(report) => {
                terminal.done();
                self.phase.send_replace(Phase::Completed);
                let latency_ms = elapsed_ms(started);
                self.metrics.record_delivery(latency_ms, &report);
                info!(
                    bytes = report.bytes_written,
                    failed_writes = report.failed_writes,
                    latency_ms,
                    "synthesis completed"
                );
                Ok(SynthesisOutcome::Completed(report))
            }
            Err(e) => {
                error!("synthesis failed: {e}");
                terminal.error();
                self.phase.send_replace(Phase::Failed);
                self.metrics.record_error(elapsed_ms(started));
                Err(e)
            }
        }
    }

    async fn stream_audio<S>(
        &self,
        request: &SynthesisRequest,
        voice: &ActiveVoice,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, SynthesisError>
    where
        S: Sink + ?Sized,
    {
        let delivery = ChunkedDelivery::new(sink.max_chunk_size())?;
        sink.start(self.config.sample_rate, SampleFormat::Pcm16, self.config.channels)?;

        let prosody = Prosody::from_host_scale(request.pitch, request.speech_rate);
        let metadata = AudioMetadata::new(voice, prosody, &self.config.volume);
        debug!(pitch = %metadata.pitch, rate = %metadata.rate, "engine metadata");

        let engine = self.engines.create().map_err(SynthesisError::EngineFailure)?;
        let mut lease = EngineLease::start(engine);
        self.phase.send_replace(Phase::Synthesizing);

        let result = self
            .drive(&mut lease, delivery, &request.text, &metadata, sink, cancel)
            .await;
        lease.shutdown().await;
        result
    }

    /// Submit the text and pump engine frames through the bridge, the
    /// decoder and chunked delivery, racing cancellation, the request
    /// timeout and an engine run-loop failure.
    async fn drive<S>(
        &self,
        lease: &mut EngineLease,
        delivery: ChunkedDelivery,
        text: &str,
        metadata: &AudioMetadata,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, SynthesisError>
    where
        S: Sink + ?Sized,
    {
        let engine = lease.engine();
        let decoder = Arc::clone(&self.decoder);
        let pipeline = async move {
            engine
                .submit(text, metadata)
                .await
                .map_err(SynthesisError::EngineFailure)?;
            let input: CodecInput = Box::pin(FrameBridge::bridge(engine.frames()));
            delivery.deliver(decoder.decode(input), sink).await
        };
        tokio::pin!(pipeline);

        let limit = self.config.request_timeout;
        let timeout = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => pending().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SynthesisError::Cancelled),
                limit = &mut timeout => return Err(SynthesisError::TimedOut(limit)),
                result = &mut pipeline => return result,
                // A clean run-loop exit leaves the frames in flight.
                finished = lease.finished() => finished?,
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
