//! Streaming text-to-speech pipeline.
//!
//! A [`Synthesizer`] drives one request from an engine, through the
//! [`FrameBridge`] and a [`Decoder`], to a [`Sink`] via [`ChunkedDelivery`].
//! A [`SegmentPlayer`] plays a multi-segment stream straight to a
//! [`PlaybackDevice`].

mod bridge;
mod config;
mod delivery;
mod engine;
mod error;
mod frame;
mod metrics;
mod orchestrator;
mod player;
mod sink;
mod voice;

pub use bridge::{BridgeStep, FrameBridge};
pub use config::{PipelineConfig, PlayerConfig, DEFAULT_SAMPLE_RATE, DEFAULT_SETTLE_DELAY};
pub use delivery::{ChunkedDelivery, DeliveryReport};
pub use engine::{
    AudioMetadata, CodecInput, CodecOutput, Decoder, Engine, EngineFactory, EngineFrameStream,
    PcmPassthrough, Prosody, NEUTRAL_PROSODY,
};
pub use error::{PlayerError, SinkError, SynthesisError, VoiceError};
pub use frame::{CodecFrame, EngineFrame, PlayerFrame};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use orchestrator::{Phase, SynthesisOutcome, SynthesisRequest, Synthesizer};
pub use player::{DeviceFactory, PlaybackDevice, PlaybackReport, PlayerControl, SegmentPlayer};
pub use sink::{SampleFormat, Sink, SinkOutcome, WavSink};
pub use voice::{
    is_supported_language, ActiveVoice, LanguageAvailability, Locale, MemoryVoiceStore,
    VoiceProfile, VoiceSelector, VoiceStore, DEFAULT_LOCALES, SUPPORTED_LANGUAGES,
};
