use thiserror::Error;

/// Errors that end a synthesis request.
///
/// Every variant maps to exactly one `error()` on the request's sink.
/// Failed chunk writes are not listed here: they are logged, counted in
/// the delivery report and skipped.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no voice configured")]
    NotPrepared,

    #[error("engine failure: {0:#}")]
    EngineFailure(anyhow::Error),

    #[error("decoder failure: {0:#}")]
    Decode(anyhow::Error),

    #[error("audio stream ended before end-of-stream marker")]
    Truncated,

    #[error("sink refused to start: {0}")]
    SinkStart(#[from] SinkError),

    #[error("sink reported a maximum chunk size of zero")]
    InvalidChunkSize,

    #[error("request timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// A sink call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink rejected {len} bytes at offset {offset}")]
    Rejected { offset: usize, len: usize },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("could not open playback device: {0:#}")]
    DeviceOpen(anyhow::Error),

    #[error("playback cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("unknown voice: {0}")]
    UnknownVoice(String),
}
