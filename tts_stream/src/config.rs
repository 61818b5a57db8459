// Configuration for the synthesis pipeline and segment player

use std::time::Duration;

/// Sample rate the engine's decoded audio is delivered at.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Time given to the output device to drain its hardware buffer after the
/// last chunk of a segment, before the segment is reported complete.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub volume: String,
    pub settle_delay: Duration,
    pub handoff_capacity: usize,
    pub segment_queue_depth: usize,
    pub request_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            volume: "+0%".to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            handoff_capacity: 8,
            segment_queue_depth: 1,
            request_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let sample_rate = lookup("TTS_SAMPLE_RATE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.sample_rate);

        let channels = lookup("TTS_CHANNELS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.channels);

        let volume = lookup("TTS_VOLUME")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.volume);

        let settle_delay = lookup("TTS_SETTLE_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.settle_delay);

        // Channel capacities of zero are not constructible.
        let handoff_capacity = lookup("TTS_HANDOFF_CAPACITY")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.handoff_capacity)
            .max(1);

        let segment_queue_depth = lookup("TTS_SEGMENT_QUEUE_DEPTH")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.segment_queue_depth)
            .max(1);

        let request_timeout = match lookup("TTS_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.request_timeout,
        };

        Self {
            sample_rate,
            channels,
            volume,
            settle_delay,
            handoff_capacity,
            segment_queue_depth,
            request_timeout,
        }
    }

    pub fn player(&self) -> PlayerConfig {
        PlayerConfig {
            settle_delay: self.settle_delay,
            handoff_capacity: self.handoff_capacity.max(1),
            segment_queue_depth: self.segment_queue_depth.max(1),
        }
    }
}

/// The subset of [`PipelineConfig`] the segment player needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerConfig {
    pub settle_delay: Duration,
    pub handoff_capacity: usize,
    pub segment_queue_depth: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PipelineConfig::default().player()
    }
}
