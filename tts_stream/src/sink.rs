//! The audio sink boundary and a WAV-collecting sink.

use std::io::Cursor;

use base64::Engine as _;
use tracing::warn;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM.
    Pcm16,
}

impl SampleFormat {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            SampleFormat::Pcm16 => 16,
        }
    }
}

/// Receiver of one request's decoded audio.
///
/// Exactly one of [`Sink::done`] or [`Sink::error`] is invoked per request.
pub trait Sink: Send {
    /// Largest number of bytes accepted by a single [`Sink::write`].
    fn max_chunk_size(&self) -> usize;

    fn start(&mut self, sample_rate: u32, format: SampleFormat, channels: u16) -> Result<(), SinkError>;

    /// Accept `data[offset..offset + len]`.
    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), SinkError>;

    fn done(&mut self);

    fn error(&mut self);
}

/// Guarantees a single terminal signal on a borrowed sink. If the guard is
/// dropped without either signal, the sink receives `error()`.
pub(crate) struct Terminal<'a, S: Sink + ?Sized> {
    sink: &'a mut S,
    signalled: bool,
}

impl<'a, S: Sink + ?Sized> Terminal<'a, S> {
    pub(crate) fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            signalled: false,
        }
    }

    pub(crate) fn sink(&mut self) -> &mut S {
        &mut *self.sink
    }

    pub(crate) fn done(mut self) {
        self.signalled = true;
        self.sink.done();
    }

    pub(crate) fn error(mut self) {
        self.signalled = true;
        self.sink.error();
    }
}

impl<S: Sink + ?Sized> Drop for Terminal<'_, S> {
    fn drop(&mut self) {
        if !self.signalled {
            warn!("request abandoned before completion, signalling error");
            self.sink.error();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Done,
    Error,
}

/// Sink that buffers PCM in memory and renders it as a WAV file.
#[derive(Debug)]
pub struct WavSink {
    max_chunk: usize,
    spec: Option<hound::WavSpec>,
    pcm: Vec<u8>,
    outcome: Option<SinkOutcome>,
}

impl WavSink {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk,
            spec: None,
            pcm: Vec::new(),
            outcome: None,
        }
    }

    pub fn outcome(&self) -> Option<SinkOutcome> {
        self.outcome
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Render the buffered audio as a RIFF/WAV file.
    pub fn into_wav(self) -> anyhow::Result<Vec<u8>> {
        let spec = self
            .spec
            .ok_or_else(|| anyhow::anyhow!("sink was never started"))?;

        // WAV header (44 bytes) + samples
        let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + self.pcm.len()));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;
            for pair in self.pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
            }
            writer
                .finalize()
                .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
        }
        Ok(cursor.into_inner())
    }

    pub fn into_wav_base64(self) -> anyhow::Result<String> {
        let wav = self.into_wav()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(wav))
    }
}

impl Sink for WavSink {
    fn max_chunk_size(&self) -> usize {
        self.max_chunk
    }

    fn start(&mut self, sample_rate: u32, format: SampleFormat, channels: u16) -> Result<(), SinkError> {
        if channels == 0 {
            return Err(SinkError::Unavailable("channel count must be positive".to_string()));
        }
        self.spec = Some(hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: format.bits_per_sample(),
            sample_format: hound::SampleFormat::Int,
        });
        Ok(())
    }

    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), SinkError> {
        if self.spec.is_none() || len > self.max_chunk {
            return Err(SinkError::Rejected { offset, len });
        }
        let chunk = offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or(SinkError::Rejected { offset, len })?;
        self.pcm.extend_from_slice(chunk);
        Ok(())
    }

    fn done(&mut self) {
        self.outcome = Some(SinkOutcome::Done);
    }

    fn error(&mut self) {
        self.outcome = Some(SinkOutcome::Error);
    }
}
