//! Chunked delivery of decoded audio to a sink.

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::frame::CodecFrame;
use crate::sink::Sink;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Data frames received from the decoder.
    pub frames: usize,
    /// Successful sink writes.
    pub writes: usize,
    pub bytes_written: usize,
    /// Frames whose remaining writes were skipped after a sink failure.
    pub failed_writes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkedDelivery {
    max_chunk: usize,
}

impl ChunkedDelivery {
    pub fn new(max_chunk: usize) -> Result<Self, SynthesisError> {
        if max_chunk == 0 {
            return Err(SynthesisError::InvalidChunkSize);
        }
        Ok(Self { max_chunk })
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Write one frame's payload in chunks of at most `max_chunk` bytes.
    ///
    /// A rejected write abandons the rest of this frame only.
    pub fn write_frame<S: Sink + ?Sized>(&self, sink: &mut S, data: &[u8], report: &mut DeliveryReport) {
        let mut offset = 0;
        while offset < data.len() {
            let len = self.max_chunk.min(data.len() - offset);
            if let Err(e) = sink.write(data, offset, len) {
                warn!(
                    "failed to write audio data ({e}), skipping {} remaining bytes of frame",
                    data.len() - offset
                );
                report.failed_writes += 1;
                return;
            }
            report.writes += 1;
            report.bytes_written += len;
            offset += len;
        }
    }

    /// Drain `frames` into `sink` until the end-of-stream marker.
    ///
    /// Upstream is not polled again once the marker has been seen. A stream
    /// that ends without the marker yields [`SynthesisError::Truncated`].
    pub async fn deliver<St, S>(&self, frames: St, sink: &mut S) -> Result<DeliveryReport, SynthesisError>
    where
        St: Stream<Item = anyhow::Result<CodecFrame>>,
        S: Sink + ?Sized,
    {
        futures::pin_mut!(frames);
        let mut report = DeliveryReport::default();
        while let Some(frame) = frames.next().await {
            match frame.map_err(SynthesisError::Decode)? {
                CodecFrame::Data(data) => {
                    report.frames += 1;
                    self.write_frame(sink, &data, &mut report);
                }
                CodecFrame::EndOfStream => {
                    debug!(
                        frames = report.frames,
                        bytes = report.bytes_written,
                        "decoder reached end of stream"
                    );
                    return Ok(report);
                }
            }
        }
        Err(SynthesisError::Truncated)
    }
}
