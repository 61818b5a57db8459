//! Frame vocabularies of the three pipeline stages.

use bytes::Bytes;

/// A unit of the engine's output stream.
///
/// The engine interleaves status markers with payload. `TextCompleted`
/// reports that the text was accepted and carries nothing; exactly one
/// `AudioCompleted` ends a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFrame {
    Data(Bytes),
    TextCompleted,
    AudioCompleted,
}

/// A unit of the decoder's input and output streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecFrame {
    Data(Bytes),
    EndOfStream,
}

impl CodecFrame {
    pub fn is_end(&self) -> bool {
        matches!(self, CodecFrame::EndOfStream)
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            CodecFrame::Data(data) => Some(data),
            CodecFrame::EndOfStream => None,
        }
    }
}

/// A unit of the segment player's input: audio chunks separated by
/// explicit end-of-segment markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerFrame {
    Chunk(Bytes),
    EndOfSegment,
}
