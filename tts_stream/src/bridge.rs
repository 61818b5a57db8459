//! Translation of the engine's frame vocabulary into the decoder's and the
//! segment player's.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::frame::{CodecFrame, EngineFrame, PlayerFrame};

/// What the bridge does with one engine frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStep {
    /// Pass a frame downstream and keep pulling.
    Forward(CodecFrame),
    /// Emit nothing and keep pulling.
    Skip,
    /// Pass the terminal frame downstream and stop pulling from the engine.
    Finish(CodecFrame),
}

impl BridgeStep {
    pub fn keeps_pulling(&self) -> bool {
        !matches!(self, BridgeStep::Finish(_))
    }
}

pub struct FrameBridge;

impl FrameBridge {
    pub fn step(frame: EngineFrame) -> BridgeStep {
        match frame {
            EngineFrame::Data(data) => BridgeStep::Forward(CodecFrame::Data(data)),
            EngineFrame::TextCompleted => BridgeStep::Skip,
            EngineFrame::AudioCompleted => BridgeStep::Finish(CodecFrame::EndOfStream),
        }
    }

    /// Lazily translate `frames` into decoder input.
    ///
    /// Upstream is pulled one frame at a time and dropped as soon as
    /// `AudioCompleted` has been translated; frames the engine produces
    /// after that point are never polled.
    pub fn bridge<S>(frames: S) -> impl Stream<Item = CodecFrame> + Send + 'static
    where
        S: Stream<Item = EngineFrame> + Send + 'static,
    {
        async_stream::stream! {
            futures::pin_mut!(frames);
            let mut finished = false;
            while let Some(frame) = frames.next().await {
                match FrameBridge::step(frame) {
                    BridgeStep::Forward(frame) => yield frame,
                    BridgeStep::Skip => debug!("text accepted by engine"),
                    BridgeStep::Finish(frame) => {
                        finished = true;
                        yield frame;
                        break;
                    }
                }
            }
            if !finished {
                warn!("engine frame stream ended without audio-completed marker");
            }
        }
    }

    /// Map a multi-request engine stream onto player segments: each
    /// request's audio becomes one segment.
    pub fn segments<S>(frames: S) -> impl Stream<Item = PlayerFrame> + Send + 'static
    where
        S: Stream<Item = EngineFrame> + Send + 'static,
    {
        frames.filter_map(|frame| async move {
            match frame {
                EngineFrame::Data(data) => Some(PlayerFrame::Chunk(data)),
                EngineFrame::TextCompleted => None,
                EngineFrame::AudioCompleted => Some(PlayerFrame::EndOfSegment),
            }
        })
    }
}
