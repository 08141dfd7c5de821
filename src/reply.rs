//! Assembling a reply from either response mode.
//!
//! A batch response is a single [`ChatCompletion`]; a streamed response is a sequence of
//! [`ChatStreamEvent`]s ending in [`ChatStreamEvent::Done`].  Both produce a [`Reply`].

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::observability::STREAM_FRAGMENTS;
use crate::render::Renderer;
use crate::types::{ChatCompletion, ChatStreamEvent, Message, Usage};

/// The assembled assistant reply of one turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// The reply text.  For an aborted stream, everything received before the interrupt.
    pub content: String,
    /// True when the user interrupted the stream before the end-of-stream marker.
    pub aborted: bool,
    /// Token usage, when the endpoint reports it.
    pub usage: Option<Usage>,
}

impl Reply {
    /// A complete reply with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            aborted: false,
            usage: None,
        }
    }

    /// The reply as an assistant transcript entry.
    pub fn to_message(&self) -> Message {
        Message::assistant(self.content.clone())
    }

    /// True if nothing at all was received.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Extract the reply from a batch completion.  A completion without choices is an error.
pub fn assemble_batch(completion: ChatCompletion) -> Result<Reply> {
    let message = completion.first_message().ok_or_else(|| {
        Error::api(200, Some("empty_response".to_string()), "response has no choices")
    })?;
    Ok(Reply {
        content: message.content,
        aborted: false,
        usage: completion.usage,
    })
}

/// Concatenate streamed fragments, in arrival order, into a reply.
///
/// Every non-empty fragment is passed to the renderer together with the reply accumulated so
/// far.  Cancelling `cancel` stops consumption immediately and returns the partial reply marked
/// as aborted.  A stream that ends without the `[DONE]` marker is treated as complete.  A
/// failed stream discards the partial reply and returns the error.
pub async fn assemble_stream<S>(
    mut stream: S,
    renderer: &mut dyn Renderer,
    cancel: &CancellationToken,
) -> Result<Reply>
where
    S: Stream<Item = Result<ChatStreamEvent>> + Unpin,
{
    let mut reply = Reply::default();
    let mut started = false;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                reply.aborted = true;
                break;
            }
            event = stream.next() => event,
        };
        match event {
            Some(Ok(ChatStreamEvent::Chunk(chunk))) => {
                let Some(fragment) = chunk.content() else {
                    continue;
                };
                if fragment.is_empty() {
                    continue;
                }
                if !started {
                    renderer.start_reply();
                    started = true;
                }
                STREAM_FRAGMENTS.click();
                reply.content.push_str(fragment);
                renderer.print_fragment(&reply.content, fragment);
            }
            Some(Ok(ChatStreamEvent::Done)) => break,
            Some(Err(err)) => {
                if started {
                    renderer.finish_reply();
                }
                return Err(err);
            }
            None => {
                tracing::debug!("stream ended without the [DONE] marker");
                break;
            }
        }
    }
    if reply.aborted {
        renderer.print_interrupted();
    } else if started {
        renderer.finish_reply();
    }
    Ok(reply)
}
