//! Server-Sent Events (SSE) processing for streamed chat completions.
//!
//! The chat-completions endpoint sends one `data: <json>` event per fragment and ends the
//! stream with the literal `data: [DONE]`.  Events are separated by a blank line.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_EVENTS};
use crate::types::{ChatCompletionChunk, ChatStreamEvent};

/// The payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Process a stream of bytes into a stream of chat stream events.
///
/// Bytes are buffered until a complete event is available, so events and multi-byte
/// characters may be split across chunks arbitrarily.  The stream ends after the `[DONE]`
/// event or when the underlying body ends.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<ChatStreamEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, Vec::<u8>::new(), false),
        move |(mut stream, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                while let Some(event_bytes) = take_event(&mut buffer) {
                    if let Some(event) = parse_event(&event_bytes) {
                        STREAM_EVENTS.click();
                        let finished = matches!(event, Ok(ChatStreamEvent::Done));
                        if event.is_err() {
                            STREAM_ERRORS.click();
                        }
                        return Some((event, (stream, buffer, finished)));
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend(bytes.iter().filter(|b| **b != b'\r'));
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A trailing event without its blank line.
                        let rest = std::mem::take(&mut buffer);
                        return parse_event(&rest).map(|event| (event, (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

/// Remove and return the next blank-line-terminated event from the buffer.
fn take_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let mut event: Vec<u8> = buffer.drain(..end + 2).collect();
    event.truncate(end);
    Some(event)
}

/// Parse one SSE event.  Returns `None` for events that carry no data (comments, keep-alives).
fn parse_event(event_bytes: &[u8]) -> Option<Result<ChatStreamEvent>> {
    let event_text = match std::str::from_utf8(event_bytes) {
        Ok(text) => text,
        Err(e) => return Some(Err(e.into())),
    };

    let mut data = Vec::new();
    for line in event_text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // `event:`, `id:` and `retry:` fields carry nothing for chat completions.
    }
    if data.is_empty() {
        return None;
    }
    let data = data.join("\n");
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Some(Ok(ChatStreamEvent::Done));
    }
    Some(parse_data(data))
}

fn parse_data(data: &str) -> Result<ChatStreamEvent> {
    #[derive(Deserialize)]
    struct StreamError {
        error: StreamErrorDetail,
    }

    #[derive(Deserialize)]
    struct StreamErrorDetail {
        message: Option<String>,
        #[serde(rename = "type")]
        error_type: Option<String>,
    }

    if let Ok(StreamError { error }) = serde_json::from_str::<StreamError>(data) {
        return Err(Error::api(
            500,
            Some(error.error_type.unwrap_or_else(|| "stream_error".to_string())),
            error.message.unwrap_or_else(|| data.to_string()),
        ));
    }
    let chunk = serde_json::from_str::<ChatCompletionChunk>(data)?;
    Ok(ChatStreamEvent::Chunk(chunk))
}
