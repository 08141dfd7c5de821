use crate::types::ChatCompletionChunk;

/// A decoded event of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// A content-bearing (or role-only) fragment.
    Chunk(ChatCompletionChunk),

    /// The terminal `[DONE]` sentinel.
    Done,
}

impl ChatStreamEvent {
    /// Shorthand for a chunk event carrying one content fragment.
    pub fn fragment(content: impl Into<String>) -> Self {
        ChatStreamEvent::Chunk(ChatCompletionChunk::fragment(content))
    }
}
