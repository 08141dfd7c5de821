// Public modules
pub mod chat_completion;
pub mod chat_completion_chunk;
pub mod chat_completion_params;
pub mod chat_stream_event;
pub mod message;
pub mod model;
pub mod usage;

// Re-exports
pub use chat_completion::{ChatCompletion, CompletionChoice, ResponseMessage};
pub use chat_completion_chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
pub use chat_completion_params::{ChatCompletionParams, DEFAULT_TEMPERATURE};
pub use chat_stream_event::ChatStreamEvent;
pub use message::{Message, Role};
pub use model::{KnownModel, Model, tokens_limit_for};
pub use usage::Usage;
