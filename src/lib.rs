// Public modules
pub mod backend;
pub mod chat;
pub mod client;
pub mod error;
pub mod logging;
pub mod observability;
pub mod ollama;
pub mod render;
pub mod reply;
pub mod sse;
pub mod tokens;
pub mod types;

// Re-exports
pub use backend::{Backend, BackendKind, ChatCompletionsBackend, OllamaBackend, create_backend};
pub use client::Client;
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use ollama::OllamaClient;
pub use reply::Reply;
pub use tokens::{TokenBudget, TokenCounter, TokenLedger};
pub use types::*;
