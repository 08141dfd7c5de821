use serde::{Deserialize, Serialize};

/// Token usage reported by the server for a batch completion.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the request transcript.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens in the generated reply.
    #[serde(default)]
    pub completion_tokens: u64,

    /// Sum of prompt and completion tokens.
    #[serde(default)]
    pub total_tokens: u64,
}
