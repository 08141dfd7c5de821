//! Token accounting.
//!
//! [`TokenCounter`] estimates how many model tokens a transcript occupies, [`TokenBudget`]
//! compares that against the active model's context window, and [`TokenLedger`] accumulates
//! the lifetime spend of the session.  The ledger is shared between the conversation engine
//! and the title worker.

use std::fmt;
use std::sync::{Arc, Mutex};

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};
use crate::types::{Message, Model};

/// Tokens of framing the endpoint adds around every message.
const PER_MESSAGE_OVERHEAD: u64 = 4;

/// Remaining-token count below which the engine warns that the limit is near.
pub const APPROACHING_LIMIT_THRESHOLD: u64 = 500;

/////////////////////////////////////////////// TokenCounter ///////////////////////////////////////////////

/// Counts tokens with the `cl100k_base` encoding shared by the gpt-3.5 and gpt-4 families.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Load the `cl100k_base` encoding.
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::unknown(format!("failed to load cl100k_base encoding: {e}")))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Count the tokens of a single string.
    pub fn count_text(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len() as u64
    }

    /// Count the tokens a message sequence occupies.  The empty sequence counts zero.
    pub fn count(&self, messages: &[Message]) -> u64 {
        messages
            .iter()
            .map(|message| {
                self.count_text(message.role.as_str())
                    + self.count_text(&message.content)
                    + PER_MESSAGE_OVERHEAD
            })
            .sum()
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}

/////////////////////////////////////////////// TokenBudget ////////////////////////////////////////////////

/// The context window of the active model and how much of it the transcript occupies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenBudget {
    /// The model's ceiling; `None` for models whose window is unknown.
    pub limit: Option<u32>,
    /// Tokens in the live transcript.
    pub current: u64,
}

impl TokenBudget {
    /// A budget for `model` with an empty transcript.
    pub fn for_model(model: &Model) -> Self {
        Self {
            limit: model.tokens_limit(),
            current: 0,
        }
    }

    /// Tokens left before the ceiling, saturating at zero.  `None` without a known ceiling.
    pub fn remaining(&self) -> Option<u64> {
        self.limit
            .map(|limit| u64::from(limit).saturating_sub(self.current))
    }

    /// True when the transcript fills the ceiling.  Never true without a known ceiling.
    pub fn is_exhausted(&self) -> bool {
        self.limit
            .map(|limit| self.current >= u64::from(limit))
            .unwrap_or(false)
    }

    /// The number of tokens left when it is in `1..500`, otherwise `None`.
    pub fn approaching_limit(&self) -> Option<u64> {
        self.remaining()
            .filter(|remaining| (1..APPROACHING_LIMIT_THRESHOLD).contains(remaining))
    }
}

impl fmt::Display for TokenBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "{}/{}", self.current, limit),
            None => write!(f, "{}/unknown", self.current),
        }
    }
}

/////////////////////////////////////////////// TokenLedger ////////////////////////////////////////////////

/// Lifetime token spend.  Never decreases.
///
/// Shared between the main loop and the title worker; the lock is held only for the addition.
#[derive(Debug, Default)]
pub struct TokenLedger {
    total: Mutex<u64>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tokens` to the total and return the new total.
    pub fn add(&self, tokens: u64) -> u64 {
        let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
        *total = total.saturating_add(tokens);
        *total
    }

    /// The total spent so far.
    pub fn total(&self) -> u64 {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }
}
