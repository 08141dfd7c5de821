//! The interactive chat session.
//!
//! This module holds everything above the transport: the transcript, the engine that runs
//! turns against it, the background title worker, and the slash commands and configuration
//! the terminal loop needs.
//!
//! # Architecture
//!
//! - [`conversation`]: the transcript and its system-message invariant
//! - [`session`]: the engine that runs one turn at a time
//! - [`title`]: the background title worker
//! - [`interrupt`]: per-turn cancellation driven by Ctrl-C
//! - [`commands`]: slash command parsing
//! - [`config`]: CLI arguments, the config file, and session modes
//! - [`history`]: saving, loading, and emergency backups

pub mod commands;
pub mod config;
pub mod conversation;
pub mod history;
pub mod interrupt;
pub mod session;
pub mod title;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, DeleteTarget, help_text, is_farewell, parse_command};
pub use config::{ChatArgs, ChatConfig, ChatModes, ConfigFile, TurnOptions};
pub use conversation::{Conversation, RemovedExchange};
pub use interrupt::Interrupter;
pub use session::{ChatSession, TurnOutcome, TurnReport};
pub use title::{TitleObserver, TitleSettings, TitleWorker};
