//! The conversation engine.
//!
//! A [`ChatSession`] owns the transcript and runs one turn at a time: append the question,
//! dispatch it through the configured [`Backend`], then either append the reply and update the
//! token counters, or roll the question back.  Only session-fatal failures escape as `Err`;
//! everything the endpoint or transport can do wrong comes back as a [`TurnOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::chat::config::{ChatConfig, TurnOptions};
use crate::chat::conversation::{Conversation, RemovedExchange};
use crate::chat::history::{emergency_backup, load_history, now, save_history, suggest_save_name};
use crate::chat::title::{TitleObserver, TitleSettings, TitleWorker};
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_TURN_ABORTS, SESSION_TURN_DURATION, SESSION_TURN_FAILURES, SESSION_TURNS,
};
use crate::render::Renderer;
use crate::reply::Reply;
use crate::tokens::{TokenBudget, TokenCounter, TokenLedger};
use crate::types::{ChatCompletionParams, Message, Model};

/// What a successful turn produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    /// The reply that was appended.  `reply.aborted` is set when the user interrupted it.
    pub reply: Reply,
    /// Tokens in the transcript after the turn.
    pub current_tokens: u64,
    /// Lifetime spend after the turn.
    pub total_tokens: u64,
    /// Tokens left, when fewer than the warning threshold remain.
    pub approaching_limit: Option<u64>,
    /// True if this turn queued a title job.
    pub title_enqueued: bool,
}

/// How a turn ended.
#[derive(Clone, Debug)]
pub enum TurnOutcome {
    /// The reply, complete or partial, was appended to the transcript.
    Replied(TurnReport),
    /// The user interrupted before any reply arrived.  The question was rolled back.
    Cancelled,
    /// The request failed.  The question was rolled back.
    Failed {
        error: Error,
        /// True when the transcript as it stood before the question fills the model's context
        /// window.
        /// The caller should offer to delete the first exchange.
        limit_reached: bool,
    },
}

impl TurnOutcome {
    pub fn report(&self) -> Option<&TurnReport> {
        match self {
            TurnOutcome::Replied(report) => Some(report),
            _ => None,
        }
    }
}

/// One interactive chat session.
pub struct ChatSession {
    conversation: Conversation,
    counter: TokenCounter,
    budget: TokenBudget,
    ledger: Arc<TokenLedger>,
    backend: Arc<dyn Backend>,
    titles: TitleWorker,
    model: Model,
    temperature: f32,
    auto_generate_title: bool,
    save_prefix: String,
    data_dir: PathBuf,
}

impl ChatSession {
    /// Start a session with only the configured system message.
    ///
    /// Spawns the title worker, so this must be called inside a tokio runtime.
    pub fn new(
        config: &ChatConfig,
        backend: Arc<dyn Backend>,
        observer: Option<TitleObserver>,
    ) -> Result<Self> {
        let counter = TokenCounter::new()?;
        let ledger = Arc::new(TokenLedger::new());
        let settings = TitleSettings {
            model: config.title_model.clone(),
            ..TitleSettings::default()
        };
        let titles = TitleWorker::spawn(
            Arc::clone(&backend),
            Arc::clone(&ledger),
            counter.clone(),
            settings,
            observer,
        );
        let conversation = Conversation::new(config.system_prompt.clone());
        let mut budget = TokenBudget::for_model(&config.model);
        budget.current = counter.count(conversation.messages());
        tracing::debug!(
            backend = backend.name(),
            model = %config.model,
            limit = ?budget.limit,
            "chat session started"
        );
        Ok(Self {
            conversation,
            counter,
            budget,
            ledger,
            backend,
            titles,
            model: config.model.clone(),
            temperature: config.temperature,
            auto_generate_title: config.auto_generate_title,
            save_prefix: config.save_prefix.clone(),
            data_dir: config.data_dir.clone(),
        })
    }

    //////////////////////////////////////////////// turns ////////////////////////////////////////////////

    /// The options a turn starts with in the given stream mode.
    pub fn turn_options(&self, stream: bool) -> TurnOptions {
        TurnOptions {
            stream,
            temperature: self.temperature,
        }
    }

    /// Run one turn.
    ///
    /// Returns `Err` only for session-fatal failures, after writing an emergency backup of the
    /// transcript; the caller must end the session.
    pub async fn submit(
        &mut self,
        input: &str,
        options: TurnOptions,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        SESSION_TURNS.click();
        let started = Instant::now();
        let rollback_len = self.conversation.len();
        tracing::info!(user = %input, "user turn");

        if let Err(err) = self.conversation.append(Message::user(input)) {
            return Err(self.fatal(err));
        }
        let params = ChatCompletionParams::new(
            self.model.clone(),
            self.conversation.messages().to_vec(),
        )
        .with_stream(options.stream)
        .with_temperature(options.temperature);

        let result = self.backend.send_turn(&params, renderer, cancel).await;
        SESSION_TURN_DURATION.add(started.elapsed().as_secs_f64());

        match result {
            Ok(reply) if reply.aborted && reply.is_empty() => {
                SESSION_TURN_ABORTS.click();
                tracing::info!("turn interrupted before any reply arrived");
                self.conversation.truncate(rollback_len);
                Ok(TurnOutcome::Cancelled)
            }
            Ok(reply) => match self.finish_turn(reply, rollback_len) {
                Ok(report) => Ok(TurnOutcome::Replied(report)),
                Err(err) => Err(self.fatal(err)),
            },
            Err(err) if err.is_abort() => {
                SESSION_TURN_ABORTS.click();
                tracing::info!("turn interrupted: {err}");
                self.conversation.truncate(rollback_len);
                Ok(TurnOutcome::Cancelled)
            }
            Err(err) if err.is_recoverable() => {
                SESSION_TURN_FAILURES.click();
                self.conversation.truncate(rollback_len);
                tracing::warn!(error = %err, tokens = %self.budget, "turn failed; rolling back");
                Ok(TurnOutcome::Failed {
                    error: err,
                    limit_reached: self.budget.is_exhausted(),
                })
            }
            Err(err) => Err(self.fatal(err)),
        }
    }

    fn finish_turn(&mut self, reply: Reply, rollback_len: usize) -> Result<TurnReport> {
        if reply.aborted {
            SESSION_TURN_ABORTS.click();
            tracing::info!(assistant = %reply.content, "reply interrupted; keeping partial reply");
        } else {
            tracing::info!(assistant = %reply.content, "assistant reply");
        }
        self.conversation.append(reply.to_message())?;
        self.recount();
        let total_tokens = self.ledger.add(self.budget.current);

        let mut title_enqueued = false;
        if rollback_len == 1 && self.auto_generate_title {
            if let Some(question) = self.conversation.first_question() {
                match self.titles.enqueue(question) {
                    Ok(()) => title_enqueued = true,
                    Err(err) => tracing::error!(error = %err, "cannot queue title job"),
                }
            }
        }

        let approaching_limit = self.budget.approaching_limit();
        if let Some(remaining) = approaching_limit {
            tracing::warn!(remaining, tokens = %self.budget, "approaching the token limit");
        }
        Ok(TurnReport {
            reply,
            current_tokens: self.budget.current,
            total_tokens,
            approaching_limit,
            title_enqueued,
        })
    }

    fn fatal(&self, err: Error) -> Error {
        tracing::error!(error = %err, "unrecoverable error; writing emergency backup");
        let backup = match emergency_backup(&self.data_dir, self.conversation.messages()) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "emergency backup written");
                Some(path)
            }
            Err(backup_err) => {
                tracing::error!(error = %backup_err, "emergency backup failed");
                None
            }
        };
        Error::session_fatal(err.to_string(), backup)
    }

    fn recount(&mut self) {
        self.budget.current = self.counter.count(self.conversation.messages());
    }

    /////////////////////////////////////////////// transcript //////////////////////////////////////////////

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// The most recent assistant reply.
    pub fn last_reply(&self) -> Option<&str> {
        self.conversation.last_reply().map(|m| m.content.as_str())
    }

    /// Remove the last question and its answer.
    pub fn undo(&mut self) -> Option<Message> {
        let removed = self.conversation.undo_exchange();
        if removed.is_some() {
            self.recount();
        }
        removed
    }

    /// Remove the first question and its answer.
    pub fn delete_first(&mut self) -> Option<RemovedExchange> {
        let removed = self.conversation.delete_first_exchange(&self.counter);
        if let Some(removed) = &removed {
            self.recount();
            tracing::info!(tokens_saved = removed.tokens_saved, "deleted first exchange");
        }
        removed
    }

    /// Truncate to the system message and clear the title.
    pub fn reset(&mut self) {
        self.conversation.truncate_to_system();
        self.titles.reset();
        self.recount();
        tracing::info!("conversation reset");
    }

    pub fn system_prompt(&self) -> &str {
        self.conversation.system_prompt()
    }

    /// Replace the system prompt.
    pub fn set_system_prompt(&mut self, content: impl Into<String>) -> Result<()> {
        self.conversation.replace_system_content(content)?;
        self.recount();
        Ok(())
    }

    //////////////////////////////////////////////// settings ///////////////////////////////////////////////

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Switch models.  The token ceiling follows the new model.
    pub fn set_model(&mut self, model: Model) {
        tracing::info!(from = %self.model, to = %model, "model changed");
        self.budget.limit = model.tokens_limit();
        self.model = model;
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Set the sampling temperature, which must lie in `0..=2`.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::validation(
                format!("temperature {temperature} is outside 0.0-2.0"),
                Some("temperature".to_string()),
            ));
        }
        self.temperature = temperature;
        Ok(())
    }

    /// Set the request timeout for later requests.
    pub fn set_timeout(&self, timeout: Duration) {
        tracing::info!(seconds = timeout.as_secs_f64(), "timeout changed");
        self.backend.set_timeout(timeout);
    }

    //////////////////////////////////////////////// tokens /////////////////////////////////////////////////

    /// The context window and the transcript's current size.
    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Lifetime spend, including title requests.
    pub fn total_tokens_spent(&self) -> u64 {
        self.ledger.total()
    }

    pub fn ledger(&self) -> &Arc<TokenLedger> {
        &self.ledger
    }

    ///////////////////////////////////////////////// title /////////////////////////////////////////////////

    pub fn title(&self) -> Option<String> {
        self.titles.title()
    }

    /// Override the title.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        tracing::info!(title = %title, "title set");
        self.titles.set_title(Some(title));
    }

    /// Title jobs queued or in flight.
    pub fn pending_title_jobs(&self) -> usize {
        self.titles.pending()
    }

    /// Wait for queued title jobs, then generate a title if there is none or `force` is set.
    ///
    /// Cancelling `cancel` abandons the wait with [`Error::Abort`]; a job already running
    /// finishes on its own.  With no question in the transcript the title is cleared.
    pub async fn generate_title(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if !self.titles.wait_idle(cancel).await {
            return Err(Error::abort("interrupted while waiting for the title"));
        }
        if let Some(title) = self.titles.title().filter(|_| !force) {
            return Ok(Some(title));
        }
        let Some(question) = self.conversation.first_question() else {
            self.titles.set_title(None);
            return Ok(None);
        };
        self.titles.enqueue(question)?;
        if !self.titles.wait_idle(cancel).await {
            return Err(Error::abort("interrupted while waiting for the title"));
        }
        Ok(self.titles.title())
    }

    ////////////////////////////////////////////// persistence //////////////////////////////////////////////

    /// The file name `/save` uses when none is given.
    pub fn suggested_save_path(&self) -> PathBuf {
        PathBuf::from(suggest_save_name(
            &self.save_prefix,
            self.titles.title().as_deref(),
            now(),
        ))
    }

    /// Save the transcript.  Returns the path written.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.suggested_save_path(),
        };
        save_history(&path, self.conversation.messages())?;
        Ok(path)
    }

    /// Replace the transcript with one read from `path`.  On error the session is unchanged.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let conversation = load_history(path)?;
        self.conversation = conversation;
        self.titles.reset();
        self.recount();
        if self.auto_generate_title {
            if let Some(question) = self.conversation.first_question() {
                if let Err(err) = self.titles.enqueue(question) {
                    tracing::error!(error = %err, "cannot queue title job");
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("messages", &self.conversation.len())
            .field("budget", &self.budget)
            .field("titles", &self.titles)
            .finish()
    }
}
