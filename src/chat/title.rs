//! Background title generation.
//!
//! The [`TitleWorker`] owns a single tokio task that consumes a FIFO queue of jobs, one at a
//! time.  Each job is the text of a conversation's first question; the worker sends it to the
//! model in an isolated one-shot request and stores the answer as the session title.  Failures
//! are logged and clear the title; they never reach the chat loop.
//!
//! The title lives behind one lock shared by the worker and the chat loop, so an explicit
//! `/title` override and a finishing job cannot interleave within an update.  Every reset of
//! the conversation starts a new epoch; jobs enqueued in an older epoch are still run, but
//! their result is discarded.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::observability::{TITLE_FAILURES, TITLE_JOBS};
use crate::tokens::{TokenCounter, TokenLedger};
use crate::types::{ChatCompletionParams, Message, Model};

/// Sampling temperature for title requests.
pub const TITLE_TEMPERATURE: f32 = 0.5;

/// Build the prompt that asks the model for a title of `content`.
pub fn title_prompt(content: &str) -> String {
    format!(
        "Generate title shorter than 10 words for the following content in content's language. \
         The tilte contains ONLY words. DO NOT include line-break. \n\nContent: \"\"\"\n{content}\n\"\"\""
    )
}

/// Normalize a generated title: one line, no surrounding quotes or whitespace.
pub fn clean_title(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = joined
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」' | '《' | '》'))
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Model and temperature used for title requests.
#[derive(Clone, Debug, PartialEq)]
pub struct TitleSettings {
    pub model: Model,
    pub temperature: f32,
}

impl Default for TitleSettings {
    fn default() -> Self {
        Self {
            model: Model::default(),
            temperature: TITLE_TEMPERATURE,
        }
    }
}

/// Called with the new title whenever the worker stores one.
pub type TitleObserver = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
struct TitleState {
    title: Option<String>,
    epoch: u64,
}

struct TitleJob {
    content: String,
    epoch: u64,
}

/// Handle to the background title worker.
pub struct TitleWorker {
    jobs: mpsc::UnboundedSender<TitleJob>,
    pending: Arc<watch::Sender<usize>>,
    state: Arc<Mutex<TitleState>>,
    task: JoinHandle<()>,
}

impl TitleWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        ledger: Arc<TokenLedger>,
        counter: TokenCounter,
        settings: TitleSettings,
        observer: Option<TitleObserver>,
    ) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<TitleJob>();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let state = Arc::new(Mutex::new(TitleState::default()));

        let task = {
            let pending = Arc::clone(&pending);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Some(job) = queue.recv().await {
                    TITLE_JOBS.click();
                    tracing::debug!(content = %job.content, "title worker: generating");
                    let result = generate_title(&*backend, &counter, &settings, &job.content).await;
                    let stored = {
                        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                        match result {
                            Ok((title, tokens)) => {
                                ledger.add(tokens);
                                if state.epoch == job.epoch {
                                    tracing::info!(title = %title, "title generated");
                                    state.title = Some(title.clone());
                                    Some(title)
                                } else {
                                    tracing::debug!("title worker: conversation was reset, dropping title");
                                    None
                                }
                            }
                            Err(err) => {
                                TITLE_FAILURES.click();
                                tracing::error!(error = %err, "background title generation failed");
                                if state.epoch == job.epoch {
                                    state.title = None;
                                }
                                None
                            }
                        }
                    };
                    if let (Some(title), Some(observer)) = (stored, observer.as_ref()) {
                        observer(&title);
                    }
                    pending.send_modify(|n| *n = n.saturating_sub(1));
                }
                tracing::debug!("title worker: queue closed");
            })
        };

        Self {
            jobs,
            pending,
            state,
            task,
        }
    }

    /// Queue a title job for `content`.
    pub fn enqueue(&self, content: impl Into<String>) -> Result<()> {
        let epoch = self.lock().epoch;
        self.pending.send_modify(|n| *n += 1);
        let job = TitleJob {
            content: content.into(),
            epoch,
        };
        if self.jobs.send(job).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(Error::unknown("title worker has stopped"));
        }
        Ok(())
    }

    /// Jobs queued or in flight.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every queued job has finished.
    ///
    /// Returns false if `cancel` fired first; the in-flight job keeps running on its own.
    pub async fn wait_idle(&self, cancel: &CancellationToken) -> bool {
        let mut pending = self.pending.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = pending.wait_for(|n| *n == 0) => result.is_ok(),
        }
    }

    /// The current title.
    pub fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    /// Overwrite the title.
    pub fn set_title(&self, title: Option<String>) {
        self.lock().title = title;
    }

    /// Clear the title and discard the results of jobs already queued.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.title = None;
        state.epoch += 1;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TitleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for TitleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TitleWorker")
            .field("pending", &self.pending())
            .field("title", &self.title())
            .finish()
    }
}

impl Drop for TitleWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run one title request.  Returns the title and the tokens the request cost.
async fn generate_title(
    backend: &dyn Backend,
    counter: &TokenCounter,
    settings: &TitleSettings,
    content: &str,
) -> Result<(String, u64)> {
    let prompt = Message::user(title_prompt(content));
    let params = ChatCompletionParams::new(settings.model.clone(), vec![prompt.clone()])
        .with_temperature(settings.temperature);
    let reply = backend.send_title_request(&params).await?;
    let tokens = counter.count(&[prompt, reply.to_message()]);
    let title = clean_title(&reply.content)
        .ok_or_else(|| Error::api(200, Some("empty_title".to_string()), "model returned an empty title"))?;
    Ok((title, tokens))
}
