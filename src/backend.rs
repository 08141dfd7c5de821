//! Remote-model access.
//!
//! A [`Backend`] is anything that can complete a conversation, either as one body or as a
//! stream of events.  Two implementations exist: [`ChatCompletionsBackend`] for
//! OpenAI-compatible chat-completions endpoints and [`OllamaBackend`] for a local Ollama server.
//! One of them is chosen from configuration when the session starts; shared logic only ever
//! sees `dyn Backend`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::{ChatEventStream, Client};
use crate::error::{Error, Result};
use crate::ollama::OllamaClient;
use crate::render::Renderer;
use crate::reply::{Reply, assemble_batch, assemble_stream};
use crate::types::{ChatCompletion, ChatCompletionParams};

/// The capability the conversation engine and the title worker need from a remote model.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &'static str;

    /// Send the conversation and return the complete body.
    async fn complete(&self, params: &ChatCompletionParams) -> Result<ChatCompletion>;

    /// Send the conversation and return the reply as a stream of events.
    async fn open_stream(&self, params: &ChatCompletionParams) -> Result<ChatEventStream>;

    /// Change the request timeout for subsequent requests.
    fn set_timeout(&self, timeout: Duration);

    /// Send one conversation turn and assemble its reply.
    ///
    /// `params.stream` selects the response mode.  Cancelling `cancel` before any part of the
    /// reply arrives yields [`Error::Abort`]; cancelling during a stream yields the partial
    /// reply marked as aborted.
    async fn send_turn(
        &self,
        params: &ChatCompletionParams,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        if params.stream {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::abort("interrupted before the reply started")),
                stream = self.open_stream(params) => stream?,
            };
            assemble_stream(stream, renderer, cancel).await
        } else {
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::abort("interrupted while waiting for the reply")),
                completion = self.complete(params) => completion?,
            };
            let reply = assemble_batch(completion)?;
            renderer.start_reply();
            renderer.print_reply(&reply.content);
            renderer.finish_reply();
            Ok(reply)
        }
    }

    /// Send an isolated one-shot request, such as a title prompt, in batch mode.
    ///
    /// Runs to completion or timeout; it cannot be cancelled.
    async fn send_title_request(&self, params: &ChatCompletionParams) -> Result<Reply> {
        let params = params.clone().with_stream(false);
        assemble_batch(self.complete(&params).await?)
    }
}

/// Backend for OpenAI-compatible chat-completions endpoints.
#[derive(Debug)]
pub struct ChatCompletionsBackend {
    client: Client,
}

impl ChatCompletionsBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Backend for ChatCompletionsBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, params: &ChatCompletionParams) -> Result<ChatCompletion> {
        self.client.send(params).await
    }

    async fn open_stream(&self, params: &ChatCompletionParams) -> Result<ChatEventStream> {
        self.client.stream(params).await
    }

    fn set_timeout(&self, timeout: Duration) {
        self.client.set_timeout(timeout);
    }
}

/// Backend for a local Ollama server.
#[derive(Debug)]
pub struct OllamaBackend {
    client: OllamaClient,
}

impl OllamaBackend {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, params: &ChatCompletionParams) -> Result<ChatCompletion> {
        self.client.send(params).await
    }

    async fn open_stream(&self, params: &ChatCompletionParams) -> Result<ChatEventStream> {
        self.client.stream(params).await
    }

    fn set_timeout(&self, timeout: Duration) {
        self.client.set_timeout(timeout);
    }
}

/// Which backend to construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// An OpenAI-compatible chat-completions endpoint.
    #[default]
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// A local Ollama server.
    Ollama,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OpenAi => f.write_str("openai"),
            BackendKind::Ollama => f.write_str("ollama"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(BackendKind::OpenAi),
            "ollama" => Ok(BackendKind::Ollama),
            other => Err(Error::validation(
                format!("unknown backend `{other}`; expected `openai` or `ollama`"),
                Some("backend".to_string()),
            )),
        }
    }
}

/// Construct the configured backend.
///
/// The chat-completions backend requires an API key; Ollama ignores it.
pub fn create_backend(
    kind: BackendKind,
    api_key: Option<&str>,
    endpoint: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn Backend>> {
    match kind {
        BackendKind::OpenAi => {
            let api_key = api_key.ok_or_else(|| Error::authentication("no API key configured"))?;
            let client = Client::with_options(api_key, endpoint, Some(timeout))?;
            Ok(Arc::new(ChatCompletionsBackend::new(client)))
        }
        BackendKind::Ollama => {
            let client = OllamaClient::new(endpoint, Some(timeout))?;
            Ok(Arc::new(OllamaBackend::new(client)))
        }
    }
}
