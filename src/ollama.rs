//! Client for a local Ollama server.
//!
//! Ollama speaks its own `/api/chat` protocol: the request carries sampling options in an
//! `options` object and a streamed reply is newline-delimited JSON, one object per fragment,
//! ending with an object whose `done` is true.  Replies are translated into the same
//! [`ChatCompletion`] and [`ChatStreamEvent`] types the chat-completions client produces.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use reqwest::{Client as ReqwestClient, Response};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use url::Url;

use crate::client::{ChatEventStream, DEFAULT_TIMEOUT, error_from_status};
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_ERRORS, STREAM_EVENTS,
};
use crate::types::{
    ChatCompletion, ChatCompletionParams, ChatStreamEvent, CompletionChoice, Message,
    ResponseMessage, Role, Usage,
};

/// The Ollama server used when none is configured.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: String,
}

/// Client for the `/api/chat` endpoint of an Ollama server.
#[derive(Debug)]
pub struct OllamaClient {
    client: ReqwestClient,
    chat_url: Url,
    timeout_ms: AtomicU64,
}

impl OllamaClient {
    /// Create a client for the server at `base_url` (for example `http://localhost:11434`).
    pub fn new(base_url: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let base = Url::parse(base_url.unwrap_or(DEFAULT_OLLAMA_URL))?;
        let chat_url = base.join("/api/chat")?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            chat_url,
            timeout_ms: AtomicU64::new(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        })
    }

    /// The URL chat requests are posted to.
    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    async fn post(&self, params: &ChatCompletionParams, stream: bool) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let request = OllamaChatRequest {
            model: params.model.as_str(),
            messages: &params.messages,
            stream,
            options: OllamaOptions {
                temperature: params.temperature,
            },
        };
        let send = self.client.post(self.chat_url.clone()).json(&request).send();
        let response = match tokio::time::timeout(self.timeout(), send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(if e.is_connect() {
                    Error::connection(
                        format!("Cannot reach Ollama at {}; is `ollama serve` running? {e}", self.chat_url),
                        Some(Box::new(e)),
                    )
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                });
            }
            Err(_) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(Error::timeout(
                    "No response from Ollama",
                    Some(self.timeout().as_secs_f64()),
                ));
            }
        };
        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            let status_code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaChatResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(error_from_status(status_code, &message, None));
        }
        Ok(response)
    }

    /// Send a conversation and wait for the complete reply.
    pub async fn send(&self, params: &ChatCompletionParams) -> Result<ChatCompletion> {
        let start = Instant::now();
        let response = self.post(params, false).await?;
        let body = tokio::time::timeout(self.timeout(), response.text())
            .await
            .map_err(|_| {
                Error::timeout(
                    "Timed out reading the Ollama reply",
                    Some(self.timeout().as_secs_f64()),
                )
            })?
            .map_err(|e| {
                Error::streaming(format!("Failed to read response: {e}"), Some(Box::new(e)))
            })?;
        let reply: OllamaChatResponse = serde_json::from_str(&body)?;
        if let Some(error) = reply.error {
            return Err(Error::api(500, Some("ollama_error".to_string()), error));
        }
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        Ok(into_completion(reply))
    }

    /// Send a conversation and receive the reply as a stream of events.
    pub async fn stream(&self, params: &ChatCompletionParams) -> Result<ChatEventStream> {
        let response = self.post(params, true).await?;
        let bytes = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());
        let events = lines
            .map(|line| match line {
                Ok(line) => parse_line(&line),
                Err(e) => Some(Err(Error::streaming(
                    format!("Error in Ollama stream: {e}"),
                    Some(Box::new(e)),
                ))),
            })
            .filter_map(futures::future::ready)
            .inspect(|event| {
                STREAM_EVENTS.click();
                if event.is_err() {
                    STREAM_ERRORS.click();
                }
            });
        Ok(Box::pin(events))
    }
}

/// Translate one NDJSON line into an event.  Blank lines yield nothing.
fn parse_line(line: &str) -> Option<Result<ChatStreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let reply: OllamaChatResponse = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(e) => return Some(Err(e.into())),
    };
    if let Some(error) = reply.error {
        return Some(Err(Error::api(500, Some("ollama_error".to_string()), error)));
    }
    if reply.done {
        return Some(Ok(ChatStreamEvent::Done));
    }
    let content = reply.message.map(|m| m.content).unwrap_or_default();
    Some(Ok(ChatStreamEvent::fragment(content)))
}

fn into_completion(reply: OllamaChatResponse) -> ChatCompletion {
    let usage = match (reply.prompt_eval_count, reply.eval_count) {
        (None, None) => None,
        (prompt, completion) => {
            let prompt_tokens = prompt.unwrap_or(0);
            let completion_tokens = completion.unwrap_or(0);
            Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            })
        }
    };
    let message = reply.message.unwrap_or(OllamaMessage {
        role: None,
        content: String::new(),
    });
    ChatCompletion {
        id: None,
        choices: vec![CompletionChoice {
            index: 0,
            message: ResponseMessage {
                role: message.role.or(Some(Role::Assistant)),
                content: Some(message.content),
            },
            finish_reason: reply.done.then(|| "stop".to_string()),
        }],
        usage,
    }
}
