//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use gpt_term::chat::{ChatConfig, Renderer};
use gpt_term::client::ChatEventStream;
use gpt_term::{
    Backend, ChatCompletion, ChatCompletionChunk, ChatCompletionParams, ChatStreamEvent, Error,
    Result,
};

/// One scripted response.
pub enum Step {
    /// A complete reply; streamed as a single fragment.
    Reply(String),
    /// Streamed fragments followed by the end-of-stream marker.
    Fragments(Vec<String>),
    /// Streamed fragments, then nothing ever again.
    Stall(Vec<String>),
    /// A reply that arrives after a delay.
    Delayed(Duration, String),
    /// A failed request.
    Fail(Error),
}

impl Step {
    pub fn reply(content: &str) -> Self {
        Step::Reply(content.to_string())
    }

    pub fn fragments(fragments: &[&str]) -> Self {
        Step::Fragments(fragments.iter().map(|f| f.to_string()).collect())
    }

    pub fn stall(fragments: &[&str]) -> Self {
        Step::Stall(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// A backend that answers requests, in order, from a script and records what it was sent.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatCompletionParams>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatCompletionParams> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, params: &ChatCompletionParams) -> Step {
        self.requests.lock().unwrap().push(params.clone());
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Fail(Error::api(500, None, "script exhausted")))
    }
}

fn events(fragments: Vec<String>) -> Vec<Result<ChatStreamEvent>> {
    fragments
        .into_iter()
        .map(|f| Ok(ChatStreamEvent::Chunk(ChatCompletionChunk::fragment(f))))
        .collect()
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, params: &ChatCompletionParams) -> Result<ChatCompletion> {
        match self.next(params) {
            Step::Reply(content) => Ok(ChatCompletion::assistant(content)),
            Step::Fragments(fragments) => Ok(ChatCompletion::assistant(fragments.concat())),
            Step::Stall(_) => futures::future::pending().await,
            Step::Delayed(delay, content) => {
                tokio::time::sleep(delay).await;
                Ok(ChatCompletion::assistant(content))
            }
            Step::Fail(err) => Err(err),
        }
    }

    async fn open_stream(&self, params: &ChatCompletionParams) -> Result<ChatEventStream> {
        match self.next(params) {
            Step::Reply(content) => {
                let mut events = events(vec![content]);
                events.push(Ok(ChatStreamEvent::Done));
                Ok(Box::pin(stream::iter(events)))
            }
            Step::Fragments(fragments) => {
                let mut events = events(fragments);
                events.push(Ok(ChatStreamEvent::Done));
                Ok(Box::pin(stream::iter(events)))
            }
            Step::Stall(fragments) => Ok(Box::pin(
                stream::iter(events(fragments)).chain(stream::pending()),
            )),
            Step::Delayed(delay, content) => {
                tokio::time::sleep(delay).await;
                let mut events = events(vec![content]);
                events.push(Ok(ChatStreamEvent::Done));
                Ok(Box::pin(stream::iter(events)))
            }
            Step::Fail(err) => Err(err),
        }
    }

    fn set_timeout(&self, _: Duration) {}
}

/// A renderer that records what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    /// The accumulated reply after each fragment.
    pub prefixes: Vec<String>,
    pub replies: Vec<String>,
    pub interrupted: bool,
    pub errors: Vec<String>,
    pub infos: Vec<String>,
}

impl Renderer for RecordingRenderer {
    fn print_fragment(&mut self, accumulated: &str, _fragment: &str) {
        self.prefixes.push(accumulated.to_string());
    }

    fn print_reply(&mut self, reply: &str) {
        self.replies.push(reply.to_string());
    }

    fn print_interrupted(&mut self) {
        self.interrupted = true;
    }

    fn print_error(&mut self, error: &str) {
        self.errors.push(error.to_string());
    }

    fn print_info(&mut self, info: &str) {
        self.infos.push(info.to_string());
    }
}

/// A config writing backups into `dir`.
pub fn config(dir: &Path, auto_generate_title: bool) -> ChatConfig {
    ChatConfig::new()
        .with_system_prompt("You are a helpful assistant.")
        .with_data_dir(dir.to_path_buf())
        .with_auto_generate_title(auto_generate_title)
        .without_color()
}
