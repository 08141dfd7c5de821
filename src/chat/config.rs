//! Configuration types for the chat application.
//!
//! Settings come from three places, later ones winning: built-in defaults, the YAML config
//! file in the data directory, and command-line arguments parsed with `arrrg`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::backend::BackendKind;
use crate::client::DEFAULT_TIMEOUT;
use crate::error::{Error, Result};
use crate::types::{DEFAULT_TEMPERATURE, Model};

/// Name of the per-user data directory under `$HOME`.
pub const DATA_DIR_NAME: &str = ".gpt-term";
/// Name of the config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";
/// Prefix for saved conversations when none is configured.
pub const DEFAULT_SAVE_PREFIX: &str = "./chat_history_";
/// Log level when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// The per-user data directory, `~/.gpt-term`.
pub fn data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or_else(|| Error::not_found("cannot determine the home directory"))
}

/// The system prompt a new conversation starts with.
pub fn default_system_prompt() -> String {
    let today = OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date();
    let date = today
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| today.to_string());
    format!("You are a helpful assistant.\nKnowledge cutoff: 2021-09\nCurrent date: {date}")
}

////////////////////////////////////////////// ChatArgs //////////////////////////////////////////////

/// Command-line arguments for the gpt-term tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Load a saved conversation at startup.
    #[arrrg(optional, "Load chat history from a JSON file", "FILE")]
    pub load: Option<String>,

    /// Select a named key from `api_keys` in the config file.
    #[arrrg(optional, "Use the named API key from the config file", "NAME")]
    pub key: Option<String>,

    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gpt-3.5-turbo)", "MODEL")]
    pub model: Option<String>,

    /// Enable multi-line input.
    #[arrrg(flag, "Enable multi-line input mode")]
    pub multi: bool,

    /// Start in raw mode.
    #[arrrg(flag, "Start in raw mode (no styling of replies)")]
    pub raw: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Store an API key in the config file and exit.
    #[arrrg(optional, "Save the API key to the config file and exit", "KEY")]
    pub set_apikey: Option<String>,

    /// Store the request timeout in the config file and exit.
    #[arrrg(optional, "Save the request timeout in seconds and exit", "SECONDS")]
    pub set_timeout: Option<String>,

    /// Store whether titles are generated automatically and exit.
    #[arrrg(optional, "Save whether titles are generated automatically and exit", "BOOL")]
    pub set_gentitle: Option<String>,

    /// Store the prefix for saved conversations and exit.
    #[arrrg(optional, "Save the prefix for saved conversations and exit", "PREFIX")]
    pub set_saveprefix: Option<String>,

    /// Store the log level and exit.
    #[arrrg(optional, "Save the log level (DEBUG, INFO, WARN, ERROR) and exit", "LEVEL")]
    pub set_loglevel: Option<String>,
}

impl ChatArgs {
    /// True if any `--set-*` option was given.
    pub fn has_settings(&self) -> bool {
        self.set_apikey.is_some()
            || self.set_timeout.is_some()
            || self.set_gentitle.is_some()
            || self.set_saveprefix.is_some()
            || self.set_loglevel.is_some()
    }
}

///////////////////////////////////////////// ConfigFile /////////////////////////////////////////////

/// The YAML config file.  Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Named alternative keys, selected with `--key NAME`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub api_keys: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_generate_title: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConfigFile {
    /// Read the config file.  A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(Error::io(
                format!("cannot read {}: {err}", path.display()),
                err,
            )),
        }
    }

    /// Write the config file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Apply the `--set-*` arguments.  Returns a description of each change.
    pub fn apply_settings(&mut self, args: &ChatArgs) -> Result<Vec<String>> {
        let mut changes = Vec::new();
        if let Some(key) = &args.set_apikey {
            if key.trim().is_empty() {
                return Err(Error::validation("API key is empty", Some("apikey".to_string())));
            }
            self.api_key = Some(key.trim().to_string());
            changes.push("API key saved".to_string());
        }
        if let Some(timeout) = &args.set_timeout {
            let seconds = parse_timeout(timeout)?;
            self.timeout = Some(seconds);
            changes.push(format!("timeout set to {seconds} seconds"));
        }
        if let Some(flag) = &args.set_gentitle {
            let enabled = parse_bool(flag)
                .ok_or_else(|| Error::validation("expected true or false", Some("gentitle".to_string())))?;
            self.auto_generate_title = Some(enabled);
            changes.push(format!("automatic titles set to {enabled}"));
        }
        if let Some(prefix) = &args.set_saveprefix {
            self.save_prefix = Some(prefix.clone());
            changes.push(format!("save prefix set to {prefix}"));
        }
        if let Some(level) = &args.set_loglevel {
            let level = parse_log_level(level)?;
            changes.push(format!("log level set to {level}"));
            self.log_level = Some(level);
        }
        Ok(changes)
    }
}

/// The longest request timeout accepted, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = u32::MAX as f64;

/// Parse a positive number of seconds, at most [`MAX_TIMEOUT_SECS`].
pub fn parse_timeout(value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 && seconds <= MAX_TIMEOUT_SECS => {
            Ok(seconds)
        }
        Ok(seconds) if seconds.is_finite() && seconds > MAX_TIMEOUT_SECS => Err(Error::validation(
            format!("`{value}` exceeds the longest timeout of {MAX_TIMEOUT_SECS} seconds"),
            Some("timeout".to_string()),
        )),
        _ => Err(Error::validation(
            format!("`{value}` is not a positive number of seconds"),
            Some("timeout".to_string()),
        )),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Normalize a log level name to upper case, rejecting unknown levels.
pub fn parse_log_level(value: &str) -> Result<String> {
    let level = value.trim().to_uppercase();
    match level.as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" => Ok(level),
        "WARNING" => Ok("WARN".to_string()),
        "CRITICAL" | "FATAL" => Ok("ERROR".to_string()),
        _ => Err(Error::validation(
            format!("unknown log level `{value}`"),
            Some("loglevel".to_string()),
        )),
    }
}

////////////////////////////////////////////// ChatModes /////////////////////////////////////////////

/// Session-wide input and output modes toggled by `/raw`, `/multi` and `/stream`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatModes {
    /// Print replies without styling.
    pub raw: bool,
    /// Read input until an empty line.
    pub multi_line: bool,
    /// Stream replies as they are generated.
    pub stream: bool,
}

impl Default for ChatModes {
    fn default() -> Self {
        Self {
            raw: false,
            multi_line: false,
            stream: true,
        }
    }
}

impl ChatModes {
    /// Flip raw mode and return the new value.
    pub fn toggle_raw(&mut self) -> bool {
        self.raw = !self.raw;
        self.raw
    }

    /// Flip multi-line mode and return the new value.
    pub fn toggle_multi_line(&mut self) -> bool {
        self.multi_line = !self.multi_line;
        self.multi_line
    }

    /// Flip stream mode and return the new value.
    pub fn toggle_stream(&mut self) -> bool {
        self.stream = !self.stream;
        self.stream
    }
}

/// The settings one turn runs with.  Captured when the turn starts and never changed by it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TurnOptions {
    /// Stream the reply.
    pub stream: bool,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            stream: true,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl TurnOptions {
    pub fn batch() -> Self {
        Self {
            stream: false,
            ..Self::default()
        }
    }

    pub fn streaming() -> Self {
        Self::default()
    }
}

///////////////////////////////////////////// ChatConfig /////////////////////////////////////////////

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after merging the config file and
/// command-line arguments over the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Which remote-model protocol to speak.
    pub backend: BackendKind,

    /// API key for the chat-completions backend.
    pub api_key: Option<String>,

    /// Endpoint URL; the backend's default when `None`.
    pub endpoint: Option<String>,

    /// The model to use for generating responses.
    pub model: Model,

    /// The system prompt new conversations start with.
    pub system_prompt: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Request timeout.
    pub timeout: Duration,

    /// Prefix for suggested save file names.
    pub save_prefix: String,

    /// Log level name.
    pub log_level: String,

    /// Generate a title after the first exchange.
    pub auto_generate_title: bool,

    /// Model used for title requests.
    pub title_model: Model,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Starting modes.
    pub modes: ChatModes,

    /// Conversation to load at startup.
    pub load: Option<PathBuf>,

    /// Directory for the log file and emergency backups.
    pub data_dir: PathBuf,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Backend: openai, no key
    /// - Model and title model: gpt-3.5-turbo
    /// - Temperature: 1.0
    /// - Timeout: 30 seconds
    /// - Automatic titles: enabled
    /// - Streaming: enabled
    pub fn new() -> Self {
        Self {
            backend: BackendKind::default(),
            api_key: None,
            endpoint: None,
            model: Model::default(),
            system_prompt: default_system_prompt(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
            save_prefix: DEFAULT_SAVE_PREFIX.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auto_generate_title: true,
            title_model: Model::default(),
            use_color: true,
            modes: ChatModes::default(),
            load: None,
            data_dir: PathBuf::from(DATA_DIR_NAME),
        }
    }

    /// Merge the config file and the command-line arguments over the defaults.
    ///
    /// `env_api_key` is used when neither the arguments nor the file provide a key.
    pub fn resolve(
        args: &ChatArgs,
        file: &ConfigFile,
        data_dir: PathBuf,
        env_api_key: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new().with_data_dir(data_dir);

        let api_key = match &args.key {
            Some(name) => Some(file.api_keys.get(name).cloned().ok_or_else(|| {
                Error::validation(
                    format!("no key named `{name}` in api_keys"),
                    Some("key".to_string()),
                )
            })?),
            None => file.api_key.clone().or(env_api_key),
        };
        config.api_key = api_key.filter(|key| !key.trim().is_empty());
        config.endpoint = file.endpoint.clone();
        if let Some(backend) = file.backend {
            config.backend = backend;
        }
        if let Some(timeout) = file.timeout {
            config.timeout = Duration::from_secs_f64(parse_timeout(&timeout.to_string())?);
        }
        if let Some(prefix) = &file.save_prefix {
            config.save_prefix = prefix.clone();
        }
        if let Some(level) = &file.log_level {
            config.log_level = parse_log_level(level).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        }
        if let Some(enabled) = file.auto_generate_title {
            config.auto_generate_title = enabled;
        }
        if let Some(model) = &file.title_model {
            config.title_model = parse_model(model)?;
        }
        if let Some(model) = args.model.as_ref().or(file.model.as_ref()) {
            config.model = parse_model(model)?;
        }
        config.modes.raw = args.raw;
        config.modes.multi_line = args.multi;
        config.use_color = !args.no_color;
        config.load = args.load.as_ref().map(PathBuf::from);
        Ok(config)
    }

    /// Path of the session log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("chat.log")
    }

    /// Path of the config file.
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Sets the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the prefix for suggested save file names.
    pub fn with_save_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.save_prefix = prefix.into();
        self
    }

    /// Enables or disables automatic titles.
    pub fn with_auto_generate_title(mut self, enabled: bool) -> Self {
        self.auto_generate_title = enabled;
        self
    }

    /// Sets the model used for titles.
    pub fn with_title_model(mut self, model: Model) -> Self {
        self.title_model = model;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a model name, rejecting empty names.
pub fn parse_model(name: &str) -> Result<Model> {
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::validation(
            format!("`{name}` is not a model name"),
            Some("model".to_string()),
        ));
    }
    match name.parse::<Model>() {
        Ok(model) => Ok(model),
        Err(never) => match never {},
    }
}
