//! Slash command parsing for the chat application.
//!
//! Input that starts with `/` controls the session and is never sent to the model.  Argument
//! validation happens here so a malformed command never reaches the session.

/// Which exchange `/delete` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    /// The oldest question and its answer.
    First,
    /// Everything but the system message.
    All,
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Toggle raw output.
    Raw,

    /// Toggle multi-line input.
    Multi,

    /// Toggle streamed replies.
    Stream,

    /// Show the lifetime spend and the current transcript size.
    Tokens,

    /// Show the last assistant reply again.
    Last,

    /// Change the model, or show it when `None`.
    Model(Option<String>),

    /// Set the sampling temperature.
    Temperature(f32),

    /// Set the request timeout in seconds.
    Timeout(f64),

    /// Replace the system prompt, or show it when `None`.
    System(Option<String>),

    /// Set the title, or regenerate it when `None`.
    Title(Option<String>),

    /// Save the transcript, to a suggested file name when `None`.
    Save(Option<String>),

    /// Replace the transcript with one loaded from a file.
    Load(String),

    /// Remove the last question and its answer.
    Undo,

    /// Remove the first exchange or the whole conversation.
    Delete(DeleteTarget),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be sent to
/// the model as a regular message.
///
/// # Examples
///
/// ```
/// # use gpt_term::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/undo"), Some(ChatCommand::Undo));
/// assert!(parse_command("/model gpt-4").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "raw" => ChatCommand::Raw,
        "multi" => ChatCommand::Multi,
        "stream" => ChatCommand::Stream,
        "tokens" => ChatCommand::Tokens,
        "last" => ChatCommand::Last,
        "model" => ChatCommand::Model(argument.map(String::from)),
        "temperature" => match argument {
            Some(arg) => match parse_f32_in_range(arg, 0.0, 2.0) {
                Ok(value) => ChatCommand::Temperature(value),
                Err(err) => ChatCommand::Invalid(format!("/temperature {err}")),
            },
            None => ChatCommand::Invalid("/temperature requires a value".to_string()),
        },
        "timeout" => match argument {
            Some(arg) => match super::config::parse_timeout(arg) {
                Ok(value) => ChatCommand::Timeout(value),
                Err(_) => ChatCommand::Invalid(format!(
                    "/timeout expects a positive number of seconds, at most {}",
                    super::config::MAX_TIMEOUT_SECS
                )),
            },
            None => ChatCommand::Invalid("/timeout requires a value".to_string()),
        },
        "system" => ChatCommand::System(argument.map(String::from)),
        "title" => ChatCommand::Title(argument.map(String::from)),
        "save" => ChatCommand::Save(argument.map(String::from)),
        "load" => match argument {
            Some(arg) => ChatCommand::Load(arg.to_string()),
            None => ChatCommand::Invalid("/load requires a file path".to_string()),
        },
        "undo" => ChatCommand::Undo,
        "delete" => match argument.map(str::to_lowercase).as_deref() {
            None | Some("first") => ChatCommand::Delete(DeleteTarget::First),
            Some("all") => ChatCommand::Delete(DeleteTarget::All),
            Some(_) => ChatCommand::Invalid(
                "Nothing to do. Available: /delete first or /delete all".to_string(),
            ),
        },
        "help" | "?" => ChatCommand::Help,
        "exit" | "quit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command} (try /help)")),
    };

    Some(result)
}

fn parse_f32_in_range(value: &str, min: f32, max: f32) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("expects a value between {min} and {max}"))?;
    if parsed.is_finite() && parsed >= min && parsed <= max {
        Ok(parsed)
    } else {
        Err(format!("expects a value between {min} and {max}"))
    }
}

/// Words that end the session once the model has answered them.
const FAREWELL_WORDS: &[&str] = &[
    "bye", "goodbye", "end", "exit", "quit", "再见", "结束", "退出",
];

/// True if `input` is a farewell: the session answers it and then ends.
pub fn is_farewell(input: &str) -> bool {
    let word = input
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '！' | '。'))
        .to_lowercase();
    FAREWELL_WORDS.contains(&word.as_str())
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /raw                  Toggle raw mode (no styling of replies)
  /multi                Toggle multi-line input (submit with an empty line)
  /stream               Toggle streamed replies
  /tokens               Show tokens spent and tokens in the current conversation
  /last                 Show the last reply again
  /model [name]         Change the model (no argument shows it)
  /temperature <v>      Set temperature 0.0-2.0
  /timeout <seconds>    Set the request timeout
  /system [prompt]      Replace the system prompt (no argument shows it)
  /title [title]        Set the title (no argument generates one)
  /save [file]          Save the conversation (suggests a name from the title)
  /load <file>          Load a conversation from a file
  /undo                 Remove the last question and its answer
  /delete [first]       Delete the first question and its answer
  /delete all           Delete the whole conversation
  /help                 Show this help message
  /exit                 Exit the chat"#
}
