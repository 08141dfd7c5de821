//! Interactive terminal chat with OpenAI-style chat-completion models.
//!
//! # Usage
//!
//! ```bash
//! # Chat with the default model
//! gpt-term
//!
//! # Use another model and multi-line input
//! gpt-term --model gpt-4 --multi
//!
//! # Continue a saved conversation
//! gpt-term --load chat_history_Rust.json
//!
//! # Store settings in ~/.gpt-term/config.yaml and exit
//! gpt-term --set-apikey sk-... --set-timeout 60
//! ```
//!
//! Type `/help` while chatting for the slash commands.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use gpt_term::chat::config::{API_KEY_ENV, CONFIG_FILE_NAME, data_dir, parse_model};
use gpt_term::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatModes, ChatSession, ConfigFile, DeleteTarget,
    Interrupter, PlainTextRenderer, Renderer, TitleObserver, TurnOutcome, help_text, is_farewell,
    parse_command,
};
use gpt_term::client::mask_api_key;
use gpt_term::render::terminal_title_sequence;
use gpt_term::{BackendKind, Error, create_backend, logging};

/// What the loop does after a command.
enum Flow {
    Continue,
    Quit,
}

/// Main entry point for the gpt-term application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("gpt-term [OPTIONS]");

    let data_dir = data_dir()?;
    fs::create_dir_all(&data_dir)?;
    let config_path = data_dir.join(CONFIG_FILE_NAME);
    let mut file = ConfigFile::load(&config_path)?;

    if args.has_settings() {
        for change in file.apply_settings(&args)? {
            println!("{change}");
        }
        file.save(&config_path)?;
        println!("Settings saved to {}", config_path.display());
        return Ok(());
    }

    let mut config = ChatConfig::resolve(&args, &file, data_dir, std::env::var(API_KEY_ENV).ok())?;
    logging::init(&config.log_path(), &config.log_level)?;

    let mut rl = DefaultEditor::new()?;
    if config.backend == BackendKind::OpenAi && config.api_key.is_none() {
        let Some(key) = prompt_api_key(&mut rl, &mut file, &config_path)? else {
            eprintln!("An API key is required. Set one with --set-apikey or {API_KEY_ENV}.");
            return Ok(());
        };
        config.api_key = Some(key);
    }
    tracing::info!(
        backend = %config.backend,
        model = %config.model,
        api_key = %config.api_key.as_deref().map(mask_api_key).unwrap_or_default(),
        "starting gpt-term"
    );

    let backend = create_backend(
        config.backend,
        config.api_key.as_deref(),
        config.endpoint.as_deref(),
        config.timeout,
    )?;
    let observer: Option<TitleObserver> = if config.use_color {
        Some(Arc::new(|title: &str| set_terminal_title(Some(title))))
    } else {
        None
    };
    let mut session = ChatSession::new(&config, backend, observer)?;
    let mut modes = config.modes;
    let mut renderer = PlainTextRenderer::with_color(config.use_color && !modes.raw);

    if let Some(path) = &config.load {
        match session.load(path) {
            Ok(()) => renderer.print_info(&format!(
                "Loaded {} ({} messages)",
                path.display(),
                session.messages().len()
            )),
            Err(err) => renderer.print_error(&format!("Failed to load {}: {err}", path.display())),
        }
    }

    let interrupter = Interrupter::new();
    let handler = interrupter.clone();
    ctrlc::set_handler(move || {
        handler.interrupt();
    })?;

    println!("gpt-term (model: {}, backend: {})", session.model(), config.backend);
    println!("Type /help for commands, /exit to quit\n");

    loop {
        let input = match read_input(&mut rl, modes.multi_line) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        if let Some(command) = parse_command(input) {
            let flow = handle_command(
                command,
                &mut session,
                &mut modes,
                &mut renderer,
                &interrupter,
                &mut rl,
                config.use_color,
            )
            .await;
            match flow {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        let options = session.turn_options(modes.stream);
        let cancel = interrupter.arm();
        let outcome = session.submit(input, options, &mut renderer, &cancel).await;
        interrupter.disarm();

        match outcome {
            Ok(TurnOutcome::Replied(report)) => {
                if report.reply.aborted {
                    renderer.print_notice("Reply interrupted; the partial reply was kept.");
                }
                if let Some(remaining) = report.approaching_limit {
                    renderer.print_notice(&format!(
                        "Approaching the token limit: {remaining} tokens left ({})",
                        session.budget()
                    ));
                }
                if is_farewell(input) && !report.reply.aborted {
                    break;
                }
            }
            Ok(TurnOutcome::Cancelled) => renderer.print_info("Interrupted."),
            Ok(TurnOutcome::Failed {
                error,
                limit_reached,
            }) => {
                renderer.print_error(&describe_error(&error));
                if limit_reached {
                    offer_delete_first(&mut rl, &mut session, &mut renderer);
                }
            }
            Err(err) => {
                renderer.print_error(&describe_error(&err));
                break;
            }
        }
    }

    let total = session.total_tokens_spent();
    tracing::info!(total_tokens = total, "session ended");
    println!("Total tokens spent: {total}");
    if config.use_color {
        set_terminal_title(None);
    }
    Ok(())
}

/// Read one message.  In multi-line mode, lines are read until an empty one.
fn read_input(rl: &mut DefaultEditor, multi_line: bool) -> Result<String, ReadlineError> {
    let first = rl.readline("> ")?;
    if !multi_line {
        return Ok(first);
    }
    let mut lines = vec![first];
    loop {
        let line = rl.readline("... ")?;
        if line.trim().is_empty() {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

async fn handle_command(
    command: ChatCommand,
    session: &mut ChatSession,
    modes: &mut ChatModes,
    renderer: &mut PlainTextRenderer,
    interrupter: &Interrupter,
    rl: &mut DefaultEditor,
    use_color: bool,
) -> Flow {
    match command {
        ChatCommand::Quit => return Flow::Quit,
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Raw => {
            let raw = modes.toggle_raw();
            renderer.set_color(use_color && !raw);
            renderer.print_info(&format!("Raw mode {}", on_off(raw)));
        }
        ChatCommand::Multi => {
            let multi = modes.toggle_multi_line();
            renderer.print_info(&format!(
                "Multi-line mode {}{}",
                on_off(multi),
                if multi { " (submit with an empty line)" } else { "" }
            ));
        }
        ChatCommand::Stream => {
            let stream = modes.toggle_stream();
            renderer.print_info(&format!("Stream mode {}", on_off(stream)));
        }
        ChatCommand::Tokens => {
            renderer.print_info(&format!(
                "Total tokens spent: {}\nCurrent tokens: {}",
                session.total_tokens_spent(),
                session.budget()
            ));
        }
        ChatCommand::Last => match session.last_reply() {
            Some(reply) => {
                let reply = reply.to_string();
                renderer.start_reply();
                renderer.print_reply(&reply);
                renderer.finish_reply();
            }
            None => renderer.print_info("No reply yet."),
        },
        ChatCommand::Model(None) => {
            renderer.print_info(&format!("Current model: {}", session.model()));
        }
        ChatCommand::Model(Some(name)) => match parse_model(&name) {
            Ok(model) => {
                session.set_model(model);
                renderer.print_info(&format!(
                    "Model changed to {} (tokens {})",
                    session.model(),
                    session.budget()
                ));
            }
            Err(err) => renderer.print_error(&describe_error(&err)),
        },
        ChatCommand::Temperature(value) => match session.set_temperature(value) {
            Ok(()) => renderer.print_info(&format!("Temperature set to {value}")),
            Err(err) => renderer.print_error(&describe_error(&err)),
        },
        ChatCommand::Timeout(seconds) => {
            session.set_timeout(Duration::from_secs_f64(seconds));
            renderer.print_info(&format!("Timeout set to {seconds} seconds"));
        }
        ChatCommand::System(None) => {
            renderer.print_info(&format!("System prompt:\n{}", session.system_prompt()));
        }
        ChatCommand::System(Some(prompt)) => match session.set_system_prompt(prompt) {
            Ok(()) => renderer.print_info("System prompt updated."),
            Err(err) => renderer.print_error(&describe_error(&err)),
        },
        ChatCommand::Title(Some(title)) => {
            session.set_title(title.clone());
            if use_color {
                set_terminal_title(Some(&title));
            }
            renderer.print_info(&format!("Title set to: {title}"));
        }
        ChatCommand::Title(None) => {
            renderer.print_info("Generating title...");
            let cancel = interrupter.arm();
            let result = session.generate_title(true, &cancel).await;
            interrupter.disarm();
            match result {
                Ok(Some(title)) => renderer.print_info(&format!("Title: {title}")),
                Ok(None) => renderer.print_info("No conversation to title yet."),
                Err(err) if err.is_abort() => renderer.print_info("Stopped waiting for the title."),
                Err(err) => renderer.print_error(&describe_error(&err)),
            }
        }
        ChatCommand::Save(path) => {
            let path = match path {
                Some(path) => PathBuf::from(path),
                None => {
                    let cancel = interrupter.arm();
                    let titled = session.generate_title(false, &cancel).await;
                    interrupter.disarm();
                    match titled {
                        Err(err) if !err.is_abort() => {
                            tracing::warn!(error = %err, "no title for the save file name");
                        }
                        _ => {}
                    }
                    let suggested = session.suggested_save_path();
                    match prompt_line(rl, &format!("Save to [{}]: ", suggested.display())) {
                        Some(answer) if !answer.is_empty() => PathBuf::from(answer),
                        Some(_) => suggested,
                        None => {
                            renderer.print_info("Save cancelled.");
                            return Flow::Continue;
                        }
                    }
                }
            };
            match session.save(Some(&path)) {
                Ok(path) => renderer.print_info(&format!("Saved to {}", path.display())),
                Err(err) => renderer.print_error(&format!("Failed to save: {}", describe_error(&err))),
            }
        }
        ChatCommand::Load(path) => match session.load(Path::new(&path)) {
            Ok(()) => renderer.print_info(&format!(
                "Loaded {path} ({} messages, tokens {})",
                session.messages().len(),
                session.budget()
            )),
            Err(err) => renderer.print_error(&format!("Failed to load: {}", describe_error(&err))),
        },
        ChatCommand::Undo => match session.undo() {
            Some(question) => renderer.print_info(&format!("Removed: {}", question.summary_line())),
            None => renderer.print_info("Nothing to undo."),
        },
        ChatCommand::Delete(DeleteTarget::First) => match session.delete_first() {
            Some(removed) => renderer.print_info(&format!(
                "Deleted the first exchange, {} tokens saved.",
                removed.tokens_saved
            )),
            None => renderer.print_info("No conversations yet."),
        },
        ChatCommand::Delete(DeleteTarget::All) => {
            session.reset();
            if use_color {
                set_terminal_title(None);
            }
            renderer.print_info("Conversation deleted.");
        }
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
    Flow::Continue
}

/// Offer to drop the oldest exchange after a request failed at the token limit.
fn offer_delete_first(rl: &mut DefaultEditor, session: &mut ChatSession, renderer: &mut PlainTextRenderer) {
    renderer.print_notice(&format!("The conversation fills the context window ({}).", session.budget()));
    let answer = prompt_line(rl, "Delete the first exchange? (y/N) ");
    if !matches!(answer.as_deref(), Some("y" | "Y" | "yes")) {
        return;
    }
    match session.delete_first() {
        Some(removed) => renderer.print_info(&format!(
            "Deleted the first exchange, {} tokens saved. Try again.",
            removed.tokens_saved
        )),
        None => renderer.print_info("No conversations yet."),
    }
}

/// Ask for an API key and offer to store it.
fn prompt_api_key(
    rl: &mut DefaultEditor,
    file: &mut ConfigFile,
    config_path: &Path,
) -> Result<Option<String>, Error> {
    let Some(key) = prompt_line(rl, "OpenAI API key: ").filter(|key| !key.is_empty()) else {
        return Ok(None);
    };
    if matches!(
        prompt_line(rl, "Save it to the config file? (y/N) ").as_deref(),
        Some("y" | "Y" | "yes")
    ) {
        file.api_key = Some(key.clone());
        file.save(config_path)?;
        println!("API key saved to {}", config_path.display());
    }
    Ok(Some(key))
}

/// Read one trimmed line; `None` on Ctrl-C, Ctrl-D, or an input error.
fn prompt_line(rl: &mut DefaultEditor, prompt: &str) -> Option<String> {
    rl.readline(prompt).ok().map(|line| line.trim().to_string())
}

fn set_terminal_title(title: Option<&str>) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(terminal_title_sequence(title).as_bytes());
    let _ = stdout.flush();
}

fn describe_error(err: &Error) -> String {
    match err {
        Error::SessionFatal {
            backup: Some(path), ..
        } => format!("{err}\nThe conversation was saved to {}", path.display()),
        Error::Timeout { .. } => format!("{err}\nUse /timeout to allow more time."),
        Error::Authentication { .. } => format!("{err}\nCheck your API key."),
        _ => err.to_string(),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
