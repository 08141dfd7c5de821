//! Output rendering for the chat loop.
//!
//! The conversation engine never formats text itself.  It hands a [`Renderer`] either one
//! complete reply (batch mode) or, for every streamed fragment, the fragment together with the
//! reply accumulated so far.

use std::io::{self, Stdout, Write};

/// ANSI escape code for bold text (used for the assistant label).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for notices).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for green text (used for the assistant label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for cyan text (used for informational messages).
const ANSI_CYAN: &str = "\x1b[36m";

/// The OSC sequence that sets the terminal window title.
pub fn terminal_title_sequence(title: Option<&str>) -> String {
    format!("\x1b]0;{}\x07", title.unwrap_or("gpt-term"))
}

/// Trait for rendering assistant replies and session messages.
///
/// Implementations must render every fragment, in order; they may re-render the whole
/// accumulated reply each time instead of appending.
pub trait Renderer: Send {
    /// Called before the first fragment (or the batch reply) of a turn.
    fn start_reply(&mut self) {}

    /// Render one streamed fragment.  `accumulated` already ends with `fragment`.
    fn print_fragment(&mut self, accumulated: &str, fragment: &str);

    /// Render a complete reply received in batch mode.
    fn print_reply(&mut self, reply: &str) {
        self.print_fragment(reply, reply);
    }

    /// Called when a reply is complete.
    fn finish_reply(&mut self) {}

    /// Called when the user interrupted the reply.
    fn print_interrupted(&mut self) {}

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a low-priority notice, such as the approaching token limit.
    fn print_notice(&mut self, notice: &str) {
        self.print_info(notice);
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// Fragments are appended to stdout as they arrive.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
        }
    }

    /// Whether ANSI styling is emitted.
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Enable or disable ANSI styling.
    pub fn set_color(&mut self, use_color: bool) {
        self.use_color = use_color;
    }

    fn write(&mut self, text: &str) {
        let _ = self.stdout.write_all(text.as_bytes());
        let _ = self.stdout.flush();
        if let Some(last) = text.chars().last() {
            self.line_start = last == '\n';
        }
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn ensure_line_start(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_reply(&mut self) {
        self.ensure_line_start();
        let label = self.styled(&format!("{ANSI_BOLD}{ANSI_GREEN}"), "ChatGPT:");
        self.write(&format!("{label}\n"));
    }

    fn print_fragment(&mut self, _accumulated: &str, fragment: &str) {
        self.write(fragment);
    }

    fn finish_reply(&mut self) {
        self.ensure_line_start();
        self.write("\n");
    }

    fn print_interrupted(&mut self) {
        self.ensure_line_start();
        let text = self.styled(ANSI_DIM, "[interrupted]");
        self.write(&format!("{text}\n"));
    }

    fn print_error(&mut self, error: &str) {
        self.ensure_line_start();
        let text = self.styled(ANSI_RED, error);
        let _ = self.stdout.flush();
        eprintln!("{text}");
    }

    fn print_info(&mut self, info: &str) {
        self.ensure_line_start();
        let text = self.styled(ANSI_CYAN, info);
        self.write(&format!("{text}\n"));
    }

    fn print_notice(&mut self, notice: &str) {
        self.ensure_line_start();
        let text = self.styled(ANSI_DIM, notice);
        self.write(&format!("{text}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color());
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color());
        assert_eq!(renderer.styled(ANSI_RED, "x"), "x");
    }

    #[test]
    fn title_sequence() {
        assert_eq!(
            terminal_title_sequence(Some("Greetings")),
            "\x1b]0;Greetings\x07"
        );
        assert_eq!(terminal_title_sequence(None), "\x1b]0;gpt-term\x07");
    }
}
