//! Saving and loading transcripts.
//!
//! A transcript on disk is a JSON array of `{role, content}` objects, written and read verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::chat::conversation::Conversation;
use crate::error::{Error, Result};
use crate::types::Message;

/// Characters that cannot appear in a file name on common platforms.
const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', '*', '?', '"', '<', '>', '|', ':'];

/// Write `messages` to `path` as a pretty-printed JSON array.
pub fn save_history(path: &Path, messages: &[Message]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(messages)?;
    fs::write(path, json).map_err(|err| {
        Error::io(format!("cannot write {}: {err}", path.display()), err)
    })?;
    tracing::info!(path = %path.display(), messages = messages.len(), "saved chat history");
    Ok(())
}

/// Read a transcript from `path`.
///
/// Fails with `NotFound` for a missing file, `Serialization` for malformed JSON and
/// `Validation` for a transcript that does not start with its system message.
pub fn load_history(path: &Path) -> Result<Conversation> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(format!("file not found: {}", path.display())));
        }
        Err(err) => {
            return Err(Error::io(format!("cannot read {}: {err}", path.display()), err));
        }
    };
    let messages: Vec<Message> = serde_json::from_str(&text)?;
    let conversation = Conversation::from_messages(messages)?;
    tracing::info!(path = %path.display(), messages = conversation.len(), "loaded chat history");
    Ok(conversation)
}

/// Write an emergency copy of the transcript into `data_dir`.  Returns the file written.
pub fn emergency_backup(data_dir: &Path, messages: &[Message]) -> Result<PathBuf> {
    let path = data_dir.join(format!("chat_history_backup_{}.json", timestamp(now())));
    save_history(&path, messages)?;
    Ok(path)
}

/// The file name `/save` suggests: the prefix followed by the title, or by a timestamp when
/// there is no title.
pub fn suggest_save_name(prefix: &str, title: Option<&str>, when: OffsetDateTime) -> String {
    let title = title.map(sanitize_filename).filter(|t| !t.trim().is_empty());
    match title {
        Some(title) => format!("{prefix}{title}.json"),
        None => format!("{prefix}{}.json", timestamp(when)),
    }
}

/// Remove characters that cannot appear in a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN_FILENAME_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn timestamp(when: OffsetDateTime) -> String {
    when.format(format_description!(
        "[year]-[month]-[day]_[hour],[minute],[second]"
    ))
    .unwrap_or_else(|_| when.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats").join("a.json");
        let messages = vec![
            Message::system("sys"),
            Message::user("hello"),
            Message::assistant("hi\nthere \"friend\""),
        ];
        save_history(&path, &messages).unwrap();
        let loaded = load_history(&path).unwrap();
        assert_eq!(loaded.messages(), messages.as_slice());
    }

    #[test]
    fn load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_history(&dir.path().join("missing.json")).unwrap_err().is_not_found());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "[{\"role\": \"user\"").unwrap();
        assert!(matches!(
            load_history(&bad).unwrap_err(),
            Error::Serialization { .. }
        ));

        let headless = dir.path().join("headless.json");
        fs::write(&headless, r#"[{"role":"user","content":"hi"}]"#).unwrap();
        assert!(load_history(&headless).unwrap_err().is_validation());
    }

    #[test]
    fn backup_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = emergency_backup(dir.path(), &[Message::system("sys")]).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chat_history_backup_"));
        assert!(name.ends_with(".json"));
        assert!(path.exists());
    }

    #[test]
    fn save_names() {
        let when = datetime!(2023-04-05 06:07:08 UTC);
        assert_eq!(
            suggest_save_name("./chat_history_", Some("What is: a/b?"), when),
            "./chat_history_What is ab.json"
        );
        assert_eq!(
            suggest_save_name("./chat_history_", None, when),
            "./chat_history_2023-04-05_06,07,08.json"
        );
        assert_eq!(
            suggest_save_name("p_", Some("???"), when),
            "p_2023-04-05_06,07,08.json"
        );
    }
}
