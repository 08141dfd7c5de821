//! The conversation transcript.
//!
//! A [`Conversation`] always holds exactly one system message, at index 0.  No operation can
//! remove it; only its content can be replaced.  After the system message, user and assistant
//! messages alternate, except while a turn is pending and the last message is an unanswered
//! question.

use crate::error::{Error, Result};
use crate::tokens::TokenCounter;
use crate::types::{Message, Role};

/// The result of removing the first exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedExchange {
    /// The messages that were removed, oldest first.
    pub removed: Vec<Message>,
    /// The transcript's token count before minus after.
    pub tokens_saved: u64,
}

impl RemovedExchange {
    /// The question that was removed.
    pub fn question(&self) -> Option<&Message> {
        self.removed.iter().find(|m| m.role == Role::User)
    }
}

/// The ordered transcript of one chat session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a conversation holding only the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Create a conversation from a loaded transcript.
    ///
    /// The transcript must be non-empty, start with a system message, and contain no other
    /// system messages.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self> {
        match messages.first() {
            None => {
                return Err(Error::validation(
                    "transcript is empty",
                    Some("messages".to_string()),
                ));
            }
            Some(first) if first.role != Role::System => {
                return Err(Error::validation(
                    "transcript must start with a system message",
                    Some("messages".to_string()),
                ));
            }
            Some(_) => {}
        }
        if messages[1..].iter().any(|m| m.role == Role::System) {
            return Err(Error::validation(
                "transcript has more than one system message",
                Some("messages".to_string()),
            ));
        }
        Ok(Self { messages })
    }

    /// All messages, system message first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages, including the system message.  Always at least one.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when only the system message remains.
    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// The system prompt.
    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    /// Add a message to the end of the transcript.
    ///
    /// System messages cannot be appended; use [`Conversation::replace_system_content`].
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.role == Role::System {
            return Err(Error::validation(
                "the transcript already has a system message",
                Some("role".to_string()),
            ));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Remove and return the last message.  Returns `None`, changing nothing, when only the
    /// system message remains.
    pub fn pop_last(&mut self) -> Option<Message> {
        if self.messages.len() <= 1 {
            return None;
        }
        self.messages.pop()
    }

    /// Remove the last question together with its answer, if it has one.
    ///
    /// Returns the removed question, or `None` when there is no complete exchange to undo.
    pub fn undo_exchange(&mut self) -> Option<Message> {
        if self.messages.len() <= 2 {
            return None;
        }
        let last = self.pop_last()?;
        if last.role == Role::Assistant {
            self.pop_last()
        } else {
            Some(last)
        }
    }

    /// Remove the first question and its answer.
    ///
    /// Acts only when there is at least one full exchange (three messages); otherwise returns
    /// `None` and changes nothing.  The answer at index 1 after removing the question is only
    /// removed if it is an assistant message.
    pub fn delete_first_exchange(&mut self, counter: &TokenCounter) -> Option<RemovedExchange> {
        if self.messages.len() < 3 {
            return None;
        }
        let before = counter.count(&self.messages);
        let mut removed = vec![self.messages.remove(1)];
        if self.messages.len() > 1 && self.messages[1].role == Role::Assistant {
            removed.push(self.messages.remove(1));
        }
        let after = counter.count(&self.messages);
        Some(RemovedExchange {
            removed,
            tokens_saved: before.saturating_sub(after),
        })
    }

    /// Truncate to the system message.
    pub fn truncate_to_system(&mut self) {
        self.messages.truncate(1);
    }

    /// Replace the system prompt.
    pub fn replace_system_content(&mut self, content: impl Into<String>) -> Result<()> {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = content.into();
                Ok(())
            }
            _ => Err(Error::validation(
                "the first message is not a system message",
                Some("messages".to_string()),
            )),
        }
    }

    /// The most recent assistant reply.
    pub fn last_reply(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// The content of the first question, which titles are generated from.
    pub fn first_question(&self) -> Option<&str> {
        self.messages
            .get(1)
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Roll back to `len` messages, never below the system message.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.messages.truncate(len.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> TokenCounter {
        TokenCounter::new().unwrap()
    }

    fn with_exchanges(n: usize) -> Conversation {
        let mut conversation = Conversation::new("You are a helpful assistant.");
        for i in 0..n {
            conversation
                .append(Message::user(format!("question {i}")))
                .unwrap();
            conversation
                .append(Message::assistant(format!("answer number {i}")))
                .unwrap();
        }
        conversation
    }

    #[test]
    fn new_holds_only_system() {
        let conversation = Conversation::new("sys");
        assert_eq!(conversation.len(), 1);
        assert!(conversation.is_empty());
        assert_eq!(conversation.messages()[0], Message::system("sys"));
    }

    #[test]
    fn append_rejects_system() {
        let mut conversation = Conversation::new("sys");
        assert!(conversation.append(Message::system("again")).is_err());
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn pop_last_never_removes_system() {
        let mut conversation = with_exchanges(1);
        assert_eq!(conversation.pop_last(), Some(Message::assistant("answer number 0")));
        assert_eq!(conversation.pop_last(), Some(Message::user("question 0")));
        assert_eq!(conversation.pop_last(), None);
        assert_eq!(conversation.pop_last(), None);
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::System);
    }

    #[test]
    fn undo_removes_question_and_answer() {
        let mut conversation = with_exchanges(2);
        assert_eq!(
            conversation.undo_exchange(),
            Some(Message::user("question 1"))
        );
        assert_eq!(conversation.len(), 3);

        conversation.append(Message::user("pending")).unwrap();
        assert_eq!(conversation.undo_exchange(), Some(Message::user("pending")));
        assert_eq!(conversation.len(), 3);
    }

    #[test]
    fn undo_with_nothing_to_undo() {
        let mut conversation = Conversation::new("sys");
        assert_eq!(conversation.undo_exchange(), None);
        conversation.append(Message::user("only")).unwrap();
        assert_eq!(conversation.undo_exchange(), None);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn delete_first_exchange_needs_three_messages() {
        let counter = counter();
        let mut conversation = Conversation::new("sys");
        assert!(conversation.delete_first_exchange(&counter).is_none());
        conversation.append(Message::user("hello")).unwrap();
        assert!(conversation.delete_first_exchange(&counter).is_none());
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn delete_first_exchange_of_two() {
        let counter = counter();
        let mut conversation = with_exchanges(2);
        assert_eq!(conversation.len(), 5);

        let removed = conversation.delete_first_exchange(&counter).unwrap();
        assert_eq!(conversation.len(), 3);
        assert!(removed.tokens_saved > 0);
        assert_eq!(removed.question(), Some(&Message::user("question 0")));
        assert_eq!(
            conversation.messages(),
            &[
                Message::system("You are a helpful assistant."),
                Message::user("question 1"),
                Message::assistant("answer number 1"),
            ]
        );
    }

    #[test]
    fn delete_first_exchange_without_answer() {
        let counter = counter();
        let mut conversation = Conversation::new("sys");
        conversation.append(Message::user("a")).unwrap();
        conversation.append(Message::user("b")).unwrap();
        let removed = conversation.delete_first_exchange(&counter).unwrap();
        assert_eq!(removed.removed, vec![Message::user("a")]);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn truncate_keeps_system() {
        let mut conversation = with_exchanges(3);
        conversation.truncate_to_system();
        assert_eq!(conversation.len(), 1);
        conversation.truncate(0);
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn replace_system_content() {
        let mut conversation = with_exchanges(1);
        conversation.replace_system_content("Be terse.").unwrap();
        assert_eq!(conversation.system_prompt(), "Be terse.");
        assert_eq!(conversation.len(), 3);
    }

    #[test]
    fn from_messages_validates() {
        assert!(Conversation::from_messages(vec![]).is_err());
        assert!(Conversation::from_messages(vec![Message::user("hi")]).is_err());
        assert!(
            Conversation::from_messages(vec![Message::system("a"), Message::system("b")]).is_err()
        );
        let conversation =
            Conversation::from_messages(vec![Message::system("a"), Message::user("b")]).unwrap();
        assert_eq!(conversation.first_question(), Some("b"));
    }

    #[test]
    fn last_reply_and_first_question() {
        let conversation = with_exchanges(2);
        assert_eq!(
            conversation.last_reply(),
            Some(&Message::assistant("answer number 1"))
        );
        assert_eq!(conversation.first_question(), Some("question 0"));
        assert_eq!(Conversation::new("s").last_reply(), None);
    }
}
