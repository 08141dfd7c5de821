use serde::{Deserialize, Serialize};

use crate::types::{Message, Role, Usage};

/// A complete (non-streamed) chat-completion response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletion {
    /// Server-assigned identifier of the completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The generated alternatives; only the first one is used.
    pub choices: Vec<CompletionChoice>,

    /// Token usage reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One alternative of a [`ChatCompletion`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ResponseMessage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The `message` object of a choice.  Servers may send `null` content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletion {
    /// A completion with one assistant choice.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: None,
            choices: vec![CompletionChoice {
                index: 0,
                message: ResponseMessage {
                    role: Some(Role::Assistant),
                    content: Some(content.into()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    /// The first choice's message as an assistant transcript entry.
    pub fn first_message(&self) -> Option<Message> {
        self.choices.first().map(|choice| {
            Message::new(
                choice.message.role.unwrap_or(Role::Assistant),
                choice.message.content.clone().unwrap_or_default(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_batch_response() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
        }))
        .unwrap();

        assert_eq!(completion.first_message(), Some(Message::assistant("hi")));
        assert_eq!(completion.usage.map(|u| u.total_tokens), Some(10));
    }

    #[test]
    fn null_content_becomes_empty() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert_eq!(completion.first_message(), Some(Message::assistant("")));
    }

    #[test]
    fn no_choices_yields_none() {
        let completion: ChatCompletion =
            serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(completion.first_message().is_none());
    }
}
