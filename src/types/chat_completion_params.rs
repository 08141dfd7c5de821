use serde::{Deserialize, Serialize};

use crate::types::{Message, Model};

/// Default sampling temperature for conversation turns.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Request body for the chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionParams {
    /// The model that will complete the conversation.
    pub model: Model,

    /// The full transcript, system message first.
    pub messages: Vec<Message>,

    /// Whether the reply is delivered as a server-sent-event stream.
    pub stream: bool,

    /// Sampling temperature in `0.0..=2.0`.
    pub temperature: f32,
}

impl ChatCompletionParams {
    /// Create a new batch request with the default temperature.
    pub fn new(model: Model, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            stream: false,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Set whether the reply is streamed.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownModel;
    use serde_json::{json, to_value};

    #[test]
    fn request_body_shape() {
        let params = ChatCompletionParams::new(
            Model::Known(KnownModel::Gpt35Turbo),
            vec![Message::system("be brief"), Message::user("hello")],
        )
        .with_stream(true)
        .with_temperature(0.5);

        assert_eq!(
            to_value(&params).unwrap(),
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ],
                "stream": true,
                "temperature": 0.5
            })
        );
    }
}
