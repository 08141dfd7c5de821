use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Represents a chat-completion model identifier.
///
/// This can be a predefined model or a custom string value for models the
/// crate does not know about.  Custom models have no known token limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Model {
    /// Known model versions
    Known(KnownModel),

    /// Custom model identifier (fine-tunes, local models, future models)
    Custom(String),
}

/// Known model versions
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KnownModel {
    /// GPT-3.5 Turbo
    Gpt35Turbo,

    /// GPT-3.5 Turbo (2023-03-01 snapshot)
    Gpt35Turbo0301,

    /// GPT-3.5 Turbo with the 16k context window
    Gpt35Turbo16k,

    /// GPT-4
    Gpt4,

    /// GPT-4 (2023-03-14 snapshot)
    Gpt40314,

    /// GPT-4 with the 32k context window
    Gpt432k,

    /// GPT-4 32k (2023-03-14 snapshot)
    Gpt432k0314,
}

impl KnownModel {
    /// Every known model, in the order offered for completion.
    pub const ALL: [KnownModel; 7] = [
        KnownModel::Gpt35Turbo,
        KnownModel::Gpt35Turbo0301,
        KnownModel::Gpt35Turbo16k,
        KnownModel::Gpt4,
        KnownModel::Gpt40314,
        KnownModel::Gpt432k,
        KnownModel::Gpt432k0314,
    ];

    /// The wire identifier of the model.
    pub fn as_str(&self) -> &'static str {
        match self {
            KnownModel::Gpt35Turbo => "gpt-3.5-turbo",
            KnownModel::Gpt35Turbo0301 => "gpt-3.5-turbo-0301",
            KnownModel::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
            KnownModel::Gpt4 => "gpt-4",
            KnownModel::Gpt40314 => "gpt-4-0314",
            KnownModel::Gpt432k => "gpt-4-32k",
            KnownModel::Gpt432k0314 => "gpt-4-32k-0314",
        }
    }
}

/// Returns the context-window ceiling for a model identifier.
///
/// Tiers are selected by substring so dated snapshots inherit their family's
/// limit.  Longer family names are checked first.
pub fn tokens_limit_for(model: &str) -> Option<u32> {
    if model.contains("gpt-4-32k") {
        Some(32768)
    } else if model.contains("gpt-3.5-turbo-16k") {
        Some(16384)
    } else if model.contains("gpt-4") {
        Some(8192)
    } else if model.contains("gpt-3.5-turbo") {
        Some(4096)
    } else {
        None
    }
}

impl Model {
    /// The wire identifier of the model.
    pub fn as_str(&self) -> &str {
        match self {
            Model::Known(known) => known.as_str(),
            Model::Custom(custom) => custom,
        }
    }

    /// The context-window ceiling for this model, if it is known.
    pub fn tokens_limit(&self) -> Option<u32> {
        tokens_limit_for(self.as_str())
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::Known(KnownModel::Gpt35Turbo)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for KnownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(KnownModel::ALL
            .iter()
            .find(|known| known.as_str() == s)
            .map(|known| Model::Known(*known))
            .unwrap_or_else(|| Model::Custom(s.to_string())))
    }
}

impl From<KnownModel> for Model {
    fn from(known: KnownModel) -> Self {
        Model::Known(known)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.parse() {
            Ok(model) => Ok(model),
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_and_custom_models() {
        assert_eq!(
            "gpt-4".parse::<Model>().unwrap(),
            Model::Known(KnownModel::Gpt4)
        );
        assert_eq!(
            "my-finetune".parse::<Model>().unwrap(),
            Model::Custom("my-finetune".to_string())
        );
    }

    #[test]
    fn token_limit_tiers() {
        assert_eq!(tokens_limit_for("gpt-3.5-turbo"), Some(4096));
        assert_eq!(tokens_limit_for("gpt-3.5-turbo-0301"), Some(4096));
        assert_eq!(tokens_limit_for("gpt-3.5-turbo-16k"), Some(16384));
        assert_eq!(tokens_limit_for("gpt-4"), Some(8192));
        assert_eq!(tokens_limit_for("gpt-4-0314"), Some(8192));
        assert_eq!(tokens_limit_for("gpt-4-32k-0314"), Some(32768));
        assert_eq!(tokens_limit_for("llama3"), None);
    }

    #[test]
    fn model_serializes_as_plain_string() {
        let json = serde_json::to_string(&Model::Known(KnownModel::Gpt432k)).unwrap();
        assert_eq!(json, "\"gpt-4-32k\"");
        let model: Model = serde_json::from_str("\"llama3\"").unwrap();
        assert_eq!(model, Model::Custom("llama3".to_string()));
    }
}
