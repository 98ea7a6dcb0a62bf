//! # LLM endpoints
//!
//! Recipes talk to a chat model through the [Complete] trait and to a moderation model through [Moderate], so any
//! backend (or a scripted fake in tests) can stand behind them. The hosted implementation lives in [openai].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod openai;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message, serialized as `{"role": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

//TODO: when async fn in trait is usable with dyn, remove async_trait macro

/// Anything that turns a conversation into the next assistant message.
#[async_trait]
pub trait Complete {
    /// Returns the content of the first choice. An empty string if the model sent no content.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Anything that can tell whether a text violates a content policy.
#[async_trait]
pub trait Moderate {
    /// Returns true if the text is flagged.
    async fn moderate(&self, text: &str) -> Result<bool>;
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// What went wrong when calling an endpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum EndpointErrorKind {
        /// The endpoint rejected the request itself, e.g. the prompt is too long or was filtered.
        InvalidRequest,
        /// Any other error reported by the endpoint.
        Api,
        /// The request never got a well-formed answer.
        Transport,
    }

    /// Error returned by an LLM endpoint.
    #[derive(Debug, Clone)]
    pub struct EndpointError {
        pub kind: EndpointErrorKind,
        pub message: String,
    }

    impl EndpointError {
        pub fn new(kind: EndpointErrorKind, message: impl Into<String>) -> Self {
            Self {
                kind,
                message: message.into(),
            }
        }

        pub fn invalid_request(message: impl Into<String>) -> Self {
            Self::new(EndpointErrorKind::InvalidRequest, message)
        }

        #[inline]
        pub fn is_invalid_request(&self) -> bool {
            self.kind == EndpointErrorKind::InvalidRequest
        }
    }

    impl fmt::Display for EndpointError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "EndpointError ({:?}): {}", self.kind, self.message)
        }
    }

    impl Error for EndpointError {}

    /// Error when a required environment variable is not set.
    #[derive(Debug, Clone)]
    pub struct MissingEnvVar {
        pub name: String,
    }

    impl fmt::Display for MissingEnvVar {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MissingEnvVar: environment variable {} is required but not set", self.name)
        }
    }

    impl Error for MissingEnvVar {}
}

#[cfg(test)]
mod test_llm {
    use super::{ChatMessage, ChatRole};

    #[test]
    fn test_message_json_shape() {
        let msg = ChatMessage::system("be nice");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be nice"}));

        let msg: ChatMessage = serde_json::from_str(r#"{"role":"assistant","content":"hi","name":"bot"}"#).unwrap();
        assert_eq!(ChatRole::Assistant, msg.role);
        assert_eq!(Some("bot".to_string()), msg.name);
    }
}
