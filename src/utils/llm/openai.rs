//! Hosted chat models from OpenAI or Azure OpenAI, through `async_openai`.
//!
//! Configuration comes from the environment:
//!
//! | variable | meaning |
//! |---|---|
//! | `OPENAI_API_TYPE` | `azure` or `open_ai` (default) |
//! | `OPENAI_API_BASE` | API base URL, required for Azure |
//! | `OPENAI_API_VERSION` | API version, required for Azure |
//! | `OPENAI_API_KEY` | API key, always required |
//! | `OPENAI_DEPLOYMENT` | Azure deployment name, `gpt4` by default |

use anyhow::{bail, Context, Result};
use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
    CreateModerationRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::utils::llm::errors::{EndpointError, EndpointErrorKind, MissingEnvVar};
use crate::utils::llm::{ChatMessage, ChatRole, Complete, Moderate};

pub const DEFAULT_AZURE_DEPLOYMENT: &str = "gpt4";

/// Which flavor of the API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiType {
    OpenAI,
    Azure,
}

/// Where and how to reach the API.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub api_type: ApiType,
    pub api_base: Option<Url>,
    pub api_version: Option<String>,
    pub api_key: String,
    /// Azure deployment name. Ignored by OpenAI.
    pub deployment: String,
}

impl EndpointConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration with a custom variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| lookup(name).ok_or_else(|| MissingEnvVar { name: name.to_string() });

        let api_type = match lookup("OPENAI_API_TYPE").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("open_ai") | Some("openai") => ApiType::OpenAI,
            Some("azure") | Some("azure_ad") => ApiType::Azure,
            Some(other) => bail!("OPENAI_API_TYPE must be azure or open_ai, got {}", other),
        };
        let api_base = lookup("OPENAI_API_BASE")
            .map(|base| Url::parse(&base).with_context(|| format!("OPENAI_API_BASE is not a valid URL: {}", base)))
            .transpose()?;
        let api_key = require("OPENAI_API_KEY")?;
        let (api_base, api_version) = match api_type {
            ApiType::OpenAI => (api_base, lookup("OPENAI_API_VERSION")),
            ApiType::Azure => {
                let api_base = api_base.ok_or_else(|| MissingEnvVar { name: "OPENAI_API_BASE".to_string() })?;
                (Some(api_base), Some(require("OPENAI_API_VERSION")?))
            }
        };
        let deployment = lookup("OPENAI_DEPLOYMENT").unwrap_or_else(|| DEFAULT_AZURE_DEPLOYMENT.to_string());
        Ok(Self {
            api_type,
            api_base,
            api_version,
            api_key,
            deployment,
        })
    }

    fn api_base_str(&self) -> Option<&str> {
        self.api_base.as_ref().map(|url| url.as_str().trim_end_matches('/'))
    }
}

/// Sampling settings of a chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u16,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    OpenAI(Client<OpenAIConfig>),
    Azure(Client<AzureConfig>),
}

/// A chat model behind the hosted API.
#[derive(Debug, Clone)]
pub struct ChatEndpoint {
    backend: Backend,
    pub settings: ChatSettings,
}

impl ChatEndpoint {
    pub fn new(config: &EndpointConfig, settings: ChatSettings) -> Self {
        let backend = match config.api_type {
            ApiType::OpenAI => {
                let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.as_str());
                if let Some(api_base) = config.api_base_str() {
                    openai_config = openai_config.with_api_base(api_base);
                }
                Backend::OpenAI(Client::with_config(openai_config))
            }
            ApiType::Azure => {
                let mut azure_config = AzureConfig::new()
                    .with_api_key(config.api_key.as_str())
                    .with_deployment_id(config.deployment.as_str());
                if let Some(api_base) = config.api_base_str() {
                    azure_config = azure_config.with_api_base(api_base);
                }
                if let Some(api_version) = &config.api_version {
                    azure_config = azure_config.with_api_version(api_version.as_str());
                }
                Backend::Azure(Client::with_config(azure_config))
            }
        };
        Self { backend, settings }
    }

    /// Configure from the environment, see [EndpointConfig::from_env].
    pub fn from_env(settings: ChatSettings) -> Result<Self> {
        Ok(Self::new(&EndpointConfig::from_env()?, settings))
    }

    /// Same endpoint with other settings.
    pub fn with_settings(&self, settings: ChatSettings) -> Self {
        Self {
            backend: self.backend.clone(),
            settings,
        }
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let request_message = match message.role {
        ChatRole::System => {
            let mut builder = ChatCompletionRequestSystemMessageArgs::default();
            builder.content(message.content.as_str());
            if let Some(name) = &message.name {
                builder.name(name.as_str());
            }
            builder.build()?.into()
        }
        ChatRole::User => {
            let mut builder = ChatCompletionRequestUserMessageArgs::default();
            builder.content(message.content.as_str());
            if let Some(name) = &message.name {
                builder.name(name.as_str());
            }
            builder.build()?.into()
        }
        ChatRole::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(message.content.as_str());
            if let Some(name) = &message.name {
                builder.name(name.as_str());
            }
            builder.build()?.into()
        }
    };
    Ok(request_message)
}

async fn create_chat<C: Config>(client: &Client<C>,
                                settings: &ChatSettings,
                                messages: &[ChatMessage]) -> Result<String, OpenAIError> {
    let messages = messages.iter()
        .map(to_request_message)
        .collect::<Result<Vec<_>, _>>()?;
    let request = CreateChatCompletionRequestArgs::default()
        .model(settings.model.as_str())
        .messages(messages)
        .temperature(settings.temperature)
        .max_tokens(settings.max_tokens)
        .build()?;
    let response = client.chat().create(request).await?;
    Ok(response.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default())
}

async fn create_moderation<C: Config>(client: &Client<C>, text: &str) -> Result<bool, OpenAIError> {
    let request = CreateModerationRequestArgs::default()
        .input(text)
        .build()?;
    let response = client.moderations().create(request).await?;
    Ok(response.results.iter().any(|result| result.flagged))
}

impl From<OpenAIError> for EndpointError {
    fn from(error: OpenAIError) -> Self {
        match error {
            OpenAIError::ApiError(api_error) => {
                let kind = match api_error.r#type.as_deref() {
                    Some("invalid_request_error") => EndpointErrorKind::InvalidRequest,
                    _ => EndpointErrorKind::Api,
                };
                EndpointError::new(kind, api_error.message)
            }
            other => EndpointError::new(EndpointErrorKind::Transport, other.to_string()),
        }
    }
}

#[async_trait]
impl Complete for ChatEndpoint {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("requesting chat completion from {} with {} messages", self.settings.model, messages.len());
        let reply = match &self.backend {
            Backend::OpenAI(client) => create_chat(client, &self.settings, messages).await,
            Backend::Azure(client) => create_chat(client, &self.settings, messages).await,
        };
        reply.map_err(|e| EndpointError::from(e).into())
    }
}

#[async_trait]
impl Moderate for ChatEndpoint {
    async fn moderate(&self, text: &str) -> Result<bool> {
        let flagged = match &self.backend {
            Backend::OpenAI(client) => create_moderation(client, text).await,
            Backend::Azure(client) => create_moderation(client, text).await,
        };
        flagged.map_err(|e| EndpointError::from(e).into())
    }
}
