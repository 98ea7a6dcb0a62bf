use std::collections::{HashMap, HashSet};

use anyhow::Result;
use lazy_static::lazy_static;
use log::debug;
pub use tiktoken_rs::{get_bpe_from_model, CoreBPE};

use crate::decoding::errors::TokenizationError;
use crate::decoding::{Encoding, TokenId, Tokenizer};
use crate::utils::llm::ChatMessage;
use crate::utils::token::CountToken;
use crate::utils::token::tiktoken::errors::UnsupportedModel;

const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;
/// Ordinary ranks of `cl100k_base`, shared by gpt-4 and gpt-3.5-turbo, are `0..100256`.
const CL100K_ORDINARY_TOKENS: usize = 100_256;

lazy_static! {
    /// const map from model name to the size of its context window.
    pub static ref MODEL_TO_MAX_TOKENS: HashMap<&'static str, usize> = HashMap::from([
        ("gpt-4", 8192),
        ("gpt-4-0613", 8192),
        ("gpt-4-32k", 32768),
        ("gpt-4-32k-0613", 32768),
        ("gpt-3.5-turbo", 4096),
        ("gpt-3.5-turbo-16k", 16384),
        ("gpt-3.5-turbo-0613", 4096),
        ("gpt-3.5-turbo-16k-0613", 16384),
    ]);
}

/// BPE tokenizer of an OpenAI chat model. Counts tokens, and doubles as a [Tokenizer] for decoding.
#[derive(Clone)]
#[readonly::make]
pub struct Tiktoken {
    /// The model name as given. read-only.
    #[readonly]
    pub model: String,
    /// The tokenizer. read-only.
    #[readonly]
    pub bpe: CoreBPE,
    max_tokens: usize,
    special_ids: HashSet<usize>,
}

impl Tiktoken {
    /// Create a tokenizer for a chat model listed in [MODEL_TO_MAX_TOKENS].
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let max_tokens = *MODEL_TO_MAX_TOKENS.get(model.as_str())
            .ok_or_else(|| UnsupportedModel { model: model.clone() })?;
        // dated snapshots share the BPE of their family
        let family = if model.starts_with("gpt-4") {
            "gpt-4"
        } else {
            "gpt-3.5-turbo"
        };
        let bpe = get_bpe_from_model(family)?;
        let special_ids: HashSet<usize> = bpe.special_tokens()
            .into_iter()
            .flat_map(|special| bpe.encode_with_special_tokens(special))
            .map(|id| id as usize)
            .collect();
        debug!("loaded BPE of {} for model {} with {} special tokens", family, model, special_ids.len());
        Ok(Tiktoken {
            model,
            bpe,
            max_tokens,
            special_ids,
        })
    }

    /// Size of the context window of the model.
    #[inline]
    pub fn max_context_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Whether `token` is an ordinary or special id of the vocabulary.
    pub fn is_known_token(&self, token: TokenId) -> bool {
        let id = token as usize;
        id < CL100K_ORDINARY_TOKENS || self.special_ids.contains(&id)
    }

    /// Count the tokens a chat message occupies, following the OpenAI cookbook for non-legacy chat models.
    pub fn count_msg_token(&self, msg: &ChatMessage) -> usize {
        let name_token_count = if msg.name.is_some() { TOKENS_PER_NAME } else { 0 };
        self.count_token(&msg.content) + name_token_count + TOKENS_PER_MESSAGE
    }

    /// Drop the oldest messages until the conversation fits the context window.
    ///
    /// If `system_message` is given it always comes first and its budget is reserved up front. A leading system
    /// message in `messages` is replaced by it.
    pub fn truncate_messages(&self,
                             messages: &[ChatMessage],
                             system_message: Option<ChatMessage>) -> Result<Vec<ChatMessage>> {
        match system_message {
            Some(sys_msg) => {
                let sys_token_count = self.count_msg_token(&sys_msg);
                if sys_token_count > self.max_tokens {
                    anyhow::bail!("system message has {} tokens, more than the {} tokens {} can take",
                        sys_token_count, self.max_tokens, self.model);
                }
                let rest = match messages.first() {
                    Some(first) if first.role == sys_msg.role => &messages[1..],
                    _ => messages,
                };
                let start = self.get_truncate_start_idx(rest, self.max_tokens - sys_token_count);
                let mut truncated = Vec::with_capacity(rest.len() - start + 1);
                truncated.push(sys_msg);
                truncated.extend_from_slice(&rest[start..]);
                Ok(truncated)
            }
            None => {
                let start = self.get_truncate_start_idx(messages, self.max_tokens);
                Ok(messages[start..].to_vec())
            }
        }
    }

    /// Index of the oldest message kept when walking back from the newest within `max_tokens`.
    pub(crate) fn get_truncate_start_idx(&self, messages: &[ChatMessage], max_tokens: usize) -> usize {
        let mut token_count = 0;
        for (idx, msg) in messages.iter().enumerate().rev() {
            let message_token_count = self.count_msg_token(msg);
            if token_count + message_token_count > max_tokens {
                return idx + 1;
            }
            token_count += message_token_count;
        }
        0
    }
}

impl CountToken for Tiktoken {
    fn count_token(&self, string: &str) -> usize {
        self.bpe.encode_with_special_tokens(string).len()
    }
}

impl Tokenizer for Tiktoken {
    fn encode(&self, text: &str) -> Result<Encoding> {
        if text.is_empty() {
            return Err(TokenizationError::new(text, "cannot encode empty text").into());
        }
        let ids = self.bpe.encode_with_special_tokens(text)
            .into_iter()
            .map(|id| TokenId::try_from(id)
                .map_err(|_| TokenizationError::new(text, format!("token id {} does not fit in 32 bits", id))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Encoding::from_ids(ids))
    }

    /// A token outside the vocabulary, or one that is only part of a multi-byte character, fails.
    fn decode(&self, token: TokenId) -> Result<String> {
        if !self.is_known_token(token) {
            return Err(TokenizationError::new(format!("token {}", token), "token id is not in the vocabulary").into());
        }
        self.bpe.decode(vec![token])
            .map_err(|e| TokenizationError::new(format!("token {}", token), e.to_string()).into())
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when no tokenizer is known for a model.
    #[derive(Debug, Clone)]
    pub struct UnsupportedModel {
        pub model: String,
    }

    impl fmt::Display for UnsupportedModel {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnsupportedModel: no tokenizer is known for model {}", self.model)
        }
    }

    impl Error for UnsupportedModel {}
}
