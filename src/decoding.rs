//! # Decoding
//! Greedy autoregressive decoding that reuses the model's attention cache.
//!
//! ## Capabilities
//! The decoder does not own a model. It borrows two long-lived handles for the duration of one call:
//! * a [Tokenizer] that turns a prompt into an [Encoding] and a single token id back into text;
//! * a [CausalLm] whose [forward](CausalLm::forward) pass returns next-token [Logits] and an updated cache.
//!
//! The cache is an associated type of the model and is moved into each forward pass, so a cache produced by step
//! `i` can only ever be consumed by step `i + 1`.
//!
//! ## Incremental vs full-resequence decoding
//! The first forward pass sees the full prompt. Every later pass only sees the newest token plus the carried cache,
//! so the cost of a step does not grow with the sequence. [generate_full_resequence] is the naive reference that
//! pushes the whole sequence through the model at every step. Both must produce the same text.
//!
//! ```
//! use anyhow::Result;
//! use promptbook::decoding::{generate, AttentionMask, CausalLm, Encoding, Logits, TokenId, Tokenizer};
//!
//! /// Spells out the alphabet, one letter per token.
//! struct Alphabet;
//!
//! impl Tokenizer for Alphabet {
//!     fn encode(&self, text: &str) -> Result<Encoding> {
//!         Ok(Encoding::from_ids(text.bytes().map(|b| (b - b'a') as TokenId).collect()))
//!     }
//!     fn decode(&self, token: TokenId) -> Result<String> {
//!         Ok(((b'a' + token as u8) as char).to_string())
//!     }
//! }
//!
//! impl CausalLm for Alphabet {
//!     type Cache = TokenId;
//!     fn forward(&self, input_ids: &[TokenId], _: &AttentionMask, _: Option<TokenId>) -> Result<(Logits, TokenId)> {
//!         let last = *input_ids.last().unwrap();
//!         let mut logits = vec![0.0; 26];
//!         logits[(last as usize + 1) % 26] = 1.0;
//!         Ok((logits, last))
//!     }
//! }
//!
//! assert_eq!(generate(&Alphabet, &Alphabet, "abc", 3).unwrap(), "def");
//! ```

use std::iter::FusedIterator;

use anyhow::Result;
use log::{debug, trace};

use crate::decoding::errors::{ModelInferenceError, TokenizationError};

/// Identifier of a vocabulary entry.
pub type TokenId = u32;

/// Scores over the whole vocabulary for the next position, indexed by [TokenId].
pub type Logits = Vec<f32>;

/// One 0/1 flag per token the model has seen so far.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttentionMask(Vec<u8>);

impl AttentionMask {
    /// A mask attending to all of `len` tokens.
    pub fn ones(len: usize) -> Self {
        Self(vec![1; len])
    }

    /// Attend to one more token.
    #[inline]
    pub fn push_one(&mut self) {
        self.0.push(1);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Output of [Tokenizer::encode]: token ids and a mask of the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<TokenId>,
    pub attention_mask: AttentionMask,
}

impl Encoding {
    /// Build an encoding that attends to every id.
    pub fn from_ids(ids: Vec<TokenId>) -> Self {
        let attention_mask = AttentionMask::ones(ids.len());
        Self { ids, attention_mask }
    }
}

/// Text to tokens and back.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Encoding>;

    /// Decode a single token id into its text fragment.
    fn decode(&self, token: TokenId) -> Result<String>;
}

/// A pretrained causal language model.
pub trait CausalLm {
    /// Per-layer key/value state. Opaque to the decoder, which only forwards it.
    type Cache;

    /// Run one forward pass.
    ///
    /// `input_ids` are the tokens not yet covered by `cache`; `attention_mask` covers the cached tokens and the
    /// inputs. Returns the logits for the position after the last input and the cache extended by the inputs.
    fn forward(&self,
               input_ids: &[TokenId],
               attention_mask: &AttentionMask,
               cache: Option<Self::Cache>) -> Result<(Logits, Self::Cache)>;
}

/// Index of the highest score. Ties resolve to the lowest index, NaN scores are ignored.
pub fn argmax(logits: &[f32]) -> Option<TokenId> {
    logits.iter()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (idx, &score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
        .and_then(|(idx, _)| TokenId::try_from(idx).ok())
}

/// A generated token and its decoded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub id: TokenId,
    pub text: String,
}

/// Iterator over greedy decode steps, one token per item.
///
/// Created by [IncrementalDecoder::steps]. The prompt is tokenized up front; the first forward pass runs on the
/// first call to `next`. After an error the iterator is exhausted.
pub struct DecodeSteps<'a, M: CausalLm, T: Tokenizer> {
    model: &'a M,
    tokenizer: &'a T,
    sequence: Vec<TokenId>,
    attention_mask: AttentionMask,
    cache: Option<M::Cache>,
    remaining: usize,
    steps_taken: usize,
    failed: bool,
}

impl<'a, M: CausalLm, T: Tokenizer> DecodeSteps<'a, M, T> {
    fn new(model: &'a M, tokenizer: &'a T, prompt: &str, max_tokens: usize) -> Result<Self> {
        let encoding = encode_prompt(tokenizer, prompt)?;
        Ok(Self {
            model,
            tokenizer,
            sequence: encoding.ids,
            attention_mask: encoding.attention_mask,
            cache: None,
            remaining: max_tokens,
            steps_taken: 0,
            failed: false,
        })
    }

    /// Prompt tokens followed by every token generated so far.
    pub fn tokens(&self) -> &[TokenId] {
        &self.sequence
    }

    pub fn attention_mask(&self) -> &AttentionMask {
        &self.attention_mask
    }

    /// Number of decode steps completed.
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    fn step(&mut self) -> Result<DecodedToken> {
        let step = self.steps_taken;
        // the cache already covers everything but the newest token
        let input_ids = match self.cache {
            None => &self.sequence[..],
            Some(_) => &self.sequence[self.sequence.len() - 1..],
        };
        let (logits, cache) = self.model
            .forward(input_ids, &self.attention_mask, self.cache.take())
            .map_err(|e| ModelInferenceError::new(step, e.to_string()))?;
        let next_id = argmax(&logits)
            .ok_or_else(|| ModelInferenceError::new(step, "forward pass returned no usable logits"))?;

        self.sequence.push(next_id);
        self.attention_mask.push_one();
        self.cache = Some(cache);
        self.steps_taken += 1;

        let text = self.tokenizer.decode(next_id)?;
        debug!("decode step {} chose token {}", step, next_id);
        trace!("decode step {} text {:?}", step, text);
        Ok(DecodedToken { id: next_id, text })
    }
}

impl<'a, M: CausalLm, T: Tokenizer> Iterator for DecodeSteps<'a, M, T> {
    type Item = Result<DecodedToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let result = self.step();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.remaining))
        }
    }
}

impl<'a, M: CausalLm, T: Tokenizer> FusedIterator for DecodeSteps<'a, M, T> {}

/// Greedy decoder borrowing a model and its tokenizer.
#[derive(Debug)]
pub struct IncrementalDecoder<'a, M: CausalLm, T: Tokenizer> {
    pub model: &'a M,
    pub tokenizer: &'a T,
}

impl<'a, M: CausalLm, T: Tokenizer> Clone for IncrementalDecoder<'a, M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: CausalLm, T: Tokenizer> Copy for IncrementalDecoder<'a, M, T> {}

impl<'a, M: CausalLm, T: Tokenizer> IncrementalDecoder<'a, M, T> {
    pub fn new(model: &'a M, tokenizer: &'a T) -> Self {
        Self { model, tokenizer }
    }

    /// Decode step by step, reusing the cache. Fails with [TokenizationError] if the prompt cannot be tokenized.
    pub fn steps(&self, prompt: &str, max_tokens: usize) -> Result<DecodeSteps<'a, M, T>> {
        DecodeSteps::new(self.model, self.tokenizer, prompt, max_tokens)
    }

    /// Generate exactly `max_tokens` tokens and return their concatenated text.
    pub fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.steps(prompt, max_tokens)?
            .map(|step| step.map(|token| token.text))
            .collect()
    }

    /// Like [generate](Self::generate), but without the cache. See [generate_full_resequence].
    pub fn generate_full_resequence(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        generate_full_resequence(self.model, self.tokenizer, prompt, max_tokens)
    }
}

/// Generate exactly `max_tokens` tokens greedily with cache reuse and return their concatenated text.
///
/// Errors are [TokenizationError] for a prompt that cannot be tokenized and [ModelInferenceError] for a failed
/// forward pass. Nothing is retried.
pub fn generate<M: CausalLm, T: Tokenizer>(model: &M, tokenizer: &T, prompt: &str, max_tokens: usize) -> Result<String> {
    IncrementalDecoder::new(model, tokenizer).generate(prompt, max_tokens)
}

/// Reference decoder that feeds the entire growing sequence through the model at every step, never passing a cache.
///
/// Quadratic in the number of tokens. Exists to check that [generate] produces the same text.
pub fn generate_full_resequence<M: CausalLm, T: Tokenizer>(model: &M,
                                                           tokenizer: &T,
                                                           prompt: &str,
                                                           max_tokens: usize) -> Result<String> {
    let mut sequence = encode_prompt(tokenizer, prompt)?.ids;
    let mut output = String::new();
    for step in 0..max_tokens {
        let attention_mask = AttentionMask::ones(sequence.len());
        let (logits, _) = model
            .forward(&sequence, &attention_mask, None)
            .map_err(|e| ModelInferenceError::new(step, e.to_string()))?;
        let next_id = argmax(&logits)
            .ok_or_else(|| ModelInferenceError::new(step, "forward pass returned no usable logits"))?;
        sequence.push(next_id);
        output.push_str(&tokenizer.decode(next_id)?);
    }
    Ok(output)
}

fn encode_prompt<T: Tokenizer>(tokenizer: &T, prompt: &str) -> Result<Encoding> {
    if prompt.is_empty() {
        return Err(TokenizationError::new(prompt, "prompt is empty").into());
    }
    let encoding = tokenizer.encode(prompt)?;
    if encoding.ids.is_empty() {
        return Err(TokenizationError::new(prompt, "prompt produced no tokens").into());
    }
    if encoding.attention_mask.len() != encoding.ids.len() {
        return Err(TokenizationError::new(prompt, "attention mask length differs from token count").into());
    }
    Ok(encoding)
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when a forward pass of the model fails. Fatal to the whole decode call.
    #[derive(Debug, Clone)]
    pub struct ModelInferenceError {
        /// Zero-based decode step at which the forward pass failed
        pub step: usize,
        pub reason: String,
    }

    impl ModelInferenceError {
        pub(crate) fn new(step: usize, reason: impl Into<String>) -> Self {
            Self {
                step,
                reason: reason.into(),
            }
        }
    }

    impl fmt::Display for ModelInferenceError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "ModelInferenceError: forward pass failed at decode step {}: {}", self.step, self.reason)
        }
    }

    impl Error for ModelInferenceError {}

    /// Error when text cannot be turned into tokens, or a token cannot be turned back into text.
    #[derive(Debug, Clone)]
    pub struct TokenizationError {
        pub input: String,
        pub reason: String,
    }

    impl TokenizationError {
        pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
            Self {
                input: input.into(),
                reason: reason.into(),
            }
        }
    }

    impl fmt::Display for TokenizationError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "TokenizationError: {} (input = {:?})", self.reason, self.input)
        }
    }

    impl Error for TokenizationError {}
}
