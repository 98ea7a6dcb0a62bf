//! # promptbook
//!
//! Small building blocks for LLM applications in Rust: greedy decoding over a local causal language model, prompt
//! templates, hosted chat endpoints, and a few recipes composed from them.
//!
//! ## Usage
//! `promptbook` is not released on crates.io. Add it as a path or git dependency in `Cargo.toml`
//! ```toml
//! promptbook = { path = "../promptbook" }
//! ```
//!
//! ## Concepts
//!
//! ### Decoding
//!
//! [`IncrementalDecoder`](crate::decoding::IncrementalDecoder) generates text greedily from any model implementing
//! [`CausalLm`](crate::decoding::CausalLm) and any tokenizer implementing [`Tokenizer`](crate::decoding::Tokenizer).
//! After the prompt is fed once, each step only feeds the newest token and carries the model's attention cache
//! forward. Decoding is also available step by step through
//! [`DecodeSteps`](crate::decoding::DecodeSteps), which is how the terminal printer streams tokens.
//!
//! ### Prompt Template and Placeholder
//!
//! A template is a prompt with named slots, for example
//!
//! ```text
//! You are a friendly and helpful assistant. Today is {{date}}.
//! ```
//!
//! `{{date}}` is a placeholder named `"date"`. A name can be any string without braces or line breaks.
//!
//! [`PromptTemplate::construct_prompt`](crate::prompt::PromptTemplate::construct_prompt) starts a
//! [`PartialPrompt`](crate::prompt::PartialPrompt), which records the value of every filled placeholder. Once no
//! placeholder is left, [`PartialPrompt::complete`](crate::prompt::PartialPrompt::complete) gives the final string.
//!
//! ### Endpoint
//!
//! A complete prompt goes to an LLM behind [`Complete`](crate::utils::llm::Complete). Replies can be post-processed
//! with the [utilities](crate::utils), e.g. parsed into JSON.
//!
//! ### Recipes
//!
//! A recipe is an ordered collection of templates, endpoint calls and post-processing stages. See
//! [`recipes`](crate::recipes).
//!
//! ## Attribution
//! * `tiktoken-rs`: In [crate::utils::token::tiktoken], we re-export parts of the `tiktoken-rs` crate.

pub mod decoding;
pub mod prompt;
pub mod catalog;
pub mod recipes;
pub mod utils;
