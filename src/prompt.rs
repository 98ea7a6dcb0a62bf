//! # Prompt
//! A prompt is simply a string.
//! ## PromptTemplate
//! A prompt template is a string with placeholders. It can also have metadata in JSON format.
//!
//! ## Placeholder
//! A placeholder is a string in the format of `{{name}}`. The name is anything between the double braces except
//! braces and line breaks.
//!
//! ## PartialPrompt
//! A partial prompt is a prompt template with some placeholders filled. It can be only constructed via
//! [PromptTemplate::construct_prompt]. Fill it with [PartialPrompt::fill], then turn it into a string with
//! [PartialPrompt::complete]. Filling values are inserted literally, so a value that itself looks like `{{x}}` stays
//! as is.
//!
//! ```
//! use promptbook::prompt::PromptTemplate;
//!
//! let template = PromptTemplate::new("{{delimiter}}{{query}}{{delimiter}}");
//! let prompt = template.construct_prompt()
//!     .fill("delimiter", "####").unwrap()
//!     .fill("query", "Which TV can I buy if I'm on a budget?").unwrap()
//!     .complete()
//!     .unwrap();
//! assert_eq!(prompt, "####Which TV can I buy if I'm on a budget?####");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::warn;
use regex::{Captures, Regex};

use crate::prompt::errors::{PlaceholderNotExist, UnfilledPlaceholders};
use crate::utils::JsonMap;
use crate::utils::token::CountToken;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{([^{}\r\n]+)\}\}").unwrap();
}

/// Names of all placeholders in a string.
pub fn get_placeholders(string: &str) -> HashSet<String> {
    PLACEHOLDER_RE.captures_iter(string)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Replace every placeholder that has a value in `mapping`; the others are left untouched.
fn replace_placeholders(template: &str, mapping: &HashMap<String, Option<String>>) -> String {
    PLACEHOLDER_RE.replace_all(template, |captures: &Captures| {
        match mapping.get(&captures[1]) {
            Some(Some(value)) => value.clone(),
            _ => captures[0].to_string(),
        }
    }).into_owned()
}

/// A prompt template with some placeholders filled. A partial prompt can be only constructed from a prompt template via [PromptTemplate::construct_prompt].
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PartialPrompt {
    /// The template of the partial prompt, readonly
    #[readonly]
    pub template: PromptTemplate,

    /// Mapping from placeholder name to its filling value
    placeholder_to_vals: HashMap<String, Option<String>>,
}

impl PartialPrompt {
    /// Fill a placeholder, or overwrite its previous value.
    /// Returns an error if the placeholder does not exist.
    pub fn fill(&mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Result<&mut Self, PlaceholderNotExist> {
        let placeholder = placeholder.into();
        match self.placeholder_to_vals.get_mut(&placeholder) {
            Some(slot) => {
                *slot = Some(value.into());
                Ok(self)
            }
            None => Err(PlaceholderNotExist::new(placeholder, value, &self.template.placeholders))
        }
    }

    /// Placeholders that have no value yet, sorted by name.
    pub fn unfilled_placeholders(&self) -> Vec<String> {
        let mut unfilled: Vec<String> = self.placeholder_to_vals.iter()
            .filter(|(_, v)| v.is_none())
            .map(|(p, _)| p.clone())
            .collect();
        unfilled.sort();
        unfilled
    }

    /// Count the number of tokens in the prompt as it is now. Unfilled placeholders are counted as written, e.g. `{{name}}`.
    pub fn current_token_num(&self, counter: &impl CountToken) -> usize {
        counter.count_token(&replace_placeholders(self.template.str(), &self.placeholder_to_vals))
    }

    /// Complete the partial prompt and return the completed prompt.
    /// Returns an error if there are still unfilled placeholders.
    pub fn complete(&self) -> Result<String, UnfilledPlaceholders> {
        let unfilled = self.unfilled_placeholders();
        if unfilled.is_empty() {
            Ok(replace_placeholders(self.template.str(), &self.placeholder_to_vals))
        } else {
            let mut all_placeholders: Vec<String> = self.template.placeholders.iter().cloned().collect();
            all_placeholders.sort();
            Err(UnfilledPlaceholders {
                all_placeholders,
                unfilled_placeholders: unfilled,
            })
        }
    }
}

/// A prompt template with placeholders. It can also have metadata in JSON format.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PromptTemplate {
    template: Arc<String>,

    /// The placeholders in the template, readonly
    #[readonly]
    pub placeholders: HashSet<String>,

    /// The metadata of the prompt template, readonly
    #[readonly]
    pub meta_data: Arc<JsonMap>,
}

impl PromptTemplate {
    /// Create a prompt template from a string without metadata.
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_metadata(template, JsonMap::new())
    }

    /// Create a prompt template from a string with metadata. Warns if the template does not have any placeholder.
    pub fn with_metadata(template: impl Into<String>, metadata: JsonMap) -> Self {
        let template = template.into();
        let placeholders = get_placeholders(&template);
        if placeholders.is_empty() {
            warn!("Your prompt template does not have a placeholder. If this is intended, ignore this message. \
            Otherwise, check whether you have written placeholders correctly.\n\
            Got prompt template:\n\
            {}", template);
        }
        Self {
            template: Arc::new(template),
            meta_data: Arc::new(metadata),
            placeholders,
        }
    }

    /// Get the prompt template as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.template
    }

    /// Construct a partial prompt from the prompt template.
    pub fn construct_prompt(&self) -> PartialPrompt {
        PartialPrompt {
            template: self.clone(),
            placeholder_to_vals: self.placeholders.iter().map(|p| (p.clone(), None)).collect(),
        }
    }
}

pub mod errors {
    use std::collections::HashSet;
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when trying to complete a partial prompt but there are still unfilled placeholders.
    #[derive(Debug, Clone)]
    pub struct UnfilledPlaceholders {
        pub unfilled_placeholders: Vec<String>,
        pub all_placeholders: Vec<String>,
    }

    impl fmt::Display for UnfilledPlaceholders {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnfilledPlaceholders: to complete the prompt template,\n  Requires Placeholders:{:?}\n  Unfilled Placeholders:{:?}",
                   self.all_placeholders, self.unfilled_placeholders)
        }
    }

    impl Error for UnfilledPlaceholders {}

    /// Error when trying to fill a placeholder that does not exist in the prompt template of the partial prompt.
    #[derive(Debug, Clone)]
    pub struct PlaceholderNotExist {
        pub try_fill_placeholder: String,
        pub value: String,
        pub available_placeholders: Vec<String>,
    }

    impl PlaceholderNotExist {
        pub(crate) fn new(try_fill_placeholder: impl Into<String>,
                          value: impl Into<String>,
                          available_placeholders: &HashSet<String>) -> Self {
            let mut available_placeholders: Vec<String> = available_placeholders.iter().cloned().collect();
            available_placeholders.sort();
            PlaceholderNotExist {
                try_fill_placeholder: try_fill_placeholder.into(),
                value: value.into(),
                available_placeholders,
            }
        }
    }

    impl fmt::Display for PlaceholderNotExist {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "PlaceholderNotExist: try to fill placeholder = {} with value = {}, but available placeholders are {:?}",
                   self.try_fill_placeholder,
                   self.value,
                   self.available_placeholders)
        }
    }

    impl Error for PlaceholderNotExist {}
}

#[cfg(test)]
mod test_prompt {
    use std::collections::HashSet;

    use super::{get_placeholders, PromptTemplate};
    use crate::utils::token::count_tokens_by_len;

    #[test]
    fn test_get_placeholders() {
        let keys = get_placeholders("{{a}}");
        assert_eq!(HashSet::from(["a".to_string()]), keys);

        let keys = get_placeholders("{{a\n}}");
        assert_eq!(0, keys.len());

        let keys = get_placeholders("{{a}}    {{b}} and {{a}}");
        assert_eq!(HashSet::from(["a".to_string(), "b".to_string()]), keys);

        let keys = get_placeholders("{a} {[b]} {{}}");
        assert_eq!(0, keys.len());
    }

    #[test]
    fn test_fill_and_complete() {
        let template = PromptTemplate::new("{{a}} and {{b}} and {{a}}");
        let mut prompt = template.construct_prompt();
        prompt.fill("a", "alice").unwrap();
        let error = prompt.complete().expect_err("b is unfilled");
        assert_eq!(vec!["b".to_string()], error.unfilled_placeholders);
        assert_eq!(vec!["a".to_string(), "b".to_string()], error.all_placeholders);

        prompt.fill("b", "bob").unwrap();
        assert_eq!("alice and bob and alice", prompt.complete().unwrap());

        // refilling overwrites
        prompt.fill("a", "carol").unwrap();
        assert_eq!("carol and bob and carol", prompt.complete().unwrap());
    }

    #[test]
    fn test_fill_unknown_placeholder() {
        let template = PromptTemplate::new("hello {{name}}");
        let mut prompt = template.construct_prompt();
        let error = prompt.fill("date", "today").err().expect("date is not a placeholder");
        assert_eq!("date", error.try_fill_placeholder);
        assert_eq!(vec!["name".to_string()], error.available_placeholders);
    }

    #[test]
    fn test_values_are_literal() {
        let template = PromptTemplate::new("{{a}}|{{b}}");
        let prompt = template.construct_prompt()
            .fill("a", "{{b}}").unwrap()
            .fill("b", "x").unwrap()
            .complete()
            .unwrap();
        assert_eq!("{{b}}|x", prompt);
    }

    #[test]
    fn test_current_token_num() {
        let template = PromptTemplate::new("hi {{name}}");
        let mut prompt = template.construct_prompt();
        assert_eq!("hi {{name}}".len(), prompt.current_token_num(&count_tokens_by_len));
        prompt.fill("name", "bo").unwrap();
        assert_eq!("hi bo".len(), prompt.current_token_num(&count_tokens_by_len));
    }

    #[test]
    fn test_no_placeholder() {
        let template = PromptTemplate::new("static text");
        assert!(template.placeholders.is_empty());
        assert_eq!("static text", template.construct_prompt().complete().unwrap());
    }
}
