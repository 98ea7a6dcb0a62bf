use std::error::Error;
use std::fmt;
use std::fmt::Formatter;

use anyhow::Result;
use serde_json::{from_str, Value};


/// Filters invalid content and tries to parse the valid json object.
///
/// Returns a [serde_json::Value] if the string contains a valid json object else an [InvalidJSON] error.
///
/// # Example
/// ```
/// use promptbook::utils::postprocess::json::filter_to_json;
/// let valid_str = "partially valid: {\"a\":\"alice\"}";
/// let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
/// assert_eq!(json_value["a"], "alice");
///
/// let invalid_str = "partially valid: \"a\":\"alice\"}";
/// assert_eq!(filter_to_json(invalid_str).is_err(), true)
/// ```
pub fn filter_to_json(string: impl Into<String>) -> Result<Value> {
    extract_between(string.into(), '{', '}')
}

/// Filters invalid content and tries to parse a json list, as chat models often reply with Python-style lists.
///
/// Single quotes are replaced with double quotes before parsing, so a string value must not contain an apostrophe.
///
/// # Example
/// ```
/// use promptbook::utils::postprocess::json::filter_to_json_list;
/// let reply = "Sure! [{'category': 'Cameras and Camcorders'}]";
/// let json_value = filter_to_json_list(reply).expect("Expect to be fine but failed");
/// assert_eq!(json_value[0]["category"], "Cameras and Camcorders");
/// ```
pub fn filter_to_json_list(string: impl Into<String>) -> Result<Value> {
    extract_between(string.into().replace('\'', "\""), '[', ']')
}

fn extract_between(string: String, open: char, close: char) -> Result<Value> {
    let open_idx = string.find(open);
    let close_idx = string.rfind(close);
    match (open_idx, close_idx) {
        (Some(oi), Some(ci)) if oi < ci => {
            let valid_json = &string[oi..ci + 1];
            match from_str(valid_json) {
                Ok(value) => Ok(value),
                Err(e) => Err(InvalidJSON { invalid_string: string, reason: Some(e.to_string()) }.into())
            }
        }
        _ => Err(InvalidJSON { invalid_string: string, reason: None }.into())
    }
}

/// Error when the string is not a valid json.
#[derive(Debug, Clone)]
pub struct InvalidJSON {
    pub invalid_string: String,
    /// Parser message, if a candidate was found at all
    pub reason: Option<String>,
}


impl fmt::Display for InvalidJSON {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "Invalid string to be parsed ({}):\n{}", reason, self.invalid_string),
            None => write!(f, "Invalid string to be parsed:\n{}", self.invalid_string),
        }
    }
}

impl Error for InvalidJSON {}


#[cfg(test)]
mod test_json {
    use super::{filter_to_json, filter_to_json_list, InvalidJSON};

    #[test]
    fn test_filter_to_json() {
        let valid_str = "{\"a\":\"alice\"}";
        let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
        assert_eq!(json_value["a"], "alice");

        let valid_str = "Here is the result you ask for: {\"a\":\"alice\"}";
        let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
        assert_eq!(json_value["a"], "alice");

        let invalid_str = "Here is the result you ask for: {\"a\":\"alice\"";
        let json_error = filter_to_json(invalid_str).expect_err("This should give error but not");
        assert!(json_error.downcast_ref::<InvalidJSON>().unwrap().reason.is_none());

        let invalid_str = "{{}}";
        let json_error = filter_to_json(invalid_str).expect_err("This should give error but not");
        assert!(json_error.downcast_ref::<InvalidJSON>().unwrap().reason.is_some());

        let invalid_str = "} backwards {";
        filter_to_json(invalid_str).expect_err("This should give error but not");
    }

    #[test]
    fn test_filter_to_json_list() {
        let reply = "[{'category': 'Smartphones and Accessories', 'products': ['SmartX ProPhone']}, {'category': 'Cameras and Camcorders'}]";
        let json_value = filter_to_json_list(reply).expect("Expect to be fine but failed");
        assert_eq!(json_value.as_array().unwrap().len(), 2);
        assert_eq!(json_value[0]["products"][0], "SmartX ProPhone");

        let json_value = filter_to_json_list("Nothing found: []").unwrap();
        assert!(json_value.as_array().unwrap().is_empty());

        let error = filter_to_json_list("I could not find anything").unwrap_err();
        assert!(error.downcast_ref::<InvalidJSON>().is_some());
    }
}
