//! # Customer service assistant
//!
//! A chain of small prompts for an electronics store:
//! 1. moderate the user message;
//! 2. classify it into mentioned categories and products ([find_category_and_product]);
//! 3. look the mentions up in the [Catalog];
//! 4. answer with the product information in context ([answer_user_msg]);
//! 5. moderate the answer;
//! 6. let the model grade its own answer ([evaluate_reply]).
//!
//! [process_user_message] runs the whole chain.

use anyhow::Result;
use lazy_static::lazy_static;
use log::{info, warn};
use serde_json::Value;

use crate::catalog::{Catalog, Mention};
use crate::prompt::PromptTemplate;
use crate::utils::llm::{ChatMessage, Complete, Moderate};
use crate::utils::postprocess::json::filter_to_json_list;

pub const DELIMITER: &str = "####";

pub const REFUSE_INPUT: &str = "Sorry, we cannot process this request.";
pub const REFUSE_OUTPUT: &str = "Sorry, we cannot provide this information.";
pub const ESCALATE: &str = "I'm unable to provide the information you're looking for. \
I'll connect you with a human representative for further assistance.";

const CATEGORY_LINE: &str = "'category': <one of Computers and Laptops, Smartphones and Accessories, \
Televisions and Home Theater Systems, Gaming Consoles and Accessories, Audio Equipment, Cameras and Camcorders>,";

lazy_static! {
    static ref CLASSIFY_AS_JSON_TEMPLATE: PromptTemplate = PromptTemplate::new(format!("\
You will be provided with customer service queries. \
The customer service query will be delimited with {{{{delimiter}}}} characters.
Output a python list of json objects, where each object has the following format:
    {category_line}
OR
    'products': <a list of products that must be found in the allowed products below>

Where the categories and products must be found in the customer service query.
If a product is mentioned, it must be associated with the correct category in the allowed products list below.
If no products or categories are found, output an empty list.

The allowed products are provided in JSON format.
The keys of each item represent the category.
The values of each item is a list of products that are within that category.
Allowed products: {{{{allowed_products}}}}
", category_line = CATEGORY_LINE));

    static ref CLASSIFY_AS_LISTING_TEMPLATE: PromptTemplate = PromptTemplate::new(format!("\
You will be provided with customer service queries. \
The customer service query will be delimited with {{{{delimiter}}}} characters.
Output a python list of objects, where each object has the following format:
    {category_line}
OR
    'products': <a list of products that must be found in the allowed products below>

Where the categories and products must be found in the customer service query.
If a product is mentioned, it must be associated with the correct category in the allowed products list below.
If no products or categories are found, output an empty list.

Allowed products:
{{{{allowed_products}}}}

Only output the list of objects, nothing else.
", category_line = CATEGORY_LINE));

    static ref DELIMITED_QUERY_TEMPLATE: PromptTemplate = PromptTemplate::new("{{delimiter}}{{query}}{{delimiter}}");

    static ref EVALUATION_USER_TEMPLATE: PromptTemplate = PromptTemplate::new("\
Customer message: ```{{query}}```
Product information: ```{{product_info}}```
Agent response: ```{{reply}}```

Does the response use the retrieved information correctly?
Does the response sufficiently answer the question

Output Y or N
");
}

pub const ASSISTANT_SYSTEM_MESSAGE: &str = "\
You are a customer service assistant for a large electronic store. \
Respond in a friendly and helpful tone, with concise answers. \
Make sure to ask the user relevant follow up questions.";

pub const EVALUATION_SYSTEM_MESSAGE: &str = "\
You are an assistant that evaluates whether \
customer service agent responses sufficiently \
answer customer questions, and also validates that \
all the facts the assistant cites from the product \
information are correct.
The conversation history, product information, user and customer \
service agent messages will be delimited by \
3 backticks, i.e. ```.
Respond with a Y or N character, with no punctuation:
Y - if the output sufficiently answers the question \
AND the response correctly uses product information
N - otherwise

Output a single letter only.";

fn delimited_query(query: &str) -> Result<String> {
    Ok(DELIMITED_QUERY_TEMPLATE.construct_prompt()
        .fill("delimiter", DELIMITER)?
        .fill("query", query)?
        .complete()?)
}

fn classification_messages(template: &PromptTemplate, allowed_products: String, query: &str) -> Result<Vec<ChatMessage>> {
    let system_message = template.construct_prompt()
        .fill("delimiter", DELIMITER)?
        .fill("allowed_products", allowed_products)?
        .complete()?;
    Ok(vec![
        ChatMessage::system(system_message),
        ChatMessage::user(delimited_query(query)?),
    ])
}

/// Ask the model which categories and products the query mentions, with the allowed products given as JSON.
/// Returns the raw reply, see [parse_mentions].
pub async fn find_category_and_product<E: Complete + ?Sized>(endpoint: &E, query: &str, catalog: &Catalog) -> Result<String> {
    let allowed_products = Value::Object(catalog.products_and_category()).to_string();
    let messages = classification_messages(&CLASSIFY_AS_JSON_TEMPLATE, allowed_products, query)?;
    endpoint.complete(&messages).await
}

/// Like [find_category_and_product], with the allowed products given as a plain listing.
pub async fn find_category_and_product_only<E: Complete + ?Sized>(endpoint: &E, query: &str, catalog: &Catalog) -> Result<String> {
    let messages = classification_messages(&CLASSIFY_AS_LISTING_TEMPLATE, catalog.allowed_products_listing(), query)?;
    endpoint.complete(&messages).await
}

/// Parse a classifier reply into mentions.
pub fn parse_mentions(reply: &str) -> Result<Vec<Mention>> {
    Ok(serde_json::from_value(filter_to_json_list(reply)?)?)
}

/// Answer the query with the given product information in context.
pub async fn answer_user_msg<E: Complete + ?Sized>(endpoint: &E, query: &str, product_info: &str) -> Result<String> {
    let messages = vec![
        ChatMessage::system(ASSISTANT_SYSTEM_MESSAGE),
        ChatMessage::user(delimited_query(query)?),
        ChatMessage::assistant(format!("Relevant product information:\n{}", product_info)),
    ];
    endpoint.complete(&messages).await
}

/// Ask the model whether `reply` answers `query` and uses `product_info` correctly. Anything but a reply starting
/// with `Y` counts as no.
pub async fn evaluate_reply<E: Complete + ?Sized>(endpoint: &E, query: &str, product_info: &str, reply: &str) -> Result<bool> {
    let user_message = EVALUATION_USER_TEMPLATE.construct_prompt()
        .fill("query", query)?
        .fill("product_info", product_info)?
        .fill("reply", reply)?
        .complete()?;
    let messages = vec![
        ChatMessage::system(EVALUATION_SYSTEM_MESSAGE),
        ChatMessage::user(user_message),
    ];
    let verdict = endpoint.complete(&messages).await?;
    Ok(verdict.trim_start().starts_with('Y'))
}

/// Moderation gate.
pub async fn is_flagged<M: Moderate + ?Sized>(moderator: &M, text: &str) -> Result<bool> {
    let flagged = moderator.moderate(text).await?;
    if flagged {
        warn!("moderation flagged: {:?}", text);
    }
    Ok(flagged)
}

/// Outcome of [process_user_message].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
    /// The reply passed moderation and self-evaluation.
    Answered(String),
    /// The input or the reply was flagged by moderation.
    Refused(&'static str),
    /// The model judged its own reply insufficient.
    Escalated(&'static str),
}

impl ServiceReply {
    pub fn text(&self) -> &str {
        match self {
            ServiceReply::Answered(reply) => reply,
            ServiceReply::Refused(text) | ServiceReply::Escalated(text) => text,
        }
    }
}

/// Run the whole customer service chain for one user message.
pub async fn process_user_message<E, M>(endpoint: &E,
                                        moderator: &M,
                                        query: &str,
                                        catalog: &Catalog) -> Result<ServiceReply>
    where E: Complete + ?Sized,
          M: Moderate + ?Sized {
    if is_flagged(moderator, query).await? {
        return Ok(ServiceReply::Refused(REFUSE_INPUT));
    }

    let classification = find_category_and_product(endpoint, query, catalog).await?;
    info!("classified query as {}", classification.trim());
    let mentions = parse_mentions(&classification).unwrap_or_else(|e| {
        warn!("cannot parse classification, answering without product information: {}", e);
        Vec::new()
    });
    let product_info = catalog.render_product_info(&mentions)?;

    let reply = answer_user_msg(endpoint, query, &product_info).await?;
    if is_flagged(moderator, &reply).await? {
        return Ok(ServiceReply::Refused(REFUSE_OUTPUT));
    }

    if evaluate_reply(endpoint, query, &product_info, &reply).await? {
        Ok(ServiceReply::Answered(reply))
    } else {
        info!("reply judged insufficient, escalating");
        Ok(ServiceReply::Escalated(ESCALATE))
    }
}

#[cfg(test)]
mod test_customer_service {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::catalog::test_catalog::PRODUCTS;
    use crate::utils::llm::ChatRole;

    /// Replies from a script and records every conversation it receives.
    struct ScriptedEndpoint {
        replies: Mutex<VecDeque<String>>,
        received: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedEndpoint {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                received: Mutex::new(Vec::new()),
            }
        }

        fn received(&self) -> Vec<Vec<ChatMessage>> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Complete for ScriptedEndpoint {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.received.lock().unwrap().push(messages.to_vec());
            self.replies.lock().unwrap().pop_front().ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    /// Flags any text containing a banned word.
    struct WordModerator(&'static str);

    #[async_trait]
    impl Moderate for WordModerator {
        async fn moderate(&self, text: &str) -> Result<bool> {
            Ok(text.contains(self.0))
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_json_str(PRODUCTS).unwrap()
    }

    #[tokio::test]
    async fn test_classification_prompt() {
        let endpoint = ScriptedEndpoint::new(&["[]", "[]"]);
        find_category_and_product(&endpoint, "tell me about the smartx pro phone", &catalog()).await.unwrap();
        find_category_and_product_only(&endpoint, "tell me about the smartx pro phone", &catalog()).await.unwrap();
        let received = endpoint.received();

        let json_messages = &received[0];
        assert_eq!(ChatRole::System, json_messages[0].role);
        assert!(json_messages[0].content.contains("delimited with #### characters"));
        assert!(json_messages[0].content.contains(r#"Allowed products: {"Computers and Laptops":["TechPro Ultrabook","BlueWave Chromebook"],"Smartphones and Accessories":["SmartX ProPhone"]}"#));
        assert_eq!("####tell me about the smartx pro phone####", json_messages[1].content);

        let listing_messages = &received[1];
        assert!(listing_messages[0].content.contains("Smartphones and Accessories category:\nSmartX ProPhone"));
        assert!(listing_messages[0].content.ends_with("Only output the list of objects, nothing else.\n"));
    }

    #[test]
    fn test_parse_mentions() {
        let mentions = parse_mentions("[{'category': 'Smartphones and Accessories', 'products': ['SmartX ProPhone']}, {'category': 'Cameras and Camcorders'}]").unwrap();
        assert_eq!(2, mentions.len());
        assert_eq!(Some(vec!["SmartX ProPhone".to_string()]), mentions[0].products);
        assert_eq!(Mention::category("Cameras and Camcorders"), mentions[1]);
        assert!(parse_mentions("no list here").is_err());
    }

    #[tokio::test]
    async fn test_answer_user_msg() {
        let endpoint = ScriptedEndpoint::new(&["It costs $899.99. Anything else?"]);
        let reply = answer_user_msg(&endpoint, "how much is the prophone", "{\"price\": 899.99}").await.unwrap();
        assert_eq!("It costs $899.99. Anything else?", reply);
        let messages = &endpoint.received()[0];
        assert_eq!(vec![ChatRole::System, ChatRole::User, ChatRole::Assistant],
                   messages.iter().map(|m| m.role).collect::<Vec<_>>());
        assert_eq!("Relevant product information:\n{\"price\": 899.99}", messages[2].content);
    }

    #[tokio::test]
    async fn test_evaluate_reply() {
        let endpoint = ScriptedEndpoint::new(&["Y", " N", "Yes.", "maybe"]);
        assert!(evaluate_reply(&endpoint, "q", "info", "reply").await.unwrap());
        assert!(!evaluate_reply(&endpoint, "q", "info", "reply").await.unwrap());
        assert!(evaluate_reply(&endpoint, "q", "info", "reply").await.unwrap());
        assert!(!evaluate_reply(&endpoint, "q", "info", "reply").await.unwrap());
        let user_message = &endpoint.received()[0][1].content;
        assert!(user_message.starts_with("Customer message: ```q```\nProduct information: ```info```\nAgent response: ```reply```"));
    }

    #[tokio::test]
    async fn test_process_user_message() {
        let endpoint = ScriptedEndpoint::new(&[
            "[{'category': 'Smartphones and Accessories', 'products': ['SmartX ProPhone']}]",
            "The SmartX ProPhone costs $899.99. Would you like a case?",
            "Y",
        ]);
        let reply = process_user_message(&endpoint, &WordModerator("hack"), "tell me about the smartx pro phone", &catalog()).await.unwrap();
        assert_eq!(ServiceReply::Answered("The SmartX ProPhone costs $899.99. Would you like a case?".to_string()), reply);
        let received = endpoint.received();
        assert_eq!(3, received.len());
        // the answer sees the looked up record
        assert!(received[1][2].content.contains("\"name\": \"SmartX ProPhone\""));
    }

    #[tokio::test]
    async fn test_process_user_message_refusals() {
        let endpoint = ScriptedEndpoint::new(&[]);
        let reply = process_user_message(&endpoint, &WordModerator("hack"), "how do I hack a TV", &catalog()).await.unwrap();
        assert_eq!(ServiceReply::Refused(REFUSE_INPUT), reply);
        assert!(endpoint.received().is_empty());

        let endpoint = ScriptedEndpoint::new(&["[]", "let me hack that for you"]);
        let reply = process_user_message(&endpoint, &WordModerator("hack"), "any laptops?", &catalog()).await.unwrap();
        assert_eq!(REFUSE_OUTPUT, reply.text());
    }

    #[tokio::test]
    async fn test_process_user_message_escalation() {
        let endpoint = ScriptedEndpoint::new(&["not a list", "I am not sure.", "N"]);
        let reply = process_user_message(&endpoint, &WordModerator("hack"), "any laptops?", &catalog()).await.unwrap();
        assert_eq!(ServiceReply::Escalated(ESCALATE), reply);
        // unparsable classification means no product information
        assert_eq!("Relevant product information:\n", endpoint.received()[1][2].content);
    }

    #[tokio::test]
    async fn test_endpoint_error_propagates() {
        let endpoint = ScriptedEndpoint::new(&["[]"]);
        let error = process_user_message(&endpoint, &WordModerator("hack"), "any laptops?", &catalog()).await.unwrap_err();
        assert!(error.to_string().contains("script exhausted"));
    }
}
