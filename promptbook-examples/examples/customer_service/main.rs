use std::env;
use std::io::{stdin, stdout, BufRead, Write};

use anyhow::Result;
use log::info;

use promptbook::catalog::Catalog;
use promptbook::recipes::customer_service::process_user_message;
use promptbook::utils::llm::openai::{ChatEndpoint, ChatSettings};

const DEFAULT_CATALOG_PATH: &str = "data/product_info.json";

/// Answers product questions typed on stdin, one per line, until EOF.
///
/// Usage: `customer_service [path/to/product_info.json]`
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let catalog_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CATALOG_PATH.to_string());
    let catalog = Catalog::load(&catalog_path)?;
    info!("loaded {} products from {}", catalog.len(), catalog_path);
    let endpoint = ChatEndpoint::from_env(ChatSettings::default())?;

    print!("> ");
    stdout().flush()?;
    for line in stdin().lock().lines() {
        let query = line?;
        if !query.trim().is_empty() {
            let reply = process_user_message(&endpoint, &endpoint, &query, &catalog).await?;
            println!("{}", reply.text());
        }
        print!("> ");
        stdout().flush()?;
    }
    Ok(())
}
