use std::env;

use anyhow::Result;
use log::info;

use promptbook::recipes::emotions::{labeling_chat_settings, EmotionLabeler};
use promptbook::utils::llm::openai::ChatEndpoint;

const DEFAULT_INPUT: &str = "lyrics_with_spotify_url.json";
const DEFAULT_OUTPUT: &str = "emotions_with_spotify_url.json";

/// Usage: `emotions_summary [lyrics.json] [emotions.json]`
///
/// On Azure the `OPENAI_DEPLOYMENT` defaults to `gpt4`.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let mut args = env::args().skip(1);
    let input = args.next().unwrap_or_else(|| DEFAULT_INPUT.to_string());
    let output = args.next().unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    let endpoint = ChatEndpoint::from_env(labeling_chat_settings())?;
    let labeled = EmotionLabeler::new(&endpoint).run(&input, &output).await?;
    let song_count: usize = labeled.values().map(Vec::len).sum();
    info!("labeled {} songs of {} movies into {}", song_count, labeled.len(), output);
    Ok(())
}
