//! # Song emotions
//!
//! Batch job that replaces every song lyric with a list of 8 emotions produced by a chat model, so songs can later be
//! retrieved by the emotions a user describes.
//!
//! Input and output files have the same shape, movie title to songs:
//! ```json
//! {"Some Movie": [{"name": "Song", "text": "lyric or emotions", "embed_url": "https://..."}]}
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::{info, warn};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::prompt::PromptTemplate;
use crate::utils::llm::errors::EndpointError;
use crate::utils::llm::openai::ChatSettings;
use crate::utils::llm::{ChatMessage, Complete};

pub const LYRIC_DELIMITER: &str = "---";

lazy_static! {
    static ref EMOTIONS_TEMPLATE: PromptTemplate = PromptTemplate::new("\
I am building a retrieval system. Given the following song lyric
{{delimiter}}{{song}}{{delimiter}}
You are tasked to produce a list of 8 emotions that I will later use to retrieve the song.
Please provide only a list of comma separated emotions.");
}

/// A song with either its lyric or its emotions in `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    pub text: String,
    pub embed_url: String,
}

/// Movie title to its songs, in the order the movies were read or added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongsByMovie(Vec<(String, Vec<Song>)>);

impl SongsByMovie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of movies.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, movie: &str) -> Option<&[Song]> {
        self.0.iter()
            .find(|(title, _)| title == movie)
            .map(|(_, songs)| songs.as_slice())
    }

    pub fn contains_key(&self, movie: &str) -> bool {
        self.get(movie).is_some()
    }

    /// Append songs to a movie, adding the movie at the end if it is new.
    pub fn extend_movie(&mut self, movie: impl Into<String>, songs: impl IntoIterator<Item=Song>) {
        let movie = movie.into();
        match self.0.iter_mut().find(|(title, _)| *title == movie) {
            Some((_, existing)) => existing.extend(songs),
            None => self.0.push((movie, songs.into_iter().collect())),
        }
    }

    pub fn movies(&self) -> impl Iterator<Item=&str> {
        self.0.iter().map(|(title, _)| title.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item=&Vec<Song>> {
        self.0.iter().map(|(_, songs)| songs)
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &[Song])> {
        self.0.iter().map(|(title, songs)| (title.as_str(), songs.as_slice()))
    }
}

impl FromIterator<(String, Vec<Song>)> for SongsByMovie {
    fn from_iter<I: IntoIterator<Item=(String, Vec<Song>)>>(iter: I) -> Self {
        let mut songs_by_movie = Self::new();
        for (movie, songs) in iter {
            songs_by_movie.extend_movie(movie, songs);
        }
        songs_by_movie
    }
}

impl<const N: usize> From<[(String, Vec<Song>); N]> for SongsByMovie {
    fn from(entries: [(String, Vec<Song>); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl Serialize for SongsByMovie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(movie, songs)| (movie, songs)))
    }
}

impl<'de> Deserialize<'de> for SongsByMovie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SongsByMovieVisitor;

        impl<'de> Visitor<'de> for SongsByMovieVisitor {
            type Value = SongsByMovie;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from movie title to a list of songs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SongsByMovie, A::Error> {
                let mut songs_by_movie = SongsByMovie::new();
                while let Some((movie, songs)) = map.next_entry::<String, Vec<Song>>()? {
                    songs_by_movie.extend_movie(movie, songs);
                }
                Ok(songs_by_movie)
            }
        }

        deserializer.deserialize_map(SongsByMovieVisitor)
    }
}

/// Settings the labeling job runs with: gpt-4 sampled at temperature 0.7.
pub fn labeling_chat_settings() -> ChatSettings {
    ChatSettings {
        model: "gpt-4".to_string(),
        temperature: 0.7,
        ..ChatSettings::default()
    }
}

/// Labels lyrics with emotions through a chat endpoint.
pub struct EmotionLabeler<'a, E: Complete + ?Sized> {
    endpoint: &'a E,
}

impl<'a, E: Complete + ?Sized> EmotionLabeler<'a, E> {
    pub fn new(endpoint: &'a E) -> Self {
        Self { endpoint }
    }

    /// Comma-separated emotions for one lyric, as the model wrote them.
    pub async fn label(&self, lyric: &str) -> Result<String> {
        let prompt = EMOTIONS_TEMPLATE.construct_prompt()
            .fill("delimiter", LYRIC_DELIMITER)?
            .fill("song", lyric)?
            .complete()?;
        let emotions = self.endpoint.complete(&[ChatMessage::user(prompt)]).await?;
        Ok(emotions.trim().to_string())
    }

    /// Label every song. A song the endpoint rejects as an invalid request is skipped; any other error aborts.
    /// A movie whose songs were all skipped does not appear in the result.
    pub async fn label_songs(&self, lyrics: &SongsByMovie) -> Result<SongsByMovie> {
        let mut labeled = SongsByMovie::new();
        for (movie, songs) in lyrics.iter() {
            let mut movie_songs = Vec::new();
            for song in songs {
                let emotions = match self.label(&song.text).await {
                    Ok(emotions) => emotions,
                    Err(e) if e.downcast_ref::<EndpointError>().is_some_and(EndpointError::is_invalid_request) => {
                        warn!("Skipping '{}' due to invalid request error: {}", song.name, e);
                        continue;
                    }
                    Err(e) => return Err(e.context(format!("cannot label song '{}'", song.name))),
                };
                info!("{}: {}", song.name, emotions);
                movie_songs.push(Song {
                    name: song.name.clone(),
                    text: emotions,
                    embed_url: song.embed_url.clone(),
                });
            }
            if !movie_songs.is_empty() {
                labeled.extend_movie(movie, movie_songs);
            }
        }
        Ok(labeled)
    }

    /// Read lyrics from `input`, label them and write the emotions to `output`.
    pub async fn run(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<SongsByMovie> {
        let lyrics = load_songs(input)?;
        let labeled = self.label_songs(&lyrics).await?;
        save_songs(output, &labeled)?;
        Ok(labeled)
    }
}

pub fn load_songs(path: impl AsRef<Path>) -> Result<SongsByMovie> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read songs file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("cannot parse songs file {}", path.display()))
}

pub fn save_songs(path: impl AsRef<Path>, songs: &SongsByMovie) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, serde_json::to_string(songs)?)
        .with_context(|| format!("cannot write songs file {}", path.display()))
}

#[cfg(test)]
mod test_emotions {
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::utils::llm::errors::EndpointErrorKind;

    /// Labels lyrics by keyword, rejects lyrics containing "REJECT", and fails hard on "BOOM".
    struct KeywordEndpoint {
        prompts: Mutex<Vec<String>>,
    }

    impl KeywordEndpoint {
        fn new() -> Self {
            Self { prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Complete for KeywordEndpoint {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            let prompt = messages[0].content.clone();
            self.prompts.lock().unwrap().push(prompt.clone());
            if prompt.contains("REJECT") {
                return Err(EndpointError::invalid_request("content filtered").into());
            }
            if prompt.contains("BOOM") {
                bail!(EndpointError::new(EndpointErrorKind::Transport, "connection reset"));
            }
            if prompt.contains("love") {
                Ok(" love, joy, warmth, hope, longing, tenderness, bliss, devotion\n".to_string())
            } else {
                Ok("sadness, grief, loss, regret, loneliness, despair, melancholy, sorrow".to_string())
            }
        }
    }

    fn song(name: &str, text: &str) -> Song {
        Song {
            name: name.to_string(),
            text: text.to_string(),
            embed_url: format!("https://open.spotify.com/embed/track/{}", name),
        }
    }

    #[tokio::test]
    async fn test_label_prompt() {
        let endpoint = KeywordEndpoint::new();
        let emotions = EmotionLabeler::new(&endpoint).label("all you need is love").await.unwrap();
        assert_eq!("love, joy, warmth, hope, longing, tenderness, bliss, devotion", emotions);
        let prompt = endpoint.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Given the following song lyric\n---all you need is love---\n"));
        assert!(prompt.ends_with("Please provide only a list of comma separated emotions."));
    }

    #[tokio::test]
    async fn test_label_songs_skips_invalid_requests() {
        let lyrics = SongsByMovie::from([
            ("Musical".to_string(), vec![song("a", "love me do"), song("b", "REJECT this"), song("c", "gone")]),
            ("Censored".to_string(), vec![song("d", "REJECT everything")]),
        ]);
        let endpoint = KeywordEndpoint::new();
        let labeled = EmotionLabeler::new(&endpoint).label_songs(&lyrics).await.unwrap();
        assert!(!labeled.contains_key("Censored"));
        let musical = labeled.get("Musical").unwrap();
        assert_eq!(vec!["a", "c"], musical.iter().map(|s| s.name.as_str()).collect::<Vec<_>>());
        assert!(musical[0].text.starts_with("love"));
        assert!(musical[1].text.starts_with("sadness"));
        assert_eq!("https://open.spotify.com/embed/track/c", musical[1].embed_url);
    }

    #[tokio::test]
    async fn test_other_errors_abort() {
        let lyrics = SongsByMovie::from([("Loud".to_string(), vec![song("x", "BOOM")])]);
        let endpoint = KeywordEndpoint::new();
        let error = EmotionLabeler::new(&endpoint).label_songs(&lyrics).await.unwrap_err();
        assert!(error.to_string().contains("cannot label song 'x'"));
        assert!(error.downcast_ref::<EndpointError>().is_some());
    }

    #[tokio::test]
    async fn test_run_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("lyrics_with_spotify_url.json");
        let output = dir.path().join("emotions_with_spotify_url.json");
        save_songs(&input, &SongsByMovie::from([("Musical".to_string(), vec![song("a", "love")])])).unwrap();

        let endpoint = KeywordEndpoint::new();
        EmotionLabeler::new(&endpoint).run(&input, &output).await.unwrap();
        let written = load_songs(&output).unwrap();
        assert_eq!(1, written.get("Musical").unwrap().len());
        assert!(written.get("Musical").unwrap()[0].text.contains("devotion"));
        assert!(load_songs(dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_movie_order_is_kept() {
        let json = r#"{"Zorro": [{"name": "z", "text": "gone", "embed_url": "u1"}],
                       "Amelie": [{"name": "a", "text": "love", "embed_url": "u2"}],
                       "Moana": [{"name": "m", "text": "sea", "embed_url": "u3"}]}"#;
        let lyrics: SongsByMovie = serde_json::from_str(json).unwrap();
        assert_eq!(vec!["Zorro", "Amelie", "Moana"], lyrics.movies().collect::<Vec<_>>());

        let endpoint = KeywordEndpoint::new();
        let labeled = EmotionLabeler::new(&endpoint).label_songs(&lyrics).await.unwrap();
        assert_eq!(vec!["Zorro", "Amelie", "Moana"], labeled.movies().collect::<Vec<_>>());
        let written = serde_json::to_string(&labeled).unwrap();
        let zorro = written.find("\"Zorro\"").unwrap();
        let amelie = written.find("\"Amelie\"").unwrap();
        let moana = written.find("\"Moana\"").unwrap();
        assert!(zorro < amelie && amelie < moana);
    }

    #[test]
    fn test_labeling_chat_settings() {
        let settings = labeling_chat_settings();
        assert_eq!("gpt-4", settings.model);
        assert_eq!(0.7, settings.temperature);
        assert_eq!(500, settings.max_tokens);
    }
}
