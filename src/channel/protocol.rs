//! JSON message contracts for the content server's message channel.

use crate::chapters::ChapterPayload;
use crate::error::{EngineError, Result};
use crate::model::RelativeWord;
use serde::{Deserialize, Serialize};

/// Requests sent by the engine to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Ask the server to generate (or send) the next chapter.
    #[serde(rename_all = "camelCase")]
    RequestNextChapter {
        content_id: String,
        chapter_number: u32,
        want_audio: bool,
    },
    /// Ask for the streaming playlist covering the whole session.
    #[serde(rename_all = "camelCase")]
    RequestStreamingManifest { content_id: String },
}

impl ClientRequest {
    /// Serialize request to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize request from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A chapter's audio and word timings are available.
    ChapterReady(ChapterReady),
    /// The streaming playlist is available.
    #[serde(rename_all = "camelCase")]
    ManifestReady {
        primary_playlist_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtitles_playlist_path: Option<String>,
    },
    /// No more chapters will follow.
    SessionComplete,
    /// The server gave up on this session.
    Error { message: String },
}

impl ServerMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Wire form of a chapter.
///
/// Required numeric fields are optional here so a payload missing them still
/// parses and can be dropped as malformed instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterReady {
    #[serde(default)]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub audio_duration_seconds: Option<f64>,
    #[serde(default)]
    pub generation_latency_seconds: Option<f64>,
    #[serde(default)]
    pub is_last: bool,
    #[serde(default)]
    pub words: Vec<WireWord>,
}

/// Wire form of one word, with chapter-relative timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireWord {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl ChapterReady {
    /// Validate required fields and convert into the pipeline's input form.
    pub fn into_payload(self) -> Result<ChapterPayload> {
        let number = match self.chapter_number {
            Some(0) => return Err(malformed("chapterNumber must be at least 1")),
            Some(n) => n,
            None => return Err(malformed("missing chapterNumber")),
        };

        let duration = match self.audio_duration_seconds {
            Some(d) if d.is_finite() && d >= 0.0 => d,
            Some(d) => {
                return Err(malformed(&format!(
                    "chapter {number}: invalid audioDurationSeconds {d}"
                )));
            }
            None => {
                return Err(malformed(&format!(
                    "chapter {number}: missing audioDurationSeconds"
                )));
            }
        };

        let generation_latency = match self.generation_latency_seconds {
            Some(l) if l.is_finite() && l >= 0.0 => Some(l),
            Some(l) => {
                return Err(malformed(&format!(
                    "chapter {number}: invalid generationLatencySeconds {l}"
                )));
            }
            None => None,
        };

        let mut words = Vec::with_capacity(self.words.len());
        for word in self.words {
            if !word.start_seconds.is_finite() || !word.end_seconds.is_finite() {
                return Err(malformed(&format!(
                    "chapter {number}: non-finite timing for word {:?}",
                    word.text
                )));
            }
            words.push(RelativeWord::new(
                word.text,
                word.start_seconds,
                word.end_seconds,
            ));
        }

        Ok(ChapterPayload {
            number,
            title: self.title,
            duration,
            generation_latency,
            is_last: self.is_last,
            words,
        })
    }
}

fn malformed(reason: &str) -> EngineError {
    EngineError::MalformedChapter {
        reason: reason.to_string(),
    }
}
