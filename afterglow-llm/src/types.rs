//! Wire types for the generation service.
//!
//! Responses are parsed strictly at the boundary: a missing or wrong-typed
//! field becomes its default once, here, and non-string array items are
//! dropped. Nothing downstream re-checks types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Who produced a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The person using the app.
    User,
    /// The model.
    Model,
}

impl ChatRole {
    /// Speaker label used in transcripts.
    #[must_use]
    pub fn speaker(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Model => "Afterglow",
        }
    }
}

/// One text part of a chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPart {
    /// The text.
    pub text: String,
}

/// One turn of the conversation, in the service's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Speaker.
    pub role: ChatRole,
    /// Text parts (always one in practice).
    pub parts: Vec<ChatPart>,
}

impl ChatTurn {
    /// A single-part turn.
    #[must_use]
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ChatPart { text: text.into() }],
        }
    }

    /// A user turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    /// A model turn.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Model, text)
    }

    /// All parts joined.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    /// The conversation so far.
    pub contents: &'a [ChatTurn],
}

/// Reply from `POST /api/chat`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Reply text; empty when the service sent none.
    pub text: String,
}

impl ChatReply {
    /// Parse from a JSON body.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        Self {
            text: string_field(value, "text"),
        }
    }
}

// ---------------------------------------------------------------------------
// Image analysis
// ---------------------------------------------------------------------------

/// Reply from `POST /api/analyze-image`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageAnalysis {
    /// Short vibe word or phrase.
    pub vibe: String,
    /// Concise caption.
    pub caption: String,
    /// Reflective questions.
    pub questions: Vec<String>,
}

impl ImageAnalysis {
    /// Parse from a JSON body.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        Self {
            vibe: string_field(value, "vibe"),
            caption: string_field(value, "caption"),
            questions: string_array(value, "questions"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diary
// ---------------------------------------------------------------------------

/// Body of `POST /api/generate-diary`.
#[derive(Debug, Clone, Serialize)]
pub struct DiaryRequest<'a> {
    /// The conversation transcript.
    #[serde(rename = "transcriptText")]
    pub transcript_text: &'a str,
    /// Date of the entry, RFC 3339.
    #[serde(rename = "dateISO")]
    pub date_iso: &'a str,
}

/// Reply from `POST /api/generate-diary`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiaryResponse {
    /// Poetic title.
    pub title: String,
    /// One-word mood.
    pub mood: String,
    /// Short highlight phrases.
    pub highlights: Vec<String>,
    /// Full diary text.
    pub diary: String,
    /// Tags.
    pub tags: Vec<String>,
}

impl DiaryResponse {
    /// Parse from a JSON body.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        Self {
            title: string_field(value, "title"),
            mood: string_field(value, "mood"),
            highlights: string_array(value, "highlights"),
            diary: string_field(value, "diary"),
            tags: string_array(value, "tags"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
