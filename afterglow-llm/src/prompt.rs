//! Conversation text: the opening line, question cleanup and transcripts.
//!
//! Everything here is pure so it can be pinned by golden tests.

use crate::types::{ChatRole, ChatTurn};

/// Opening line the model "says" after an upload.
pub const OPENING_LINE: &str = "Noticing {caption}; what does this moment mean to you?";

/// Caption used when the analysis produced none.
pub const DEFAULT_SCENE: &str = "a quiet scene";

/// Questions kept after normalization.
pub const MAX_QUESTIONS: usize = 3;

/// Fewer cleaned questions than this and the set is discarded.
pub const MIN_QUESTIONS: usize = 2;

/// Simple template interpolation.
///
/// Replaces `{key}` with the corresponding value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Build the opening line for a caption.
///
/// The caption is trimmed, falls back to [`DEFAULT_SCENE`] when empty, and
/// loses trailing sentence punctuation so the template reads cleanly.
#[must_use]
pub fn opening_line(caption: &str) -> String {
    let raw = match caption.trim() {
        "" => DEFAULT_SCENE,
        trimmed => trimmed,
    };
    let cleaned = raw.trim_end_matches(['.', '!', '?']);
    render_template(OPENING_LINE, &[("caption", cleaned)])
}

/// Clean up the questions returned by image analysis.
///
/// Items are trimmed and empties dropped. A set with fewer than
/// [`MIN_QUESTIONS`] left is replaced by the fallback (no questions); a
/// longer one is cut to [`MAX_QUESTIONS`].
#[must_use]
pub fn normalize_questions(questions: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.len() < MIN_QUESTIONS {
        return Vec::new();
    }
    cleaned.truncate(MAX_QUESTIONS);
    cleaned
}

/// Render the conversation as `User: …` / `Afterglow: …` lines.
#[must_use]
pub fn transcript(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role.speaker(), turn.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether the conversation already holds a non-empty model line.
#[must_use]
pub fn has_model_line(turns: &[ChatTurn]) -> bool {
    turns
        .iter()
        .any(|t| t.role == ChatRole::Model && !t.text().trim().is_empty())
}
