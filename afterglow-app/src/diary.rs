//! Diary cards: mapping service responses and the local fallback.

use afterglow_core::types::DiaryCard;
use afterglow_llm::DiaryResponse;
use chrono::{DateTime, Utc};

/// Summary used when nothing else is available.
pub const DIARY_FALLBACK_SUMMARY: &str =
    "A quiet moment, held in the light and motion of the archive.";

/// Card summaries are cut to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 180;

/// Title of locally generated cards.
pub const FALLBACK_TITLE: &str = "Afterglow Reflection";

/// Title when the service sends none.
pub const UNTITLED: &str = "Untitled";

/// A diary ready to present: the stored card plus the full text.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryResult {
    /// Card persisted with the memory.
    pub card: DiaryCard,
    /// Full diary text shown in the modal.
    pub diary_text: String,
    /// Highlight phrases.
    pub highlights: Vec<String>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Turn a service response into a [`DiaryResult`].
///
/// The summary comes from the diary text, else the highlights joined by
/// `" - "`, else the transcript, cut to [`SUMMARY_MAX_CHARS`].
#[must_use]
pub fn map_diary_response(
    response: DiaryResponse,
    transcript: &str,
    date: DateTime<Utc>,
) -> DiaryResult {
    let diary_raw = response.diary.trim().to_string();
    let highlights: Vec<String> = response
        .highlights
        .into_iter()
        .filter(|h| !h.trim().is_empty())
        .collect();

    let mut summary_source = diary_raw.clone();
    if summary_source.is_empty() && !highlights.is_empty() {
        summary_source = highlights.join(" - ").trim().to_string();
    }
    if summary_source.is_empty() {
        summary_source = transcript.trim().to_string();
    }

    let mut summary = truncate_chars(&summary_source, SUMMARY_MAX_CHARS);
    if summary.is_empty() {
        summary = DIARY_FALLBACK_SUMMARY.to_string();
    }

    let title = if response.title.is_empty() {
        UNTITLED.to_string()
    } else {
        response.title
    };

    let diary_text = [&diary_raw, &summary_source, &summary]
        .into_iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_default();

    DiaryResult {
        card: DiaryCard {
            title,
            summary,
            mood: response.mood,
            tags: response.tags,
            date_iso: date,
        },
        diary_text,
        highlights,
    }
}

/// Card written locally when the diary service fails.
#[must_use]
pub fn fallback_diary(transcript: &str, now: DateTime<Utc>) -> DiaryResult {
    let base = transcript.trim();
    let summary = if base.is_empty() {
        DIARY_FALLBACK_SUMMARY.to_string()
    } else {
        truncate_chars(base, SUMMARY_MAX_CHARS)
    };
    DiaryResult {
        diary_text: summary.clone(),
        card: DiaryCard {
            title: FALLBACK_TITLE.to_string(),
            summary,
            mood: "Calm".to_string(),
            tags: vec!["afterglow".to_string(), "memory".to_string()],
            date_iso: now,
        },
        highlights: Vec::new(),
    }
}
