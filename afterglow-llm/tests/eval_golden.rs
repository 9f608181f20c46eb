//! Conversation text golden test set.
//!
//! A curated set of inputs and the exact text the app sends to or shows
//! from the generation service. Any wording change must update these.

use afterglow_llm::prompt;
use afterglow_llm::types::ChatTurn;

/// A golden case for a rendered line of conversation.
struct GoldenCase {
    /// Human-readable name for the test case.
    name: &'static str,
    /// Rendered text under test.
    rendered: String,
    /// Strings that MUST appear.
    must_contain: Vec<&'static str>,
    /// Strings that MUST NOT appear.
    must_not_contain: Vec<&'static str>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        // ---------------------------------------------------------------
        // 1. Opening lines
        // ---------------------------------------------------------------
        GoldenCase {
            name: "opening_line_plain_caption",
            rendered: prompt::opening_line("warm tones, soft shadows, and an intimate composition"),
            must_contain: vec![
                "Noticing warm tones, soft shadows, and an intimate composition;",
                "what does this moment mean to you?",
            ],
            must_not_contain: vec!["{caption}", "composition.;"],
        },
        GoldenCase {
            name: "opening_line_trailing_punctuation",
            rendered: prompt::opening_line("A kite over the dunes!!!"),
            must_contain: vec!["Noticing A kite over the dunes;"],
            must_not_contain: vec!["!;", "{caption}"],
        },
        GoldenCase {
            name: "opening_line_empty_caption",
            rendered: prompt::opening_line(""),
            must_contain: vec!["a quiet scene"],
            must_not_contain: vec!["Noticing ;"],
        },
        // ---------------------------------------------------------------
        // 2. Transcripts
        // ---------------------------------------------------------------
        GoldenCase {
            name: "transcript_for_diary",
            rendered: prompt::transcript(&[
                ChatTurn::model(prompt::opening_line("A harbor at dusk.")),
                ChatTurn::user("My father used to fish there."),
                ChatTurn::model("That sounds like a place full of patience."),
            ]),
            must_contain: vec![
                "Afterglow: Noticing A harbor at dusk;",
                "\nUser: My father used to fish there.\n",
                "Afterglow: That sounds like a place full of patience.",
            ],
            must_not_contain: vec!["model:", "user:"],
        },
    ]
}

#[test]
fn golden_cases_render_as_expected() {
    let mut failures = Vec::new();
    for case in golden_cases() {
        for needle in &case.must_contain {
            if !case.rendered.contains(needle) {
                failures.push(format!("{}: missing {needle:?}", case.name));
            }
        }
        for needle in &case.must_not_contain {
            if case.rendered.contains(needle) {
                failures.push(format!("{}: unexpected {needle:?}", case.name));
            }
        }
    }
    assert!(failures.is_empty(), "golden failures:\n{}", failures.join("\n"));
}

#[test]
fn golden_case_names_are_unique() {
    let cases = golden_cases();
    let mut names: Vec<_> = cases.iter().map(|c| c.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), cases.len());
}

#[test]
fn normalized_questions_keep_order() {
    let raw = strings(&["  Where was this? ", "", "Who is missing?", "Why keep it?", "What next?"]);
    let questions = prompt::normalize_questions(&raw);
    assert_eq!(
        questions,
        strings(&["Where was this?", "Who is missing?", "Why keep it?"])
    );
    assert_eq!(questions.len(), prompt::MAX_QUESTIONS);
}
