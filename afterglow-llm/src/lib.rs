//! # afterglow-llm: generation client for Afterglow
//!
//! Talks to the caption, chat and diary service:
//!   - **analyze-image**: vibe, caption and reflective questions for an upload
//!   - **chat**: the reflective conversation about a memory
//!   - **generate-diary**: a titled diary entry from the transcript
//!
//! Every call can fail. Callers never surface a generation failure as
//! fatal; they switch to the pure fallbacks in [`fallback`].
//!
//! # Architecture
//!
//! ```text
//! app ──► TextGenerator ──► GenerationClient ──HTTP──► service
//!                 │                 │
//!                 │                 └─ retries, timeout, strict parse (types)
//!                 └─ fallback::* on Err
//! ```

pub mod client;
pub mod error;
pub mod fallback;
pub mod prompt;
pub mod types;

pub use client::{GenerationClient, GenerationProvider, TextGenerator};
pub use error::GenerationError;
pub use types::{ChatRole, ChatTurn, DiaryResponse, ImageAnalysis};
