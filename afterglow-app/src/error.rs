//! Application error types.

use afterglow_core::error::ArchiveError;
use afterglow_llm::GenerationError;
use thiserror::Error;

/// Errors surfaced to the user from a single action.
///
/// Each is reported once; the session unwinds its flags before returning.
#[derive(Debug, Error)]
pub enum AppError {
    /// Another upload or save is running, or a modal blocks input.
    #[error("Busy: another action is in progress")]
    Busy,

    /// The action needs an uploaded image.
    #[error("No image has been uploaded in this session")]
    NoImage,

    /// Saving needs at least one model line in the conversation.
    #[error("The conversation has no opening line yet")]
    NoOpeningLine,

    /// The hall has nothing to show.
    #[error("Archive is empty")]
    ArchiveEmpty,

    /// The upload could not be decoded or re-encoded.
    #[error("Could not process image: {0}")]
    PreprocessingFailed(String),

    /// The generation service failed and no fallback applied.
    #[error("Generation failed: {0}")]
    ExternalGenerationFailed(#[from] GenerationError),

    /// Storage error.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
