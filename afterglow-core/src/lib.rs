//! # Afterglow Core Library
//!
//! Storage and presentation engine for Afterglow memories: photos turned into
//! animated particle portraits, kept locally and browsed in a circular hall.
//!
//! - [`persistence`]: SQLite asset store for records and image blobs
//! - [`archive`]: hydrated renderable memories with lazy full-resolution upgrades
//! - [`carousel`]: ring layout, navigation and per-frame smoothing
//! - [`render`]: uniforms, render modes and the broadcast controller
//!
//! ## Frame Contract
//!
//! The carousel update and uniform broadcasts run once per frame and never
//! fail or block. Everything that touches storage is async and suspends only
//! the calling task.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod archive;
pub mod carousel;
pub mod config;
pub mod error;
pub mod persistence;
pub mod render;
pub mod types;

pub use archive::{MemoryArchive, RenderableMemory};
pub use carousel::CarouselEngine;
pub use config::{AfterglowConfig, Preferences};
pub use error::ArchiveError;
pub use persistence::{AssetSource, AssetStore};
pub use render::{RenderParameterController, VisualParams};
pub use types::*;
