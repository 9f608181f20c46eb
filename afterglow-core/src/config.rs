//! Configuration for Afterglow.
//!
//! Two files back the configuration:
//! - `afterglow.toml` ([`AfterglowConfig`]): static tuning, read at startup.
//! - `preferences.toml` ([`Preferences`]): user choices (render mode, ring
//!   shape, hall camera) written back whenever they change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::carousel::CarouselTuning;
use crate::error::{ArchiveError, Result};
use crate::render::RenderConfig;

/// Top-level Afterglow configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AfterglowConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Persistence / store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Carousel animation constants.
    #[serde(default)]
    pub carousel: CarouselTuning,
    /// Image preprocessing targets.
    #[serde(default)]
    pub images: ImageConfig,
    /// Text-generation service settings.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Session timers and display.
    #[serde(default)]
    pub session: SessionConfig,
}

impl AfterglowConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ArchiveError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ArchiveError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Persistence / store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

/// Image preprocessing targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Longest edge of the thumbnail in pixels.
    #[serde(default = "default_512")]
    pub thumb_max_edge: u32,
    /// Longest edge of the full-resolution render in pixels.
    #[serde(default = "default_1536")]
    pub render_max_edge: u32,
    /// JPEG quality of the thumbnail (1-100).
    #[serde(default = "default_80")]
    pub thumb_quality: u8,
    /// JPEG quality of the render (1-100).
    #[serde(default = "default_85")]
    pub render_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            thumb_max_edge: 512,
            render_max_edge: 1536,
            thumb_quality: 80,
            render_quality: 85,
        }
    }
}

/// Text-generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Whether to call the service at all. When off every call uses the
    /// local fallback.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the caption / chat / diary service.
    #[serde(default = "default_api_base")]
    pub base_url: String,
    /// Hard timeout for any call in milliseconds.
    #[serde(default = "default_15000")]
    pub request_timeout_ms: u64,
    /// Retries before falling back.
    #[serde(default = "default_1")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_api_base(),
            request_timeout_ms: 15_000,
            max_retries: 1,
        }
    }
}

/// Session timers and display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Voice timer tick in milliseconds.
    #[serde(default = "default_1000")]
    pub voice_tick_ms: u64,
    /// Delay between streamed reply characters in milliseconds.
    #[serde(default = "default_40")]
    pub stream_char_ms: u64,
    /// Device pixel ratio applied to particle size.
    #[serde(default = "default_1_0")]
    pub pixel_ratio: f32,
    /// Where user preferences are stored.
    #[serde(default = "default_prefs_path")]
    pub preferences_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice_tick_ms: 1000,
            stream_char_ms: 40,
            pixel_ratio: 1.0,
            preferences_path: default_prefs_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// User preferences persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Preferences {
    /// Render mode, ring shape and hall camera.
    #[serde(default)]
    pub render: RenderConfig,
    /// Whether the user ever uploaded a photo (skips the landing screen).
    #[serde(default)]
    pub has_uploaded_once: bool,
}

impl Preferences {
    /// Load preferences from `path`.
    ///
    /// A missing, unreadable or corrupt file yields the defaults. Values
    /// outside their limits are clamped.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No preferences file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read preferences, using defaults");
                return Self::default();
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(mut prefs) => {
                prefs.render = prefs.render.clamped();
                prefs
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt preferences, using defaults");
                Self::default()
            }
        }
    }

    /// Write preferences to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` or `ArchiveError::Serialization`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_db_path() -> PathBuf { PathBuf::from("afterglow.db") }
fn default_prefs_path() -> PathBuf { PathBuf::from("preferences.toml") }
fn default_api_base() -> String { "http://localhost:8787".to_string() }
fn default_1_0() -> f32 { 1.0 }
fn default_1() -> u32 { 1 }
fn default_40() -> u64 { 40 }
fn default_80() -> u8 { 80 }
fn default_85() -> u8 { 85 }
fn default_512() -> u32 { 512 }
fn default_1000() -> u64 { 1000 }
fn default_1536() -> u32 { 1536 }
fn default_5000() -> u64 { 5000 }
fn default_15000() -> u64 { 15_000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderMode;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AfterglowConfig::from_toml("").expect("parse");
        assert_eq!(config.images.thumb_max_edge, 512);
        assert_eq!(config.images.render_max_edge, 1536);
        assert_eq!(config.generation.base_url, "http://localhost:8787");
        assert!((config.carousel.index_lerp - 0.12).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AfterglowConfig::from_toml(
            r#"
            [general]
            log_level = "debug"

            [carousel]
            pos_lerp = 0.3
            "#,
        )
        .expect("parse");
        assert_eq!(config.general.log_level, "debug");
        assert!((config.carousel.pos_lerp - 0.3).abs() < f32::EPSILON);
        assert!((config.carousel.rot_lerp - 0.14).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = AfterglowConfig::from_toml("general = [").expect_err("should fail");
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn preferences_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("preferences.toml");

        let mut prefs = Preferences::default();
        prefs.render.mode = RenderMode::Layered;
        prefs.render.ring.radius = 2.5;
        prefs.has_uploaded_once = true;
        prefs.save(&path).expect("save");

        let loaded = Preferences::load(&path);
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn preferences_missing_or_corrupt_fall_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert_eq!(Preferences::load(&missing), Preferences::default());

        let corrupt = dir.path().join("corrupt.toml");
        std::fs::write(&corrupt, "render = 12 = 4").expect("write");
        assert_eq!(Preferences::load(&corrupt), Preferences::default());
    }

    #[test]
    fn preferences_are_clamped_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("preferences.toml");
        std::fs::write(
            &path,
            r#"
            has_uploaded_once = true

            [render]
            mode = "halo"
            hall_fov = 120.0

            [render.ring]
            radius = 99.0
            "#,
        )
        .expect("write");

        let prefs = Preferences::load(&path);
        assert_eq!(prefs.render.mode, RenderMode::Halo);
        assert!((prefs.render.hall_fov - 60.0).abs() < f32::EPSILON);
        assert!((prefs.render.ring.radius - 4.0).abs() < f32::EPSILON);
        assert!(prefs.has_uploaded_once);
    }
}
