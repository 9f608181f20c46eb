//! Core type definitions for Afterglow memories.
//!
//! Everything in here is persisted (serde JSON inside the `memories` table)
//! or travels between the archive and the rendering collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Schema version written on every new record.
///
/// Records carrying any other value are skipped on hydration. There is no
/// migration path.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier for an archived memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Key of the low-resolution asset for this memory.
    #[must_use]
    pub fn thumb_key(&self) -> String {
        format!("{}:thumb", self.0)
    }

    /// Key of the full-resolution asset for this memory.
    #[must_use]
    pub fn render_key(&self) -> String {
        format!("{}:render", self.0)
    }

    /// Per-object shader seed in `[0, 1)`.
    ///
    /// 32-bit FNV-1a over the UTF-16 code units of the hyphenated id.
    #[must_use]
    pub fn seed(&self) -> f32 {
        seed_from_str(&self.0.to_string())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash an arbitrary string into a seed in `[0, 1)`.
#[must_use]
pub fn seed_from_str(value: &str) -> f32 {
    let mut hash: u32 = 2_166_136_261;
    for unit in value.encode_utf16() {
        hash ^= u32::from(unit);
        hash = hash.wrapping_mul(16_777_619);
    }
    let seed = (f64::from(hash) / 4_294_967_296.0) as f32;
    seed.min(1.0 - f32::EPSILON)
}

// ---------------------------------------------------------------------------
// Record parts
// ---------------------------------------------------------------------------

/// Keys of the two encoded images stored for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetKeys {
    /// Low-resolution asset key.
    pub thumb_key: String,
    /// Full-resolution asset key.
    pub render_key: String,
}

impl AssetKeys {
    /// Derive both keys from a memory id.
    #[must_use]
    pub fn for_id(id: &MemoryId) -> Self {
        Self {
            thumb_key: id.thumb_key(),
            render_key: id.render_key(),
        }
    }
}

/// Pixel size of the full-resolution asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimension pair.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Aspect-correct mesh scale: the long edge spans one unit.
    ///
    /// Degenerate dimensions produce the identity scale.
    #[must_use]
    pub fn mesh_scale(&self) -> [f32; 3] {
        if self.width == 0 || self.height == 0 {
            return [1.0, 1.0, 1.0];
        }
        let aspect = self.width as f32 / self.height as f32;
        if aspect > 1.0 {
            [1.0, 1.0 / aspect, 1.0]
        } else {
            [aspect, 1.0, 1.0]
        }
    }

    /// Width over height (1.0 for degenerate sizes).
    #[must_use]
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Generated reflective text attached to a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryCard {
    /// Short poetic title.
    pub title: String,
    /// Summary shown on the card (at most 180 chars when generated).
    pub summary: String,
    /// One-word mood.
    pub mood: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the diary was written.
    #[serde(rename = "dateISO")]
    pub date_iso: DateTime<Utc>,
}

impl DiaryCard {
    /// Placeholder card used when a memory is archived without a diary.
    #[must_use]
    pub fn stub(now: DateTime<Utc>) -> Self {
        Self {
            title: "Untitled".to_string(),
            summary: String::new(),
            mood: String::new(),
            tags: Vec::new(),
            date_iso: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Effect settings
// ---------------------------------------------------------------------------

/// Continuous effect parameters of the particle material.
///
/// A copy is frozen into every record so each memory keeps its own look.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectSettings {
    /// Wave animation speed.
    pub wave_speed: f32,
    /// Wave displacement amplitude.
    pub wave_amplitude: f32,
    /// Noise roughness of the eroding edge.
    pub edge_roughness: f32,
    /// Speed of edge erosion.
    pub erosion_speed: f32,
    /// Point size before pixel-ratio scaling.
    pub particle_size: f32,
    /// Particle dispersion outside the stable radius.
    pub dispersion: f32,
    /// Opacity of the background grid.
    pub grid_opacity: f32,
    /// Radius that stays undisturbed.
    pub stable_radius: f32,
    /// Brightness multiplier.
    pub brightness: f32,
    /// Contrast multiplier.
    pub contrast: f32,
    /// Camera distance in the editor.
    pub view_distance: f32,
    /// Spacing between gallery items.
    pub gallery_gap: f32,
}

/// Camera distance limits for the editor view.
pub const VIEW_DISTANCE_LIMITS: (f32, f32) = (0.5, 8.0);

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            wave_speed: 0.25,
            wave_amplitude: 0.17,
            edge_roughness: 0.5,
            erosion_speed: 0.15,
            particle_size: 11.5,
            dispersion: 0.1,
            grid_opacity: 0.5,
            stable_radius: 0.44,
            brightness: 1.7,
            contrast: 1.3,
            view_distance: 1.8,
            gallery_gap: 2.2,
        }
    }
}

impl EffectSettings {
    /// Update a setting by its camelCase name.
    ///
    /// Returns `false` for unknown names. `viewDistance` is clamped.
    pub fn set(&mut self, name: &str, value: f32) -> bool {
        let slot = match name {
            "waveSpeed" => &mut self.wave_speed,
            "waveAmplitude" => &mut self.wave_amplitude,
            "edgeRoughness" => &mut self.edge_roughness,
            "erosionSpeed" => &mut self.erosion_speed,
            "particleSize" => &mut self.particle_size,
            "dispersion" => &mut self.dispersion,
            "gridOpacity" => &mut self.grid_opacity,
            "stableRadius" => &mut self.stable_radius,
            "brightness" => &mut self.brightness,
            "contrast" => &mut self.contrast,
            "viewDistance" => {
                self.view_distance = value.clamp(VIEW_DISTANCE_LIMITS.0, VIEW_DISTANCE_LIMITS.1);
                return true;
            }
            "galleryGap" => &mut self.gallery_gap,
            _ => return false,
        };
        *slot = value;
        true
    }
}

// ---------------------------------------------------------------------------
// MemoryRecord
// ---------------------------------------------------------------------------

/// The persisted unit of the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Immutable identifier.
    pub id: MemoryId,
    /// Archive time; sole ordering key (newest first).
    pub created_at: DateTime<Utc>,
    /// Schema tag, compared against [`SCHEMA_VERSION`] on hydration.
    pub schema_version: u32,
    /// Keys of the thumb and render assets.
    pub assets: AssetKeys,
    /// Effect settings frozen at archive time.
    pub settings_snapshot: EffectSettings,
    /// Size of the full-resolution asset.
    pub dimensions: Dimensions,
    /// Generated diary card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diary_card: Option<DiaryCard>,
    /// Conversation log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl MemoryRecord {
    /// Whether this record was written by the current schema.
    #[must_use]
    pub fn is_current_schema(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// An encoded image blob with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// MIME type, e.g. `image/jpeg`.
    pub mime: String,
    /// Encoded bytes.
    pub bytes: Vec<u8>,
}

impl Blob {
    /// Create a new blob.
    #[must_use]
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }
}

/// A stored asset row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Key the asset is addressed by.
    pub key: String,
    /// MIME type.
    pub mime: String,
    /// Encoded bytes.
    pub blob: Vec<u8>,
}

/// Both images required to archive a memory.
///
/// Fields are optional so that incomplete payloads can be rejected by the
/// store before anything is written.
#[derive(Debug, Clone, Default)]
pub struct MemoryPayload {
    /// Low-resolution image.
    pub thumb: Option<Blob>,
    /// Full-resolution image.
    pub render: Option<Blob>,
}

impl MemoryPayload {
    /// A complete payload.
    #[must_use]
    pub fn new(thumb: Blob, render: Blob) -> Self {
        Self {
            thumb: Some(thumb),
            render: Some(render),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_keys_follow_id() {
        let id = MemoryId::new();
        let keys = AssetKeys::for_id(&id);
        assert_eq!(keys.thumb_key, format!("{id}:thumb"));
        assert_eq!(keys.render_key, format!("{id}:render"));
        assert_ne!(keys.thumb_key, keys.render_key);
    }

    #[test]
    fn seed_is_stable_and_in_range() {
        let a = seed_from_str("memory-a");
        let b = seed_from_str("memory-a");
        let c = seed_from_str("memory-b");
        assert!((a - b).abs() < f32::EPSILON);
        assert!((a - c).abs() > f32::EPSILON);
        assert!((0.0..1.0).contains(&a));
        // FNV-1a offset basis for the empty string.
        assert!((seed_from_str("") - 2_166_136_261.0 / 4_294_967_296.0).abs() < 1e-6);
    }

    #[test]
    fn mesh_scale_keeps_long_edge_at_one() {
        assert_eq!(Dimensions::new(200, 100).mesh_scale(), [1.0, 0.5, 1.0]);
        assert_eq!(Dimensions::new(100, 200).mesh_scale(), [0.5, 1.0, 1.0]);
        assert_eq!(Dimensions::new(0, 200).mesh_scale(), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn settings_set_by_name() {
        let mut settings = EffectSettings::default();
        assert!(settings.set("brightness", 2.0));
        assert!((settings.brightness - 2.0).abs() < f32::EPSILON);
        assert!(settings.set("viewDistance", 20.0));
        assert!((settings.view_distance - 8.0).abs() < f32::EPSILON);
        assert!(!settings.set("unknown", 1.0));
    }

    #[test]
    fn record_json_uses_camel_case() {
        let id = MemoryId::new();
        let record = MemoryRecord {
            id,
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            assets: AssetKeys::for_id(&id),
            settings_snapshot: EffectSettings::default(),
            dimensions: Dimensions::new(1536, 1024),
            diary_card: Some(DiaryCard::stub(Utc::now())),
            transcript: None,
        };
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("schemaVersion").is_some());
        assert!(json["assets"].get("thumbKey").is_some());
        assert!(json["settingsSnapshot"].get("waveSpeed").is_some());
        assert!(json["diaryCard"].get("dateISO").is_some());
        assert!(json.get("transcript").is_none());

        let back: MemoryRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}
