//! Render parameters: uniforms, render modes and the broadcast controller.
//!
//! The rendering collaborator reads a [`VisualParams`] per particle object.
//! The [`RenderParameterController`] keeps an explicit registry of sinks and
//! pushes discrete render-mode presets and continuous slider values into
//! every sink that accepts the key.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::carousel::RingSettings;
use crate::types::{Dimensions, EffectSettings};

// ---------------------------------------------------------------------------
// Uniforms
// ---------------------------------------------------------------------------

/// Every scalar uniform the particle shader reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Uniform {
    Time,
    Size,
    HasTexture,
    ImageAspect,
    PixelRatio,
    WaveAmplitude,
    WaveSpeed,
    EdgeRoughness,
    ErosionSpeed,
    Dispersion,
    GridOpacity,
    StableRadius,
    Brightness,
    Contrast,
    StippleStrength,
    HaloStrength,
    GrainStrength,
    LayeredStrength,
    LayerDepth,
    LayerNoiseDepth,
    Seed,
    Opacity,
    EdgeFade,
    EdgeWidth,
    Dim,
}

impl Uniform {
    /// Number of uniforms.
    pub const COUNT: usize = 25;

    /// All uniforms in declaration order.
    pub const ALL: [Uniform; Self::COUNT] = [
        Self::Time,
        Self::Size,
        Self::HasTexture,
        Self::ImageAspect,
        Self::PixelRatio,
        Self::WaveAmplitude,
        Self::WaveSpeed,
        Self::EdgeRoughness,
        Self::ErosionSpeed,
        Self::Dispersion,
        Self::GridOpacity,
        Self::StableRadius,
        Self::Brightness,
        Self::Contrast,
        Self::StippleStrength,
        Self::HaloStrength,
        Self::GrainStrength,
        Self::LayeredStrength,
        Self::LayerDepth,
        Self::LayerNoiseDepth,
        Self::Seed,
        Self::Opacity,
        Self::EdgeFade,
        Self::EdgeWidth,
        Self::Dim,
    ];

    /// Shader-side name, e.g. `uWaveSpeed`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "uTime",
            Self::Size => "uSize",
            Self::HasTexture => "uHasTexture",
            Self::ImageAspect => "uImageAspect",
            Self::PixelRatio => "uPixelRatio",
            Self::WaveAmplitude => "uWaveAmplitude",
            Self::WaveSpeed => "uWaveSpeed",
            Self::EdgeRoughness => "uEdgeRoughness",
            Self::ErosionSpeed => "uErosionSpeed",
            Self::Dispersion => "uDispersion",
            Self::GridOpacity => "uGridOpacity",
            Self::StableRadius => "uStableRadius",
            Self::Brightness => "uBrightness",
            Self::Contrast => "uContrast",
            Self::StippleStrength => "uStippleStrength",
            Self::HaloStrength => "uHaloStrength",
            Self::GrainStrength => "uGrainStrength",
            Self::LayeredStrength => "uLayeredStrength",
            Self::LayerDepth => "uLayerDepth",
            Self::LayerNoiseDepth => "uLayerNoiseDepth",
            Self::Seed => "uSeed",
            Self::Opacity => "uOpacity",
            Self::EdgeFade => "uEdgeFade",
            Self::EdgeWidth => "uEdgeWidth",
            Self::Dim => "uDim",
        }
    }

    /// Look up a uniform by its shader-side name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.name() == name)
    }

    /// Uniform driven by an [`EffectSettings`] slider, if any.
    ///
    /// The flag is `true` when the value must be multiplied by the device
    /// pixel ratio before it is written.
    #[must_use]
    pub fn for_setting(setting: &str) -> Option<(Self, bool)> {
        let uniform = match setting {
            "brightness" => Self::Brightness,
            "contrast" => Self::Contrast,
            "particleSize" => return Some((Self::Size, true)),
            "gridOpacity" => Self::GridOpacity,
            "erosionSpeed" => Self::ErosionSpeed,
            "waveAmplitude" => Self::WaveAmplitude,
            "waveSpeed" => Self::WaveSpeed,
            "dispersion" => Self::Dispersion,
            "edgeRoughness" => Self::EdgeRoughness,
            "stableRadius" => Self::StableRadius,
            _ => return None,
        };
        Some((uniform, false))
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Uniform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of uniforms, used by sinks to declare what they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformMask(u32);

impl UniformMask {
    /// Every uniform.
    #[must_use]
    pub fn all() -> Self {
        Uniform::ALL.into_iter().collect()
    }

    /// Whether `uniform` is in the set.
    #[must_use]
    pub fn contains(self, uniform: Uniform) -> bool {
        self.0 & uniform.bit() != 0
    }

    /// Add `uniform` to the set.
    pub fn insert(&mut self, uniform: Uniform) {
        self.0 |= uniform.bit();
    }
}

impl FromIterator<Uniform> for UniformMask {
    fn from_iter<I: IntoIterator<Item = Uniform>>(iter: I) -> Self {
        let mut mask = Self::default();
        for uniform in iter {
            mask.insert(uniform);
        }
        mask
    }
}

// ---------------------------------------------------------------------------
// Render modes
// ---------------------------------------------------------------------------

/// Named preset of stylization coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Stippled, kolam-like dots.
    #[default]
    Kolam,
    /// Soft glowing halo.
    Halo,
    /// Depth-layered strata.
    Layered,
}

/// Stylization coefficients written by a render mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPreset {
    /// `uStippleStrength`
    pub stipple: f32,
    /// `uHaloStrength`
    pub halo: f32,
    /// `uGrainStrength`
    pub grain: f32,
    /// `uLayeredStrength`
    pub layered: f32,
    /// `uLayerDepth`
    pub layer_depth: f32,
    /// `uLayerNoiseDepth`
    pub layer_noise_depth: f32,
}

impl RenderPreset {
    fn writes(&self) -> [(Uniform, f32); 6] {
        [
            (Uniform::StippleStrength, self.stipple),
            (Uniform::HaloStrength, self.halo),
            (Uniform::GrainStrength, self.grain),
            (Uniform::LayeredStrength, self.layered),
            (Uniform::LayerDepth, self.layer_depth),
            (Uniform::LayerNoiseDepth, self.layer_noise_depth),
        ]
    }
}

impl RenderMode {
    /// All modes.
    pub const ALL: [RenderMode; 3] = [Self::Kolam, Self::Halo, Self::Layered];

    /// Lowercase name as stored in preferences.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Kolam => "kolam",
            Self::Halo => "halo",
            Self::Layered => "layered",
        }
    }

    /// Parse a mode name; anything unknown is `Kolam`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "halo" => Self::Halo,
            "layered" => Self::Layered,
            _ => Self::Kolam,
        }
    }

    /// The coefficients this mode writes.
    #[must_use]
    pub fn preset(self) -> RenderPreset {
        match self {
            Self::Kolam => RenderPreset {
                stipple: 0.8,
                halo: 0.45,
                grain: 0.4,
                layered: 0.0,
                layer_depth: 0.0,
                layer_noise_depth: 0.0,
            },
            Self::Halo => RenderPreset {
                stipple: 0.15,
                halo: 0.9,
                grain: 0.2,
                layered: 0.0,
                layer_depth: 0.0,
                layer_noise_depth: 0.0,
            },
            Self::Layered => RenderPreset {
                stipple: 0.5,
                halo: 0.85,
                grain: 0.32,
                layered: 1.0,
                layer_depth: 0.08,
                layer_noise_depth: 0.05,
            },
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// RenderConfig
// ---------------------------------------------------------------------------

/// Hall camera field of view: default and limits, in degrees.
pub const HALL_FOV_DEFAULT: f32 = 40.0;
/// Hall camera field of view limits.
pub const HALL_FOV_LIMITS: (f32, f32) = (28.0, 60.0);
/// Base opacity of carousel items: default.
pub const HALL_OPACITY_DEFAULT: f32 = 0.62;
/// Base opacity limits.
pub const HALL_OPACITY_LIMITS: (f32, f32) = (0.2, 1.0);

/// User-adjustable render state, owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Active render mode.
    pub mode: RenderMode,
    /// Carousel ring geometry.
    pub ring: RingSettings,
    /// Hall camera field of view in degrees.
    pub hall_fov: f32,
    /// Base opacity of the selected carousel item.
    pub hall_opacity_base: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::default(),
            ring: RingSettings::default(),
            hall_fov: HALL_FOV_DEFAULT,
            hall_opacity_base: HALL_OPACITY_DEFAULT,
        }
    }
}

impl RenderConfig {
    /// Copy with every value inside its limits; non-finite values reset.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            mode: self.mode,
            ring: RingSettings::default().merged(self.ring),
            hall_fov: clamp_or(self.hall_fov, HALL_FOV_DEFAULT, HALL_FOV_LIMITS),
            hall_opacity_base: clamp_or(
                self.hall_opacity_base,
                HALL_OPACITY_DEFAULT,
                HALL_OPACITY_LIMITS,
            ),
        }
    }

    /// Restore ring geometry, field of view and opacity. The mode is kept.
    pub fn reset_hall_view(&mut self) {
        self.ring = RingSettings::default();
        self.hall_fov = HALL_FOV_DEFAULT;
        self.hall_opacity_base = HALL_OPACITY_DEFAULT;
    }
}

/// Clamp `value` into `limits`, keeping `fallback` when it is not finite.
pub(crate) fn clamp_or(value: f32, fallback: f32, limits: (f32, f32)) -> f32 {
    let raw = if value.is_finite() { value } else { fallback };
    raw.clamp(limits.0, limits.1)
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Something that receives uniform writes.
pub trait ParamSink: Send + Sync {
    /// Keys this sink accepts. Read once, at registration.
    fn accepted(&self) -> UniformMask;

    /// Write one scalar.
    fn set_uniform(&self, key: Uniform, value: f32);
}

/// Resolution tier of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTier {
    /// Low-resolution placeholder.
    Thumbnail,
    /// Full-resolution render.
    Full,
}

/// Encoded image bound to a particle object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    /// Asset key (or `editor` for the live upload).
    pub key: String,
    /// MIME type.
    pub mime: String,
    /// Resolution tier.
    pub tier: TextureTier,
    /// Encoded bytes, shared with the renderer.
    pub bytes: Arc<[u8]>,
}

/// Uniform set, texture and mesh scale of one particle object.
///
/// All state uses interior mutability so that a shared handle can be
/// registered with the controller and updated by the archive.
pub struct VisualParams {
    values: RwLock<[f32; Uniform::COUNT]>,
    accepted: UniformMask,
    texture: RwLock<Option<Texture>>,
    mesh_scale: RwLock<[f32; 3]>,
}

impl fmt::Debug for VisualParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualParams")
            .field("seed", &self.seed())
            .field("tier", &self.texture_tier())
            .field("mesh_scale", &self.mesh_scale())
            .finish_non_exhaustive()
    }
}

impl VisualParams {
    /// The editor's particle material, built from the current settings.
    #[must_use]
    pub fn particle_material(settings: &EffectSettings, pixel_ratio: f32) -> Self {
        let mut values = [0.0; Uniform::COUNT];
        let mut put = |u: Uniform, v: f32| values[u as usize] = v;

        put(Uniform::Time, 0.0);
        put(Uniform::Size, settings.particle_size * pixel_ratio);
        put(Uniform::HasTexture, 0.0);
        put(Uniform::ImageAspect, 1.0);
        put(Uniform::PixelRatio, pixel_ratio);
        put(Uniform::WaveAmplitude, settings.wave_amplitude);
        put(Uniform::WaveSpeed, settings.wave_speed);
        put(Uniform::EdgeRoughness, settings.edge_roughness);
        put(Uniform::ErosionSpeed, settings.erosion_speed);
        put(Uniform::Dispersion, settings.dispersion);
        put(Uniform::GridOpacity, settings.grid_opacity);
        put(Uniform::StableRadius, settings.stable_radius);
        put(Uniform::Brightness, settings.brightness);
        put(Uniform::Contrast, settings.contrast);
        put(Uniform::StippleStrength, 0.7);
        put(Uniform::HaloStrength, 0.2);
        put(Uniform::GrainStrength, 0.25);
        put(Uniform::LayeredStrength, 0.0);
        put(Uniform::LayerDepth, 0.0);
        put(Uniform::LayerNoiseDepth, 0.0);
        put(Uniform::Seed, 0.0);
        put(Uniform::Opacity, 1.0);
        put(Uniform::EdgeFade, 0.75);
        put(Uniform::EdgeWidth, 0.38);
        put(Uniform::Dim, 1.0);

        Self {
            values: RwLock::new(values),
            accepted: UniformMask::all(),
            texture: RwLock::new(None),
            mesh_scale: RwLock::new([1.0, 1.0, 1.0]),
        }
    }

    /// A memory's material, built from the settings frozen in its record.
    ///
    /// Same uniform set as [`VisualParams::particle_material`]; the archive
    /// applies the per-memory seed and time offset.
    #[must_use]
    pub fn from_snapshot(snapshot: &EffectSettings, pixel_ratio: f32) -> Self {
        Self::particle_material(snapshot, pixel_ratio)
    }

    /// Restrict the accepted keys. Writes to other keys are ignored.
    #[must_use]
    pub fn accepting(mut self, mask: UniformMask) -> Self {
        self.accepted = mask;
        self
    }

    /// Current value of `key`, if accepted.
    #[must_use]
    pub fn uniform(&self, key: Uniform) -> Option<f32> {
        self.accepted
            .contains(key)
            .then(|| self.values.read()[key as usize])
    }

    /// Per-object shader seed.
    #[must_use]
    pub fn seed(&self) -> f32 {
        self.values.read()[Uniform::Seed as usize]
    }

    /// Set the per-object seed.
    pub fn set_seed(&self, seed: f32) {
        self.set_uniform(Uniform::Seed, seed);
    }

    /// Bind a texture and fit the mesh to `dimensions`.
    pub fn set_texture(&self, texture: Texture, dimensions: Dimensions) {
        *self.texture.write() = Some(texture);
        *self.mesh_scale.write() = dimensions.mesh_scale();
        let mut values = self.values.write();
        values[Uniform::HasTexture as usize] = 1.0;
        values[Uniform::ImageAspect as usize] = dimensions.aspect();
    }

    /// Drop the texture (the editor is cleared on a new upload).
    pub fn clear_texture(&self) {
        *self.texture.write() = None;
        self.values.write()[Uniform::HasTexture as usize] = 0.0;
    }

    /// Currently bound texture.
    #[must_use]
    pub fn texture(&self) -> Option<Texture> {
        self.texture.read().clone()
    }

    /// Tier of the bound texture.
    #[must_use]
    pub fn texture_tier(&self) -> Option<TextureTier> {
        self.texture.read().as_ref().map(|t| t.tier)
    }

    /// Aspect-correct mesh scale.
    #[must_use]
    pub fn mesh_scale(&self) -> [f32; 3] {
        *self.mesh_scale.read()
    }
}

impl ParamSink for VisualParams {
    fn accepted(&self) -> UniformMask {
        self.accepted
    }

    fn set_uniform(&self, key: Uniform, value: f32) {
        if self.accepted.contains(key) {
            self.values.write()[key as usize] = value;
        }
    }
}

// ---------------------------------------------------------------------------
// RenderParameterController
// ---------------------------------------------------------------------------

struct Registration {
    sink: Arc<dyn ParamSink>,
    accepts: UniformMask,
}

/// Registry of live sinks plus the render configuration they follow.
pub struct RenderParameterController {
    sinks: RwLock<Vec<Registration>>,
    config: RwLock<RenderConfig>,
}

impl fmt::Debug for RenderParameterController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderParameterController")
            .field("sinks", &self.sinks.read().len())
            .field("config", &*self.config.read())
            .finish()
    }
}

impl Default for RenderParameterController {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl RenderParameterController {
    /// Create a controller; `config` is clamped.
    #[must_use]
    pub fn new(config: RenderConfig) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            config: RwLock::new(config.clamped()),
        }
    }

    /// Snapshot of the render configuration.
    #[must_use]
    pub fn config(&self) -> RenderConfig {
        *self.config.read()
    }

    /// Active render mode.
    #[must_use]
    pub fn mode(&self) -> RenderMode {
        self.config.read().mode
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Register a sink and stamp the active mode on it.
    pub fn register(&self, sink: Arc<dyn ParamSink>) {
        let mut sinks = self.sinks.write();
        let registration = Registration {
            accepts: sink.accepted(),
            sink,
        };
        apply_preset(&registration, self.config.read().mode.preset());
        sinks.push(registration);
    }

    /// Remove a sink. Returns whether it was registered.
    pub fn unregister(&self, sink: &Arc<dyn ParamSink>) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|r| !Arc::ptr_eq(&r.sink, sink));
        sinks.len() != before
    }

    /// Switch mode and apply its preset to every sink.
    pub fn set_mode(&self, mode: RenderMode) -> RenderMode {
        let sinks = self.sinks.write();
        self.config.write().mode = mode;
        let preset = mode.preset();
        for registration in sinks.iter() {
            apply_preset(registration, preset);
        }
        debug!(mode = %mode, sinks = sinks.len(), "Render mode applied");
        mode
    }

    /// Like [`Self::set_mode`], by name. Unknown names select `kolam`.
    pub fn set_mode_named(&self, name: &str) -> RenderMode {
        self.set_mode(RenderMode::from_name(name))
    }

    /// Write one scalar to every sink that accepts `key`.
    ///
    /// Returns the number of sinks written.
    pub fn update_continuous_parameter(&self, key: Uniform, value: f32) -> usize {
        let sinks = self.sinks.read();
        let mut written = 0;
        for registration in sinks.iter().filter(|r| r.accepts.contains(key)) {
            registration.sink.set_uniform(key, value);
            written += 1;
        }
        written
    }

    /// Replace the ring geometry; out-of-range values are clamped and
    /// non-finite ones keep the previous value.
    pub fn set_ring(&self, ring: RingSettings) -> RingSettings {
        let mut config = self.config.write();
        config.ring = config.ring.merged(ring);
        config.ring
    }

    /// Set the hall field of view (clamped).
    pub fn set_hall_fov(&self, fov: f32) -> f32 {
        let mut config = self.config.write();
        config.hall_fov = clamp_or(fov, config.hall_fov, HALL_FOV_LIMITS);
        config.hall_fov
    }

    /// Set the base opacity of carousel items (clamped).
    pub fn set_hall_opacity_base(&self, opacity: f32) -> f32 {
        let mut config = self.config.write();
        config.hall_opacity_base =
            clamp_or(opacity, config.hall_opacity_base, HALL_OPACITY_LIMITS);
        config.hall_opacity_base
    }

    /// Restore default ring, field of view and opacity.
    pub fn reset_hall_view(&self) -> RenderConfig {
        let mut config = self.config.write();
        config.reset_hall_view();
        *config
    }
}

fn apply_preset(registration: &Registration, preset: RenderPreset) {
    for (key, value) in preset.writes() {
        if registration.accepts.contains(key) {
            registration.sink.set_uniform(key, value);
        }
    }
}
