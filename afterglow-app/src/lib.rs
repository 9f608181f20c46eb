//! # afterglow-app: the Afterglow application layer
//!
//! Wires the core archive and the generation client into one facade,
//! [`Afterglow`], whose methods map one-to-one onto user actions: upload,
//! talk, save, browse the hall and tune the look.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Afterglow                    │
//! │  ┌──────────┐  ┌────────────┐  ┌──────────┐  │
//! │  │ Session  │  │ Preprocess │  │  Diary   │  │
//! │  └────┬─────┘  └─────┬──────┘  └────┬─────┘  │
//! │       ▼              ▼              ▼        │
//! │  ┌────────────────────────┐  ┌────────────┐  │
//! │  │     afterglow-core     │  │ afterglow- │  │
//! │  │ archive·carousel·render│  │    llm     │  │
//! │  └────────────────────────┘  └────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `session`: screens, gating, voice capture and frame timers
//! - `preprocess`: thumbnail and render encoding of uploads
//! - `diary`: diary cards from the service or the local fallback
//! - `telemetry`: tracing subscriber setup

pub mod diary;
pub mod error;
pub mod preprocess;
pub mod session;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use afterglow_core::archive::{MemoryArchive, NewMemory, UpgradeOutcome};
use afterglow_core::carousel::{CarouselEngine, RingSettings};
use afterglow_core::config::{AfterglowConfig, GenerationConfig, Preferences};
use afterglow_core::persistence::{AssetSource, AssetStore};
use afterglow_core::render::{
    ParamSink, RenderConfig, RenderMode, RenderParameterController, Texture, TextureTier, Uniform,
    VisualParams,
};
use afterglow_core::types::{EffectSettings, MemoryRecord};
use afterglow_llm::fallback::{fallback_caption, FALLBACK_CHAT_REPLY};
use afterglow_llm::prompt::normalize_questions;
use afterglow_llm::{GenerationClient, ImageAnalysis, TextGenerator};
use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use diary::DiaryResult;
pub use error::{AppError, Result};
pub use preprocess::{ImageCrateProcessor, ImagePreprocessor, PreparedImage};
pub use session::{Screen, Session, SpeechErrorKind, SpeechEvent, SpeechOutcome, VoiceCommand};

/// Texture key of the live upload in the editor.
pub const EDITOR_TEXTURE_KEY: &str = "editor";

/// Build the generator described by `config`: the HTTP client when
/// enabled, otherwise one that always falls back.
#[must_use]
pub fn generator_from_config(config: &GenerationConfig) -> Arc<dyn TextGenerator> {
    if config.enabled {
        Arc::new(GenerationClient::http(
            config.base_url.clone(),
            config.max_retries,
            config.request_timeout_ms,
        ))
    } else {
        Arc::new(GenerationClient::none())
    }
}

/// The memory under the hall's selection, for the info panel.
#[derive(Debug, Clone)]
pub struct SelectedMemory {
    /// Index in the archive (newest first).
    pub index: usize,
    /// One-based position shown to the user.
    pub number: usize,
    /// The record.
    pub record: MemoryRecord,
}

/// A hall navigation and the upgrade it triggered.
#[derive(Debug)]
pub struct Navigation {
    /// New selection.
    pub index: usize,
    /// Full-resolution load for the selection; never cancelled.
    pub upgrade: JoinHandle<UpgradeOutcome>,
}

// ---------------------------------------------------------------------------
// Pending actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Action {
    Upload,
    Save,
}

/// Unwinds the session flags of an action that did not complete, including
/// when its future is dropped mid-flight.
struct PendingAction<'a> {
    session: &'a Mutex<Session>,
    action: Action,
    armed: bool,
}

impl<'a> PendingAction<'a> {
    fn new(session: &'a Mutex<Session>, action: Action) -> Self {
        Self {
            session,
            action,
            armed: true,
        }
    }

    /// The action finished; keep the flags it left.
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAction<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.session.lock();
        match self.action {
            Action::Upload => session.abort_upload(),
            Action::Save => session.abort_save(),
        }
        debug!(action = ?self.action, "Unwound unfinished action");
    }
}

/// The application, over any asset source (SQLite by default).
pub struct Afterglow<S = AssetStore> {
    config: AfterglowConfig,
    prefs_path: PathBuf,
    preprocessor: Arc<dyn ImagePreprocessor>,
    generator: Arc<dyn TextGenerator>,
    archive: Arc<MemoryArchive<S>>,
    controller: Arc<RenderParameterController>,
    editor: Arc<VisualParams>,
    carousel: Mutex<CarouselEngine>,
    session: Mutex<Session>,
    settings: Mutex<EffectSettings>,
    preferences: Mutex<Preferences>,
}

impl<S> std::fmt::Debug for Afterglow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Afterglow")
            .field("archive", &self.archive)
            .field("prefs_path", &self.prefs_path)
            .finish_non_exhaustive()
    }
}

impl Afterglow<AssetStore> {
    /// Open the store, load preferences from
    /// `config.session.preferences_path`, hydrate the archive and choose the
    /// first screen.
    ///
    /// An unusable database degrades to a session-only store.
    ///
    /// # Errors
    ///
    /// Only if even the in-memory store cannot be created.
    pub async fn open(
        config: AfterglowConfig,
        preprocessor: Arc<dyn ImagePreprocessor>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let store = match AssetStore::open(&config.persistence.db_path, &config.persistence) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Storage unavailable; continuing without persistence");
                AssetStore::open_in_memory(&config.persistence)?
            }
        };
        info!(persistent = store.is_persistent(), "Asset store ready");
        Ok(Self::with_source(config, store, preprocessor, generator).await)
    }
}

impl<S: AssetSource + 'static> Afterglow<S> {
    /// Build the app over an already opened `source`: load preferences,
    /// hydrate the archive and choose the first screen.
    pub async fn with_source(
        config: AfterglowConfig,
        source: S,
        preprocessor: Arc<dyn ImagePreprocessor>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let prefs_path = config.session.preferences_path.clone();
        let preferences = Preferences::load(&prefs_path);
        let controller = Arc::new(RenderParameterController::new(preferences.render));

        let pixel_ratio = config.session.pixel_ratio;
        let settings = EffectSettings::default();
        let editor = Arc::new(VisualParams::particle_material(&settings, pixel_ratio));
        controller.register(editor.clone());

        let archive = Arc::new(MemoryArchive::new(source, controller.clone(), pixel_ratio));
        let report = archive.hydrate().await;

        let mut carousel = CarouselEngine::new(config.carousel.clone());
        carousel.sync_len(archive.len());
        carousel.snap_to_index(0, archive.len());

        let session = Session::new(&config.session, preferences.has_uploaded_once, archive.len());
        info!(
            memories = report.loaded,
            mode = controller.mode().name(),
            screen = ?session.screen(),
            "Afterglow opened"
        );

        Self {
            config,
            prefs_path,
            preprocessor,
            generator,
            archive,
            controller,
            editor,
            carousel: Mutex::new(carousel),
            session: Mutex::new(session),
            settings: Mutex::new(settings),
            preferences: Mutex::new(preferences),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The session, locked. Do not hold across an `.await`.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    /// Current screen.
    #[must_use]
    pub fn screen(&self) -> Screen {
        self.session.lock().screen()
    }

    /// The memory archive.
    #[must_use]
    pub fn archive(&self) -> &Arc<MemoryArchive<S>> {
        &self.archive
    }

    /// The render parameter controller.
    #[must_use]
    pub fn controller(&self) -> &Arc<RenderParameterController> {
        &self.controller
    }

    /// The editor's particle material.
    #[must_use]
    pub fn editor(&self) -> &Arc<VisualParams> {
        &self.editor
    }

    /// The carousel, locked. Do not hold across an `.await`.
    pub fn carousel(&self) -> MutexGuard<'_, CarouselEngine> {
        self.carousel.lock()
    }

    /// Current effect settings.
    #[must_use]
    pub fn settings(&self) -> EffectSettings {
        *self.settings.lock()
    }

    /// Current preferences.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences.lock().clone()
    }

    // ------------------------------------------------------------------
    // Upload and conversation
    // ------------------------------------------------------------------

    /// Prepare an upload and open a conversation about it.
    ///
    /// Preprocessing and image analysis run concurrently. A failed
    /// analysis falls back to a local caption. Dropping the future before
    /// it completes unblocks the session.
    ///
    /// # Errors
    ///
    /// [`AppError::Busy`] while blocked; [`AppError::PreprocessingFailed`]
    /// leaves the previous upload in place.
    pub async fn upload(&self, bytes: &[u8], mime: &str) -> Result<()> {
        self.session.lock().begin_upload()?;
        let pending = PendingAction::new(&self.session, Action::Upload);

        let (prepared, analysis) = tokio::join!(
            self.preprocessor.prepare(bytes, mime),
            self.generator.analyze_image(bytes, mime),
        );

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, mime, "Upload preprocessing failed");
                return Err(e);
            }
        };
        let analysis = analysis.unwrap_or_else(|e| {
            let caption = fallback_caption(&mut rand::thread_rng());
            warn!(error = %e, caption, "Image analysis failed; using fallback caption");
            ImageAnalysis {
                caption: caption.to_string(),
                ..ImageAnalysis::default()
            }
        });

        self.editor.set_texture(
            Texture {
                key: EDITOR_TEXTURE_KEY.to_string(),
                mime: prepared.render.mime.clone(),
                tier: TextureTier::Full,
                bytes: Arc::from(prepared.render.bytes.as_slice()),
            },
            prepared.dimensions,
        );

        let questions = normalize_questions(&analysis.questions);
        info!(
            width = prepared.dimensions.width,
            height = prepared.dimensions.height,
            questions = questions.len(),
            "Upload ready"
        );
        self.session
            .lock()
            .finish_upload(prepared, analysis.caption, questions);
        pending.complete();
        self.mark_uploaded();
        Ok(())
    }

    /// Send a user turn and stream the reply.
    ///
    /// A failed or empty reply is replaced by a local one. Returns whether
    /// a reply was applied (blank text or a superseded request apply none).
    ///
    /// # Errors
    ///
    /// [`AppError::NoImage`] before the first upload.
    pub async fn submit_user_text(&self, text: &str) -> Result<bool> {
        let Some((request, contents)) = self.session.lock().push_user_turn(text)? else {
            return Ok(false);
        };

        let reply = match self.generator.chat(&contents).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!(request, "Empty chat reply; using fallback");
                FALLBACK_CHAT_REPLY.to_string()
            }
            Err(e) => {
                warn!(request, error = %e, "Chat request failed; using fallback");
                FALLBACK_CHAT_REPLY.to_string()
            }
        };

        Ok(self
            .session
            .lock()
            .accept_reply(request, reply, Instant::now()))
    }

    /// Toggle voice capture; returns the recognizer command.
    ///
    /// # Errors
    ///
    /// See [`Session::toggle_mic`].
    pub fn toggle_mic(&self) -> Result<Option<VoiceCommand>> {
        self.session.lock().toggle_mic()
    }

    /// Apply a recognizer event, sending committed speech as a user turn.
    ///
    /// # Errors
    ///
    /// Propagates [`Afterglow::submit_user_text`] errors for committed text.
    pub async fn handle_speech(&self, event: SpeechEvent) -> Result<SpeechOutcome> {
        let outcome = self.session.lock().on_speech(event, Instant::now());
        if let SpeechOutcome::Commit(text) = &outcome {
            self.submit_user_text(text).await?;
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Generate the diary, archive the upload and present the diary.
    ///
    /// Input stays blocked until [`Afterglow::dismiss_diary`].
    ///
    /// # Errors
    ///
    /// Gating errors from [`Session::begin_save`], or the store error. On
    /// error, or when the future is dropped early, every flag is unwound.
    pub async fn save_memory(&self) -> Result<DiaryResult> {
        self.session.lock().begin_save()?;
        let pending = PendingAction::new(&self.session, Action::Save);

        let draft = {
            let session = self.session.lock();
            session
                .image()
                .cloned()
                .map(|image| (session.transcript(), image))
        };
        let Some((transcript, image)) = draft else {
            return Err(AppError::NoImage);
        };

        let now = Utc::now();
        let date_iso = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let diary = match self.generator.generate_diary(&transcript, &date_iso).await {
            Ok(response) => diary::map_diary_response(response, &transcript, now),
            Err(e) => {
                warn!(error = %e, "Diary generation failed; using fallback");
                diary::fallback_diary(&transcript, now)
            }
        };

        let memory = NewMemory {
            thumb: image.thumb,
            render: image.render,
            dimensions: image.dimensions,
            settings: *self.settings.lock(),
            diary_card: Some(diary.card.clone()),
            transcript: Some(transcript),
        };

        match self.archive.archive_new(memory).await {
            Ok(record) => {
                {
                    let mut carousel = self.carousel.lock();
                    carousel.insert_slot(0);
                    carousel.snap_to_index(0, self.archive.len());
                }
                self.session.lock().finish_save(diary.clone());
                pending.complete();
                info!(id = %record.id, title = %diary.card.title, "Memory saved");
                Ok(diary)
            }
            Err(e) => {
                warn!(error = %e, "Could not save memory");
                Err(e.into())
            }
        }
    }

    /// Close the diary and enter the hall. Returns `false` when no diary
    /// was open.
    ///
    /// # Errors
    ///
    /// See [`Afterglow::enter_hall`].
    pub fn dismiss_diary(&self) -> Result<bool> {
        if !self.session.lock().dismiss_diary() {
            return Ok(false);
        }
        self.enter_hall()
    }

    // ------------------------------------------------------------------
    // Hall
    // ------------------------------------------------------------------

    /// Enter the hall and start loading the selection at full resolution.
    ///
    /// Returns `false` when already there. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`AppError::ArchiveEmpty`] or [`AppError::Busy`].
    pub fn enter_hall(&self) -> Result<bool> {
        let len = self.archive.len();
        if !self.session.lock().enter_hall(len)? {
            return Ok(false);
        }
        let index = {
            let mut carousel = self.carousel.lock();
            carousel.sync_len(len);
            let target = carousel.state().index_target;
            carousel.snap_to_index(target, len);
            carousel.state().index_target
        };
        drop(self.spawn_upgrade(index));
        Ok(true)
    }

    /// Leave the hall. Returns `false` when not there.
    pub fn exit_hall(&self) -> bool {
        self.session.lock().exit_hall()
    }

    /// Move the hall selection by `delta`.
    ///
    /// `None` outside the hall or on an empty archive. Must run inside a
    /// tokio runtime.
    pub fn navigate(&self, delta: isize) -> Option<Navigation> {
        if self.screen() != Screen::Gallery {
            return None;
        }
        let index = self.carousel.lock().navigate(delta, self.archive.len())?;
        Some(Navigation {
            index,
            upgrade: self.spawn_upgrade(index),
        })
    }

    fn spawn_upgrade(&self, index: usize) -> JoinHandle<UpgradeOutcome> {
        let archive = Arc::clone(&self.archive);
        tokio::spawn(async move { archive.ensure_high_res(index).await })
    }

    /// The selected memory.
    #[must_use]
    pub fn selected_memory(&self) -> Option<SelectedMemory> {
        let index = self.carousel.lock().state().index_target;
        let record = self.archive.record(index)?;
        Some(SelectedMemory {
            index,
            number: index + 1,
            record,
        })
    }

    // ------------------------------------------------------------------
    // Look
    // ------------------------------------------------------------------

    /// Switch render mode by name (unknown names select kolam) and persist it.
    pub fn set_render_mode(&self, name: &str) -> RenderMode {
        let mode = self.controller.set_mode_named(name);
        self.persist_render_config();
        mode
    }

    /// Update one effect slider and broadcast its uniform to the editor and
    /// every memory.
    ///
    /// Returns `false` for unknown keys and non-finite values.
    pub fn update_setting(&self, key: &str, value: f32) -> bool {
        if !value.is_finite() || !self.settings.lock().set(key, value) {
            return false;
        }
        if let Some((uniform, scaled)) = Uniform::for_setting(key) {
            let value = if scaled {
                value * self.config.session.pixel_ratio
            } else {
                value
            };
            self.controller.update_continuous_parameter(uniform, value);
        }
        true
    }

    /// Change the ring shape; invalid fields keep their previous value.
    pub fn set_ring(&self, ring: RingSettings) -> RingSettings {
        let merged = self.controller.set_ring(ring);
        self.persist_render_config();
        merged
    }

    /// Set the hall field of view (clamped).
    pub fn set_hall_fov(&self, fov: f32) -> f32 {
        let fov = self.controller.set_hall_fov(fov);
        self.persist_render_config();
        fov
    }

    /// Set the hall's base opacity (clamped).
    pub fn set_hall_opacity_base(&self, opacity: f32) -> f32 {
        let opacity = self.controller.set_hall_opacity_base(opacity);
        self.persist_render_config();
        opacity
    }

    /// Restore ring, field of view and opacity defaults.
    pub fn reset_hall_view(&self) -> RenderConfig {
        let config = self.controller.reset_hall_view();
        self.persist_render_config();
        config
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Per-frame update: session timers, time uniforms and, in the hall,
    /// the carousel layout.
    pub fn frame(&self, now: Instant, elapsed_secs: f32) {
        let in_hall = {
            let mut session = self.session.lock();
            session.tick(now);
            session.screen() == Screen::Gallery
        };

        self.editor.set_uniform(Uniform::Time, elapsed_secs);
        self.archive.advance_time(elapsed_secs);

        if in_hall {
            let config = self.controller.config();
            let visuals = self.archive.visuals();
            let refs: Vec<&VisualParams> = visuals.iter().map(|v| &**v).collect();
            let mut carousel = self.carousel.lock();
            carousel.sync_len(refs.len());
            carousel.update(&config.ring, config.hall_opacity_base, &refs);
        }
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    fn mark_uploaded(&self) {
        let mut prefs = self.preferences.lock();
        if !prefs.has_uploaded_once {
            prefs.has_uploaded_once = true;
            self.save_preferences(&prefs);
        }
    }

    fn persist_render_config(&self) {
        let mut prefs = self.preferences.lock();
        prefs.render = self.controller.config();
        self.save_preferences(&prefs);
    }

    fn save_preferences(&self, prefs: &Preferences) {
        if let Err(e) = prefs.save(&self.prefs_path) {
            warn!(error = %e, path = %self.prefs_path.display(), "Could not save preferences");
        }
    }
}
