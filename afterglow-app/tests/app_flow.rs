//! End-to-end flows through the [`Afterglow`] facade with scripted
//! preprocessing and generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use afterglow_app::diary::FALLBACK_TITLE;
use afterglow_app::{
    AppError, Afterglow, ImagePreprocessor, PreparedImage, Screen, SpeechEvent, SpeechOutcome,
    VoiceCommand,
};
use afterglow_core::archive::UpgradeOutcome;
use afterglow_core::config::{AfterglowConfig, PersistenceConfig};
use afterglow_core::error::{ArchiveError, Result as ArchiveResult};
use afterglow_core::persistence::{AssetSource, AssetStore, MemoryCursor};
use afterglow_core::render::{RenderMode, Uniform};
use afterglow_core::types::{Asset, Blob, Dimensions, MemoryPayload, MemoryRecord};
use afterglow_llm::error::{GenerationError, Result as GenResult};
use afterglow_llm::fallback::{FALLBACK_CAPTIONS, FALLBACK_CHAT_REPLY};
use afterglow_llm::{ChatTurn, DiaryResponse, ImageAnalysis, TextGenerator};
use async_trait::async_trait;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Prepares anything non-empty; `b"stall"` never finishes.
struct FakePreprocessor;

#[async_trait]
impl ImagePreprocessor for FakePreprocessor {
    async fn prepare(&self, bytes: &[u8], _mime: &str) -> afterglow_app::Result<PreparedImage> {
        if bytes == b"stall" {
            std::future::pending::<()>().await;
        }
        if bytes.is_empty() {
            return Err(AppError::PreprocessingFailed("empty upload".into()));
        }
        Ok(PreparedImage {
            thumb: Blob::new("image/jpeg", [b"thumb-".as_slice(), bytes].concat()),
            render: Blob::new("image/jpeg", [b"render-".as_slice(), bytes].concat()),
            dimensions: Dimensions::new(1200, 800),
        })
    }
}

#[derive(Default)]
struct ScriptedGenerator {
    offline: bool,
    stall_diary: AtomicBool,
    chats: AtomicUsize,
}

impl ScriptedGenerator {
    fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            offline: true,
            ..Self::default()
        })
    }

    fn check(&self) -> GenResult<()> {
        if self.offline {
            Err(GenerationError::Unavailable("offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn analyze_image(&self, _bytes: &[u8], _mime: &str) -> GenResult<ImageAnalysis> {
        self.check()?;
        Ok(ImageAnalysis {
            vibe: "hushed".into(),
            caption: "A lantern on a wet street.".into(),
            questions: vec!["Who was with you?".into(), "What did it smell like?".into()],
        })
    }

    async fn chat(&self, contents: &[ChatTurn]) -> GenResult<String> {
        self.check()?;
        self.chats.fetch_add(1, Ordering::SeqCst);
        Ok(format!("I hear you ({} turns).", contents.len()))
    }

    async fn generate_diary(&self, transcript: &str, _date_iso: &str) -> GenResult<DiaryResponse> {
        if self.stall_diary.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.check()?;
        Ok(DiaryResponse {
            title: "Rain Lantern".into(),
            mood: "Tender".into(),
            highlights: vec!["lantern".into()],
            diary: format!("Tonight I remembered: {}", transcript.lines().count()),
            tags: vec!["rain".into()],
        })
    }
}

/// In-memory store whose writes can be switched to fail.
struct FlakyStore {
    inner: AssetStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: AssetStore::open_in_memory(&PersistenceConfig::default()).expect("store"),
            fail_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AssetSource for FlakyStore {
    async fn store_memory(&self, record: MemoryRecord, payload: MemoryPayload) -> ArchiveResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ArchiveError::StorageUnavailable("disk full".into()));
        }
        self.inner.store_memory(record, payload).await
    }

    async fn load_memories(&self) -> ArchiveResult<MemoryCursor> {
        self.inner.load_memories().await
    }

    async fn load_asset(&self, key: &str) -> ArchiveResult<Option<Asset>> {
        self.inner.load_asset(key).await
    }
}

fn config(dir: &TempDir) -> AfterglowConfig {
    let mut config = AfterglowConfig::default();
    config.persistence.db_path = dir.path().join("afterglow.db");
    config.session.preferences_path = dir.path().join("prefs.toml");
    config.session.stream_char_ms = 10;
    config
}

async fn open(dir: &TempDir, generator: Arc<ScriptedGenerator>) -> Afterglow {
    Afterglow::open(config(dir), Arc::new(FakePreprocessor), generator)
        .await
        .expect("open")
}

// ---------------------------------------------------------------------------
// Upload and chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_launch_lands_then_upload_opens_conversation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;
    assert_eq!(app.screen(), Screen::Landing);

    app.upload(b"pixels", "image/png").await.expect("upload");

    let session = app.session();
    assert_eq!(session.screen(), Screen::Home);
    assert_eq!(session.caption(), "A lantern on a wet street.");
    assert_eq!(session.questions().len(), 2);
    assert_eq!(
        session.transcript(),
        "Afterglow: Noticing A lantern on a wet street; what does this moment mean to you?"
    );
    drop(session);

    assert!(app.preferences().has_uploaded_once);
    assert!(app.editor().texture().is_some());
}

#[tokio::test]
async fn offline_upload_uses_local_caption() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::offline()).await;

    app.upload(b"pixels", "image/png").await.expect("upload");

    let session = app.session();
    assert!(FALLBACK_CAPTIONS.contains(&session.caption()));
    assert!(session.questions().is_empty());
    assert!(session.has_opening_line());
}

#[tokio::test]
async fn failed_preprocessing_keeps_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;

    let err = app.upload(b"", "image/png").await.unwrap_err();
    assert!(matches!(err, AppError::PreprocessingFailed(_)));

    let session = app.session();
    assert_eq!(session.screen(), Screen::Landing);
    assert!(!session.is_blocked());
    assert!(!session.has_image());
}

#[tokio::test]
async fn chat_reply_streams_in() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::online();
    let app = open(&dir, generator.clone()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    assert!(!app.submit_user_text("   ").await.expect("blank"));
    assert!(app.submit_user_text("We walked home.").await.expect("chat"));
    assert_eq!(generator.chats.load(Ordering::SeqCst), 1);

    let reply = "I hear you (2 turns).";
    let start = Instant::now();
    app.frame(start + Duration::from_millis(10 * 3 + 5), 0.5);
    assert!(app.session().is_streaming());
    app.frame(start + Duration::from_secs(5), 5.0);

    let session = app.session();
    assert_eq!(session.visible_reply().as_deref(), Some(reply));
    assert!(!session.is_streaming());
    assert_eq!(session.turns().len(), 3);
}

#[tokio::test]
async fn offline_chat_uses_fallback_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::offline()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    assert!(app.submit_user_text("hello").await.expect("chat"));
    let session = app.session();
    assert_eq!(session.turns().last().map(ChatTurn::text), Some(FALLBACK_CHAT_REPLY.to_string()));
}

#[tokio::test]
async fn chat_before_upload_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;
    assert!(matches!(
        app.submit_user_text("hi").await,
        Err(AppError::NoImage)
    ));
}

#[tokio::test]
async fn committed_speech_becomes_a_user_turn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    assert_eq!(app.toggle_mic().expect("mic"), Some(VoiceCommand::Start));
    app.handle_speech(SpeechEvent::Started).await.expect("started");
    app.handle_speech(SpeechEvent::Result {
        finals: "the lamps were orange".into(),
        interim: String::new(),
    })
    .await
    .expect("result");
    assert_eq!(app.toggle_mic().expect("mic"), Some(VoiceCommand::Stop));

    let outcome = app.handle_speech(SpeechEvent::Ended).await.expect("ended");
    assert_eq!(outcome, SpeechOutcome::Commit("the lamps were orange".into()));
    let transcript = app.session().transcript();
    assert!(transcript.contains("User: the lamps were orange"), "{transcript}");
}

// ---------------------------------------------------------------------------
// Save and hall
// ---------------------------------------------------------------------------

#[tokio::test]
async fn save_presents_diary_then_enters_hall() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    let diary = app.save_memory().await.expect("save");
    assert_eq!(diary.card.title, "Rain Lantern");
    assert_eq!(app.archive().len(), 1);
    {
        let session = app.session();
        assert!(session.is_blocked());
        assert!(!session.save_in_flight());
        assert!(session.presented_diary().is_some());
    }

    assert!(matches!(app.upload(b"more", "image/png").await, Err(AppError::Busy)));

    assert!(app.dismiss_diary().expect("dismiss"));
    assert_eq!(app.screen(), Screen::Gallery);

    let selected = app.selected_memory().expect("selected");
    assert_eq!(selected.number, 1);
    assert_eq!(
        selected.record.diary_card.map(|c| c.title),
        Some("Rain Lantern".to_string())
    );
}

#[tokio::test]
async fn offline_save_writes_fallback_card() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::offline()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    let diary = app.save_memory().await.expect("save");
    assert_eq!(diary.card.title, FALLBACK_TITLE);
    assert!(diary.card.summary.starts_with("Afterglow: Noticing"));
}

#[tokio::test]
async fn save_without_upload_is_rejected_and_unwound() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;
    assert!(matches!(app.save_memory().await, Err(AppError::NoImage)));
    assert!(!app.session().is_blocked());
    assert!(matches!(app.enter_hall(), Err(AppError::ArchiveEmpty)));
}

#[tokio::test]
async fn memories_survive_reopen_and_upgrade_on_navigation() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let app = open(&dir, ScriptedGenerator::online()).await;
        for label in ["one", "two", "three"] {
            app.upload(label.as_bytes(), "image/png").await.expect("upload");
            app.save_memory().await.expect("save");
            assert!(app.dismiss_diary().expect("dismiss"));
            assert!(app.exit_hall());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    let app = open(&dir, ScriptedGenerator::online()).await;
    assert_eq!(app.screen(), Screen::Home);
    assert_eq!(app.archive().len(), 3);

    assert!(app.navigate(1).is_none(), "navigation needs the hall");
    assert!(app.enter_hall().expect("hall"));
    assert!(!app.enter_hall().expect("already there"));

    let nav = app.navigate(1).expect("navigate");
    assert_eq!(nav.index, 1);
    assert_eq!(nav.upgrade.await.expect("join"), UpgradeOutcome::Upgraded);
    assert!(app.archive().has_high_res(1));

    let nav = app.navigate(-2).expect("wrap");
    assert_eq!(nav.index, 2);

    app.frame(Instant::now(), 1.0);
    assert!(app.carousel().slot(2).is_some_and(|s| s.visible));
}

// ---------------------------------------------------------------------------
// Look and preferences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slider_updates_reach_editor_and_memories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir);
    cfg.session.pixel_ratio = 2.0;
    let app = Afterglow::open(cfg, Arc::new(FakePreprocessor), ScriptedGenerator::online())
        .await
        .expect("open");
    app.upload(b"pixels", "image/png").await.expect("upload");
    app.save_memory().await.expect("save");

    assert!(app.update_setting("brightness", 1.4));
    assert!(app.update_setting("particleSize", 3.0));
    assert!(!app.update_setting("brightness", f32::NAN));
    assert!(!app.update_setting("noSuchSlider", 1.0));

    let memory = app.archive().visual(0).expect("visual");
    for visual in [app.editor().as_ref(), memory.as_ref()] {
        assert_eq!(visual.uniform(Uniform::Brightness), Some(1.4));
        assert_eq!(visual.uniform(Uniform::Size), Some(6.0));
    }
    assert_eq!(app.settings().brightness, 1.4);
}

#[tokio::test]
async fn render_choices_persist_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let app = open(&dir, ScriptedGenerator::online()).await;
        assert_eq!(app.set_render_mode("halo"), RenderMode::Halo);
        app.set_hall_fov(50.0);
    }
    let app = open(&dir, ScriptedGenerator::online()).await;
    assert_eq!(app.controller().mode(), RenderMode::Halo);
    assert_eq!(app.preferences().render.hall_fov, 50.0);

    let reset = app.reset_hall_view();
    assert_eq!(reset.mode, RenderMode::Halo);
    assert_eq!(app.preferences().render, reset);
}

// ---------------------------------------------------------------------------
// Interrupted and failed actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_upload_unblocks_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = open(&dir, ScriptedGenerator::online()).await;

    let cut = tokio::time::timeout(Duration::from_millis(20), app.upload(b"stall", "image/png")).await;
    assert!(cut.is_err(), "upload should still be pending");
    {
        let session = app.session();
        assert!(!session.is_blocked());
        assert!(!session.has_image());
    }

    app.upload(b"pixels", "image/png").await.expect("retry");
    assert_eq!(app.screen(), Screen::Home);
}

#[tokio::test]
async fn cancelled_save_unwinds_flags() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::online();
    let app = open(&dir, generator.clone()).await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    generator.stall_diary.store(true, Ordering::SeqCst);
    let cut = tokio::time::timeout(Duration::from_millis(20), app.save_memory()).await;
    assert!(cut.is_err(), "save should still be pending");
    {
        let session = app.session();
        assert!(!session.save_in_flight());
        assert!(!session.is_blocked());
        assert!(session.presented_diary().is_none());
    }
    assert!(app.archive().is_empty());

    generator.stall_diary.store(false, Ordering::SeqCst);
    app.save_memory().await.expect("retry");
    assert_eq!(app.archive().len(), 1);
}

#[tokio::test]
async fn failed_store_write_unwinds_and_retry_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FlakyStore::new();
    store.fail_writes.store(true, Ordering::SeqCst);
    let app = Afterglow::with_source(
        config(&dir),
        store,
        Arc::new(FakePreprocessor),
        ScriptedGenerator::online(),
    )
    .await;
    app.upload(b"pixels", "image/png").await.expect("upload");

    let err = app.save_memory().await.unwrap_err();
    assert!(matches!(err, AppError::Archive(ArchiveError::StorageUnavailable(_))), "{err}");
    {
        let session = app.session();
        assert!(!session.save_in_flight());
        assert!(!session.is_blocked());
        assert!(session.presented_diary().is_none());
        assert_eq!(session.screen(), Screen::Home);
    }
    assert!(app.archive().is_empty());
    assert!(app.carousel().slots().is_empty());

    app.archive().source().fail_writes.store(false, Ordering::SeqCst);
    let diary = app.save_memory().await.expect("retry is not busy");
    assert_eq!(diary.card.title, "Rain Lantern");
    assert_eq!(app.archive().len(), 1);
}
