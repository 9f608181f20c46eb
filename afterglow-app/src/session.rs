//! Session state machine: screens, the draft conversation, voice capture
//! and the frame-driven timers.
//!
//! Everything here is synchronous. The facade owns the async work and
//! calls into the session before and after each suspension point, so the
//! state is always consistent when a frame runs.
//!
//! ```text
//! Landing ──upload──► Home ──enter_hall──► Gallery
//!                      ▲                      │
//!                      └──────exit_hall───────┘
//! ```
//!
//! `blocked` (upload, save or diary modal) and `save_in_flight` are
//! orthogonal to the screen.

use std::time::{Duration, Instant};

use afterglow_core::config::SessionConfig;
use afterglow_llm::prompt::{self, opening_line};
use afterglow_llm::types::ChatTurn;
use tracing::{debug, info, warn};

use crate::diary::DiaryResult;
use crate::error::{AppError, Result};
use crate::preprocess::PreparedImage;

// ---------------------------------------------------------------------------
// Screens and speech events
// ---------------------------------------------------------------------------

/// Top-level screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// First run, nothing uploaded or archived yet.
    Landing,
    /// Editor with the current upload and conversation.
    Home,
    /// The hall of archived memories.
    Gallery,
}

/// Instruction for the speech recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Begin recognition.
    Start,
    /// Stop recognition; an `Ended` event follows.
    Stop,
}

/// Recognizer error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechErrorKind {
    /// Microphone permission denied.
    NotAllowed,
    /// Recognition aborted.
    Aborted,
    /// No microphone.
    AudioCapture,
    /// Recognition service unreachable.
    Network,
    /// Anything else; ignored.
    Other(String),
}

impl SpeechErrorKind {
    /// Map a recognizer error code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => Self::NotAllowed,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Events delivered by the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Recognition started.
    Started,
    /// New results: final text is appended to the draft, interim replaces
    /// the previous interim.
    Result { finals: String, interim: String },
    /// Recognition ended (by itself or after `Stop`).
    Ended,
    /// Recognition error.
    Error(SpeechErrorKind),
}

/// What the caller must do after a speech event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Nothing.
    Idle,
    /// Recognition ended while capture is on; start it again.
    Restart,
    /// Stop the recognizer.
    Stop,
    /// Capture finished; send this text as a user turn.
    Commit(String),
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Fixed-period ticker advanced by frame time.
#[derive(Debug, Clone, Copy)]
struct Ticker {
    next_at: Instant,
    period: Duration,
}

impl Ticker {
    fn start(now: Instant, period: Duration) -> Self {
        Self {
            next_at: now + period,
            period,
        }
    }

    /// Number of periods elapsed by `now`.
    fn advance(&mut self, now: Instant) -> u64 {
        let mut fired = 0;
        while self.next_at <= now {
            self.next_at += self.period;
            fired += 1;
        }
        fired
    }
}

/// A model reply revealed one character per tick.
#[derive(Debug, Clone)]
struct ReplyStream {
    chars: Vec<char>,
    shown: usize,
    ticker: Option<Ticker>,
}

impl ReplyStream {
    fn visible(&self) -> String {
        self.chars[..self.shown].iter().collect()
    }
}

#[derive(Debug, Default)]
struct Voice {
    running: bool,
    recognizing: bool,
    commit_pending: bool,
    draft: String,
    interim: String,
    seconds: u64,
    ticker: Option<Ticker>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The live session: one per app instance.
#[derive(Debug)]
pub struct Session {
    screen: Screen,
    blocked: bool,
    save_in_flight: bool,
    image: Option<PreparedImage>,
    caption: String,
    questions: Vec<String>,
    turns: Vec<ChatTurn>,
    chat_request: u64,
    voice: Voice,
    stream: Option<ReplyStream>,
    diary: Option<DiaryResult>,
    voice_period: Duration,
    stream_period: Duration,
}

impl Session {
    /// Start a session. Landing only for a first run with an empty archive.
    #[must_use]
    pub fn new(config: &SessionConfig, has_uploaded_once: bool, archive_len: usize) -> Self {
        let screen = if !has_uploaded_once && archive_len == 0 {
            Screen::Landing
        } else {
            Screen::Home
        };
        Self {
            screen,
            blocked: false,
            save_in_flight: false,
            image: None,
            caption: String::new(),
            questions: Vec::new(),
            turns: Vec::new(),
            chat_request: 0,
            voice: Voice::default(),
            stream: None,
            diary: None,
            voice_period: Duration::from_millis(config.voice_tick_ms.max(1)),
            stream_period: Duration::from_millis(config.stream_char_ms.max(1)),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current screen.
    #[must_use]
    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Whether a modal blocks input.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Whether a save is running.
    #[must_use]
    pub fn save_in_flight(&self) -> bool {
        self.save_in_flight
    }

    /// The current upload.
    #[must_use]
    pub fn image(&self) -> Option<&PreparedImage> {
        self.image.as_ref()
    }

    /// Whether an image has been uploaded this session.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Caption of the current upload.
    #[must_use]
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Reflective questions for the current upload.
    #[must_use]
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// The conversation so far.
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// The conversation as a transcript.
    #[must_use]
    pub fn transcript(&self) -> String {
        prompt::transcript(&self.turns)
    }

    /// Whether a non-empty model line exists.
    #[must_use]
    pub fn has_opening_line(&self) -> bool {
        prompt::has_model_line(&self.turns)
    }

    /// The mic is usable.
    #[must_use]
    pub fn can_use_mic(&self) -> bool {
        self.screen == Screen::Home && self.has_image() && !self.save_in_flight && !self.blocked
    }

    /// Saving is possible.
    #[must_use]
    pub fn can_save(&self) -> bool {
        self.can_use_mic() && self.has_opening_line()
    }

    /// Whether voice capture is on.
    #[must_use]
    pub fn voice_running(&self) -> bool {
        self.voice.running
    }

    /// Seconds shown on the voice timer.
    #[must_use]
    pub fn voice_seconds(&self) -> u64 {
        self.voice.seconds
    }

    /// Voice timer label, `MM:SS`.
    #[must_use]
    pub fn voice_label(&self) -> String {
        format!("{:02}:{:02}", self.voice.seconds / 60, self.voice.seconds % 60)
    }

    /// Draft plus interim text, as shown while speaking.
    #[must_use]
    pub fn voice_draft(&self) -> String {
        [self.voice.draft.trim(), self.voice.interim.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The part of the latest reply revealed so far.
    #[must_use]
    pub fn visible_reply(&self) -> Option<String> {
        self.stream.as_ref().map(ReplyStream::visible)
    }

    /// Whether a reply is still being revealed.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.ticker.is_some())
    }

    /// Diary waiting to be dismissed.
    #[must_use]
    pub fn presented_diary(&self) -> Option<&DiaryResult> {
        self.diary.as_ref()
    }

    // ------------------------------------------------------------------
    // Screens
    // ------------------------------------------------------------------

    fn set_screen(&mut self, next: Screen) {
        if self.screen == Screen::Home && next != Screen::Home {
            self.teardown_draft();
        }
        debug!(from = ?self.screen, to = ?next, "Screen change");
        self.screen = next;
    }

    /// Enter the hall.
    ///
    /// Returns `Ok(false)` when already there.
    ///
    /// # Errors
    ///
    /// [`AppError::ArchiveEmpty`] with nothing to show, [`AppError::Busy`]
    /// while blocked.
    pub fn enter_hall(&mut self, archive_len: usize) -> Result<bool> {
        if self.screen == Screen::Gallery {
            return Ok(false);
        }
        if archive_len == 0 {
            return Err(AppError::ArchiveEmpty);
        }
        if self.blocked {
            return Err(AppError::Busy);
        }
        self.set_screen(Screen::Gallery);
        Ok(true)
    }

    /// Leave the hall for the editor. Returns `false` when not in the hall.
    pub fn exit_hall(&mut self) -> bool {
        if self.screen != Screen::Gallery {
            return false;
        }
        self.set_screen(Screen::Home);
        true
    }

    fn teardown_draft(&mut self) {
        self.stop_voice(true, true);
        self.stream = None;
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Block input for an upload.
    ///
    /// # Errors
    ///
    /// [`AppError::Busy`] while a save runs or a modal is up.
    pub fn begin_upload(&mut self) -> Result<()> {
        if self.save_in_flight || self.blocked {
            return Err(AppError::Busy);
        }
        self.blocked = true;
        Ok(())
    }

    /// Upload failed; nothing changes except the block.
    pub fn abort_upload(&mut self) {
        self.blocked = false;
    }

    /// Install a prepared upload and start a fresh conversation with its
    /// opening line.
    pub fn finish_upload(&mut self, image: PreparedImage, caption: String, questions: Vec<String>) {
        self.teardown_draft();
        let line = opening_line(&caption);
        self.image = Some(image);
        self.caption = caption;
        self.questions = questions;
        self.turns = vec![ChatTurn::model(line)];
        // Replies to the previous conversation are stale now.
        self.chat_request += 1;
        self.set_screen(Screen::Home);
        self.blocked = false;
    }

    // ------------------------------------------------------------------
    // Conversation
    // ------------------------------------------------------------------

    /// Record a user turn and open a chat request for it.
    ///
    /// Returns the request id and the conversation to send, or `None` for
    /// blank text.
    ///
    /// # Errors
    ///
    /// [`AppError::NoImage`] before the first upload.
    pub fn push_user_turn(&mut self, text: &str) -> Result<Option<(u64, Vec<ChatTurn>)>> {
        if !self.has_image() {
            return Err(AppError::NoImage);
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.turns.push(ChatTurn::user(text));
        self.voice.draft.clear();
        self.voice.interim.clear();
        self.chat_request += 1;
        Ok(Some((self.chat_request, self.turns.clone())))
    }

    /// Accept the reply to request `id` and start streaming it.
    ///
    /// Replies to superseded requests, or arriving after leaving Home, are
    /// dropped. Returns whether the reply was applied.
    pub fn accept_reply(&mut self, id: u64, reply: String, now: Instant) -> bool {
        if id != self.chat_request || self.screen != Screen::Home {
            debug!(id, current = self.chat_request, "Dropping stale reply");
            return false;
        }
        self.turns.push(ChatTurn::model(reply.clone()));
        self.start_stream(&reply, now);
        true
    }

    fn start_stream(&mut self, text: &str, now: Instant) {
        self.stream = None;
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return;
        }
        self.stream = Some(ReplyStream {
            chars,
            shown: 0,
            ticker: Some(Ticker::start(now, self.stream_period)),
        });
    }

    fn halt_stream(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.ticker = None;
        }
    }

    // ------------------------------------------------------------------
    // Voice
    // ------------------------------------------------------------------

    /// Toggle voice capture.
    ///
    /// Returns the recognizer command, if any: turning capture off while
    /// the recognizer runs asks it to stop and commits on `Ended`.
    ///
    /// # Errors
    ///
    /// [`AppError::NoImage`] before an upload, [`AppError::Busy`] when the
    /// mic is otherwise unavailable.
    pub fn toggle_mic(&mut self) -> Result<Option<VoiceCommand>> {
        if !self.has_image() {
            return Err(AppError::NoImage);
        }
        if !self.can_use_mic() {
            return Err(AppError::Busy);
        }

        if self.voice.running {
            self.voice.running = false;
            self.voice.commit_pending = true;
            return Ok(self.voice.recognizing.then_some(VoiceCommand::Stop));
        }

        self.voice.running = true;
        self.voice.commit_pending = false;
        self.voice.interim.clear();
        self.voice.seconds = 0;
        Ok((!self.voice.recognizing).then_some(VoiceCommand::Start))
    }

    /// Apply a recognizer event.
    pub fn on_speech(&mut self, event: SpeechEvent, now: Instant) -> SpeechOutcome {
        match event {
            SpeechEvent::Started => {
                self.voice.recognizing = true;
                self.voice.interim.clear();
                if self.voice.ticker.is_none() {
                    self.voice.ticker = Some(Ticker::start(now, self.voice_period));
                }
                SpeechOutcome::Idle
            }
            SpeechEvent::Result { finals, interim } => {
                let finals = finals.trim();
                if !finals.is_empty() {
                    if !self.voice.draft.is_empty() {
                        self.voice.draft.push(' ');
                    }
                    self.voice.draft.push_str(finals);
                }
                self.voice.interim = interim.trim().to_string();
                SpeechOutcome::Idle
            }
            SpeechEvent::Ended => {
                self.voice.recognizing = false;
                self.voice.interim.clear();
                if self.voice.running {
                    return SpeechOutcome::Restart;
                }
                let commit = std::mem::take(&mut self.voice.commit_pending);
                self.voice.ticker = None;
                let text = self.voice.draft.trim().to_string();
                if commit && !text.is_empty() {
                    self.voice.draft.clear();
                    SpeechOutcome::Commit(text)
                } else {
                    SpeechOutcome::Idle
                }
            }
            SpeechEvent::Error(kind) => {
                warn!(?kind, "Speech recognition error");
                match kind {
                    SpeechErrorKind::NotAllowed => self.stop_voice(true, false),
                    SpeechErrorKind::Aborted
                    | SpeechErrorKind::AudioCapture
                    | SpeechErrorKind::Network => self.stop_voice(false, false),
                    SpeechErrorKind::Other(_) => SpeechOutcome::Idle,
                }
            }
        }
    }

    /// Stop capture without committing.
    fn stop_voice(&mut self, reset: bool, clear_draft: bool) -> SpeechOutcome {
        let was_active = self.voice.running || self.voice.recognizing;
        self.voice.running = false;
        self.voice.commit_pending = false;
        self.voice.ticker = None;
        if clear_draft {
            self.voice.draft.clear();
            self.voice.interim.clear();
        }
        if reset {
            self.voice.seconds = 0;
        }
        if was_active {
            SpeechOutcome::Stop
        } else {
            SpeechOutcome::Idle
        }
    }

    // ------------------------------------------------------------------
    // Save and diary
    // ------------------------------------------------------------------

    /// Start a save: block input and freeze voice and streaming.
    ///
    /// # Errors
    ///
    /// [`AppError::Busy`], [`AppError::NoImage`] or
    /// [`AppError::NoOpeningLine`] when saving is not possible.
    pub fn begin_save(&mut self) -> Result<()> {
        if self.save_in_flight || self.blocked {
            return Err(AppError::Busy);
        }
        if !self.has_image() {
            return Err(AppError::NoImage);
        }
        if !self.has_opening_line() {
            return Err(AppError::NoOpeningLine);
        }
        if self.screen != Screen::Home {
            return Err(AppError::Busy);
        }
        self.save_in_flight = true;
        self.blocked = true;
        self.stop_voice(false, false);
        self.halt_stream();
        Ok(())
    }

    /// Save failed: unwind both flags.
    pub fn abort_save(&mut self) {
        self.save_in_flight = false;
        self.blocked = false;
    }

    /// Save succeeded: present the diary. Input stays blocked until it is
    /// dismissed.
    pub fn finish_save(&mut self, diary: DiaryResult) {
        self.save_in_flight = false;
        self.diary = Some(diary);
        info!("Diary presented");
    }

    /// Close the diary modal. Returns `false` when none is open.
    pub fn dismiss_diary(&mut self) -> bool {
        if self.diary.take().is_none() {
            return false;
        }
        self.blocked = false;
        true
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Advance the voice timer and reply stream to `now`.
    pub fn tick(&mut self, now: Instant) {
        if let Some(ticker) = self.voice.ticker.as_mut() {
            self.voice.seconds += ticker.advance(now);
        }
        if let Some(stream) = self.stream.as_mut() {
            if let Some(ticker) = stream.ticker.as_mut() {
                let fired = usize::try_from(ticker.advance(now)).unwrap_or(usize::MAX);
                stream.shown = stream.shown.saturating_add(fired).min(stream.chars.len());
                if stream.shown == stream.chars.len() {
                    stream.ticker = None;
                }
            }
        }
    }
}
