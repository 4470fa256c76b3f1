//! Voice chat: record, transcribe, ask, speak the answer, then navigate.

use super::conversation::{Conversation, SendOutcome};
use super::follow_up;
use super::ui::{Interface, UiController, UiState};
use crate::action::ActionHandler;
use crate::api::{AudioClip, Backend, MessageKind};
use crate::bus::Indicator;
use crate::error::MediaFailure;
use crate::returns::ReturnOrchestrator;
use crate::storage::{ClientStorage, StorageScope, AUTO_MIC_KEY, REACTIVATE_VOICE_KEY};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const LEVEL_POLL: Duration = Duration::from_millis(100);
const SPEECH_THRESHOLD: f32 = 0.04;
const SILENCE_HANGOVER: Duration = Duration::from_millis(1500);
/// Container types tried, in order, after both regular playback paths fail.
const RETRY_MIMES: [&str; 3] = ["audio/mpeg", "audio/wav", "audio/ogg"];

pub const TRANSCRIBE_ERROR: &str =
    "Sorry, I couldn't make out that recording. Please try again or type your question.";
pub const EMPTY_TRANSCRIPT: &str = "I didn't catch that. Could you say it again?";

/// Microphone capture.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start(&self) -> Result<(), MediaFailure>;
    async fn stop(&self) -> Result<AudioClip, MediaFailure>;
    /// Current input volume, 0.0 to 1.0.
    fn level(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Decode the whole clip and play it from memory.
    Decoded,
    /// Plain media element.
    Element,
    /// Media element with the clip relabeled as this type.
    Typed(&'static str),
}

impl Playback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Playback::Decoded => "decoded",
            Playback::Element => "element",
            Playback::Typed(_) => "typed",
        }
    }
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Resolves when playback has finished.
    async fn play(&self, clip: &AudioClip, playback: Playback) -> Result<()>;
}

/// Speech/silence detection for the UI. Never stops a recording.
#[derive(Debug, Default)]
pub struct SilenceTracker {
    speaking: bool,
    last_voice: Option<Instant>,
}

impl SilenceTracker {
    /// Returns the new state when it changes.
    pub fn observe(&mut self, level: f32, now: Instant) -> Option<bool> {
        if level >= SPEECH_THRESHOLD {
            self.last_voice = Some(now);
            if !self.speaking {
                self.speaking = true;
                return Some(true);
            }
            return None;
        }
        let quiet_for = self
            .last_voice
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if self.speaking && quiet_for >= SILENCE_HANGOVER {
            self.speaking = false;
            return Some(false);
        }
        None
    }
}

pub struct VoiceParts {
    pub conversation: Arc<Conversation>,
    pub ui: Arc<UiController>,
    pub actions: Arc<ActionHandler>,
    pub returns: Arc<ReturnOrchestrator>,
    pub backend: Arc<dyn Backend>,
    pub storage: Arc<dyn ClientStorage>,
    pub recorder: Arc<dyn Recorder>,
    pub player: Arc<dyn AudioPlayer>,
    pub recording_limit: Duration,
}

pub struct VoiceWidget {
    conversation: Arc<Conversation>,
    ui: Arc<UiController>,
    actions: Arc<ActionHandler>,
    returns: Arc<ReturnOrchestrator>,
    backend: Arc<dyn Backend>,
    storage: Arc<dyn ClientStorage>,
    recorder: Arc<dyn Recorder>,
    player: Arc<dyn AudioPlayer>,
    recording_limit: Duration,
    recording: Mutex<Option<CancellationToken>>,
}

impl VoiceWidget {
    pub fn new(parts: VoiceParts) -> Self {
        Self {
            conversation: parts.conversation,
            ui: parts.ui,
            actions: parts.actions,
            returns: parts.returns,
            backend: parts.backend,
            storage: parts.storage,
            recorder: parts.recorder,
            player: parts.player,
            recording_limit: parts.recording_limit,
            recording: Mutex::new(None),
        }
    }

    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    pub fn open(&self) -> UiState {
        self.ui.open(Interface::Voice, self.conversation.has_messages())
    }

    pub fn minimize(&self) -> UiState {
        self.ui.minimize(Interface::Voice)
    }

    pub fn maximize(&self) -> UiState {
        self.ui.maximize(Interface::Voice)
    }

    /// Drops any reply in flight and discards an unfinished recording.
    pub async fn close(&self) {
        self.conversation.cancel_pending();
        if let Some(token) = self.take_recording() {
            token.cancel();
            self.conversation.indicator(Indicator::Recording, false);
            if let Err(e) = self.recorder.stop().await {
                info!("discarded recording: {}", e);
            }
        }
        self.actions.navigator().discard();
        self.ui.close(Interface::Voice);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn take_recording(&self) -> Option<CancellationToken> {
        self.recording.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Mic button: starts a recording, or stops and submits the current one.
    pub async fn toggle_mic(self: &Arc<Self>) -> Option<SendOutcome> {
        if self.is_recording() {
            self.stop_recording().await
        } else {
            // Failures are already rendered as instructions.
            let _ = self.start_recording().await;
            None
        }
    }

    pub async fn start_recording(self: &Arc<Self>) -> Result<(), MediaFailure> {
        if self.is_recording() {
            return Ok(());
        }
        if let Err(failure) = self.recorder.start().await {
            self.media_failed(&failure);
            return Err(failure);
        }

        let token = CancellationToken::new();
        {
            let mut slot = self.recording.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Ok(());
            }
            *slot = Some(token.clone());
        }
        self.conversation.indicator(Indicator::Recording, true);
        info!("recording started (limit {:?})", self.recording_limit);

        let widget = Arc::clone(self);
        tokio::spawn(async move {
            let mut tracker = SilenceTracker::default();
            let mut poll = tokio::time::interval(LEVEL_POLL);
            let ceiling = tokio::time::sleep(widget.recording_limit);
            tokio::pin!(ceiling);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = &mut ceiling => {
                        info!("recording limit reached; stopping");
                        widget.stop_recording().await;
                        break;
                    }
                    _ = poll.tick() => {
                        if let Some(active) = tracker.observe(widget.recorder.level(), Instant::now()) {
                            widget.conversation.indicator(Indicator::VoiceActivity, active);
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops the active recording and submits it. `None` when nothing was
    /// recording.
    pub async fn stop_recording(&self) -> Option<SendOutcome> {
        let token = self.take_recording()?;
        token.cancel();
        self.conversation.indicator(Indicator::Recording, false);
        match self.recorder.stop().await {
            Ok(clip) => Some(self.submit_audio(clip).await),
            Err(failure) => {
                self.media_failed(&failure);
                Some(SendOutcome::Failed)
            }
        }
    }

    /// Transcribes `clip` and runs the transcript through the chat; the
    /// answer is spoken before any navigation happens.
    pub async fn submit_audio(&self, clip: AudioClip) -> SendOutcome {
        let transcript = match self.backend.transcribe(&clip).await {
            Ok(text) => text,
            Err(e) => {
                error!("transcription failed: {:#}", e);
                self.conversation.append_assistant(TRANSCRIBE_ERROR);
                return SendOutcome::Failed;
            }
        };
        if transcript.trim().is_empty() {
            self.conversation.append_assistant(EMPTY_TRANSCRIPT);
            return SendOutcome::Rejected;
        }

        let Some(turn) = self.conversation.begin(&transcript) else {
            return SendOutcome::Rejected;
        };
        if self.returns.has_pending() && self.returns.resume(turn.text()).await.is_some() {
            return SendOutcome::HandledLocally;
        }

        let outcome = self.conversation.exchange(turn, MessageKind::Voice).await;
        if let SendOutcome::Answered(response) = &outcome {
            let navigator = self.actions.navigator();
            navigator.hold();
            follow_up(&self.actions, response).await;
            self.speak(&response.answer).await;
            // Closing during playback discards the navigation, and with it
            // the hand-off to the next page.
            if navigator.has_pending() {
                self.storage
                    .set(StorageScope::Local, REACTIVATE_VOICE_KEY, "true")
                    .await;
                self.storage.set(StorageScope::Local, AUTO_MIC_KEY, "true").await;
            }
            navigator.release();
        }
        outcome
    }

    pub async fn speak(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let clip = match self.backend.synthesize(text).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!("speech synthesis failed: {:#}", e);
                return false;
            }
        };
        self.conversation.indicator(Indicator::Speaking, true);
        let played = self.play(&clip).await;
        self.conversation.indicator(Indicator::Speaking, false);
        played
    }

    async fn play(&self, clip: &AudioClip) -> bool {
        for playback in [Playback::Decoded, Playback::Element] {
            match self.player.play(clip, playback).await {
                Ok(()) => return true,
                Err(e) => warn!("{:?} playback failed: {:#}", playback, e),
            }
        }
        for mime in RETRY_MIMES {
            let relabeled = AudioClip::new(clip.bytes.clone(), mime);
            match self.player.play(&relabeled, Playback::Typed(mime)).await {
                Ok(()) => return true,
                Err(e) => warn!("{} playback failed: {:#}", mime, e),
            }
        }
        error!("audio could not be played in any format");
        false
    }

    pub fn media_failed(&self, failure: &MediaFailure) {
        warn!("microphone unavailable: {}", failure);
        self.conversation.append_assistant(failure.instructions());
    }

    /// Reopens voice chat after a navigation that happened mid-conversation.
    pub async fn apply_reactivation(self: &Arc<Self>) -> bool {
        if self
            .storage
            .get(StorageScope::Local, REACTIVATE_VOICE_KEY)
            .await
            .is_none()
        {
            return false;
        }
        self.storage
            .remove(StorageScope::Local, REACTIVATE_VOICE_KEY)
            .await;
        self.open();

        let auto_mic = self.storage.get(StorageScope::Local, AUTO_MIC_KEY).await;
        self.storage.remove(StorageScope::Local, AUTO_MIC_KEY).await;
        if auto_mic.as_deref() == Some("true") {
            let _ = self.start_recording().await;
        }
        info!("voice chat reactivated");
        true
    }
}
