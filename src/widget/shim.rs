//! Media adapters for the browser shim. The shim owns the real microphone
//! and speaker; these types turn its HTTP callbacks back into the
//! [`Recorder`] and [`AudioPlayer`] contracts.

use super::voice::{AudioPlayer, Playback, Recorder};
use crate::api::AudioClip;
use crate::bus::{Event, EventBus};
use crate::error::MediaFailure;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

const CLIP_WAIT: Duration = Duration::from_secs(15);
const PLAYBACK_WAIT: Duration = Duration::from_secs(45);

/// Recording is driven by the `Recording` indicator on the event bus; the
/// shim uploads the clip (or the capture error) when it goes away.
pub struct ShimRecorder {
    slot: Mutex<Option<Result<AudioClip, MediaFailure>>>,
    ready: Notify,
    level: AtomicU32,
    awaiting: AtomicBool,
    wait: Duration,
}

impl ShimRecorder {
    pub fn new() -> Self {
        Self::with_timeout(CLIP_WAIT)
    }

    pub fn with_timeout(wait: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Notify::new(),
            level: AtomicU32::new(0),
            awaiting: AtomicBool::new(false),
            wait,
        }
    }

    pub fn deliver(&self, clip: AudioClip) {
        self.fill(Ok(clip));
    }

    pub fn fail(&self, failure: MediaFailure) {
        self.fill(Err(failure));
    }

    /// Whether a stopped recording is still waiting for its upload.
    pub fn is_awaited(&self) -> bool {
        self.awaiting.load(Ordering::Acquire)
    }

    pub fn set_level(&self, level: f32) {
        self.level
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn fill(&self, result: Result<AudioClip, MediaFailure>) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
        self.ready.notify_one();
    }

    fn take(&self) -> Option<Result<AudioClip, MediaFailure>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Default for ShimRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recorder for ShimRecorder {
    async fn start(&self) -> Result<(), MediaFailure> {
        if let Some(Ok(stale)) = self.take() {
            debug!("dropping stale clip ({} bytes)", stale.bytes.len());
        }
        self.set_level(0.0);
        Ok(())
    }

    async fn stop(&self) -> Result<AudioClip, MediaFailure> {
        self.awaiting.store(true, Ordering::Release);
        let result = loop {
            if let Some(result) = self.take() {
                break result;
            }
            if tokio::time::timeout(self.wait, self.ready.notified())
                .await
                .is_err()
            {
                break Err(MediaFailure::Other("no audio received from the page".into()));
            }
        };
        self.awaiting.store(false, Ordering::Release);
        result
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }
}

/// Publishes each clip for the shim and waits for it to report back.
pub struct ShimPlayer {
    bus: Arc<EventBus>,
    pending: Mutex<Option<oneshot::Sender<bool>>>,
    wait: Duration,
}

impl ShimPlayer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_timeout(bus, PLAYBACK_WAIT)
    }

    pub fn with_timeout(bus: Arc<EventBus>, wait: Duration) -> Self {
        Self {
            bus,
            pending: Mutex::new(None),
            wait,
        }
    }

    /// The shim finished (or could not start) the current clip.
    pub fn finished(&self, played: bool) -> bool {
        let sender = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => tx.send(played).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl AudioPlayer for ShimPlayer {
    async fn play(&self, clip: &AudioClip, playback: Playback) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(tx)
            .is_some()
        {
            warn!("previous clip never reported back");
        }

        self.bus.publish(Event::PlayAudio {
            mime: clip.mime.clone(),
            data: STANDARD.encode(&clip.bytes),
            playback: playback.as_str().to_string(),
        });

        match tokio::time::timeout(self.wait, rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(anyhow!("page could not play {}", clip.mime)),
            Ok(Err(_)) => Err(anyhow!("playback superseded")),
            Err(_) => Err(anyhow!("no playback report within {:?}", self.wait)),
        }
    }
}
