//! Screen capture seam.
//!
//! The platform capture API (a browser's display-media picker, a desktop
//! compositor portal) sits behind [`ScreenCapture`]. Acquisition failures
//! are the one error class that reaches the UI, so they are categorized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use watchparty_config::{CaptureConfig, DisplaySurface};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("screen sharing was cancelled or denied")]
    PermissionDenied,

    #[error("screen sharing is not available here: {0}")]
    Unsupported(String),

    #[error("failed to start screen sharing: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Stable code for the UI layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::Unsupported(_) => "unsupported-environment",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<CaptureError> for watchparty_common::PartyError {
    fn from(e: CaptureError) -> Self {
        Self::Capture {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// What to ask the platform for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub video: bool,
    pub audio: bool,
    pub display_surface: DisplaySurface,
}

impl From<&CaptureConfig> for CaptureRequest {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            video: config.video,
            audio: config.audio,
            display_surface: config.display_surface,
        }
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// A captured local media stream.
pub trait LocalStream: Send + Sync {
    fn id(&self) -> &str;

    fn tracks(&self) -> Vec<LocalTrack>;

    /// Stop every track. Must be safe to call more than once.
    fn stop(&self);

    /// Flips to `true` once the stream has ended, whether stopped locally
    /// or by the platform (e.g. the user pressed "stop sharing" in the
    /// system chrome).
    fn ended(&self) -> watch::Receiver<bool>;
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn acquire(&self, request: &CaptureRequest) -> Result<Arc<dyn LocalStream>, CaptureError>;
}

// ---------------------------------------------------------------------------
// Stream handle
// ---------------------------------------------------------------------------

/// Ready-made [`LocalStream`] for capture backends that only need to track
/// lifecycle around their own native handle.
pub struct StreamHandle {
    id: String,
    tracks: Vec<LocalTrack>,
    stopped: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl StreamHandle {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Arc<Self> {
        let (ended_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: id.into(),
            tracks,
            stopped: AtomicBool::new(false),
            ended_tx,
        })
    }

    /// Report that the platform ended the capture on its own.
    pub fn end_externally(&self) {
        self.ended_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalStream for StreamHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<LocalTrack> {
        self.tracks.clone()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(stream = %self.id, "Local stream stopped");
        }
        self.ended_tx.send_replace(true);
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }
}
