//! Scripted transport and capture fakes for controller tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use watchparty_config::{IceConfig, NegotiationConfig, SignalingConfig};

use crate::capture::{
    CaptureError, CaptureRequest, LocalStream, LocalTrack, ScreenCapture, StreamHandle, TrackKind,
};
use crate::directory::{MemoryDirectory, RoomDirectory};
use crate::peer::{PeerConnectionManager, PeerEvent};
use crate::protocol::{
    ContentRef, ContentType, IceCandidate, NewRoom, Room, SdpType, SessionDescription,
};
use crate::relay::SignalRelay;
use crate::transport::{
    IceConnectionState, PeerConnectionState, PeerTransport, RemoteTrack, SignalingState,
    TransportError, TransportEvent, TransportEvents, TransportFactory,
};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct FakeState {
    signaling: SignalingState,
    remote_set: bool,
    offers: u32,
    candidates: Vec<IceCandidate>,
}

/// Tracks signaling state like a real peer connection would.
pub(crate) struct FakeTransport {
    pub(crate) remote: String,
    events: TransportEvents,
    state: Mutex<FakeState>,
    restarts: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
    has_local_stream: bool,
}

impl FakeTransport {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn has_local_stream(&self) -> bool {
        self.has_local_stream
    }

    pub(crate) fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().candidates.clone()
    }

    pub(crate) fn signaling(&self) -> SignalingState {
        self.lock().signaling
    }

    pub(crate) fn ice(&self, state: IceConnectionState) {
        self.events.emit(TransportEvent::IceConnectionState(state));
    }

    pub(crate) fn connection(&self, state: PeerConnectionState) {
        self.events.emit(TransportEvent::ConnectionState(state));
    }

    pub(crate) fn discover_candidate(&self, candidate: IceCandidate) {
        self.events.emit(TransportEvent::IceCandidate(candidate));
    }

    pub(crate) fn remote_track(&self) {
        self.events.emit(TransportEvent::Track(RemoteTrack {
            track_id: format!("{}-video", self.remote),
            stream_id: format!("{}-stream", self.remote),
            kind: TrackKind::Video,
        }));
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        self.check_open()?;
        let mut state = self.lock();
        state.offers += 1;
        let tag = if ice_restart { "-restart" } else { "" };
        Ok(SessionDescription::offer(format!(
            "offer-{}-{}{tag}",
            self.remote, state.offers
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.check_open()?;
        let state = self.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(TransportError::InvalidState(state.signaling));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.remote)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.lock();
        state.signaling = match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                SignalingState::HaveLocalOffer
            }
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (_, current) => return Err(TransportError::InvalidState(current)),
        };
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.lock();
        state.signaling = match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                SignalingState::HaveRemoteOffer
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (_, current) => return Err(TransportError::InvalidState(current)),
        };
        state.remote_set = true;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.lock();
        if !state.remote_set {
            return Err(TransportError::InvalidState(state.signaling));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.lock().signaling
    }

    async fn restart_ice(&self) -> Result<(), TransportError> {
        self.check_open()?;
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.lock().signaling = SignalingState::Closed;
        }
    }
}

/// Records every transport it builds.
#[derive(Default)]
pub(crate) struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    fail: AtomicBool,
    create_delay_ms: AtomicU64,
}

impl FakeTransportFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_creates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every later `create` take `delay`.
    pub(crate) fn delay_creates(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn for_remote(&self, remote: &str) -> Vec<Arc<FakeTransport>> {
        self.created()
            .into_iter()
            .filter(|t| t.remote == remote)
            .collect()
    }

    pub(crate) fn latest(&self, remote: &str) -> Arc<FakeTransport> {
        self.for_remote(remote)
            .pop()
            .unwrap_or_else(|| panic!("no transport for {remote}"))
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _ice: &IceConfig,
        local: Option<Arc<dyn LocalStream>>,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("scripted failure".into()));
        }
        let transport = Arc::new(FakeTransport {
            remote: events.remote().to_string(),
            events,
            state: Mutex::new(FakeState {
                signaling: SignalingState::Stable,
                remote_set: false,
                offers: 0,
                candidates: Vec::new(),
            }),
            restarts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            has_local_stream: local.is_some(),
        });
        self.created.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

pub(crate) struct FakeCapture {
    outcome: Mutex<Result<(), CaptureError>>,
    streams: Mutex<Vec<Arc<StreamHandle>>>,
}

impl FakeCapture {
    pub(crate) fn granting() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Ok(())),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn refusing(err: CaptureError) -> Arc<Self> {
        let capture = Self::granting();
        *capture.outcome.lock().unwrap() = Err(err);
        capture
    }

    pub(crate) fn streams(&self) -> Vec<Arc<StreamHandle>> {
        self.streams.lock().unwrap().clone()
    }

    pub(crate) fn last_stream(&self) -> Arc<StreamHandle> {
        self.streams()
            .pop()
            .unwrap_or_else(|| panic!("nothing captured"))
    }
}

#[async_trait]
impl ScreenCapture for FakeCapture {
    async fn acquire(&self, request: &CaptureRequest) -> Result<Arc<dyn LocalStream>, CaptureError> {
        self.outcome.lock().unwrap().clone()?;
        let n = self.streams.lock().unwrap().len() + 1;
        let mut tracks = Vec::new();
        if request.video {
            tracks.push(LocalTrack {
                id: format!("screen-{n}-video"),
                kind: TrackKind::Video,
            });
        }
        if request.audio {
            tracks.push(LocalTrack {
                id: format!("screen-{n}-audio"),
                kind: TrackKind::Audio,
            });
        }
        let stream = StreamHandle::new(format!("screen-{n}"), tracks);
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

/// Create an active room hosted by `host`.
pub(crate) async fn open_room(dir: &MemoryDirectory, host: &str) -> Room {
    dir.create_room(NewRoom {
        host_id: host.to_string(),
        host_name: host.to_uppercase(),
        content: ContentRef {
            id: 550,
            content_type: ContentType::Movie,
            title: "Fight Club".into(),
            poster: None,
            season: None,
            episode: None,
        },
    })
    .await
    .unwrap()
}

pub(crate) fn relay_for(dir: &MemoryDirectory, room_id: &str, local: &str) -> SignalRelay {
    let directory: Arc<dyn RoomDirectory> = Arc::new(dir.clone());
    SignalRelay::new(directory, room_id, local, &SignalingConfig::default())
}

pub(crate) fn manager_for(
    dir: &MemoryDirectory,
    room_id: &str,
    local: &str,
    factory: &Arc<FakeTransportFactory>,
    policy: NegotiationConfig,
) -> (PeerConnectionManager, tokio::sync::mpsc::Receiver<PeerEvent>) {
    let factory: Arc<dyn TransportFactory> = Arc::clone(factory) as Arc<dyn TransportFactory>;
    PeerConnectionManager::new(
        factory,
        relay_for(dir, room_id, local),
        IceConfig::default(),
        policy,
        256,
    )
}

/// Apply every queued peer event, returning the resulting updates.
pub(crate) async fn pump(
    manager: &PeerConnectionManager,
    rx: &mut tokio::sync::mpsc::Receiver<PeerEvent>,
) -> Vec<crate::peer::PeerUpdate> {
    tokio::task::yield_now().await;
    let mut updates = Vec::new();
    while let Ok(event) = rx.try_recv() {
        updates.extend(manager.handle_event(event).await);
    }
    updates
}

/// Wait until `check` holds, polling briefly.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
