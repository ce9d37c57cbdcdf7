use crate::session::{self, LiveSession};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packetizer::Depacketizer;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

const BRIGHTNESS_RAMP: &[u8] = b" .:-=+*#%@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Idle,
    Connecting,
    Live,
    Error,
    TornDown,
}

impl ViewPhase {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Error => "error",
            Self::TornDown => "torn down",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TileSnapshot {
    pub camera_label: String,
    pub phase: ViewPhase,
    pub detail: String,
    pub frame_text: String,
    pub frames_rendered: u64,
    pub decode_errors: u64,
}

#[derive(Debug)]
struct TileInner {
    camera_label: String,
    phase: ViewPhase,
    detail: String,
    frame_text: String,
    frames_rendered: u64,
    decode_errors: u64,
    attached_stream: Option<String>,
    detached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyAttached,
    Rejected,
}

/// Per-camera view binding. Once `mark_torn_down` runs, the sink is
/// sealed: no later attach, frame, or phase change lands.
#[derive(Debug)]
pub struct TileState {
    inner: RwLock<TileInner>,
}

impl TileState {
    #[must_use]
    pub fn new(camera_label: String) -> Self {
        Self {
            inner: RwLock::new(TileInner {
                camera_label,
                phase: ViewPhase::Idle,
                detail: String::new(),
                frame_text: String::new(),
                frames_rendered: 0,
                decode_errors: 0,
                attached_stream: None,
                detached: false,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TileSnapshot {
        let inner = self.inner.read();
        TileSnapshot {
            camera_label: inner.camera_label.clone(),
            phase: inner.phase,
            detail: inner.detail.clone(),
            frame_text: inner.frame_text.clone(),
            frames_rendered: inner.frames_rendered,
            decode_errors: inner.decode_errors,
        }
    }

    fn set_phase(&self, phase: ViewPhase) {
        let mut inner = self.inner.write();
        if inner.detached {
            return;
        }
        inner.phase = phase;
        inner.detail.clear();
    }

    fn set_error(&self, detail: String) {
        let mut inner = self.inner.write();
        if inner.detached {
            return;
        }
        inner.phase = ViewPhase::Error;
        inner.detail = detail;
    }

    pub(crate) fn mark_torn_down(&self) {
        let mut inner = self.inner.write();
        inner.detached = true;
        inner.phase = ViewPhase::TornDown;
        inner.attached_stream = None;
    }

    pub(crate) fn attach_stream(&self, stream_id: &str) -> AttachOutcome {
        let mut inner = self.inner.write();
        if inner.detached {
            return AttachOutcome::Rejected;
        }
        match inner.attached_stream.as_deref() {
            None => {
                inner.attached_stream = Some(stream_id.to_owned());
                AttachOutcome::Attached
            }
            Some(existing) if existing == stream_id => AttachOutcome::AlreadyAttached,
            Some(_) => AttachOutcome::Rejected,
        }
    }

    pub(crate) fn push_frame(&self, frame_text: String) {
        let mut inner = self.inner.write();
        if inner.detached || inner.attached_stream.is_none() {
            return;
        }
        inner.frame_text = frame_text;
        inner.frames_rendered = inner.frames_rendered.saturating_add(1);
    }

    pub(crate) fn note_decode_error(&self) {
        let mut inner = self.inner.write();
        if inner.detached {
            return;
        }
        inner.decode_errors = inner.decode_errors.saturating_add(1);
    }
}

/// Character-cell budget for one tile's rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGeometry {
    pub width: usize,
    pub height: usize,
    pub vertical_scale: usize,
}

impl Default for RenderGeometry {
    fn default() -> Self {
        Self {
            width: 48,
            height: 18,
            vertical_scale: 2,
        }
    }
}

/// What one controller is bound to. Identity covers the stream path and
/// the resolved endpoint: a change to either retires the controller and
/// creates a fresh one, never mutates in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBinding {
    pub camera_id: String,
    pub label: String,
    pub endpoint: Option<Url>,
}

/// Cancellation token for one bind cycle. The cycle snapshots the
/// generation at start; any later increment supersedes it, and every
/// resumption point after an await re-checks before applying state.
#[derive(Debug, Clone)]
struct CycleToken {
    generation: Arc<AtomicU64>,
    cycle: u64,
}

impl CycleToken {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.cycle
    }
}

struct ActiveSession {
    peer: Arc<RTCPeerConnection>,
    resource_url: Option<Url>,
}

/// Drives one camera's live view: at most one open session at any
/// instant, stale bind cycles discarded, teardown that never raises.
pub struct LiveController {
    binding: LiveBinding,
    tile: Arc<TileState>,
    generation: Arc<AtomicU64>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    media_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    bind_task: Option<JoinHandle<()>>,
    http: reqwest::Client,
    bearer: Option<String>,
    geometry_rx: watch::Receiver<RenderGeometry>,
}

impl LiveController {
    #[must_use]
    pub fn new(
        binding: LiveBinding,
        http: reqwest::Client,
        bearer: Option<String>,
        geometry_rx: watch::Receiver<RenderGeometry>,
    ) -> Self {
        let tile = Arc::new(TileState::new(binding.label.clone()));
        Self {
            binding,
            tile,
            generation: Arc::new(AtomicU64::new(0)),
            active: Arc::new(Mutex::new(None)),
            media_task: Arc::new(Mutex::new(None)),
            bind_task: None,
            http,
            bearer,
            geometry_rx,
        }
    }

    #[must_use]
    pub fn tile(&self) -> Arc<TileState> {
        self.tile.clone()
    }

    /// Enters the bind cycle when the gateway is known; otherwise the
    /// view stays idle until this controller is replaced by one with a
    /// resolved endpoint.
    pub fn start(&mut self) {
        match self.binding.endpoint.clone() {
            Some(endpoint) => self.begin_bind(endpoint),
            None => self.tile.set_phase(ViewPhase::Idle),
        }
    }

    fn begin_bind(&mut self, endpoint: Url) {
        let cycle = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CycleToken {
            generation: self.generation.clone(),
            cycle,
        };
        self.tile.set_phase(ViewPhase::Connecting);

        let tile = self.tile.clone();
        let active = self.active.clone();
        let media_task = self.media_task.clone();
        let http = self.http.clone();
        let bearer = self.bearer.clone();
        let geometry_rx = self.geometry_rx.clone();
        self.bind_task = Some(tokio::spawn(async move {
            let result = session::negotiate(&http, bearer.as_deref(), &endpoint).await;
            let _ = finish_bind(
                token,
                result,
                &tile,
                &active,
                &media_task,
                http,
                bearer,
                geometry_rx,
            );
        }));
    }

    /// Synchronously supersedes the running cycle and seals the sink,
    /// then hands the connection close and the best-effort resource
    /// deletion to a detached cleanup task. Never raises; the returned
    /// handle exists so callers that care (tests) can await the async
    /// remainder.
    pub fn teardown(&mut self) -> Option<JoinHandle<()>> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tile.mark_torn_down();
        if let Some(pump) = self.media_task.lock().take() {
            pump.abort();
        }
        // The bind task is left running: an in-flight negotiation is
        // never aborted mid-flight, its result is ignored via the
        // generation check and self-disposed.
        self.bind_task.take();

        let closed = self.active.lock().take();
        closed.map(|active| {
            spawn_session_cleanup(
                self.http.clone(),
                self.bearer.clone(),
                active.peer,
                active.resource_url,
            )
        })
    }

    #[cfg(test)]
    fn cycle_token(&self) -> CycleToken {
        let cycle = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        CycleToken {
            generation: self.generation.clone(),
            cycle,
        }
    }

    #[cfg(test)]
    fn has_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

/// Resumption point after the negotiation await: applies the outcome
/// only if the cycle is still current, otherwise quietly disposes it.
#[allow(clippy::too_many_arguments)]
fn finish_bind(
    token: CycleToken,
    result: anyhow::Result<LiveSession>,
    tile: &Arc<TileState>,
    active: &Arc<Mutex<Option<ActiveSession>>>,
    media_task: &Arc<Mutex<Option<JoinHandle<()>>>>,
    http: reqwest::Client,
    bearer: Option<String>,
    geometry_rx: watch::Receiver<RenderGeometry>,
) -> Option<JoinHandle<()>> {
    match result {
        Ok(session) => {
            let LiveSession {
                peer,
                resource_url,
                track_rx,
            } = session;
            if !token.is_current() {
                // The view moved on while negotiation was suspended; a
                // late session must not reach the sink.
                return Some(spawn_session_cleanup(http, bearer, peer, resource_url));
            }

            *active.lock() = Some(ActiveSession { peer, resource_url });
            tile.set_phase(ViewPhase::Live);
            let pump_tile = tile.clone();
            *media_task.lock() = Some(tokio::spawn(run_media_pump(
                track_rx,
                pump_tile,
                geometry_rx,
                token,
            )));
            None
        }
        Err(err) => {
            if token.is_current() {
                tile.set_error(format!("{err:#}"));
            }
            None
        }
    }
}

/// Closes the peer and, when a locator exists, best-effort deletes the
/// session resource. Failures are discarded: teardown never surfaces
/// them and never blocks on them.
fn spawn_session_cleanup(
    http: reqwest::Client,
    bearer: Option<String>,
    peer: Arc<RTCPeerConnection>,
    resource_url: Option<Url>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = peer.close().await;
        if let Some(url) = resource_url {
            let mut request = http.delete(url);
            if let Some(token) = bearer.as_deref() {
                request = request.bearer_auth(token);
            }
            let _ = request.send().await;
        }
    })
}

/// Consumes the session's track channel, attaches the first video
/// stream to the sink and decodes it until the track ends or the cycle
/// is superseded.
async fn run_media_pump(
    mut track_rx: mpsc::UnboundedReceiver<Arc<TrackRemote>>,
    tile: Arc<TileState>,
    geometry_rx: watch::Receiver<RenderGeometry>,
    token: CycleToken,
) {
    while let Some(track) = track_rx.recv().await {
        if !token.is_current() {
            return;
        }
        if track.kind() != RTPCodecType::Video {
            continue;
        }
        match tile.attach_stream(&track.stream_id()) {
            AttachOutcome::Attached => {
                pump_video(&track, &tile, &geometry_rx, &token).await;
                return;
            }
            AttachOutcome::AlreadyAttached => continue,
            AttachOutcome::Rejected => return,
        }
    }
}

async fn pump_video(
    track: &Arc<TrackRemote>,
    tile: &Arc<TileState>,
    geometry_rx: &watch::Receiver<RenderGeometry>,
    token: &CycleToken,
) {
    let mut decoder = match Decoder::new() {
        Ok(decoder) => decoder,
        Err(err) => {
            tile.set_error(format!("H264 decoder unavailable: {err}"));
            return;
        }
    };
    let mut depacketizer = H264Packet::default();
    let mut access_unit: Vec<u8> = Vec::with_capacity(4096);

    loop {
        if !token.is_current() {
            return;
        }
        let (packet, _) = match track.read_rtp().await {
            Ok(received) => received,
            Err(_) => break,
        };
        if packet.payload.is_empty() {
            continue;
        }

        match depacketizer.depacketize(&packet.payload) {
            Ok(nal) if !nal.is_empty() => access_unit.extend_from_slice(&nal),
            Ok(_) => {}
            Err(_) => {
                tile.note_decode_error();
                continue;
            }
        }
        if !packet.header.marker || access_unit.is_empty() {
            continue;
        }

        match decoder.decode(&access_unit) {
            Ok(Some(yuv)) => {
                let geometry = *geometry_rx.borrow();
                let (width, height) = yuv.dimensions();
                let (stride, _, _) = yuv.strides();
                tile.push_frame(luma_to_text(yuv.y(), width, height, stride, geometry));
            }
            Ok(None) => {}
            Err(_) => tile.note_decode_error(),
        }
        access_unit.clear();
    }

    if token.is_current() {
        tile.set_error("stream ended".to_owned());
    }
}

/// Downsamples a decoded luma plane into a block of ramp characters
/// sized to the tile.
fn luma_to_text(
    y_plane: &[u8],
    src_width: usize,
    src_height: usize,
    src_stride: usize,
    geometry: RenderGeometry,
) -> String {
    let target_width = geometry.width;
    let target_height = geometry.height;
    if src_width == 0 || src_height == 0 || target_width == 0 || target_height == 0 {
        return "no frame".to_owned();
    }

    let mut out = String::with_capacity(target_width.saturating_mul(target_height + 1));
    let scale = geometry.vertical_scale.max(1);
    let row_den = target_height.saturating_sub(1).max(1);
    let max_src_row = src_height.saturating_sub(1);

    for ty in 0..target_height {
        let sy_base = if target_height <= 1 {
            0
        } else {
            ty.saturating_mul(max_src_row) / row_den
        };

        for tx in 0..target_width {
            let sx = (tx.saturating_mul(src_width) / target_width).min(src_width.saturating_sub(1));

            let mut sum = 0_u32;
            let mut samples = 0_u32;
            for offset in 0..scale {
                let sy = sy_base.saturating_add(offset).min(max_src_row);
                if let Some(value) = y_plane.get(sy.saturating_mul(src_stride).saturating_add(sx)) {
                    sum = sum.saturating_add(u32::from(*value));
                    samples = samples.saturating_add(1);
                }
            }
            let lum = if samples == 0 {
                0
            } else {
                u8::try_from(sum / samples).unwrap_or(u8::MAX)
            };
            let ramp_index =
                usize::from(lum).saturating_mul(BRIGHTNESS_RAMP.len().saturating_sub(1)) / 255;
            out.push(char::from(BRIGHTNESS_RAMP[ramp_index]));
        }

        if ty + 1 < target_height {
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{
        finish_bind, AttachOutcome, LiveBinding, LiveController, RenderGeometry, TileState,
        ViewPhase,
    };
    use crate::session::{self, LiveSession};
    use tokio::sync::watch;
    use url::Url;
    use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

    fn test_binding(endpoint: Option<&str>) -> LiveBinding {
        LiveBinding {
            camera_id: "cam1".to_owned(),
            label: "Front door".to_owned(),
            endpoint: endpoint.map(|raw| Url::parse(raw).unwrap()),
        }
    }

    fn test_controller(endpoint: Option<&str>) -> LiveController {
        let (_tx, rx) = watch::channel(RenderGeometry::default());
        LiveController::new(test_binding(endpoint), reqwest::Client::new(), None, rx)
    }

    async fn fabricated_session(resource_url: Option<Url>) -> LiveSession {
        let (peer, track_rx) = session::new_recv_peer().await.unwrap();
        LiveSession {
            peer,
            resource_url,
            track_rx,
        }
    }

    #[test]
    fn sink_attach_is_idempotent_for_the_same_stream() {
        let tile = TileState::new("cam".to_owned());
        assert_eq!(tile.attach_stream("s1"), AttachOutcome::Attached);
        assert_eq!(tile.attach_stream("s1"), AttachOutcome::AlreadyAttached);
        assert_eq!(tile.attach_stream("s2"), AttachOutcome::Rejected);
    }

    #[test]
    fn sink_accepts_no_mutation_after_teardown_begins() {
        let tile = TileState::new("cam".to_owned());
        assert_eq!(tile.attach_stream("s1"), AttachOutcome::Attached);
        tile.push_frame("frame".to_owned());
        tile.mark_torn_down();

        tile.push_frame("late frame".to_owned());
        tile.set_phase(ViewPhase::Live);
        tile.set_error("late error".to_owned());
        assert_eq!(tile.attach_stream("s2"), AttachOutcome::Rejected);

        let snapshot = tile.snapshot();
        assert_eq!(snapshot.phase, ViewPhase::TornDown);
        assert_eq!(snapshot.frame_text, "frame");
        assert_eq!(snapshot.frames_rendered, 1);
    }

    #[test]
    fn frames_require_an_attached_stream() {
        let tile = TileState::new("cam".to_owned());
        tile.push_frame("frame".to_owned());
        assert_eq!(tile.snapshot().frames_rendered, 0);
    }

    #[tokio::test]
    async fn stale_bind_result_is_discarded_and_disposed() {
        let mut controller = test_controller(None);
        let stale = controller.cycle_token();
        let _ = controller.teardown();

        let session = fabricated_session(None).await;
        let peer = session.peer.clone();
        let cleanup = finish_bind(
            stale,
            Ok(session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );

        cleanup.expect("stale session spawns cleanup").await.unwrap();
        assert_eq!(peer.connection_state(), RTCPeerConnectionState::Closed);
        assert!(!controller.has_active());

        let snapshot = controller.tile.snapshot();
        assert_eq!(snapshot.phase, ViewPhase::TornDown);
        assert_eq!(snapshot.frames_rendered, 0);
    }

    #[tokio::test]
    async fn current_bind_result_is_applied_once() {
        let mut controller = test_controller(None);
        let token = controller.cycle_token();

        let session = fabricated_session(None).await;
        let applied = finish_bind(
            token,
            Ok(session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );
        assert!(applied.is_none());
        assert!(controller.has_active());
        assert_eq!(controller.tile.snapshot().phase, ViewPhase::Live);
        let _ = controller.teardown();
    }

    #[tokio::test]
    async fn rapid_rebind_applies_exactly_one_of_two_results() {
        let mut controller = test_controller(None);
        let first = controller.cycle_token();
        let second = controller.cycle_token();

        let first_session = fabricated_session(None).await;
        let first_peer = first_session.peer.clone();
        let discarded = finish_bind(
            first,
            Ok(first_session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );
        discarded.expect("superseded session disposed").await.unwrap();
        assert_eq!(first_peer.connection_state(), RTCPeerConnectionState::Closed);
        assert!(!controller.has_active());

        let second_session = fabricated_session(None).await;
        let applied = finish_bind(
            second,
            Ok(second_session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );
        assert!(applied.is_none());
        assert!(controller.has_active());

        let _ = controller.teardown();
    }

    #[tokio::test]
    async fn teardown_closes_peer_even_without_locator() {
        let mut controller = test_controller(None);
        let token = controller.cycle_token();
        let session = fabricated_session(None).await;
        let peer = session.peer.clone();
        finish_bind(
            token,
            Ok(session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );

        let cleanup = controller.teardown().expect("active session cleaned up");
        cleanup.await.unwrap();
        assert_eq!(peer.connection_state(), RTCPeerConnectionState::Closed);
        assert!(!controller.has_active());
    }

    #[tokio::test]
    async fn teardown_closes_peer_even_when_resource_delete_fails() {
        let mut controller = test_controller(None);
        let token = controller.cycle_token();
        // Nothing listens here; the DELETE is refused and discarded.
        let resource = Url::parse("http://127.0.0.1:9/sessions/gone").unwrap();
        let session = fabricated_session(Some(resource)).await;
        let peer = session.peer.clone();
        finish_bind(
            token,
            Ok(session),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );

        let cleanup = controller.teardown().expect("active session cleaned up");
        cleanup.await.unwrap();
        assert_eq!(peer.connection_state(), RTCPeerConnectionState::Closed);
    }

    #[tokio::test]
    async fn failed_negotiation_marks_error_only_while_current() {
        let mut controller = test_controller(None);
        let token = controller.cycle_token();
        finish_bind(
            token,
            Err(anyhow::anyhow!("negotiation failed")),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );
        let snapshot = controller.tile.snapshot();
        assert_eq!(snapshot.phase, ViewPhase::Error);
        assert!(snapshot.detail.contains("negotiation failed"));

        let stale = controller.cycle_token();
        let _ = controller.teardown();
        finish_bind(
            stale,
            Err(anyhow::anyhow!("too late")),
            &controller.tile,
            &controller.active,
            &controller.media_task,
            reqwest::Client::new(),
            None,
            watch::channel(RenderGeometry::default()).1,
        );
        assert_eq!(controller.tile.snapshot().phase, ViewPhase::TornDown);
    }

    #[test]
    fn luma_render_uses_darkest_and_brightest_ramp_ends() {
        let geometry = RenderGeometry {
            width: 4,
            height: 2,
            vertical_scale: 1,
        };
        let dark = vec![0_u8; 16];
        let bright = vec![255_u8; 16];
        let dark_text = super::luma_to_text(&dark, 4, 4, 4, geometry);
        let bright_text = super::luma_to_text(&bright, 4, 4, 4, geometry);
        assert!(dark_text.chars().all(|c| c == ' ' || c == '\n'));
        assert!(bright_text.chars().all(|c| c == '@' || c == '\n'));
    }

    #[test]
    fn binding_identity_covers_stream_path_changes() {
        let a = test_binding(Some("https://gw/front/whep"));
        let b = test_binding(Some("https://gw/front-hq/whep"));
        assert_ne!(a, b);
    }
}
