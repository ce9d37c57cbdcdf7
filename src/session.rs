use anyhow::{anyhow, Context, Result};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

const SDP_MIME: &str = "application/sdp";

/// A negotiated media session. Owned by exactly one live-view bind
/// cycle; never persisted.
pub struct LiveSession {
    pub peer: Arc<RTCPeerConnection>,
    /// Session-resource locator from the `Location` response header.
    /// Absent when the gateway did not name one; teardown then degrades
    /// to closing the peer connection only.
    pub resource_url: Option<Url>,
    /// Remote tracks surface here as they arrive. The bind cycle that
    /// owns the session consumes the first video track and attaches it
    /// to its sink.
    pub track_rx: mpsc::UnboundedReceiver<Arc<TrackRemote>>,
}

/// Performs one offer/answer exchange against a per-camera session
/// endpoint. No retry and no partial success: any failure tears the
/// connection down locally and surfaces a single error.
pub async fn negotiate(
    http: &reqwest::Client,
    bearer: Option<&str>,
    endpoint: &Url,
) -> Result<LiveSession> {
    let (peer, track_rx) = new_recv_peer().await?;

    match exchange(http, bearer, endpoint, &peer).await {
        Ok(resource_url) => Ok(LiveSession {
            peer,
            resource_url,
            track_rx,
        }),
        Err(err) => {
            let _ = peer.close().await;
            Err(err.context("negotiation failed"))
        }
    }
}

/// Opens a peer connection configured to receive one video and one
/// audio stream, declining to send media. Remote tracks are forwarded
/// through the returned channel.
pub(crate) async fn new_recv_peer(
) -> Result<(Arc<RTCPeerConnection>, mpsc::UnboundedReceiver<Arc<TrackRemote>>)> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("failed registering media codecs")?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .context("failed registering media interceptors")?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let peer = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .context("failed opening peer connection")?,
    );

    for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
        peer.add_transceiver_from_kind(
            kind,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .context("failed adding receive transceiver")?;
    }

    let (track_tx, track_rx) = mpsc::unbounded_channel();
    peer.on_track(Box::new(
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                let _ = track_tx.send(track);
            })
        },
    ));

    Ok((peer, track_rx))
}

async fn exchange(
    http: &reqwest::Client,
    bearer: Option<&str>,
    endpoint: &Url,
    peer: &Arc<RTCPeerConnection>,
) -> Result<Option<Url>> {
    let offer = peer
        .create_offer(None)
        .await
        .context("failed creating session offer")?;
    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(offer)
        .await
        .context("failed committing local offer")?;
    // WHEP is a single-shot exchange; the offer must carry complete
    // candidates rather than trickling them afterwards.
    let _ = gather_complete.recv().await;

    let local = peer
        .local_description()
        .await
        .ok_or_else(|| anyhow!("local description unavailable after gathering"))?;

    let mut request = http
        .post(endpoint.clone())
        .header(CONTENT_TYPE, SDP_MIME)
        .body(local.sdp);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("session request to {endpoint} failed"))?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "session endpoint {} answered {}",
            endpoint,
            response.status()
        ));
    }

    let resource_url = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| resolve_session_resource(endpoint, location));

    let answer_sdp = response
        .text()
        .await
        .context("failed reading session answer")?;
    let answer =
        RTCSessionDescription::answer(answer_sdp).context("malformed session answer")?;
    peer.set_remote_description(answer)
        .await
        .context("failed committing remote answer")?;

    Ok(resource_url)
}

/// Resolves the session-resource locator against the endpoint the offer
/// was posted to. Relative and absolute `Location` values both work.
pub(crate) fn resolve_session_resource(endpoint: &Url, location: &str) -> Option<Url> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return None;
    }
    endpoint.join(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::resolve_session_resource;
    use url::Url;

    #[test]
    fn location_resolves_against_endpoint_host() {
        let endpoint = Url::parse("https://gw/cam1/whep").unwrap();
        let resource = resolve_session_resource(&endpoint, "/sessions/abc123").unwrap();
        assert_eq!(resource.as_str(), "https://gw/sessions/abc123");
    }

    #[test]
    fn absolute_location_is_taken_verbatim() {
        let endpoint = Url::parse("https://gw/cam1/whep").unwrap();
        let resource =
            resolve_session_resource(&endpoint, "https://other/sessions/9").unwrap();
        assert_eq!(resource.as_str(), "https://other/sessions/9");
    }

    #[test]
    fn blank_location_yields_no_locator() {
        let endpoint = Url::parse("https://gw/cam1/whep").unwrap();
        assert!(resolve_session_resource(&endpoint, "   ").is_none());
    }

    #[tokio::test]
    async fn recv_peer_opens_without_network() {
        let (peer, _track_rx) = super::new_recv_peer().await.unwrap();
        let offer = peer.create_offer(None).await.unwrap();
        assert!(offer.sdp.contains("recvonly"));
        let _ = peer.close().await;
    }
}
