use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Port the media gateway answers WHEP requests on when the backend does
/// not advertise an explicit base address.
pub const DEFAULT_GATEWAY_PORT: u16 = 8889;

const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub stream_path: Option<String>,
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub last_motion_at: Option<i64>,
}

impl Camera {
    /// Path segment addressing this camera's stream on the media gateway.
    #[must_use]
    pub fn stream_slug(&self) -> &str {
        match self.stream_path.as_deref() {
            Some(path) if !path.trim().is_empty() => path.trim_matches('/'),
            _ => &self.id,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionEvent {
    pub id: String,
    pub camera_id: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigInfo {
    #[serde(rename = "webrtcBase", default)]
    pub webrtc_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotOutcome {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub path: Option<String>,
}

/// HTTP client for the camera-management backend. Constructed once and
/// passed by reference; nothing in the crate reads the backend address
/// ambiently.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    bearer: Option<String>,
}

impl ApiClient {
    pub fn new(api_base: &str, bearer: Option<String>) -> Result<Self> {
        let base = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("invalid backend base URL: {api_base}"))?;
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .context("failed building HTTP client")?;
        let bearer = bearer.filter(|token| !token.trim().is_empty());
        Ok(Self { http, base, bearer })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
        .with_context(|| format!("invalid backend endpoint path: {path}"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn fetch_config(&self) -> Result<ConfigInfo> {
        let url = self.endpoint("api/config")?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .context("config request failed")?
            .error_for_status()
            .context("config request rejected")?;
        response
            .json::<ConfigInfo>()
            .await
            .context("malformed config response")
    }

    pub async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let url = self.endpoint("api/cameras")?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .context("camera list request failed")?
            .error_for_status()
            .context("camera list request rejected")?;
        response
            .json::<Vec<Camera>>()
            .await
            .context("malformed camera list response")
    }

    pub async fn recent_motion(&self, limit: usize) -> Result<Vec<MotionEvent>> {
        let mut url = self.endpoint("api/motion")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .context("motion event request failed")?
            .error_for_status()
            .context("motion event request rejected")?;
        response
            .json::<Vec<MotionEvent>>()
            .await
            .context("malformed motion event response")
    }

    pub async fn capture_snapshot(&self, camera_id: &str) -> Result<SnapshotOutcome> {
        let url = self.endpoint(&format!("api/snapshots/{camera_id}"))?;
        let response = self
            .authorize(self.http.post(url))
            .send()
            .await
            .context("snapshot request failed")?
            .error_for_status()
            .context("snapshot request rejected")?;
        response
            .json::<SnapshotOutcome>()
            .await
            .context("malformed snapshot response")
    }

    /// Resolves where the media gateway lives. The backend's advertised
    /// address wins; otherwise the backend host on the well-known WHEP
    /// port is assumed.
    pub fn resolve_gateway_base(&self, config: &ConfigInfo) -> Result<Url> {
        if let Some(advertised) = config
            .webrtc_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
        {
            return Url::parse(advertised.trim_end_matches('/'))
                .with_context(|| format!("invalid advertised gateway base: {advertised}"));
        }

        let mut fallback = self.base.clone();
        fallback.set_path("");
        fallback.set_query(None);
        fallback
            .set_port(Some(DEFAULT_GATEWAY_PORT))
            .map_err(|()| anyhow!("backend base URL cannot carry a gateway port"))?;
        Ok(fallback)
    }
}

/// Builds the session endpoint for one camera: gateway base + stream
/// path + the fixed `whep` suffix.
pub fn whep_endpoint(gateway: &Url, camera: &Camera) -> Result<Url> {
    let base = gateway.as_str().trim_end_matches('/');
    let slug = camera.stream_slug();
    Url::parse(&format!("{base}/{slug}/whep"))
        .with_context(|| format!("invalid session endpoint for camera {}", camera.id))
}

#[must_use]
pub fn snapshot_url(api_base: &Url, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    format!(
        "{}/{}",
        api_base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::{snapshot_url, whep_endpoint, ApiClient, Camera, ConfigInfo};

    fn camera(id: &str, stream_path: Option<&str>) -> Camera {
        Camera {
            id: id.to_owned(),
            name: String::new(),
            status: "online".to_owned(),
            stream_path: stream_path.map(str::to_owned),
            last_seen: None,
            last_motion_at: None,
        }
    }

    #[test]
    fn stream_slug_falls_back_to_id() {
        assert_eq!(camera("cam1", None).stream_slug(), "cam1");
        assert_eq!(camera("cam1", Some("  ")).stream_slug(), "cam1");
        assert_eq!(camera("cam1", Some("/front/door/")).stream_slug(), "front/door");
    }

    #[test]
    fn whep_endpoint_joins_gateway_and_slug() {
        let gateway = url::Url::parse("https://gw:8889").unwrap();
        let endpoint = whep_endpoint(&gateway, &camera("cam1", None)).unwrap();
        assert_eq!(endpoint.as_str(), "https://gw:8889/cam1/whep");

        let gateway = url::Url::parse("https://gw:8889/media/").unwrap();
        let endpoint = whep_endpoint(&gateway, &camera("cam1", Some("front"))).unwrap();
        assert_eq!(endpoint.as_str(), "https://gw:8889/media/front/whep");
    }

    #[test]
    fn gateway_base_prefers_advertised_address() {
        let api = ApiClient::new("http://127.0.0.1:8080", None).unwrap();
        let config = ConfigInfo {
            webrtc_base: Some("https://media.example:9443/".to_owned()),
        };
        let base = api.resolve_gateway_base(&config).unwrap();
        assert_eq!(base.as_str(), "https://media.example:9443/");
    }

    #[test]
    fn gateway_base_falls_back_to_backend_host() {
        let api = ApiClient::new("http://127.0.0.1:8080/api/", None).unwrap();
        let base = api.resolve_gateway_base(&ConfigInfo::default()).unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:8889/");
    }

    #[test]
    fn camera_json_tolerates_missing_optionals() {
        let parsed: Camera = serde_json::from_str(r#"{"id":"cam9"}"#).unwrap();
        assert_eq!(parsed.id, "cam9");
        assert!(parsed.stream_path.is_none());
        assert!(parsed.last_motion_at.is_none());
        assert_eq!(parsed.display_name(), "cam9");
    }

    #[test]
    fn snapshot_url_resolves_relative_paths() {
        let base = url::Url::parse("http://127.0.0.1:8080").unwrap();
        assert_eq!(
            snapshot_url(&base, "/snapshots/cam1/1.jpg"),
            "http://127.0.0.1:8080/snapshots/cam1/1.jpg"
        );
        assert_eq!(
            snapshot_url(&base, "https://cdn.example/1.jpg"),
            "https://cdn.example/1.jpg"
        );
    }
}
