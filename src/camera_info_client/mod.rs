//! CameraInfoClient - Camera metadata enrichment
//!
//! ## Responsibilities
//!
//! - Resolve camera attributes (name, category, location, institute) by camera id and
//!   device credential from the external metadata service
//! - Apply the fallback policy shared by both ingest paths
//!
//! ## Policy
//!
//! - Exactly one attempt per call, bounded by the configured timeout
//! - No cache: every frame triggers a fresh lookup (freshness over throughput)
//! - No credential means no lookup; the frame keeps whatever it embedded
//! - On failure the caller keeps the payload's embedded `camera_info` if there is one,
//!   otherwise the frame is rejected

use crate::error::Result;
use crate::frame_schema::CameraInfo;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Placeholder substituted with the camera id in the provider URL
const CAMERA_ID_PLACEHOLDER: &str = "{camera_id}";

/// Enrichment failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichmentError {
    #[error("camera info request timed out after {0:?}")]
    Timeout(Duration),

    #[error("camera info service returned HTTP {0}")]
    Status(u16),

    #[error("camera info request failed: {0}")]
    Transport(String),

    #[error("camera info response invalid: {0}")]
    Decode(String),

    #[error("camera {0} is unknown to the metadata provider")]
    UnknownCamera(String),
}

/// Metadata provider collaborator
#[async_trait]
pub trait CameraInfoProvider: Send + Sync {
    async fn resolve(
        &self,
        camera_id: &str,
        credential: &str,
    ) -> std::result::Result<CameraInfo, EnrichmentError>;
}

/// Resolve camera info with the embedded-value fallback
///
/// - no credential: no provider call, `embedded` is kept as is (possibly `None`)
/// - credential present: one provider call; success overrides `embedded`
/// - provider failure: `embedded` if present, else the error
pub async fn resolve_camera_info(
    provider: &dyn CameraInfoProvider,
    camera_id: &str,
    credential: Option<&str>,
    embedded: Option<CameraInfo>,
) -> std::result::Result<Option<CameraInfo>, EnrichmentError> {
    let Some(token) = credential else {
        tracing::debug!(camera_id = %camera_id, "No credential, camera info lookup skipped");
        return Ok(embedded);
    };

    let error = match provider.resolve(camera_id, token).await {
        Ok(info) => return Ok(Some(info)),
        Err(e) => e,
    };

    match embedded {
        Some(info) => {
            tracing::warn!(
                camera_id = %camera_id,
                error = %error,
                "Camera info lookup failed, using embedded camera_info"
            );
            Ok(Some(info))
        }
        None => Err(error),
    }
}

/// Provider response, flat or wrapped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CameraInfoResponse {
    Wrapped { data: CameraInfo },
    Nested { camera_info: CameraInfo },
    Flat(CameraInfo),
}

impl CameraInfoResponse {
    fn into_info(self) -> CameraInfo {
        match self {
            Self::Wrapped { data } => data,
            Self::Nested { camera_info } => camera_info,
            Self::Flat(info) => info,
        }
    }
}

/// HTTP metadata provider
///
/// `GET <url>` with `Authorization: Bearer <credential>`. The URL is built from a
/// template containing `{camera_id}`; without the placeholder the id is appended as a
/// path segment.
pub struct HttpCameraInfoClient {
    http: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpCameraInfoClient {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url_template: url_template.into(),
            timeout,
        })
    }

    fn url_for(&self, camera_id: &str) -> String {
        if self.url_template.contains(CAMERA_ID_PLACEHOLDER) {
            self.url_template.replace(CAMERA_ID_PLACEHOLDER, camera_id)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), camera_id)
        }
    }

    fn map_error(&self, e: reqwest::Error) -> EnrichmentError {
        if e.is_timeout() {
            EnrichmentError::Timeout(self.timeout)
        } else if e.is_decode() {
            EnrichmentError::Decode(e.to_string())
        } else {
            EnrichmentError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl CameraInfoProvider for HttpCameraInfoClient {
    async fn resolve(
        &self,
        camera_id: &str,
        credential: &str,
    ) -> std::result::Result<CameraInfo, EnrichmentError> {
        let url = self.url_for(camera_id);
        tracing::debug!(camera_id = %camera_id, url = %url, "Resolving camera info");

        let response = self
            .http
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(camera_id = %camera_id, status = %status, "Camera info lookup rejected");
            return Err(EnrichmentError::Status(status.as_u16()));
        }

        let info = response
            .json::<CameraInfoResponse>()
            .await
            .map_err(|e| self.map_error(e))?
            .into_info();

        if info.name.trim().is_empty() {
            return Err(EnrichmentError::Decode("camera name is empty".to_string()));
        }

        Ok(info)
    }
}

/// Fixed camera map
///
/// Used when no metadata service is configured; an empty map makes every lookup fail,
/// so frames keep their embedded camera info.
#[derive(Debug, Default)]
pub struct StaticCameraInfoProvider {
    cameras: HashMap<String, CameraInfo>,
}

impl StaticCameraInfoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera_id: impl Into<String>, info: CameraInfo) -> Self {
        self.cameras.insert(camera_id.into(), info);
        self
    }
}

#[async_trait]
impl CameraInfoProvider for StaticCameraInfoProvider {
    async fn resolve(
        &self,
        camera_id: &str,
        _credential: &str,
    ) -> std::result::Result<CameraInfo, EnrichmentError> {
        self.cameras
            .get(camera_id)
            .cloned()
            .ok_or_else(|| EnrichmentError::UnknownCamera(camera_id.to_string()))
    }
}
