use std::time::{Duration, SystemTime};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        retry_after: Option<u64>,
    },
}

/// Coarse failure classes used by the retry policy upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl DiskError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            DiskError::Api { status, .. } => classify_status(*status),
            // Timeouts, connect failures, truncated bodies: retried like 5xx.
            DiskError::Request(_) => ErrorClass::Transient,
            DiskError::Url(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ErrorClass::RateLimit | ErrorClass::Transient
        )
    }

    /// Server-suggested retry delay in seconds, when one was sent.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DiskError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DiskError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Classification shared with transfer-level failures upstream.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Retry-After may be either a number of seconds or an HTTP-date.
fn parse_retry_after(response: &Response) -> Option<u64> {
    let raw = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(secs);
    }
    let at = httpdate::parse_http_date(raw.trim()).ok()?;
    at.duration_since(SystemTime::now())
        .ok()
        .map(|d| d.as_secs())
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiErrorBody {
    fn into_message(self, fallback: String) -> String {
        self.message
            .or(self.description)
            .or(self.error)
            .unwrap_or(fallback)
    }
}

#[derive(Clone)]
pub struct DiskClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DiskClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DiskError> {
        Self::new_with_timeout(token, DEFAULT_TIMEOUT)
    }

    pub fn new_with_timeout(
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DiskError> {
        Self::with_timeout(DEFAULT_BASE_URL, token, timeout)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DiskError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DiskError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_disk_info(&self) -> Result<DiskInfo, DiskError> {
        let url = self.endpoint("/v1/disk", &[])?;
        Self::into_payload(self.get(url).await?).await
    }

    pub async fn get_resource(&self, path: &str) -> Result<Resource, DiskError> {
        let url = self.endpoint("/v1/disk/resources", &[("path", path)])?;
        Self::into_payload(self.get(url).await?).await
    }

    /// PUT /v1/disk/resources creates a folder; 409 means it is already there.
    pub async fn create_folder(&self, path: &str) -> Result<Resource, DiskError> {
        let url = self.endpoint("/v1/disk/resources", &[("path", path)])?;
        Self::into_payload(self.put(url).await?).await
    }

    /// 201 means the move completed synchronously; 202 hands back an
    /// operation link to poll.
    pub async fn move_resource(
        &self,
        from: &str,
        path: &str,
        overwrite: bool,
    ) -> Result<MoveResult, DiskError> {
        let url = self.endpoint(
            "/v1/disk/resources/move",
            &[
                ("from", from),
                ("path", path),
                ("overwrite", bool_str(overwrite)),
            ],
        )?;
        let response = self.put(url).await?;
        let pending = response.status() == StatusCode::ACCEPTED;
        let link: TransferLink = Self::into_payload(response).await?;
        Ok(if pending {
            MoveResult::Pending(link)
        } else {
            MoveResult::Done(link)
        })
    }

    /// Recursive by contract on the API side; large folders come back as an
    /// async operation link instead of 204.
    pub async fn delete_resource(
        &self,
        path: &str,
        permanently: bool,
    ) -> Result<Option<TransferLink>, DiskError> {
        let mut pairs = vec![("path", path)];
        if permanently {
            pairs.push(("permanently", "true"));
        }
        let url = self.endpoint("/v1/disk/resources", &pairs)?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(Self::into_payload(response).await?))
    }

    pub async fn get_upload_link(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<TransferLink, DiskError> {
        let url = self.endpoint(
            "/v1/disk/resources/upload",
            &[("path", path), ("overwrite", bool_str(overwrite))],
        )?;
        Self::into_payload(self.get(url).await?).await
    }

    pub async fn get_operation_status(
        &self,
        operation_url: &str,
    ) -> Result<OperationStatus, DiskError> {
        let url = Url::parse(operation_url)?;
        let info: OperationInfo = Self::into_payload(self.get(url).await?).await?;
        Ok(info.status)
    }

    async fn get(&self, url: Url) -> Result<Response, DiskError> {
        Ok(self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?)
    }

    async fn put(&self, url: Url) -> Result<Response, DiskError> {
        Ok(self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?)
    }

    fn auth_header_value(&self) -> String {
        format!("OAuth {}", self.token)
    }

    fn endpoint(&self, path: &str, pairs: &[(&str, &str)]) -> Result<Url, DiskError> {
        let mut url = self.base_url.join(path)?;
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn into_payload<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, DiskError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|parsed| parsed.into_message(body.clone()))
            .unwrap_or(body);
        Err(DiskError::Api {
            status,
            message,
            retry_after,
        })
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiskInfo {
    pub total_space: u64,
    pub used_space: u64,
    #[serde(default)]
    pub trash_size: u64,
    #[serde(default)]
    pub is_paid: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resource {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Dir,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    Success,
    Failure,
    InProgress,
}

#[derive(Debug, Deserialize)]
struct OperationInfo {
    status: OperationStatus,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransferLink {
    pub href: Url,
    pub method: String,
    #[serde(default)]
    pub templated: bool,
}

#[derive(Debug)]
pub enum MoveResult {
    Done(TransferLink),
    Pending(TransferLink),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_classify_as_auth() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorClass::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorClass::Auth);
    }

    #[test]
    fn server_errors_classify_as_transient() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorClass::Transient
        );
        assert_eq!(classify_status(StatusCode::CONFLICT), ErrorClass::Transient);
    }

    #[test]
    fn rate_limit_and_permanent_are_distinguished() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorClass::RateLimit
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_status(StatusCode::INSUFFICIENT_STORAGE),
            ErrorClass::Transient
        );
    }

    #[test]
    fn api_error_body_prefers_message_field() {
        let body: ApiErrorBody = serde_json::from_str(
            r#"{"message": "resource not found", "description": "x", "error": "DiskNotFoundError"}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_message("fallback".into()),
            "resource not found".to_string()
        );
    }
}
