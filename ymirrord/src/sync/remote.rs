use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use ymirror_core::{
    DiskClient, DiskError, ErrorClass, MoveResult, OperationStatus, Resource, ResourceType,
    TransferLink, classify_status,
};

use super::backoff::Backoff;
use super::snapshot::EntryKind;
use super::transfer::{TransferClient, TransferError};

const OPERATION_POLL_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("api error: {0}")]
    Api(#[from] DiskError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("remote operation reported failure")]
    OperationFailed,
    #[error("remote operation still in progress after {0} polls")]
    OperationTimedOut(u32),
    #[error("invalid remote timestamp: {0}")]
    Time(#[from] time::error::Parse),
}

impl RemoteError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            RemoteError::Api(err) => err.classification(),
            RemoteError::Transfer(TransferError::Request(err)) => err
                .status()
                .map(classify_status)
                .unwrap_or(ErrorClass::Transient),
            // The local file may be mid-rewrite; the next cycle rescans.
            RemoteError::Transfer(TransferError::Io(_)) => ErrorClass::Transient,
            RemoteError::Transfer(_) => ErrorClass::Permanent,
            RemoteError::OperationFailed | RemoteError::OperationTimedOut(_) => {
                ErrorClass::Transient
            }
            RemoteError::Time(_) => ErrorClass::Permanent,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RemoteError::Api(err) => err.retry_after_secs(),
            _ => None,
        }
    }
}

/// Remote metadata for one path, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub remote_id: Option<String>,
    pub modified: Option<i64>,
}

impl TryFrom<Resource> for RemoteEntry {
    type Error = RemoteError;

    fn try_from(resource: Resource) -> Result<Self, RemoteError> {
        Ok(Self {
            name: resource.name,
            kind: match resource.resource_type {
                ResourceType::File => EntryKind::File,
                ResourceType::Dir => EntryKind::Dir,
            },
            size: resource.size,
            md5: resource.md5,
            remote_id: resource.resource_id,
            modified: parse_modified(resource.modified.as_deref())?,
        })
    }
}

fn parse_modified(value: Option<&str>) -> Result<Option<i64>, time::error::Parse> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = OffsetDateTime::parse(value, &Rfc3339)?;
    Ok(Some(parsed.unix_timestamp()))
}

/// Capability seam over the cloud store. Paths are the snapshot's relative
/// POSIX paths; implementations own the mapping to their own namespace.
/// This is the boundary at which another backend slots in without touching
/// the reconciliation engine.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Idempotent folder creation; already-present is success. Returns the
    /// remote id when the store reports one.
    async fn ensure_folder(&self, rel: &str) -> Result<Option<String>, RemoteError>;

    /// Creates or overwrites the object at `rel` with the local file's
    /// bytes.
    async fn put(&self, rel: &str, source: &Path) -> Result<(), RemoteError>;

    /// Overwriting rename within the store.
    async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), RemoteError>;

    /// Removes the object or folder; absent is success.
    async fn delete(&self, rel: &str, recursive: bool) -> Result<(), RemoteError>;

    /// Remote metadata, None when the path does not exist.
    async fn stat(&self, rel: &str) -> Result<Option<RemoteEntry>, RemoteError>;
}

/// Yandex Disk implementation of [`RemoteStore`], mapping relative paths
/// under a `disk:/...` root.
pub struct DiskStore {
    client: DiskClient,
    transfer: TransferClient,
    remote_root: String,
    poll_backoff: Backoff,
}

impl DiskStore {
    pub fn new(client: DiskClient, transfer: TransferClient, remote_root: impl Into<String>) -> Self {
        Self {
            client,
            transfer,
            remote_root: remote_root.into(),
            poll_backoff: Backoff::new(
                Duration::from_millis(250),
                Duration::from_secs(10),
                true,
            ),
        }
    }

    pub fn with_poll_backoff(mut self, backoff: Backoff) -> Self {
        self.poll_backoff = backoff;
        self
    }

    fn absolute(&self, rel: &str) -> String {
        if rel.is_empty() {
            return self.remote_root.clone();
        }
        format!("{}/{}", self.remote_root.trim_end_matches('/'), rel)
    }

    /// Creates the configured remote root folder if it is missing. Also the
    /// cheapest way to surface a bad token before the first cycle.
    pub async fn ensure_root(&self) -> Result<(), RemoteError> {
        match self.client.create_folder(&self.remote_root).await {
            Ok(_) => Ok(()),
            Err(err) if already_exists(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn await_operation(&self, link: &TransferLink) -> Result<(), RemoteError> {
        for attempt in 0..OPERATION_POLL_LIMIT {
            match self.client.get_operation_status(link.href.as_str()).await? {
                OperationStatus::Success => return Ok(()),
                OperationStatus::Failure => return Err(RemoteError::OperationFailed),
                OperationStatus::InProgress => {
                    tokio::time::sleep(self.poll_backoff.delay(attempt)).await;
                }
            }
        }
        Err(RemoteError::OperationTimedOut(OPERATION_POLL_LIMIT))
    }
}

fn already_exists(err: &DiskError) -> bool {
    err.status() == Some(reqwest::StatusCode::CONFLICT)
}

fn not_found(err: &DiskError) -> bool {
    err.status() == Some(reqwest::StatusCode::NOT_FOUND)
}

impl RemoteStore for DiskStore {
    async fn ensure_folder(&self, rel: &str) -> Result<Option<String>, RemoteError> {
        match self.client.create_folder(&self.absolute(rel)).await {
            Ok(resource) => Ok(resource.resource_id),
            // 409 on folder creation: the folder is already there.
            Err(err) if already_exists(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, rel: &str, source: &Path) -> Result<(), RemoteError> {
        let link = self
            .client
            .get_upload_link(&self.absolute(rel), true)
            .await?;
        self.transfer
            .upload_from_path(link.href.as_str(), source)
            .await?;
        Ok(())
    }

    async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), RemoteError> {
        match self
            .client
            .move_resource(&self.absolute(from_rel), &self.absolute(to_rel), true)
            .await?
        {
            MoveResult::Done(_) => Ok(()),
            MoveResult::Pending(link) => self.await_operation(&link).await,
        }
    }

    async fn delete(&self, rel: &str, recursive: bool) -> Result<(), RemoteError> {
        // The Disk API removes folders recursively regardless; the flag is
        // part of the seam for stores that do distinguish.
        let _ = recursive;
        match self.client.delete_resource(&self.absolute(rel), true).await {
            Ok(None) => Ok(()),
            Ok(Some(link)) => self.await_operation(&link).await,
            Err(err) if not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn stat(&self, rel: &str) -> Result<Option<RemoteEntry>, RemoteError> {
        match self.client.get_resource(&self.absolute(rel)).await {
            Ok(resource) => Ok(Some(RemoteEntry::try_from(resource)?)),
            Err(err) if not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> DiskStore {
        let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
        DiskStore::new(client, TransferClient::new().unwrap(), "disk:/Mirror")
            .with_poll_backoff(Backoff::new(Duration::ZERO, Duration::ZERO, false))
    }

    #[test]
    fn absolute_joins_under_the_remote_root() {
        let client = DiskClient::with_base_url("http://localhost", "t").unwrap();
        let store = DiskStore::new(client, TransferClient::new().unwrap(), "disk:/Mirror");
        assert_eq!(store.absolute("a/b.txt"), "disk:/Mirror/a/b.txt");
        assert_eq!(store.absolute(""), "disk:/Mirror");
    }

    #[tokio::test]
    async fn ensure_folder_treats_conflict_as_already_present() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Mirror/docs"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "folder exists",
                "error": "DiskPathPointsToExistentDirectoryError"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert_eq!(store.ensure_folder("docs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_folder_returns_the_new_resource_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "path": "disk:/Mirror/docs",
                "name": "docs",
                "type": "dir",
                "resource_id": "rid-7"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert_eq!(
            store.ensure_folder("docs").await.unwrap(),
            Some("rid-7".to_string())
        );
    }

    #[tokio::test]
    async fn put_acquires_link_then_streams_the_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/upload"))
            .and(query_param("path", "disk:/Mirror/a.txt"))
            .and(query_param("overwrite", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "href": format!("{}/upload-here", server.uri()),
                "method": "PUT",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-here"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"payload").unwrap();

        let store = store_for(&server);
        store.put("a.txt", &source).await.unwrap();
    }

    #[tokio::test]
    async fn delete_missing_path_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "not found",
                "error": "DiskNotFoundError"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        store.delete("gone.txt", false).await.unwrap();
    }

    #[tokio::test]
    async fn delete_awaits_async_operations() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Mirror/big-folder"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "href": format!("{}/operations/del-1", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/del-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "in-progress"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/del-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .mount(&server)
            .await;

        let store = store_for(&server);
        store.delete("big-folder", true).await.unwrap();
    }

    #[tokio::test]
    async fn rename_polls_pending_move_operations() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources/move"))
            .and(query_param("from", "disk:/Mirror/clip.mkv.partial"))
            .and(query_param("path", "disk:/Mirror/clip.mkv"))
            .and(query_param("overwrite", "true"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "href": format!("{}/operations/mv-1", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/mv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .mount(&server)
            .await;

        let store = store_for(&server);
        store.rename("clip.mkv.partial", "clip.mkv").await.unwrap();
    }

    #[tokio::test]
    async fn failed_operation_surfaces_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources/move"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "href": format!("{}/operations/mv-2", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/mv-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "failure"})))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let err = store.rename("a", "b").await.expect_err("expected failure");
        assert!(matches!(err, RemoteError::OperationFailed));
        assert_eq!(err.classification(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn stat_maps_remote_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Mirror/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": "disk:/Mirror/a.txt",
                "name": "a.txt",
                "type": "file",
                "size": 7,
                "modified": "2024-06-01T12:00:00+00:00",
                "md5": "0123abcd",
                "resource_id": "rid-9"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let entry = store.stat("a.txt").await.unwrap().unwrap();
        assert_eq!(entry.name, "a.txt");
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(7));
        assert_eq!(entry.md5.as_deref(), Some("0123abcd"));
        assert_eq!(entry.remote_id.as_deref(), Some("rid-9"));
        assert!(entry.modified.is_some());
    }

    #[tokio::test]
    async fn stat_missing_path_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "not found",
                "error": "DiskNotFoundError"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert!(store.stat("missing.txt").await.unwrap().is_none());
    }
}
