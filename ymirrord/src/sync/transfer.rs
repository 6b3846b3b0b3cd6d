use std::{io, path::Path, sync::Arc, time::Duration};

use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_UPLOAD_CONCURRENCY: usize = 2;
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub upload_concurrency: usize,
    pub upload_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Streams local file bodies to upload hrefs handed out by the API, with a
/// bounded number of uploads in flight.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    upload_limit: Arc<Semaphore>,
}

impl TransferClient {
    pub fn new() -> Result<Self, TransferError> {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Result<Self, TransferError> {
        Ok(Self {
            http: Client::builder().timeout(config.upload_timeout).build()?,
            upload_limit: Arc::new(Semaphore::new(config.upload_concurrency.max(1))),
        })
    }

    pub async fn upload_from_path(&self, href: &str, source: &Path) -> Result<(), TransferError> {
        let _permit = self
            .upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let url = Url::parse(href)?;
        let file = tokio::fs::File::open(source).await?;
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        self.http
            .put(url)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn uploads_file_contents() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        let client = TransferClient::new().unwrap();
        client
            .upload_from_path(&format!("{}/upload", server.uri()), &source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_rejection_surfaces_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(507))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"x").unwrap();

        let client = TransferClient::new().unwrap();
        let err = client
            .upload_from_path(&format!("{}/upload", server.uri()), &source)
            .await
            .expect_err("expected 507");
        assert!(matches!(err, TransferError::Request(_)));
    }

    #[tokio::test]
    async fn missing_source_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let client = TransferClient::new().unwrap();
        let err = client
            .upload_from_path("http://127.0.0.1:9/upload", &dir.path().join("absent"))
            .await
            .expect_err("expected io error");
        assert!(matches!(err, TransferError::Io(_)));
    }
}
