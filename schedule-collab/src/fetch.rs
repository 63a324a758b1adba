//! Initial state retrieval.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::Snapshot;

/// Where a peer gets the schedule it starts from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, FetchError>;
}

/// `GET /api/state` on the hub.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        log::debug!("Fetching initial state from {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<Snapshot>()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))
    }
}

/// A fixed snapshot, e.g. a seed already in memory.
#[async_trait]
impl SnapshotSource for Snapshot {
    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let snapshot = Snapshot::demo();
        assert_eq!(snapshot.fetch().await.unwrap(), Snapshot::demo());
    }

    #[tokio::test]
    async fn test_http_source_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let source = HttpSnapshotSource::new(format!("http://127.0.0.1:{port}/api/state"));
        assert!(matches!(source.fetch().await, Err(FetchError::Network(_))));
    }
}
