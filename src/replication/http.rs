//! HTTP adapter for the secondary graph store
//!
//! Endpoints (relative to `base_url`):
//! - POST /documents/upload  - JSON `UploadRequest`, answers `{"status": ...}`
//! - POST /documents/rebuild - rebuild the index now
//!
//! HTTP 409 on upload is read as "already stored".

use super::{ReplicationClient, UploadRequest, UploadStatus};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// `ReplicationClient` over HTTP
pub struct HttpGraphClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGraphClient {
    /// Create a client for `base_url` with an optional bearer token
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Create a client from configuration; `base_url` is required
    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("replication.base_url is not set".to_string()))?;
        Ok(Self::new(base_url, config.resolve_api_key()))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ReplicationClient for HttpGraphClient {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadStatus> {
        let response = self
            .post("/documents/upload")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Replication(format!("upload request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(UploadStatus::Duplicate);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Replication(format!("HTTP {}: {}", status, body)));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Replication(format!("invalid upload response: {}", e)))?;

        match body.status.as_str() {
            "success" => Ok(UploadStatus::Success),
            "duplicate" => Ok(UploadStatus::Duplicate),
            other => Err(Error::Replication(format!(
                "upload rejected ({}): {}",
                other,
                body.message.unwrap_or_default()
            ))),
        }
    }

    async fn rebuild_index(&self) -> Result<()> {
        let response = self
            .post("/documents/rebuild")
            .send()
            .await
            .map_err(|e| Error::Rebuild(format!("rebuild request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rebuild(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http-graph"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordBuilder;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_request() -> UploadRequest {
        let record = MemoryRecordBuilder::new()
            .identity("user-1")
            .content("I have a pet dog")
            .topic("pets")
            .build()
            .unwrap();
        UploadRequest::from_record(&record, true)
    }

    #[tokio::test]
    async fn test_upload_success() {
        let mock_server = MockServer::start().await;
        let request = make_request();

        Mock::given(method("POST"))
            .and(path("/documents/upload"))
            .and(header("Authorization", "Bearer graph-key"))
            .and(body_partial_json(serde_json::json!({
                "identity": "user-1",
                "topics": ["pets"],
                "deferred": true,
                "fingerprint": request.fingerprint.clone(),
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpGraphClient::new(mock_server.uri(), Some("graph-key".to_string()));
        assert_eq!(client.upload(&request).await.unwrap(), UploadStatus::Success);
    }

    #[tokio::test]
    async fn test_upload_duplicate_variants() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documents/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "duplicate"})),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/upload"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&mock_server)
            .await;

        let client = HttpGraphClient::new(format!("{}/", mock_server.uri()), None);
        let request = make_request();
        assert_eq!(client.upload(&request).await.unwrap(), UploadStatus::Duplicate);
        assert_eq!(client.upload(&request).await.unwrap(), UploadStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documents/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "failure", "message": "graph offline"}),
            ))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/upload"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = HttpGraphClient::new(mock_server.uri(), None);
        let request = make_request();

        let err = client.upload(&request).await.unwrap_err();
        assert!(err.to_string().contains("graph offline"));
        let err = client.upload(&request).await.unwrap_err();
        assert!(matches!(err, Error::Replication(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_rebuild() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documents/rebuild"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/rebuild"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = HttpGraphClient::new(mock_server.uri(), None);
        assert!(client.rebuild_index().await.is_ok());
        assert!(matches!(client.rebuild_index().await, Err(Error::Rebuild(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = HttpGraphClient::new("http://127.0.0.1:9", None);
        assert!(matches!(
            client.upload(&make_request()).await,
            Err(Error::Replication(_))
        ));
    }

    #[test]
    fn test_from_config_requires_base_url() {
        assert!(HttpGraphClient::from_config(&ReplicationConfig::default()).is_err());

        let config = ReplicationConfig {
            base_url: Some("http://localhost:9621/".to_string()),
            ..Default::default()
        };
        let client = HttpGraphClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:9621");
        assert_eq!(client.name(), "http-graph");
    }
}
