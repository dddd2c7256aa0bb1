use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

const DEFAULT_UPLOAD_URL: &str = "http://127.0.0.1:9090/upload";
const DEFAULT_RECORDS_URL: &str = "http://127.0.0.1:9090/sessions";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_url: String,
    pub records_url: String,
    pub request_timeout_secs: u64,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let upload_url = std::env::var("UPLOAD_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_UPLOAD_URL.to_string());
        let records_url = std::env::var("RECORDS_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_RECORDS_URL.to_string());
        let request_timeout_secs = std::env::var("STORAGE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        Self {
            upload_url,
            records_url,
            request_timeout_secs,
        }
    }
}

/// A finished live-session instance, as persisted by the student side.
/// Written at most once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub teacher_id: String,
    pub student_id: String,
    pub artifact_url: String,
    pub whiteboard_data: String,
    pub has_audio: bool,
    /// Milliseconds since the Unix epoch.
    pub end_time: u64,
}

/// Uploads a recorded artifact blob and returns its durable URL.
pub trait ArtifactUploader: Send + Sync {
    fn upload(
        &self,
        data: Vec<u8>,
        file_name: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Persists finished sessions, returning the stored record id.
pub trait SessionRecordStore: Send + Sync {
    fn insert(&self, record: &SessionRecord) -> impl Future<Output = Result<String>> + Send;
}

/// Response from the upload service
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Response from the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InsertResponse {
    id: String,
}

/// HTTP-backed implementation of both persistence collaborators.
#[derive(Clone)]
pub struct HttpStorageClient {
    config: StorageConfig,
    client: reqwest::Client,
}

impl HttpStorageClient {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(StorageConfig::from_env())
    }
}

impl ArtifactUploader for HttpStorageClient {
    async fn upload(&self, data: Vec<u8>, file_name: &str) -> Result<String> {
        let size = data.len();
        let file_part = Part::bytes(data).file_name(file_name.to_string());
        let form = Form::new().part("file", file_part);

        let response = self
            .client
            .post(&self.config.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::upload(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::upload(format!(
                "Upload failed with status {}: {}",
                status, error_text
            )));
        }

        let upload_response: UploadResponse = response
            .json()
            .await
            .map_err(|e| RelayError::upload(format!("Failed to parse response: {}", e)))?;

        tracing::info!(
            url = %upload_response.url,
            size = size,
            file_name = %file_name,
            "Uploaded session artifact"
        );

        Ok(upload_response.url)
    }
}

impl SessionRecordStore for HttpStorageClient {
    async fn insert(&self, record: &SessionRecord) -> Result<String> {
        let response = self
            .client
            .post(&self.config.records_url)
            .json(record)
            .send()
            .await
            .map_err(|e| RelayError::record_store(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::record_store(format!(
                "Insert failed with status {}: {}",
                status, error_text
            )));
        }

        let insert_response: InsertResponse = response
            .json()
            .await
            .map_err(|e| RelayError::record_store(format!("Failed to parse response: {}", e)))?;

        tracing::info!(
            record_id = %insert_response.id,
            teacher_id = %record.teacher_id,
            student_id = %record.student_id,
            "Stored session record"
        );

        Ok(insert_response.id)
    }
}
