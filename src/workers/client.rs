//! Worker Client
//!
//! `WorkerApi` is the typed contract the coordinator relies on for every remote worker.
//! `HttpWorkerClient` implements it over the worker's HTTP surface.
//!
//! Every request carries a deadline. Transport failures are retried with exponential
//! backoff and jitter; HTTP-level answers (including 4xx) are never retried.

use super::protocol::*;
use crate::error::RemoteError;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1200;
const MAX_JITTER_MS: u64 = 50;

/// Operations the coordinator issues against a single worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Connectivity check. Returns the round-trip latency in milliseconds.
    async fn probe(&self) -> Result<u64, RemoteError>;

    /// Number of sub-tasks queued or running on the worker.
    async fn queue_depth(&self) -> Result<u64, RemoteError>;

    /// Uploads the face to look for and returns the worker-side id of the stored photo.
    async fn upload_probe_photo(&self, file_name: &str, bytes: Vec<u8>)
    -> Result<String, RemoteError>;

    /// Starts a face-match sub-task over one shard. Returns the remote task id, or
    /// `RemoteError::DirectoryEmpty` when there is nothing to search.
    async fn create_sub_task(&self, probe_id: &str, directory: &str)
    -> Result<String, RemoteError>;

    /// Returns the number of files in the shard, or `RemoteError::NotFound`.
    async fn directory_exists(&self, directory: &str) -> Result<u64, RemoteError>;

    /// CRC-32 of one archived file, or `RemoteError::NotFound`.
    async fn file_checksum(&self, directory: &str, file_name: &str) -> Result<u32, RemoteError>;

    async fn create_directory(&self, directory: &str) -> Result<(), RemoteError>;

    /// Removes one shard, or every shard the worker holds when `directory` is `None`.
    async fn remove_directory(&self, directory: Option<&str>) -> Result<(), RemoteError>;

    async fn upload_archive_file(
        &self,
        directory: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError>;

    async fn list_directories(&self) -> Result<Vec<String>, RemoteError>;
}

/// Builds clients for worker endpoints. The registry goes through this on registration
/// and reload so that it never hardcodes the transport.
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, address: &str, port: u16) -> Arc<dyn WorkerApi>;
}

/// Deadlines and retry budget shared by all HTTP worker clients.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub probe_timeout: Duration,
    pub call_timeout: Duration,
    pub upload_timeout: Duration,
    pub attempts: usize,
}

impl ClientSettings {
    /// Longest a retried call can take when each attempt may run for `per_attempt`,
    /// backoff and jitter included.
    pub fn retry_budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.attempts.max(1);
        let mut total = per_attempt * attempts as u32;
        let mut delay_ms = INITIAL_BACKOFF_MS;
        for _ in 1..attempts {
            total += Duration::from_millis(delay_ms + MAX_JITTER_MS);
            delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
        }
        total
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(60),
            attempts: 3,
        }
    }
}

pub struct HttpConnector {
    http_client: reqwest::Client,
    settings: ClientSettings,
}

impl HttpConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            settings,
        }
    }
}

impl WorkerConnector for HttpConnector {
    fn connect(&self, address: &str, port: u16) -> Arc<dyn WorkerApi> {
        Arc::new(HttpWorkerClient {
            base_url: format!("http://{}:{}", address, port),
            http_client: self.http_client.clone(),
            settings: self.settings.clone(),
        })
    }
}

pub struct HttpWorkerClient {
    base_url: String,
    http_client: reqwest::Client,
    settings: ClientSettings,
}

impl HttpWorkerClient {
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, RemoteError> {
        let url = self.url(endpoint);
        self.send_with_retry(|| {
            self.http_client
                .get(&url)
                .query(query)
                .timeout(self.settings.call_timeout)
        })
        .await
    }

    async fn post_file(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = self.url(endpoint);
        self.send_with_retry(|| {
            // Multipart bodies are consumed on send, so each attempt builds its own form.
            let part = Part::bytes(bytes.clone()).file_name(file_name.to_string());
            self.http_client
                .post(&url)
                .query(query)
                .multipart(Form::new().part(UPLOAD_FIELD, part))
                .timeout(self.settings.upload_timeout)
        })
        .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, RemoteError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = self.settings.attempts.max(1);
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..attempts {
            match build().send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(transport_error(e));
                    }
                    tracing::trace!(
                        "Request to {} failed (attempt {}): {}",
                        self.base_url,
                        attempt + 1,
                        e
                    );
                    let jitter = rand::random::<u64>() % MAX_JITTER_MS;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }

        Err(RemoteError::Unreachable(format!(
            "retry attempts exhausted for {}",
            self.base_url
        )))
    }
}

#[async_trait]
impl WorkerApi for HttpWorkerClient {
    async fn probe(&self) -> Result<u64, RemoteError> {
        let started = Instant::now();

        // Any HTTP answer means the worker is up; only transport failures count.
        self.http_client
            .get(self.url(ENDPOINT_PING))
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        Ok(started.elapsed().as_millis() as u64)
    }

    async fn queue_depth(&self) -> Result<u64, RemoteError> {
        let response = self.get(ENDPOINT_TASKS_COUNT, &[]).await?;
        let body = expect_success(response).await?;

        body.trim()
            .parse::<u64>()
            .map_err(|e| RemoteError::Protocol(format!("bad tasks count {:?}: {}", body, e)))
    }

    async fn upload_probe_photo(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let response = self
            .post_file(ENDPOINT_UPLOAD_CHECK_FILE, &[], file_name, bytes)
            .await?;
        let body = expect_success(response).await?;
        let reply: DataReply = parse_json(&body)?;

        match (reply.code, reply.data) {
            (0, Some(file_id)) if !file_id.is_empty() => Ok(file_id),
            (code, data) => Err(RemoteError::Rejected {
                status: 200,
                message: format!("upload refused with code {}: {:?}", code, data),
            }),
        }
    }

    async fn create_sub_task(
        &self,
        probe_id: &str,
        directory: &str,
    ) -> Result<String, RemoteError> {
        let response = self
            .get(
                ENDPOINT_CREATE_TASK,
                &[("fileid", probe_id), ("directory", directory)],
            )
            .await?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status == reqwest::StatusCode::BAD_REQUEST && body.contains(DIRECTORY_NOT_FOUND_MESSAGE)
        {
            return Err(RemoteError::NotFound);
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let reply: MessageReply = parse_json(&body)?;
        let message = reply.message.unwrap_or_default();

        match reply.code {
            0 if !message.is_empty() => Ok(message),
            0 => Err(RemoteError::Protocol("empty task id".to_string())),
            _ if message.contains(EMPTY_DIRECTORY_MESSAGE) => Err(RemoteError::DirectoryEmpty),
            code => Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: format!("code {}: {}", code, message),
            }),
        }
    }

    async fn directory_exists(&self, directory: &str) -> Result<u64, RemoteError> {
        let response = self.get(ENDPOINT_CHECK_DIR, &[("dir", directory)]).await?;
        let body = expect_success(response).await?;

        body.trim()
            .parse::<u64>()
            .map_err(|e| RemoteError::Protocol(format!("bad file count {:?}: {}", body, e)))
    }

    async fn file_checksum(&self, directory: &str, file_name: &str) -> Result<u32, RemoteError> {
        let response = self
            .get(
                ENDPOINT_CHECK_PHOTO,
                &[("dirname", directory), ("photo", file_name), ("checksumm", "1")],
            )
            .await?;
        let body = expect_success(response).await?;

        // Workers report CRC-32 as a signed 32-bit integer.
        body.trim()
            .parse::<i64>()
            .map(|value| value as u32)
            .map_err(|e| RemoteError::Protocol(format!("bad checksum {:?}: {}", body, e)))
    }

    async fn create_directory(&self, directory: &str) -> Result<(), RemoteError> {
        let response = self.get(ENDPOINT_ADD_DIR, &[("dir", directory)]).await?;
        expect_success(response).await.map(|_| ())
    }

    async fn remove_directory(&self, directory: Option<&str>) -> Result<(), RemoteError> {
        let response = self
            .get(ENDPOINT_REMOVE_DIR, &[("dirname", directory.unwrap_or(""))])
            .await?;
        expect_success(response).await.map(|_| ())
    }

    async fn upload_archive_file(
        &self,
        directory: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let response = self
            .post_file(ENDPOINT_ADD_FILE, &[("dir", directory)], file_name, bytes)
            .await?;
        expect_success(response).await.map(|_| ())
    }

    async fn list_directories(&self) -> Result<Vec<String>, RemoteError> {
        let response = self.get(ENDPOINT_DIR_LIST, &[]).await?;
        let body = expect_success(response).await?;
        let reply: DataReply = parse_json(&body)?;

        Ok(reply
            .data
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unreachable(e.to_string())
    }
}

/// Maps 404 to `NotFound`, any other non-2xx to `Rejected`, and returns the body otherwise.
async fn expect_success(response: reqwest::Response) -> Result<String, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound);
    }
    if !status.is_success() {
        return Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: body,
        });
    }

    Ok(body)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::Protocol(e.to_string()))
}
