//! HTTP transport used by upload probes

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Body, StatusCode};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::context::ProbeContext;
use crate::error::TransportError;
use crate::http_logger::{self, HttpResponseLog};
use crate::payload::UploadPayload;

/// Session ID shared by every request of this process
fn session_id() -> &'static str {
    static SESSION_ID: OnceLock<String> = OnceLock::new();
    SESSION_ID.get_or_init(|| Uuid::new_v4().to_string())
}

/// What a successful transfer reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub status: u16,
    /// Response body bytes drained and discarded
    pub response_bytes: usize,
}

/// Performs a single POST of an upload payload
///
/// Implementations must fully drain the response and give up once `ctx` is
/// cancelled.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        ctx: &ProbeContext,
        url: &str,
        content_type: &str,
        body: UploadPayload,
    ) -> Result<TransferReceipt, TransportError>;
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
    log_root: Option<PathBuf>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            log_root: None,
        })
    }

    /// Write HTTP logs under `root` instead of the working directory
    pub fn with_log_root(mut self, root: PathBuf) -> Self {
        self.log_root = Some(root);
        self
    }

    async fn exchange(
        &self,
        url: &str,
        content_type: &str,
        body: UploadPayload,
        request_id: &str,
    ) -> Result<(StatusCode, Vec<(String, String)>, bytes::Bytes), reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .header(USER_AGENT, &self.user_agent)
            .header("x-request-id", request_id)
            .header("x-request-session-id", session_id())
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        let headers = if http_logger::is_enabled() {
            http_logger::extract_response_headers(&response)
        } else {
            Vec::new()
        };
        let drained = response.bytes().await?;
        Ok((status, headers, drained))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        ctx: &ProbeContext,
        url: &str,
        content_type: &str,
        body: UploadPayload,
    ) -> Result<TransferReceipt, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let request_log = http_logger::build_upload_log_if_enabled(
            url,
            content_type,
            &self.user_agent,
            &request_id,
            session_id(),
            body.len(),
        );
        let start_time = Instant::now();

        let result = tokio::select! {
            _ = ctx.cancelled() => Err(TransportError::Cancelled),
            r = self.exchange(url, content_type, body, &request_id) => r.map_err(TransportError::from),
        };
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok((status, headers, drained)) => {
                debug!(
                    "POST {} -> {} in {}ms ({} response bytes)",
                    url,
                    status,
                    duration_ms,
                    drained.len()
                );
                if let Some(ref req_log) = request_log {
                    let response_log = HttpResponseLog {
                        status: status.as_u16(),
                        headers,
                        body: Some(String::from_utf8_lossy(&drained).into_owned()),
                    };
                    http_logger::log_request(
                        self.log_root.as_deref(),
                        req_log,
                        Some(&response_log),
                        duration_ms,
                        None,
                    );
                }

                if !status.is_success() {
                    return Err(TransportError::Status {
                        status: status.as_u16(),
                    });
                }
                Ok(TransferReceipt {
                    status: status.as_u16(),
                    response_bytes: drained.len(),
                })
            }
            Err(e) => {
                if let Some(ref req_log) = request_log {
                    let error_msg = e.to_string();
                    http_logger::log_request(
                        self.log_root.as_deref(),
                        req_log,
                        None,
                        duration_ms,
                        Some(&error_msg),
                    );
                }
                Err(e)
            }
        }
    }
}
