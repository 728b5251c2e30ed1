//! Configuration module - probe target and upload parameters

use std::sync::Arc;

use reqwest::Url;

use crate::error::ConfigError;
use crate::payload::FORM_HEADER;

/// Upload payload sizes in bytes (250KB, 500KB)
pub const DEFAULT_UPLOAD_SIZES: [usize; 2] = [1000 * 1000 / 4, 1000 * 1000 / 2];

/// Repeats per download size
const DOWNLOAD_REPEATS: usize = 5;

/// Repeats per upload size; uploads are small so each size runs many more times
pub const DEFAULT_UPLOAD_REPEATS: usize = DOWNLOAD_REPEATS * 25;

/// Concurrent transfers allowed during a probe
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Overall probe deadline in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Capacity of the intermediate estimate channel
pub const DEFAULT_STREAM_BUFFER: usize = 32;

/// Most upload transfers a single probe may plan (sizes x repeats)
pub const MAX_UPLOAD_TASKS: usize = 100_000;

/// Optional configuration parameters for Config::new()
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub upload_sizes: Option<Vec<usize>>,
    pub upload_repeats: Option<usize>,
    pub upload_concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stream_buffer: Option<usize>,
    pub user_agent: Option<String>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub upload_sizes: Vec<usize>,
    pub upload_repeats: usize,
    pub upload_concurrency: usize,
    pub timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_buffer: usize,
    pub user_agent: String,
}

impl Config {
    /// Create a new Config for `server_url`, plus optional settings
    pub fn new(server_url: String, options: ConfigOptions) -> Result<Arc<Self>, ConfigError> {
        let server_url = normalize_url(&server_url)?;

        let upload_sizes = options
            .upload_sizes
            .unwrap_or_else(|| DEFAULT_UPLOAD_SIZES.to_vec());
        if upload_sizes.is_empty() {
            return Err(ConfigError::NoUploadSizes);
        }
        if let Some(&size) = upload_sizes.iter().find(|&&s| s <= FORM_HEADER.len()) {
            return Err(ConfigError::UploadSizeTooSmall {
                size,
                header_len: FORM_HEADER.len(),
            });
        }

        let upload_repeats = options.upload_repeats.unwrap_or(DEFAULT_UPLOAD_REPEATS);
        if upload_repeats == 0 {
            return Err(ConfigError::Zero {
                field: "upload_repeats",
            });
        }

        if upload_sizes
            .len()
            .checked_mul(upload_repeats)
            .map_or(true, |count| count > MAX_UPLOAD_TASKS)
        {
            return Err(ConfigError::TooManyUploads {
                sizes: upload_sizes.len(),
                repeats: upload_repeats,
                max: MAX_UPLOAD_TASKS,
            });
        }

        let upload_concurrency = options.upload_concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if upload_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "upload_concurrency",
            });
        }

        let request_timeout_secs = options
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_secs",
            });
        }

        Ok(Arc::new(Self {
            server_url,
            upload_sizes,
            upload_repeats,
            upload_concurrency,
            timeout_secs: options.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            request_timeout_secs,
            stream_buffer: options.stream_buffer.unwrap_or(DEFAULT_STREAM_BUFFER).max(1),
            user_agent: options
                .user_agent
                .unwrap_or_else(|| format!("speedprobe/{}", env!("CARGO_PKG_VERSION"))),
        }))
    }

    /// Number of upload transfers a full probe issues
    pub fn upload_task_count(&self) -> usize {
        self.upload_sizes.len().saturating_mul(self.upload_repeats)
    }
}

/// Trim, default the scheme to http:// and strip trailing slashes
fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::EmptyUrl);
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = with_scheme.trim_end_matches('/').to_string();

    let parsed = Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidUrl {
            url,
            reason: format!("unsupported scheme {:?}", parsed.scheme()),
        });
    }

    Ok(url)
}
