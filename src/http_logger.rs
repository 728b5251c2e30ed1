//! HTTP Request Logger
//!
//! Logs probe HTTP exchanges to a file when enabled via environment variable.
//! Set `SPEEDPROBE_HTTP_LOG=1` or `SPEEDPROBE_HTTP_LOG=true` to enable.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::warn;

/// Environment variable to control HTTP logging
const ENV_HTTP_LOG: &str = "SPEEDPROBE_HTTP_LOG";

/// Directory the log is written to, relative to the log root
const LOG_DIR_NAME: &str = ".speedprobe";

/// Log file name
const LOG_FILE_NAME: &str = "http_requests.log";

/// Maximum body size to log (10KB)
const MAX_BODY_SIZE: usize = 10000;

/// Sensitive headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "set-cookie",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

/// Global mutex for thread-safe log writing
static LOG_MUTEX: Mutex<()> = Mutex::new(());

/// Check if HTTP logging is enabled
pub fn is_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var(ENV_HTTP_LOG)
            .map(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

/// Interpret an environment flag value
pub fn parse_flag(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

/// Get log file path under `root` (or the current directory)
pub fn log_file_path(root: Option<&Path>) -> PathBuf {
    let dir = root.unwrap_or_else(|| Path::new(".")).join(LOG_DIR_NAME);
    if !dir.exists() {
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create {} directory: {}", LOG_DIR_NAME, e);
        }
    }
    dir.join(LOG_FILE_NAME)
}

/// HTTP request log entry
pub struct HttpRequestLog {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Description of the body; upload payloads are summarized, never dumped
    pub body: Option<String>,
}

/// HTTP response log entry
pub struct HttpResponseLog {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Log an HTTP request and response (no-op unless enabled)
pub fn log_request(
    root: Option<&Path>,
    request: &HttpRequestLog,
    response: Option<&HttpResponseLog>,
    duration_ms: u64,
    error: Option<&str>,
) {
    if !is_enabled() {
        return;
    }
    let log_path = log_file_path(root);
    let content = format_entry(request, response, duration_ms, error);
    if let Err(e) = write_log(&log_path, &content) {
        warn!("Failed to write HTTP log: {}", e);
    }
}

/// Render one exchange as a log entry
pub fn format_entry(
    request: &HttpRequestLog,
    response: Option<&HttpResponseLog>,
    duration_ms: u64,
    error: Option<&str>,
) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let separator = "=".repeat(80);

    let mut log_content = String::new();
    log_content.push_str(&format!(
        "\n{}\n[{}] {} {}\n{}\n",
        separator, timestamp, request.method, request.url, separator
    ));

    log_content.push_str("\n--- Request Headers ---\n");
    for (name, value) in &request.headers {
        log_content.push_str(&format!("{}: {}\n", name, mask_sensitive_header(name, value)));
    }

    if let Some(body) = &request.body {
        log_content.push_str("\n--- Request Body ---\n");
        log_content.push_str(body);
        log_content.push('\n');
    }

    if let Some(resp) = response {
        log_content.push_str(&format!("\n--- Response ({}ms) ---\n", duration_ms));
        log_content.push_str(&format!("Status: {}\n", resp.status));

        log_content.push_str("\n--- Response Headers ---\n");
        for (name, value) in &resp.headers {
            log_content.push_str(&format!("{}: {}\n", name, mask_sensitive_header(name, value)));
        }

        if let Some(body) = &resp.body {
            log_content.push_str("\n--- Response Body ---\n");
            log_content.push_str(&format_body(body));
            log_content.push('\n');
        }
    }

    if let Some(err) = error {
        log_content.push_str(&format!("\n--- Error ({}ms) ---\n", duration_ms));
        log_content.push_str(err);
        log_content.push('\n');
    }

    log_content.push_str(&format!("\n{}\n", separator));
    log_content
}

/// Append log content to file (thread-safe)
pub fn write_log(path: &Path, content: &str) -> std::io::Result<()> {
    // Concurrent probe tasks share one file.
    let _guard = LOG_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Check if a header is sensitive and should be masked
pub fn is_sensitive_header(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    SENSITIVE_HEADERS.iter().any(|h| name_lower == *h)
}

fn mask_sensitive_header(name: &str, value: &str) -> String {
    if is_sensitive_header(name) {
        mask_token(value)
    } else {
        value.to_string()
    }
}

/// Mask a credential, keeping four characters on each side when long enough
pub fn mask_token(value: &str) -> String {
    let (prefix, token) = match value.strip_prefix("Bearer ") {
        Some(token) => ("Bearer ", token),
        None => ("", value),
    };
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}...{}", prefix, head, tail)
    } else {
        format!("{}****", prefix)
    }
}

/// Format body for logging with truncation (UTF-8 safe)
fn format_body(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let pretty = serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string());
        truncate_utf8_safe(&pretty, MAX_BODY_SIZE)
    } else {
        truncate_utf8_safe(body, MAX_BODY_SIZE)
    }
}

/// Truncate string at UTF-8 character boundary (safe for multi-byte chars)
pub fn truncate_utf8_safe(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...\n[truncated, total {} bytes]", &s[..end], s.len())
}

/// Build the request entry for an upload, or None when logging is disabled
pub fn build_upload_log_if_enabled(
    url: &str,
    content_type: &str,
    user_agent: &str,
    request_id: &str,
    session_id: &str,
    body_len: usize,
) -> Option<HttpRequestLog> {
    if !is_enabled() {
        return None;
    }

    Some(HttpRequestLog {
        method: "POST".to_string(),
        url: url.to_string(),
        headers: vec![
            ("Content-Type".to_string(), content_type.to_string()),
            ("User-Agent".to_string(), user_agent.to_string()),
            ("x-request-id".to_string(), request_id.to_string()),
            ("x-request-session-id".to_string(), session_id.to_string()),
        ],
        body: Some(format!("<{} bytes of form payload>", body_len)),
    })
}

/// Extract headers from reqwest Response
pub fn extract_response_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect()
}
