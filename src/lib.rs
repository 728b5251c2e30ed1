//! speedprobe library - upload bandwidth probing over concurrent HTTP transfers

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http_logger;
pub mod payload;
pub mod prober;
pub mod server;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use client::Client;
pub use config::{Config, ConfigOptions};
pub use context::ProbeContext;
pub use error::{ConfigError, PayloadError, ProbeError, TransportError};
pub use payload::UploadPayload;
pub use prober::{BytesPerSecond, BytesTransferred, ProbeGroup};
pub use server::Server;
pub use transport::{HttpTransport, TransferReceipt, Transport};
