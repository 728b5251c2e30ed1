//! Probe client: configuration plus the transport uploads go through

use std::sync::Arc;

use crate::config::Config;
use crate::error::TransportError;
use crate::transport::{HttpTransport, Transport};

/// Client settings and transport shared by every task of a probe
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client backed by an [`HttpTransport`] built from `config`
    pub fn new(config: Arc<Config>) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Client using a caller-provided transport
    pub fn with_transport(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
