//! Probe target

use std::fmt;

use serde::Serialize;

use crate::config::Config;

/// Endpoint uploads are POSTed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    pub url: String,
    pub name: Option<String>,
}

impl Server {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Server at the configured `server_url`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.server_url.clone())
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.url),
            None => write!(f, "{}", self.url),
        }
    }
}
