//! Listener configuration.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8080
//! max_body_size = 1048576
//!
//! [static]
//! directory = "public"
//! ```
//!
//! Every key is optional. `HOST` and `PORT` from the environment win over the
//! file.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::adapter::StaticAssetsOptions;
use crate::error::Error;
use crate::lifecycle::{DEFAULT_HOST, IntoPort};
use crate::request::DEFAULT_BODY_LIMIT;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bytes a request body may buffer before it is answered with 413.
    pub max_body_size: usize,
    #[serde(rename = "static")]
    pub static_assets: StaticAssetsOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            max_body_size: DEFAULT_BODY_LIMIT,
            static_assets: StaticAssetsOptions::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by `HOST` / `PORT`.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().with_env()
    }

    /// Applies `HOST` / `PORT` on top of `self`.
    pub fn with_env(self) -> Result<Self, Error> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(host) = var("HOST").filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = port.into_port()?;
        }
        Ok(self)
    }

    /// `host:port`, as a log field.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
