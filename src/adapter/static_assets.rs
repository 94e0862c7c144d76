//! Options accepted by [`HttpAdapter::use_static_assets`](super::HttpAdapter::use_static_assets).
//!
//! The adapter registers nothing for them. They deserialize so a service can
//! keep them next to its [`ServerConfig`](crate::ServerConfig):
//!
//! ```toml
//! [static]
//! directory = "public"
//! static_files = ["robots.txt"]
//!
//! [static.cache]
//! max_file_count = 250
//! max_file_size = 1048576
//!
//! [static.filter]
//! ignore_extensions = ["map"]
//! ```

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StaticAssetsOptions {
    /// Root served from; the mount path is passed separately.
    pub directory: Option<String>,
    /// Extra files served outside `directory`.
    pub static_files: Vec<String>,
    pub cache: CacheLimits,
    pub filter: AssetFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    pub max_file_count: usize,
    /// Bytes.
    pub max_file_size: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self { max_file_count: 250, max_file_size: 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssetFilter {
    pub keep_names: Vec<String>,
    pub keep_extensions: Vec<String>,
    pub ignore_names: Vec<String>,
    pub ignore_extensions: Vec<String>,
}
