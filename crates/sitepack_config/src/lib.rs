//! Loading and validation of `sitepack.toml`.
//!
//! ```toml
//! [app]
//! id = "blog"
//! sites = [{ name = "main" }, { name = "staging" }]
//!
//! [site]
//! public = "dist"
//!
//! [deploy]
//! max-files = 20000
//! compression-level = 19
//!
//! [cache]
//! capacity = 268435456
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sitepack_archive::{CollectorOptions, CompressionLevel, MAX_FILES};
use thiserror::Error;

/// The base name of the configuration file and of the configuration document
/// injected into archives.
pub const CONFIG_NAME: &str = "sitepack";

/// The smallest and largest accepted zstd window logs.
const WINDOW_LOG_RANGE: std::ops::RangeInclusive<u32> = 10..=27;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Invalid value for a field.
    #[error("Invalid value for field {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    /// The configuration file does not exist.
    #[error("no {CONFIG_NAME}.toml found in {}", .0.display())]
    NotFound(PathBuf),

    /// IO error while reading configuration file.
    #[error("IO error while reading configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing configuration file.
    #[error("Error parsing configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Error validating configuration.
    #[error("Error validating configuration: {0}")]
    ValidationError(#[from] ValidationError),
}

/// The complete configuration of a site project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub app: AppConfig,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// The id of the app on the deployment server.
    pub id: String,

    /// The sites deployments can be activated on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sites: Vec<AppSiteConfig>,

    /// Settings the server understands but the client does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSiteConfig {
    pub name: String,
}

impl AppConfig {
    /// Looks up a site by name.
    pub fn resolve_site(&self, name: &str) -> Option<&AppSiteConfig> {
        self.sites.iter().find(|site| site.name == name)
    }
}

fn default_public() -> String {
    ".".to_string()
}

/// The site configuration shipped with every deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// The directory, relative to the project, that is published.
    #[serde(default = "default_public")]
    pub public: String,

    /// Settings the server understands but the client does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            public: default_public(),
            extra: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    MAX_FILES
}

fn default_window_log() -> u32 {
    sitepack_archive::write::DEFAULT_WINDOW_LOG
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeployConfig {
    /// The maximum number of files in one deployment.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// The zstd compression level, the library default if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i32>,

    /// The zstd window log.
    #[serde(default = "default_window_log")]
    pub window_log: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            compression_level: None,
            window_log: default_window_log(),
        }
    }
}

impl DeployConfig {
    /// The options to construct a collector with.
    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            max_files: self.max_files,
            compression_level: self
                .compression_level
                .map_or(CompressionLevel::Default, CompressionLevel::Numeric),
            window_log: self.window_log,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_files == 0 {
            return Err(ValidationError::InvalidValue(
                "deploy.max-files".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        if let Some(level) = self.compression_level {
            CompressionLevel::Numeric(level)
                .to_zstd_level()
                .map_err(|e| {
                    ValidationError::InvalidValue(
                        "deploy.compression-level".to_string(),
                        e.to_string(),
                    )
                })?;
        }
        if !WINDOW_LOG_RANGE.contains(&self.window_log) {
            return Err(ValidationError::InvalidValue(
                "deploy.window-log".to_string(),
                format!(
                    "must be between {} and {}",
                    WINDOW_LOG_RANGE.start(),
                    WINDOW_LOG_RANGE.end()
                ),
            ));
        }
        Ok(())
    }
}

fn default_capacity() -> u64 {
    sitepack_cache::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// The number of content bytes kept in memory.
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Config {
    /// Loads `sitepack.toml` from the given project directory.
    pub fn load(dir: &Path) -> Result<Self, LoadError> {
        let path = dir.join(format!("{CONFIG_NAME}.toml"));
        if !path.is_file() {
            return Err(LoadError::NotFound(dir.to_path_buf()));
        }
        Self::from_path(&path)
    }

    /// Loads and validates the configuration file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let content = fs_err::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.app.id.is_empty() {
            return Err(ValidationError::MissingRequiredField("app.id".to_string()));
        }
        if !validate_dns_label(&self.app.id) {
            return Err(ValidationError::InvalidValue(
                "app.id".to_string(),
                "must be a valid DNS label".to_string(),
            ));
        }
        for site in &self.app.sites {
            if !validate_dns_label(&site.name) {
                return Err(ValidationError::InvalidValue(
                    "app.sites".to_string(),
                    format!("'{}' is not a valid DNS label", site.name),
                ));
            }
        }
        self.deploy.validate()?;
        if self.cache.capacity == 0 {
            return Err(ValidationError::InvalidValue(
                "cache.capacity".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns true if `label` is a valid DNS label: 1 to 63 lowercase ASCII
/// letters, digits or hyphens, not starting or ending with a hyphen.
pub fn validate_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
