use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::endpoints::ErrorStatusPolicy;

/// File name used for the label when `[store] path` is omitted.
pub const DEFAULT_LABEL_FILE_NAME: &str = "current_feature.txt";

const DEFAULT_ADDR: &str = "127.0.0.1:4000";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("manifest failed validation: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

pub struct ManifestLoader {
    manifest: Manifest,
}

impl ManifestLoader {
    pub fn load_from_str(contents: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(contents)?;
        manifest.validate()?;
        Ok(Self { manifest })
    }

    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_str(&contents)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    #[validate(nested)]
    pub server: ManifestServer,
    #[serde(default)]
    #[validate(nested)]
    pub upstream: ManifestUpstream,
    #[serde(default)]
    #[validate(nested)]
    pub store: ManifestStore,
    #[serde(default)]
    pub context: ManifestContext,
    #[serde(default)]
    pub logging: ManifestLogging,
}

impl Manifest {
    pub fn listen_addr(&self) -> SocketAddr {
        self.server.addr.unwrap_or_else(default_addr)
    }

    pub fn upstream_url(&self) -> Option<&str> {
        self.upstream.url.as_deref()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(
            self.upstream
                .timeout_secs
                .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        )
    }

    /// Label file path: `[store] path`, else `current_feature.txt` in the system temp dir.
    pub fn label_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LABEL_FILE_NAME))
    }

    pub fn error_status_policy(&self) -> ErrorStatusPolicy {
        ErrorStatusPolicy::from_strict(self.context.strict_status)
    }

    pub fn logging(&self) -> ResolvedLoggingConfig {
        ResolvedLoggingConfig::from_manifest(&self.logging)
    }
}

fn default_addr() -> SocketAddr {
    DEFAULT_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 4000)))
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ManifestServer {
    #[serde(default)]
    pub addr: Option<SocketAddr>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ManifestUpstream {
    #[serde(default)]
    #[validate(custom(function = "validate_upstream_url"))]
    pub url: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timeout_secs: Option<u64>,
}

fn validate_upstream_url(url: &str) -> Result<(), ValidationError> {
    let parsed: http::Uri = url
        .parse()
        .map_err(|_| ValidationError::new("upstream_url_invalid"))?;
    match parsed.scheme_str() {
        Some("http") | Some("https") if parsed.authority().is_some() => Ok(()),
        _ => Err(ValidationError::new("upstream_url_scheme")),
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ManifestStore {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    #[validate(custom(function = "validate_label_path"))]
    pub path: Option<PathBuf>,
}

fn validate_label_path(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("label_path_empty"));
    }
    Ok(())
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestContext {
    #[serde(default)]
    pub strict_status: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestLogging {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub echo_stdout: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedLoggingConfig {
    pub level: LogLevel,
    pub echo_stdout: bool,
}

impl Default for ResolvedLoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            echo_stdout: true,
        }
    }
}

impl ResolvedLoggingConfig {
    fn from_manifest(cfg: &ManifestLogging) -> Self {
        let mut resolved = Self::default();
        if let Some(level) = cfg.level {
            resolved.level = level;
        }
        if let Some(echo_stdout) = cfg.echo_stdout {
            resolved.echo_stdout = echo_stdout;
        }
        resolved
    }

    /// Effective filter: the configured level, or `Off` when stdout echo is disabled.
    pub fn level_filter(&self) -> LevelFilter {
        if self.echo_stdout {
            self.level.into()
        } else {
            LevelFilter::Off
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            other => Err(serde::de::Error::custom(format!(
                "logging level must be trace, debug, info, warn, error, or off (got `{}`)",
                other
            ))),
        }
    }
}
