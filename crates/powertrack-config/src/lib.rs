//! Configuration for PowerTrack clients.
//!
//! TOML config file loading, config-file discovery, and per-field
//! resolution of the effective credentials and stream URL. Explicit values
//! always win over the file, and the file wins over built-in defaults.
//!
//! ```toml
//! [credentials]
//! username = "me@example.com"
//! password = "secret"
//!
//! [powertrack]
//! url = "https://gnip-stream.twitter.com/stream/powertrack/accounts/acme/publishers/twitter/prod.json"
//! ```

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use figment::{
    Figment,
    providers::{Format, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use powertrack_api::Credentials;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "POWERTRACK_CONFIG";

/// Stream URL used when neither an explicit URL nor the config file names one.
pub const DEFAULT_STREAM_URL: &str =
    "https://gnip-stream.twitter.com/stream/powertrack/accounts/default/publishers/twitter/prod.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no value for '{field}' in arguments or config file")]
    MissingField { field: &'static str },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Load(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// On-disk configuration. Every section and key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powertrack: Option<PowertrackSection>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password. Keep the file readable by its owner only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PowertrackSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileConfig {
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref()?.username.as_deref().filter(|s| !s.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials.as_ref()?.password.as_deref().filter(|s| !s.is_empty())
    }

    pub fn url(&self) -> Option<&str> {
        self.powertrack.as_ref()?.url.as_deref().filter(|s| !s.is_empty())
    }
}

// ── Config file discovery ───────────────────────────────────────────

/// Supplies candidate config file paths, most preferred first.
pub trait ConfigLocator {
    fn candidates(&self) -> Vec<PathBuf>;

    /// The first candidate that exists as a file.
    fn locate(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|p| p.is_file())
    }
}

/// `$POWERTRACK_CONFIG`, then the platform config dir, then `~/.powertrack.toml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLocator;

impl ConfigLocator for DefaultLocator {
    fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Some(env_path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            paths.push(PathBuf::from(env_path));
        }
        paths.push(config_path());
        if let Some(base) = BaseDirs::new() {
            paths.push(base.home_dir().join(".powertrack.toml"));
        }
        paths
    }
}

/// A fixed list of candidates.
#[derive(Debug, Default, Clone)]
pub struct FixedLocator(pub Vec<PathBuf>);

impl FixedLocator {
    /// A locator that never finds anything.
    pub fn none() -> Self {
        Self(Vec::new())
    }
}

impl ConfigLocator for FixedLocator {
    fn candidates(&self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

/// Platform config file path (`$XDG_CONFIG_HOME/powertrack/config.toml` on Linux).
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "powertrack", "powertrack").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("powertrack");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load a config file. A missing file loads as an empty config.
pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = Figment::new().merge(Toml::file(path)).extract()?;
    Ok(config)
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_str)?;
    restrict_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Resolution ──────────────────────────────────────────────────────

/// Values supplied directly by the caller. Each one beats the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub url: Option<String>,
    /// Use this file instead of asking the locator.
    pub config_path: Option<PathBuf>,
}

impl Overrides {
    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.username = Some(credentials.username().to_owned());
        self.password = Some(credentials.password().clone());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

/// Effective connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub url: String,
    /// Config file that was consulted, if any.
    pub source: Option<PathBuf>,
}

/// The config file `resolve` would read: the explicit path if given,
/// otherwise the first existing locator candidate.
pub fn config_file(overrides: &Overrides, locator: &dyn ConfigLocator) -> Option<PathBuf> {
    overrides
        .config_path
        .clone()
        .or_else(|| locator.locate())
}

/// Resolve credentials and URL.
///
/// Per field: explicit override, then config file, then default. There is
/// no default for credentials.
pub fn resolve(
    overrides: &Overrides,
    locator: &dyn ConfigLocator,
) -> Result<ResolvedConfig, ConfigError> {
    let source = config_file(overrides, locator);
    let file = match source.as_deref() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config file");
            load(path)?
        }
        None => {
            tracing::debug!("no config file found");
            FileConfig::default()
        }
    };

    let username = overrides
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| file.username().map(str::to_owned))
        .ok_or(ConfigError::MissingField {
            field: "credentials.username",
        })?;

    let password = overrides
        .password
        .clone()
        .filter(|p| !p.expose_secret().is_empty())
        .or_else(|| file.password().map(|p| SecretString::from(p.to_owned())))
        .ok_or(ConfigError::MissingField {
            field: "credentials.password",
        })?;

    let url = overrides
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| file.url().map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_STREAM_URL.to_owned());
    validate_url(&url)?;

    Ok(ResolvedConfig {
        credentials: Credentials::new(username, password),
        url,
        source,
    })
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(url).map_err(|e| ConfigError::Validation {
        field: "powertrack.url".into(),
        reason: format!("{e}: {url}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation {
            field: "powertrack.url".into(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
