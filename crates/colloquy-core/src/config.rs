// Configuration loading and parsing (config/stream.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::DEFAULT_VOTE_THRESHOLD;

/// Name of the single configuration file under `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "stream.toml";

/// Placeholder substituted with the debate id in endpoint paths.
const ID_PLACEHOLDER: &str = "{id}";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub polling: PollingConfig,
    #[serde(default)]
    pub aggregates: AggregatesConfig,
}

/// Which push transport carries the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Server-Sent Events over HTTP.
    Sse,
    Websocket,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    /// Push endpoint, with `{id}` standing for the debate id.
    pub stream_path: String,
    /// Catch-up endpoint returning the debate's event history.
    pub timeline_path: String,
    /// Debate resource (status, prompt, panel, vote).
    pub debate_path: String,
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Ascending reconnect delays; attempts past the end reuse the last one.
    pub backoff_ms: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Reconnect attempts tolerated before the polling fallback kicks in.
    pub retry_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatesConfig {
    pub vote_threshold: f64,
}

impl Default for AggregatesConfig {
    fn default() -> Self {
        AggregatesConfig {
            vote_threshold: DEFAULT_VOTE_THRESHOLD,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                base_url: "http://127.0.0.1:8000".into(),
                stream_path: "/api/debates/{id}/stream".into(),
                timeline_path: "/api/debates/{id}/timeline".into(),
                debate_path: "/api/debates/{id}".into(),
                transport: TransportKind::Sse,
            },
            reconnect: ReconnectConfig {
                backoff_ms: vec![1_000, 2_000, 5_000, 10_000],
            },
            polling: PollingConfig {
                interval_ms: 3_000,
                retry_threshold: 2,
            },
            aggregates: AggregatesConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Push endpoint for `debate_id`. WebSocket transports get the `ws`/`wss`
    /// scheme matching the configured HTTP base.
    pub fn stream_url(&self, debate_id: &str) -> String {
        let url = self.endpoint(&self.stream_path, debate_id);
        match self.transport {
            TransportKind::Sse => url,
            TransportKind::Websocket => {
                if let Some(rest) = url.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = url.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    url
                }
            }
        }
    }

    pub fn timeline_url(&self, debate_id: &str) -> String {
        self.endpoint(&self.timeline_path, debate_id)
    }

    pub fn debate_url(&self, debate_id: &str) -> String {
        self.endpoint(&self.debate_path, debate_id)
    }

    fn endpoint(&self, path: &str, debate_id: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.replace(ID_PLACEHOLDER, debate_id);
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/stream.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/stream.toml` into `config/` unless the user already has
/// one. Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let copy_err = |message: String| ConfigError::DefaultsCopyError { message };

    let content = std::fs::read(&source).map_err(|e| {
        copy_err(format!(
            "no {} and no usable {} ({e}); run from the project root",
            target.display(),
            source.display()
        ))
    })?;
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| copy_err(format!("failed to create {}: {e}", dir.display())))?;
    }

    // A file written since the check above is kept.
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, &content)
                .map_err(|e| copy_err(format!("failed to write {}: {e}", target.display())))?;
            Ok(Some(target))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(copy_err(format!("failed to create {}: {e}", target.display()))),
    }
}

/// Load `config/stream.toml` under the working directory, seeding it from
/// `defaults/` on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if let Some(path) = ensure_config_file(&cwd)? {
        info!(path = %path.display(), "copied default config");
    }
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let server = &config.server;
    if !(server.base_url.starts_with("http://") || server.base_url.starts_with("https://")) {
        return Err(invalid(
            "server.base_url",
            format!("must start with http:// or https://, got {:?}", server.base_url),
        ));
    }

    let paths: &[(&str, &str)] = &[
        ("server.stream_path", &server.stream_path),
        ("server.timeline_path", &server.timeline_path),
        ("server.debate_path", &server.debate_path),
    ];
    for (name, path) in paths {
        if !path.contains(ID_PLACEHOLDER) {
            return Err(invalid(name, format!("must contain {ID_PLACEHOLDER}")));
        }
    }

    let backoff = &config.reconnect.backoff_ms;
    if backoff.is_empty() {
        return Err(invalid("reconnect.backoff_ms", "must not be empty"));
    }
    if backoff.contains(&0) {
        return Err(invalid("reconnect.backoff_ms", "delays must be > 0"));
    }
    if backoff.windows(2).any(|w| w[0] > w[1]) {
        return Err(invalid(
            "reconnect.backoff_ms",
            format!("must be ascending, got {backoff:?}"),
        ));
    }

    if config.polling.interval_ms == 0 {
        return Err(invalid("polling.interval_ms", "must be > 0"));
    }

    let threshold = config.aggregates.vote_threshold;
    if !threshold.is_finite() {
        return Err(invalid(
            "aggregates.vote_threshold",
            format!("must be a finite number, got {threshold}"),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
