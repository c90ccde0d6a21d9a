use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. The process exits non-zero on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse YAML '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid listen address '{0}': {1}")]
    InvalidListenAddress(String, std::net::AddrParseError),

    #[error("route prefix '{0}' must be a non-empty path starting with '/'")]
    InvalidPrefix(String),

    #[error("route '{0}': no backends configured")]
    NoBackends(String),

    #[error("route '{route}': invalid backend URL '{url}': {source}")]
    InvalidBackendUrl {
        route: String,
        url: String,
        source: url::ParseError,
    },

    #[error("route '{0}': unsupported backend scheme '{1}', only http/https allowed")]
    UnsupportedBackendScheme(String, String),

    #[error("route '{0}': cache max_size and max_entry_size must be non-zero")]
    ZeroCacheSize(String),

    #[error("route '{0}': cache max_entry_size exceeds max_size")]
    EntrySizeOverBudget(String),

    #[error("TLS file not found: {}", .0.display())]
    TlsFileNotFound(PathBuf),

    #[error("both 'cert' and 'key' must be provided for TLS")]
    IncompleteTlsConfig,
}

/// Failures while talking to a backend. Surfaced to the client as 502.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid outbound URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Upstream(#[from] reqwest::Error),
}
