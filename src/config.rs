use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::cache::mib_to_bytes;
use crate::error::ConfigError;

/// Configuration file as deserialized, before validation.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub listen: String,
    #[serde(default)]
    pub tls: Option<RawTls>,
    #[serde(default)]
    pub routes: HashMap<String, RawRoute>,
}

#[derive(Debug, Deserialize)]
pub struct RawTls {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct RawRoute {
    #[serde(default)]
    pub load_balancer: RawLoadBalancer,
    pub cache: Option<RawCachePolicy>,
    pub backends: Vec<RawBackend>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLoadBalancer {
    #[serde(default)]
    pub strategy: Strategy,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Single,
    Random,
    RoundRobin,
}

/// Cache sizes are MiB in the file and converted to bytes on validation.
#[derive(Debug, Deserialize)]
pub struct RawCachePolicy {
    pub enabled: bool,
    pub max_size: usize,
    pub max_entry_size: usize,
    pub ttl: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawBackend {
    pub url: String,
}

/// Validated runtime config, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub tls: Option<TlsConfig>,
    routes: HashMap<String, Route>,
    prioritized: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub backends: Vec<Url>,
    pub strategy: Strategy,
    pub seed: u64,
    pub cache: Option<CachePolicy>,
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub max_size: usize,
    pub max_entry_size: usize,
    pub ttl: Duration,
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: RawConfig = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    raw.validate()
}

impl RawConfig {
    pub fn validate(self) -> Result<Config, ConfigError> {
        let listen = self
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidListenAddress(self.listen.clone(), e))?;

        let tls = match self.tls {
            None => None,
            Some(RawTls {
                cert: Some(cert),
                key: Some(key),
            }) => {
                for path in [&cert, &key] {
                    if !path.exists() {
                        return Err(ConfigError::TlsFileNotFound(path.clone()));
                    }
                }
                Some(TlsConfig { cert, key })
            }
            Some(_) => return Err(ConfigError::IncompleteTlsConfig),
        };

        let mut routes = HashMap::with_capacity(self.routes.len());
        for (prefix, raw) in self.routes {
            if prefix.is_empty() || !prefix.starts_with('/') {
                return Err(ConfigError::InvalidPrefix(prefix));
            }

            let route = validate_route(&prefix, raw)?;
            routes.insert(prefix, route);
        }

        Ok(Config::new(listen, tls, routes))
    }
}

fn validate_route(prefix: &str, raw: RawRoute) -> Result<Route, ConfigError> {
    if raw.backends.is_empty() {
        return Err(ConfigError::NoBackends(prefix.to_string()));
    }

    let mut backends = Vec::with_capacity(raw.backends.len());
    for backend in raw.backends {
        let url = Url::parse(&backend.url).map_err(|source| ConfigError::InvalidBackendUrl {
            route: prefix.to_string(),
            url: backend.url.clone(),
            source,
        })?;

        match url.scheme() {
            "http" | "https" => backends.push(url),
            other => {
                return Err(ConfigError::UnsupportedBackendScheme(
                    prefix.to_string(),
                    other.to_string(),
                ));
            }
        }
    }

    let cache = match raw.cache {
        Some(policy) if policy.enabled => {
            if policy.max_size == 0 || policy.max_entry_size == 0 {
                return Err(ConfigError::ZeroCacheSize(prefix.to_string()));
            }
            if policy.max_entry_size > policy.max_size {
                return Err(ConfigError::EntrySizeOverBudget(prefix.to_string()));
            }

            Some(CachePolicy {
                max_size: mib_to_bytes(policy.max_size),
                max_entry_size: mib_to_bytes(policy.max_entry_size),
                ttl: Duration::from_secs(policy.ttl),
            })
        }
        _ => None,
    };

    Ok(Route {
        backends,
        strategy: raw.load_balancer.strategy,
        seed: raw.load_balancer.seed.unwrap_or(0),
        cache,
    })
}

impl Config {
    pub fn new(listen: SocketAddr, tls: Option<TlsConfig>, routes: HashMap<String, Route>) -> Self {
        let mut prioritized: Vec<String> = routes.keys().cloned().collect();
        prioritized.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self {
            listen,
            tls,
            routes,
            prioritized,
        }
    }

    /// Longest-prefix match of a request path against the configured
    /// routes. Matching is on raw path bytes, not path segments: `/a`
    /// matches `/ab` as well as `/a/b`.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.prioritized
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    pub fn route(&self, prefix: &str) -> Option<&Route> {
        self.routes.get(prefix)
    }

    pub fn routes(&self) -> &HashMap<String, Route> {
        &self.routes
    }

    pub fn prioritized(&self) -> &[String] {
        &self.prioritized
    }
}
