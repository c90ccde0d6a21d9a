use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, Response, StatusCode, header},
    response::IntoResponse,
};
use tracing::{debug, warn};
use url::Url;

use crate::balancer::LoadBalancer;
use crate::cache::{HttpCache, cache_key};
use crate::config::{Config, Strategy};
use crate::error::ForwardError;
use crate::forwarder::Forwarder;

struct CacheRuntime {
    store: HttpCache,
    fallback_ttl: Duration,
}

struct RouteRuntime {
    balancer: LoadBalancer,
    cache: Option<CacheRuntime>,
}

struct Shared {
    config: Config,
    client: Forwarder,
    routes: HashMap<String, RouteRuntime>,
    tls_enabled: bool,
}

/// Per-process shared state: the immutable config, the pooled outbound
/// client, and one balancer plus optional cache per route. Cheap to clone
/// into each request task.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Shared>,
}

impl AppState {
    /// Builds the per-route runtimes. Must be called from within the
    /// runtime: caches spawn their sweepers here.
    pub fn from_config(config: Config) -> Result<Self, reqwest::Error> {
        let client = Forwarder::new()?;
        let tls_enabled = config.tls.is_some();

        let mut routes = HashMap::with_capacity(config.routes().len());
        for (prefix, route) in config.routes() {
            let balancer = match route.strategy {
                Strategy::Single => LoadBalancer::single(route.backends.clone()),
                Strategy::RoundRobin => LoadBalancer::round_robin(route.backends.clone()),
                Strategy::Random => LoadBalancer::random(route.backends.clone(), route.seed),
            };

            let cache = route.cache.as_ref().map(|policy| CacheRuntime {
                store: HttpCache::new(policy.max_size, policy.max_entry_size),
                fallback_ttl: policy.ttl,
            });

            routes.insert(prefix.clone(), RouteRuntime { balancer, cache });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                client,
                routes,
                tls_enabled,
            }),
        })
    }

    /// Stops every cache sweeper. Runs before server shutdown so draining
    /// requests still observe a live cache.
    pub fn shutdown_caches(&self) {
        for runtime in self.shared.routes.values() {
            if let Some(cache) = &runtime.cache {
                cache.store.shutdown();
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response<Body> {
    let shared = &state.shared;

    let Some(prefix) = shared.config.resolve(req.uri().path()) else {
        debug!(path = req.uri().path(), "no route matches");
        return (StatusCode::NOT_FOUND, "Route not found\n").into_response();
    };

    let Some(runtime) = shared.routes.get(prefix) else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Route configuration not found\n",
        )
            .into_response();
    };

    let backend = runtime.balancer.pick().clone();
    debug!(prefix, backend = %backend, method = %req.method(), path = req.uri().path(), "proxying");

    let Some(cache) = &runtime.cache else {
        return forward_streaming(shared, req, peer, &backend).await;
    };

    if let Some(response) = cache.store.serve_if_present(&req) {
        debug!(prefix, "served from cache");
        return response;
    }

    if req.method() == Method::GET {
        forward_with_admission(shared, cache, req, peer, &backend).await
    } else {
        forward_streaming(shared, req, peer, &backend).await
    }
}

async fn forward_streaming(
    shared: &Shared,
    req: Request<Body>,
    peer: SocketAddr,
    backend: &Url,
) -> Response<Body> {
    match shared
        .client
        .forward(req, peer, shared.tls_enabled, backend)
        .await
    {
        Ok(response) => response,
        Err(err) => bad_gateway(err),
    }
}

/// Miss path for a cache-enabled route: buffer the backend response, serve
/// it, and admit it when the method, status and Cache-Control allow.
async fn forward_with_admission(
    shared: &Shared,
    cache: &CacheRuntime,
    req: Request<Body>,
    peer: SocketAddr,
    backend: &Url,
) -> Response<Body> {
    let method = req.method().clone();
    let key = cache_key(&req);
    let no_auth = !req.headers().contains_key(header::AUTHORIZATION);

    let captured = match shared
        .client
        .forward_buffered(req, peer, shared.tls_enabled, backend)
        .await
    {
        Ok(captured) => captured,
        Err(err) => return bad_gateway(err),
    };

    let admit = method == Method::GET
        && ((no_auth && captured.is_cachable_considering_auth()) || captured.is_cachable());

    if admit {
        let ttl = captured.cache_ttl().unwrap_or(cache.fallback_ttl);
        let admitted = cache.store.insert(key, &captured, Instant::now() + ttl);
        debug!(admitted, ttl = ttl.as_secs(), "cache admission");
    }

    captured.to_response(&method)
}

fn bad_gateway(err: ForwardError) -> Response<Body> {
    warn!("upstream error: {err}");
    (StatusCode::BAD_GATEWAY, format!("Proxy error: {err}")).into_response()
}
