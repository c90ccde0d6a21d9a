use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Request, Response, header},
};
use futures::TryStreamExt;
use reqwest::Client;
use url::Url;

use crate::cache::{CapturedResponse, X_CACHE};
use crate::error::ForwardError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_KEEP_ALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_IDLE_CONNS_PER_HOST: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Outbound side of the proxy: one pooled client shared by every request.
///
/// reqwest exposes no per-phase response-header or TLS-handshake timeout;
/// the overall request deadline bounds those phases.
pub struct Forwarder {
    client: Client,
    via: HeaderValue,
}

impl Forwarder {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEP_ALIVE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let via = HeaderValue::from_str(&crate::versioned_name())
            .unwrap_or_else(|_| HeaderValue::from_static(env!("CARGO_PKG_NAME")));

        Ok(Self { client, via })
    }

    /// Forwards the request and streams the backend response back.
    /// GET/HEAD responses sourced from the backend carry `X-Cache: MISS`.
    pub async fn forward(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
        tls: bool,
        backend: &Url,
    ) -> Result<Response<Body>, ForwardError> {
        let method = req.method().clone();
        let upstream = self.send(req, peer, tls, backend).await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        if method == Method::GET || method == Method::HEAD {
            headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        }

        let stream = upstream
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Forwards the request and buffers the whole backend response so the
    /// caller can both serve it and consider it for cache admission.
    pub async fn forward_buffered(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
        tls: bool,
        backend: &Url,
    ) -> Result<CapturedResponse, ForwardError> {
        let upstream = self.send(req, peer, tls, backend).await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = upstream.bytes().await?;

        Ok(CapturedResponse::new(status, headers, body))
    }

    async fn send(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
        tls: bool,
        backend: &Url,
    ) -> Result<reqwest::Response, ForwardError> {
        // RFC 3986 reference resolution: the request URI against the
        // backend base. The outbound Host is the backend authority.
        let outbound_url = backend.join(
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        )?;

        let (parts, body) = req.into_parts();
        let headers = build_outbound_headers(&parts.headers, peer, tls, &self.via);

        let stream = body
            .into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        let response = self
            .client
            .request(parts.method, outbound_url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        Ok(response)
    }
}

/// Request-header hygiene: drop hop-by-hop names, move the client Host
/// aside for `X-Forwarded-Host`, append `Via` and the forwarding headers.
fn build_outbound_headers(
    incoming: &HeaderMap,
    peer: SocketAddr,
    tls: bool,
    via: &HeaderValue,
) -> HeaderMap {
    let mut headers = incoming.clone();
    strip_hop_by_hop(&mut headers);
    let host = headers.remove(header::HOST);

    headers.append(header::VIA, via.clone());

    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let peer_ip = peer.ip().to_string();
    let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {peer_ip}"),
        _ => peer_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    let proto = if tls { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    headers
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}
