use std::time::{Duration, SystemTime};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header},
};
use bytes::Bytes;

use super::CacheControl;

pub(crate) const X_CACHE: &str = "x-cache";

/// Statuses a shared cache may store heuristically.
const CACHABLE_STATUSES: [u16; 11] = [200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// A fully buffered backend response, captured for possible cache admission.
///
/// Headers have already been stripped of hop-by-hop names by the forwarder;
/// the body is owned so the same bytes can be served to the client and
/// snapshotted into an [`Entry`](super::Entry).
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    fn cache_control(&self) -> CacheControl {
        let value = self
            .headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        CacheControl::parse(value)
    }

    /// Freshness lifetime advertised by the backend: `Cache-Control` wins,
    /// then `Expires` (an HTTP-date, clamped at zero when already past).
    pub fn cache_ttl(&self) -> Option<Duration> {
        if let Some(ttl) = self.cache_control().ttl() {
            return Some(ttl);
        }

        let expires = self.headers.get(header::EXPIRES)?.to_str().ok()?;
        let at = httpdate::parse_http_date(expires).ok()?;

        Some(
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn is_cachable(&self) -> bool {
        is_cachable_status(self.status) && self.cache_control().is_cachable()
    }

    pub fn is_cachable_considering_auth(&self) -> bool {
        is_cachable_status(self.status) && self.cache_control().is_cachable()
    }

    /// Client-facing response for this capture. GET and HEAD responses
    /// sourced from the backend are marked `X-Cache: MISS`; cache replay
    /// overrides this with `HIT`.
    pub fn to_response(&self, method: &Method) -> Response<Body> {
        let mut headers = self.headers.clone();
        if method == Method::GET || method == Method::HEAD {
            headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        }

        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

pub(crate) fn is_cachable_status(status: StatusCode) -> bool {
    CACHABLE_STATUSES.contains(&status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(headers: HeaderMap) -> CapturedResponse {
        CapturedResponse::new(StatusCode::OK, headers, Bytes::from_static(b"hello"))
    }

    #[test]
    fn cachable_status_set() {
        for code in CACHABLE_STATUSES {
            assert!(is_cachable_status(StatusCode::from_u16(code).unwrap()));
        }

        for code in [201, 202, 302, 403, 500] {
            assert!(!is_cachable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn ttl_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=60"),
        );

        assert_eq!(captured(headers).cache_ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn ttl_falls_back_to_expires() {
        let at = SystemTime::now() + Duration::from_secs(120);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::EXPIRES,
            HeaderValue::from_str(&httpdate::fmt_http_date(at)).unwrap(),
        );

        let ttl = captured(headers).cache_ttl().expect("ttl from Expires");
        assert!(ttl > Duration::from_secs(110) && ttl <= Duration::from_secs(121));
    }

    #[test]
    fn expires_in_the_past_clamps_to_zero() {
        let at = SystemTime::now() - Duration::from_secs(60);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::EXPIRES,
            HeaderValue::from_str(&httpdate::fmt_http_date(at)).unwrap(),
        );

        assert_eq!(captured(headers).cache_ttl(), Some(Duration::ZERO));
    }

    #[test]
    fn no_freshness_headers_means_no_ttl() {
        assert_eq!(captured(HeaderMap::new()).cache_ttl(), None);
    }

    #[test]
    fn no_store_blocks_cachability() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let resp = captured(headers);
        assert!(!resp.is_cachable());
        assert!(!resp.is_cachable_considering_auth());
    }

    #[test]
    fn miss_header_only_on_get_and_head() {
        let resp = captured(HeaderMap::new());

        for method in [Method::GET, Method::HEAD] {
            let out = resp.to_response(&method);
            assert_eq!(out.headers().get(X_CACHE).unwrap(), "MISS");
        }

        let out = resp.to_response(&Method::POST);
        assert!(out.headers().get(X_CACHE).is_none());
    }
}
