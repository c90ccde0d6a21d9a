use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Response, StatusCode},
};
use bytes::Bytes;

use super::CapturedResponse;
use super::response::X_CACHE;

/// Immutable snapshot of a cached response.
///
/// Once inserted an entry never changes; `Clone` hands readers their own
/// header map while the body shares the underlying immutable buffer, so a
/// reader can never observe a concurrent overwrite.
#[derive(Debug, Clone)]
pub struct Entry {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expires_at: Instant,
}

impl Entry {
    /// Snapshots a captured response, forcing `X-Cache: HIT` so a later
    /// replay is distinguishable from a forwarded miss.
    pub fn new(captured: &CapturedResponse, expires_at: Instant) -> Self {
        let mut headers = captured.headers.clone();
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));

        Self {
            status: captured.status,
            headers,
            body: captured.body.clone(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Replays the stored response: all headers, then status, then body.
    pub fn to_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
