use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, Response},
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{CapturedResponse, Entry};

const SWEEP_INTERVAL: Duration = Duration::from_secs(180);

pub const fn mib_to_bytes(mib: usize) -> usize {
    mib * 1024 * 1024
}

/// Cache key: the request URI as the proxy saw it (path and query).
pub fn cache_key<B>(request: &Request<B>) -> String {
    request.uri().to_string()
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    current_size: usize,
}

/// Per-route response cache, byte-bounded both per entry and in total.
///
/// One reader/writer lock guards the entries map and the size counter
/// jointly; `current_size` is always the sum of the stored body lengths.
/// The lock is never held across I/O — replay happens on a clone after
/// release. A background sweeper deletes expired entries every few minutes;
/// reads drop them lazily in the meantime.
pub struct HttpCache {
    max_size: usize,
    max_entry_size: usize,
    inner: Arc<RwLock<Inner>>,
    shutdown: watch::Sender<bool>,
}

impl HttpCache {
    /// Creates an empty cache with byte limits and spawns its sweeper.
    /// Must be called from within a tokio runtime.
    pub fn new(max_size: usize, max_entry_size: usize) -> Self {
        let inner = Arc::new(RwLock::new(Inner::default()));
        let (shutdown, rx) = watch::channel(false);

        tokio::spawn(sweep_loop(Arc::downgrade(&inner), rx, SWEEP_INTERVAL));

        Self {
            max_size,
            max_entry_size,
            inner,
            shutdown,
        }
    }

    /// Looks up a non-expired entry, handing back a clone so the caller can
    /// replay it without holding the lock. An expired entry found under the
    /// shared lock is dropped after re-acquiring in exclusive mode; the
    /// re-check guards against a writer having replaced it in between.
    pub fn get(&self, key: &str) -> Option<Entry> {
        {
            let inner = self.read();
            match inner.entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut inner = self.write();
        if inner.entries.get(key).is_some_and(Entry::is_expired) {
            remove_entry(&mut inner, key);
        }

        None
    }

    /// Admits a captured response. Refuses entries over the per-entry bound
    /// and, rather than evicting, refuses admission when the total budget
    /// would be exceeded. Replacing an existing key retires the old entry
    /// and its accounting first, so a refusal leaves the key absent and the
    /// size counter exact.
    pub fn insert(&self, key: String, captured: &CapturedResponse, expires_at: Instant) -> bool {
        let entry = Entry::new(captured, expires_at);
        let size = entry.body_len();

        if size > self.max_entry_size {
            return false;
        }

        let mut inner = self.write();
        remove_entry(&mut inner, &key);

        if inner.current_size + size > self.max_size {
            return false;
        }

        inner.entries.insert(key, entry);
        inner.current_size += size;
        true
    }

    /// Removes the entry for this key. Idempotent.
    pub fn invalidate(&self, key: &str) {
        remove_entry(&mut self.write(), key);
    }

    /// Replays a cached response for this request if a fresh entry exists.
    pub fn serve_if_present<B>(&self, request: &Request<B>) -> Option<Response<Body>> {
        self.get(&cache_key(request)).map(|entry| entry.to_response())
    }

    /// Stops the background sweeper. Idempotent; safe to call more than
    /// once.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn current_size(&self) -> usize {
        self.read().current_size
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn sweep_now(&self) {
        sweep(&self.inner);
    }
}

fn remove_entry(inner: &mut Inner, key: &str) {
    if let Some(entry) = inner.entries.remove(key) {
        inner.current_size = inner.current_size.saturating_sub(entry.body_len());
    }
}

fn sweep(inner: &RwLock<Inner>) {
    let mut guard = inner.write().unwrap_or_else(PoisonError::into_inner);
    let Inner {
        entries,
        current_size,
    } = &mut *guard;

    entries.retain(|_, entry| {
        if entry.is_expired() {
            *current_size = current_size.saturating_sub(entry.body_len());
            false
        } else {
            true
        }
    });
}

async fn sweep_loop(
    inner: Weak<RwLock<Inner>>,
    mut shutdown: watch::Receiver<bool>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval fires immediately; consume the first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { return };
                sweep(&inner);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode};
    use bytes::Bytes;

    use super::*;

    fn capture(body: &str) -> CapturedResponse {
        CapturedResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    fn in_a_minute() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));

        assert!(cache.insert("key".into(), &capture("Hello, World!"), in_a_minute()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 13);

        let entry = cache.get("key").expect("entry should be present");
        assert_eq!(entry.body_len(), 13);

        assert!(cache.get("other").is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));

        assert!(cache.insert("key".into(), &capture("stale"), Instant::now()));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.get("key").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.current_size(), 0);
    }

    #[tokio::test]
    async fn oversized_entries_are_refused() {
        let cache = HttpCache::new(mib_to_bytes(1), 8);

        assert!(!cache.insert("key".into(), &capture("way too large"), in_a_minute()));
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[tokio::test]
    async fn admission_is_refused_when_full() {
        let cache = HttpCache::new(10, 10);

        assert!(cache.insert("a".into(), &capture("12345678"), in_a_minute()));
        assert!(!cache.insert("b".into(), &capture("1234"), in_a_minute()));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 8);
    }

    #[tokio::test]
    async fn replacement_adjusts_accounting() {
        let cache = HttpCache::new(10, 10);

        assert!(cache.insert("a".into(), &capture("12345678"), in_a_minute()));
        assert!(cache.insert("a".into(), &capture("1234"), in_a_minute()));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 4);
    }

    #[tokio::test]
    async fn refused_replacement_retires_the_old_entry() {
        let cache = HttpCache::new(10, 10);

        assert!(cache.insert("a".into(), &capture("12"), in_a_minute()));
        assert!(cache.insert("b".into(), &capture("12345678"), in_a_minute()));

        // Replacing "a" frees 2 bytes but 8 + 3 still busts the budget.
        assert!(!cache.insert("a".into(), &capture("123"), in_a_minute()));

        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 8);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));

        assert!(cache.insert("key".into(), &capture("data"), in_a_minute()));
        cache.invalidate("key");
        cache.invalidate("key");

        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));

        assert!(cache.insert("stale".into(), &capture("old"), Instant::now()));
        assert!(cache.insert("fresh".into(), &capture("new"), in_a_minute()));
        tokio::time::sleep(Duration::from_millis(5)).await;

        cache.sweep_now();

        assert!(cache.get("fresh").is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 3);
    }

    #[tokio::test]
    async fn serve_if_present_replays_the_entry() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));
        let request = Request::builder()
            .uri("/api/widgets?page=1")
            .body(())
            .unwrap();

        assert!(cache.serve_if_present(&request).is_none());

        let key = cache_key(&request);
        assert_eq!(key, "/api/widgets?page=1");
        assert!(cache.insert(key, &capture("widgets"), in_a_minute()));

        let response = cache.serve_if_present(&request).expect("cached response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-cache").unwrap(), "HIT");
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let cache = HttpCache::new(mib_to_bytes(1), mib_to_bytes(1));
        cache.shutdown();
        cache.shutdown();
    }
}
