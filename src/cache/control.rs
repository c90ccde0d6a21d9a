use std::time::Duration;

/// Structured view of a `Cache-Control` response header.
///
/// Only the five directives relevant to admission are recognized; everything
/// else is ignored. `max_age`/`s_maxage` use `-1` as the "absent" sentinel so
/// that an explicit `max-age=0` stays distinguishable from no directive at
/// all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub private: bool,
    pub no_cache: bool,
    pub max_age: i64,
    pub s_maxage: i64,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            no_store: false,
            private: false,
            no_cache: false,
            max_age: -1,
            s_maxage: -1,
        }
    }
}

impl CacheControl {
    /// Parses a raw header value. Directives are comma-separated,
    /// case-insensitive, surrounded by optional whitespace. A `max-age` or
    /// `s-maxage` that does not carry a non-negative decimal integer is
    /// discarded.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();

        for raw in value.split(',') {
            let directive = raw.trim().to_ascii_lowercase();

            match directive.as_str() {
                "no-store" => cc.no_store = true,
                "private" => cc.private = true,
                "no-cache" => cc.no_cache = true,
                d => {
                    if let Some(n) = d.strip_prefix("max-age=").and_then(parse_age) {
                        cc.max_age = n;
                    } else if let Some(n) = d.strip_prefix("s-maxage=").and_then(parse_age) {
                        cc.s_maxage = n;
                    }
                }
            }
        }

        cc
    }

    /// An absent age (`-1`) does not block cacheability; only an explicit
    /// zero does.
    pub fn is_cachable(&self) -> bool {
        !self.no_store && !self.private && self.max_age != 0 && self.s_maxage != 0
    }

    /// Freshness lifetime carried by the header. `s-maxage` wins over
    /// `max-age`.
    pub fn ttl(&self) -> Option<Duration> {
        if self.s_maxage >= 0 {
            return Some(Duration::from_secs(self.s_maxage as u64));
        }

        if self.max_age >= 0 {
            return Some(Duration::from_secs(self.max_age as u64));
        }

        None
    }
}

fn parse_age(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|n| *n >= 0)
}
