// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of cinerank.
//
// cinerank is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// cinerank is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with cinerank.  If not,
// see <http://www.gnu.org/licenses/>.

//! # cache
//!
//! A process-local, time-bounded, read-through cache.
//!
//! This sits in front of the counter store to absorb redundant round trips within a short window.
//! The contract that matters: an expired entry is *never* returned, and any path that writes
//! through to the store must [invalidate] the corresponding entries in the same logical step as
//! the write -- the vote protocol does exactly that, so a reader immediately after a successful
//! submit sees the post-write aggregate even inside the TTL window. Entries reconstruct from the
//! store on the next miss, so the cache is always safe to lose.
//!
//! [invalidate]: Cache::invalidate
//!
//! An earlier rendition of this program kept its cache in an ambient global; here it's an explicit
//! component with an injected clock, which is what makes the expiry logic testable at all.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::debug;

/// The cache's notion of "now", injected so tests can drive expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The production clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A fake, manually-advanced clock. Only the test suites have any business with this.
#[derive(Debug)]
pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> FakeClock {
        FakeClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap(/* not poisoned */) += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap(/* not poisoned */)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

struct Entry<V> {
    expires_at: Instant,
    value: V,
}

/// A TTL-bounded cache of values of type `V`, keyed by counter-store key.
pub struct Cache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    map: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Cache<V> {
        Cache {
            ttl,
            clock,
            map: Mutex::new(HashMap::new()),
        }
    }
    /// Return the cached value for `key`, if present & unexpired. An expired entry is evicted on
    /// the spot.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut map = self.map.lock().unwrap(/* not poisoned */);
        match map.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                debug!("cache entry for {key} expired");
                map.remove(key);
                None
            }
            None => None,
        }
    }
    pub fn put(&self, key: &str, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.map
            .lock()
            .unwrap(/* not poisoned */)
            .insert(key.to_owned(), Entry { expires_at, value });
    }
    /// Drop the entry for `key` immediately. Callers that just wrote through to the store must
    /// invoke this before handing control back to any reader.
    pub fn invalidate(&self, key: &str) {
        self.map.lock().unwrap(/* not poisoned */).remove(key);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ttl() {
        let clock = Arc::new(FakeClock::new());
        let cache: Cache<u32> = Cache::new(Duration::from_secs(5), clock.clone());

        assert_eq!(cache.get("k"), None);
        cache.put("k", 42);
        assert_eq!(cache.get("k"), Some(42));

        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.get("k"), Some(42));

        clock.advance(Duration::from_secs(1));
        // expiry is exact: at ttl, the entry is gone
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn invalidation() {
        let clock = Arc::new(FakeClock::new());
        let cache: Cache<&'static str> = Cache::new(Duration::from_secs(5), clock);

        cache.put("k", "stale");
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);

        // a fresh put after invalidation behaves normally
        cache.put("k", "fresh");
        assert_eq!(cache.get("k"), Some("fresh"));
    }
}
