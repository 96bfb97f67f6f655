//! Bounded key→bool cache with LRU eviction and TTL expiry.
//!
//! One mutex guards both the entry map and the recency order. A background
//! sweeper removes expired entries at `ttl / 4` intervals; `get` also drops
//! an expired entry on sight so a sweep is never load-bearing.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use ahash::AHashMap;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::debug;

#[derive(Debug)]
struct Entry {
    value: bool,
    stored_at: Instant,
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    ttl: Duration,
    entries: AHashMap<String, Entry>,
    /// Most recently used at the front.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_front(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                self.order.remove(pos);
            }
        }
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.order.pop_back() {
            self.entries.remove(&oldest);
        }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.stored_at) > ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

#[derive(Debug)]
pub struct TtlCache {
    inner: Arc<Mutex<Inner>>,
    stop: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TtlCache {
    /// Create the cache and start its background sweeper.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            capacity: capacity.max(1),
            ttl,
            entries: AHashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }));

        let (stop, stop_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&inner),
            ttl.checked_div(4).unwrap_or(ttl),
            stop_rx,
        ));

        Self {
            inner,
            stop,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Returns `(value, hit)`. An expired entry is removed and reported as
    /// a miss.
    pub fn get(&self, key: &str) -> (bool, bool) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let Some(entry) = inner.entries.get(key) else {
            inner.misses += 1;
            return (false, false);
        };

        if Instant::now().duration_since(entry.stored_at) > inner.ttl {
            inner.remove(key);
            inner.misses += 1;
            return (false, false);
        }

        let value = entry.value;
        inner.touch(key);
        inner.hits += 1;
        (value, true)
    }

    pub fn put(&self, key: &str, value: bool) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.value = value;
            entry.stored_at = Instant::now();
            inner.touch(key);
            return;
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        inner.order.push_front(key.to_string());

        if inner.entries.len() > inner.capacity {
            inner.evict_lru();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(size, hits, misses)`.
    pub fn stats(&self) -> (usize, u64, u64) {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        (inner.entries.len(), inner.hits, inner.misses)
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn close(&self) {
        let _ = self.stop.send(true);
        let handle = self
            .sweeper
            .lock()
            .expect("cache sweeper mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn sweep_loop(inner: Arc<Mutex<Inner>>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let interval = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = inner
                    .lock()
                    .expect("cache mutex poisoned")
                    .sweep(Instant::now());
                if removed > 0 {
                    debug!(removed, "cache sweep removed expired entries");
                }
            }
            _ = stop.changed() => return,
        }
    }
}
