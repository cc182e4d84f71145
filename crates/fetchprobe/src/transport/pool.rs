//! Pooled HTTP clients keyed by route

use crate::error::FetchError;
use crate::proxy::ProxyAddress;
use crate::transport::TlsMode;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Identifies one pooled client: a route plus a TLS mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub proxy: Option<ProxyAddress>,
    pub tls: TlsMode,
}

impl PoolKey {
    pub fn new(proxy: Option<ProxyAddress>, tls: TlsMode) -> Self {
        Self { proxy, tls }
    }
}

/// Clients kept per session before the least recently used one is dropped
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// Lazily created clients shared by every fetch of a session.
///
/// Each client keeps its own keep-alive connection pool, so handing out
/// clones of the same client reuses connections across calls and threads.
/// At most `capacity` routes are kept; a new route beyond that replaces the
/// least recently checked out one.
pub struct ConnectionPool<C> {
    clients: Mutex<Clients<C>>,
    capacity: usize,
}

struct Clients<C> {
    entries: HashMap<PoolKey, (C, u64)>,
    clock: u64,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("clients", &self.len())
            .finish()
    }
}

impl<C> ConnectionPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool keeping at most `capacity` routes (at least 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: Mutex::new(Clients {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn clients(&self) -> MutexGuard<'_, Clients<C>> {
        // a panic while holding the lock leaves the map itself intact
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the client for `key`; the next checkout builds a fresh one
    pub fn evict(&self, key: &PoolKey) -> bool {
        self.clients().entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.clients().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.clients().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drive `exchange`, which uses the client leased under `key`.
    ///
    /// If it panics, the client may still hold a leased connection that
    /// will never be returned. It is evicted before the panic resumes.
    pub async fn lease<T, Fut>(&self, key: &PoolKey, exchange: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        match AssertUnwindSafe(exchange).catch_unwind().await {
            Ok(output) => output,
            Err(payload) => {
                warn!(?key, "Exchange panicked, evicting pooled client");
                self.evict(key);
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<C: Clone> ConnectionPool<C> {
    /// Return the client for `key`, creating it with `create` on first use
    pub fn checkout<F>(&self, key: &PoolKey, create: F) -> Result<C, FetchError>
    where
        F: FnOnce() -> Result<C, FetchError>,
    {
        let mut clients = self.clients();
        clients.clock += 1;
        let now = clients.clock;
        if let Some((client, last_used)) = clients.entries.get_mut(key) {
            *last_used = now;
            return Ok(client.clone());
        }

        debug!(?key, "Creating pooled client");
        let client = create()?;
        if clients.entries.len() >= self.capacity {
            let oldest = clients
                .entries
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = ?oldest, "Pool full, dropping least recently used client");
                clients.entries.remove(&oldest);
            }
        }
        clients.entries.insert(key.clone(), (client.clone(), now));
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(tls: TlsMode) -> PoolKey {
        PoolKey::new(None, tls)
    }

    #[test]
    fn test_checkout_creates_once() {
        let pool: ConnectionPool<u32> = ConnectionPool::new();
        let created = AtomicUsize::new(0);
        let make = || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        assert_eq!(pool.checkout(&key(TlsMode::Strict), make).unwrap(), 7);
        assert_eq!(pool.checkout(&key(TlsMode::Strict), make).unwrap(), 7);
        assert_eq!(created.load(Ordering::SeqCst), 1);

        pool.checkout(&key(TlsMode::Legacy), make).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_full_pool_drops_least_recently_used_route() {
        let pool: ConnectionPool<u16> = ConnectionPool::with_capacity(2);
        let route = |port: u16| {
            PoolKey::new(Some(ProxyAddress::http("10.0.0.1", port)), TlsMode::Strict)
        };

        pool.checkout(&route(1), || Ok(1)).unwrap();
        pool.checkout(&route(2), || Ok(2)).unwrap();
        pool.checkout(&route(1), || Ok(99)).unwrap();
        pool.checkout(&route(3), || Ok(3)).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&route(1)));
        assert!(!pool.contains(&route(2)));
        assert!(pool.contains(&route(3)));

        for port in 4..20 {
            pool.checkout(&route(port), || Ok(port)).unwrap();
        }
        assert_eq!(pool.len(), pool.capacity());
    }

    #[test]
    fn test_failed_creation_is_not_pooled() {
        let pool: ConnectionPool<u32> = ConnectionPool::new();
        let result = pool.checkout(&key(TlsMode::Strict), || {
            Err(FetchError::InvalidConfig("nope".to_string()))
        });
        assert!(result.is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_concurrent_checkout_shares_one_client() {
        let pool: Arc<ConnectionPool<usize>> = Arc::new(ConnectionPool::new());
        let created = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let created = Arc::clone(&created);
                std::thread::spawn(move || {
                    pool.checkout(&key(TlsMode::Strict), || {
                        Ok(created.fetch_add(1, Ordering::SeqCst))
                    })
                    .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_passes_output_through() {
        let pool: ConnectionPool<u32> = ConnectionPool::new();
        let k = key(TlsMode::Strict);
        pool.checkout(&k, || Ok(1)).unwrap();
        let out = pool.lease(&k, async { 42 }).await;
        assert_eq!(out, 42);
        assert!(pool.contains(&k));
    }

    #[tokio::test]
    async fn test_panicking_exchange_evicts_client() {
        let pool: Arc<ConnectionPool<u32>> = Arc::new(ConnectionPool::new());
        let k = key(TlsMode::Strict);
        pool.checkout(&k, || Ok(1)).unwrap();

        let task = {
            let pool = Arc::clone(&pool);
            let k = k.clone();
            tokio::spawn(async move {
                pool.lease(&k, async {
                    panic!("stack exhausted");
                })
                .await
            })
        };
        let joined: Result<(), _> = task.await;
        assert!(joined.unwrap_err().is_panic());
        assert!(!pool.contains(&k));
    }
}
