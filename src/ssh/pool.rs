use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::AuthMethod;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub user: String,
}

struct PooledConnection {
    handle: Arc<russh::client::Handle<super::client::AdminHandler>>,
    last_used: Instant,
}

/// Bounded pool of SSH connections keyed by `(host, port, user)` (§4.1).
/// Concurrent callers for the same key serialize *channel creation* via the
/// per-key `Mutex`, not command execution — SSH multiplexes channels over
/// one transport, so commands themselves run in parallel once a channel is
/// open.
pub struct ConnectionPool {
    entries: DashMap<ConnectionKey, Arc<Mutex<Option<PooledConnection>>>>,
    idle_ttl: Duration,
}

impl ConnectionPool {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_ttl,
        }
    }

    fn slot(&self, key: &ConnectionKey) -> Arc<Mutex<Option<PooledConnection>>> {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Returns a live handle for `key`, connecting (or reconnecting, if the
    /// cached connection went idle past `idle_ttl`) as needed.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: &ConnectionKey,
        auth: &AuthMethod,
        connect: F,
    ) -> Result<Arc<russh::client::Handle<super::client::AdminHandler>>, russh::Error>
    where
        F: FnOnce(ConnectionKey, AuthMethod) -> Fut,
        Fut: std::future::Future<Output = Result<russh::client::Handle<super::client::AdminHandler>, russh::Error>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref() {
            if existing.last_used.elapsed() < self.idle_ttl {
                return Ok(existing.handle.clone());
            }
        }

        let handle = Arc::new(connect(key.clone(), auth.clone()).await?);
        *guard = Some(PooledConnection {
            handle: handle.clone(),
            last_used: Instant::now(),
        });
        Ok(handle)
    }

    pub async fn evict(&self, key: &ConnectionKey) {
        if let Some(slot) = self.entries.get(key) {
            let mut guard = slot.lock().await;
            *guard = None;
        }
    }

    /// Periodic sweep closing connections idle past `idle_ttl`. Intended to
    /// be driven by a background task started at bootstrap, mirroring the
    /// staleness scanner's shape.
    pub async fn sweep_idle(&self) {
        for entry in self.entries.iter() {
            let slot = entry.value().clone();
            let mut guard = slot.lock().await;
            if let Some(conn) = guard.as_ref() {
                if conn.last_used.elapsed() >= self.idle_ttl {
                    *guard = None;
                }
            }
        }
    }
}
