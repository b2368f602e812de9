//! Keyed pool table with periodic scavenging.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use url::Url;

use crate::base::config::ConnectionSettings;
use crate::base::neterror::NetError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::pool::key::PoolKey;
use crate::pool::pool::{HttpConnectionPool, PoolCollaborators};
use crate::socket::connector::TcpConnector;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Owns one pool per destination identity and drives their lifecycle.
pub struct PoolManager {
    pools: DashMap<PoolKey, Arc<HttpConnectionPool>>,
    settings: Arc<ConnectionSettings>,
    collab: PoolCollaborators,
    proxy: Option<Url>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pools.len())
            .finish()
    }
}

impl PoolManager {
    /// Plain-TCP manager with default collaborators. TLS, proxying, and
    /// QUIC are supplied through [`PoolManager::with_collaborators`].
    pub fn new(settings: ConnectionSettings) -> Arc<Self> {
        let connect_timeout = settings.connect_timeout;
        Self::with_collaborators(
            settings,
            PoolCollaborators {
                connector: Arc::new(TcpConnector::new(connect_timeout)),
                tls: None,
                proxy_tunnel: None,
                quic: None,
            },
            None,
        )
    }

    pub fn with_collaborators(
        settings: ConnectionSettings,
        collab: PoolCollaborators,
        proxy: Option<Url>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pools: DashMap::new(),
            settings: Arc::new(settings),
            collab,
            proxy,
        })
    }

    /// Route a request to its destination's pool, creating the pool on
    /// first use.
    pub async fn send(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let key = PoolKey::from_request(&request, self.proxy.as_ref())?;
        let pool = self
            .pools
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(?key, "creating connection pool");
                HttpConnectionPool::new(
                    key.clone(),
                    Arc::clone(&self.settings),
                    self.collab.clone(),
                )
            })
            .clone();
        pool.send(request).await
    }

    /// Pool for a key, if one exists (diagnostics and tests).
    pub fn pool_for(&self, key: &PoolKey) -> Option<Arc<HttpConnectionPool>> {
        self.pools.get(key).map(|p| Arc::clone(p.value()))
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// One sweep over every pool; pools idle since the previous sweep are
    /// removed entirely.
    pub fn sweep(&self) {
        let mut removable = Vec::new();
        for entry in self.pools.iter() {
            if entry.value().clean_cache_and_dispose_if_unused() {
                removable.push(entry.key().clone());
            }
        }
        for key in removable {
            if let Some((_, pool)) = self.pools.remove(&key) {
                debug!(?key, "removing unused pool");
                pool.dispose();
            }
        }
    }

    /// Start the periodic scavenger. Call once after construction.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.sweep();
            }
        });
    }

    /// The local network changed: nothing pooled can be trusted. Every
    /// connection is torn down and Alt-Svc learning starts over.
    pub fn on_network_changed(&self) {
        debug!("network change: invalidating all pools");
        let keys: Vec<PoolKey> = self.pools.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, pool)) = self.pools.remove(&key) {
                pool.dispose();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pools_are_keyed_per_destination() {
        let manager = PoolManager::new(ConnectionSettings::default());
        assert_eq!(manager.pool_count(), 0);

        // Requests to unreachable hosts still create pools.
        let req = HttpRequest::get("http://127.0.0.1:1/").unwrap();
        let _ = manager.send(req).await;
        assert_eq!(manager.pool_count(), 1);

        let req = HttpRequest::get("http://127.0.0.1:2/").unwrap();
        let _ = manager.send(req).await;
        assert_eq!(manager.pool_count(), 2);

        let req = HttpRequest::get("http://127.0.0.1:1/other").unwrap();
        let _ = manager.send(req).await;
        assert_eq!(manager.pool_count(), 2);
    }

    #[tokio::test]
    async fn network_change_clears_pools() {
        let manager = PoolManager::new(ConnectionSettings::default());
        let req = HttpRequest::get("http://127.0.0.1:1/").unwrap();
        let _ = manager.send(req).await;
        assert_eq!(manager.pool_count(), 1);
        manager.on_network_changed();
        assert_eq!(manager.pool_count(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_unused_pools() {
        let manager = PoolManager::new(ConnectionSettings::default());
        let req = HttpRequest::get("http://127.0.0.1:1/").unwrap();
        let _ = manager.send(req).await;
        assert_eq!(manager.pool_count(), 1);

        // First sweep clears the used-since-sweep flag; the second finds
        // the pool untouched and removes it.
        manager.sweep();
        assert_eq!(manager.pool_count(), 1);
        manager.sweep();
        assert_eq!(manager.pool_count(), 0);
    }
}
