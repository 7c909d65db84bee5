//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use live_core::config::Config;
use live_core::{Page, Resolver};

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub resolver: Arc<Resolver>,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
    pub started_at: DateTime<Utc>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub page_id: String,
    pub connected_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, resolver: Arc<Resolver>) -> Self {
        Self {
            config,
            resolver,
            connections: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    pub async fn register(&self, page: &Page) {
        let mut connections = self.connections.write().await;
        connections.insert(
            page.id().to_string(),
            ConnectionState {
                page_id: page.id().to_string(),
                connected_at: Utc::now(),
                cancel: page.cancellation_token(),
            },
        );
    }

    pub async fn unregister(&self, page_id: &str) -> Option<ConnectionState> {
        self.connections.write().await.remove(page_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Cancel every live page. Each connection task then closes its
    /// elements and unregisters itself.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections.read().await;
        for connection in connections.values() {
            connection.cancel.cancel();
        }
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_close_all() {
        let state = GatewayState::new(Arc::new(Config::default()), Resolver::new().freeze());
        let page = Page::new(state.resolver.clone());

        state.register(&page).await;
        assert_eq!(state.connection_count().await, 1);

        assert_eq!(state.close_all().await, 1);
        assert!(page.cancellation_token().is_cancelled());

        let removed = state.unregister(page.id()).await.unwrap();
        assert_eq!(removed.page_id, page.id());
        assert_eq!(state.connection_count().await, 0);
        assert!(state.unregister(page.id()).await.is_none());
    }
}
