use crate::domain::gateway::GatewayConfig;
use crate::domain::ports::{GatewayBox, GatewayFactory};
use crate::error::{LedgerError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A gateway's configuration and the adapter built from it, if any.
struct Entry {
    config: GatewayConfig,
    adapter: Option<GatewayBox>,
}

/// Owns one adapter per configured gateway id.
///
/// Adapters are built lazily through the factory and cached until the gateway's
/// configuration changes or `invalidate` is called. Configuration and adapter share one
/// lock, so a cached adapter is always built from the current configuration.
pub struct GatewayRegistry {
    factory: GatewayFactory,
    gateways: RwLock<HashMap<String, Entry>>,
}

impl GatewayRegistry {
    pub fn new(factory: GatewayFactory) -> Self {
        Self {
            factory,
            gateways: RwLock::new(HashMap::new()),
        }
    }

    /// Stores or replaces a gateway's configuration and drops its cached adapter.
    pub async fn configure(&self, gateway_id: &str, config: GatewayConfig) {
        let previous = self.gateways.write().await.insert(
            gateway_id.to_string(),
            Entry {
                config,
                adapter: None,
            },
        );
        if previous.is_some_and(|entry| entry.adapter.is_some()) {
            tracing::info!(gateway_id, "gateway adapter invalidated");
        }
    }

    /// Returns the cached adapter for `gateway_id`, building it on first use.
    pub async fn get(&self, gateway_id: &str) -> Result<GatewayBox> {
        if let Some(adapter) = self
            .gateways
            .read()
            .await
            .get(gateway_id)
            .and_then(|entry| entry.adapter.as_ref())
        {
            return Ok(Arc::clone(adapter));
        }

        let mut gateways = self.gateways.write().await;
        let entry = gateways
            .get_mut(gateway_id)
            .ok_or_else(|| LedgerError::not_found("gateway", gateway_id))?;
        if let Some(adapter) = &entry.adapter {
            return Ok(Arc::clone(adapter));
        }
        let adapter = (self.factory)(gateway_id, &entry.config)?;
        tracing::info!(gateway_id, "gateway adapter created");
        entry.adapter = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Drops the cached adapter for `gateway_id`. Returns whether one was cached.
    pub async fn invalidate(&self, gateway_id: &str) -> bool {
        let removed = self
            .gateways
            .write()
            .await
            .get_mut(gateway_id)
            .and_then(|entry| entry.adapter.take())
            .is_some();
        if removed {
            tracing::info!(gateway_id, "gateway adapter invalidated");
        }
        removed
    }
}
