use std::sync::Arc;

use dashmap::DashMap;
use tradeloop_engine::config::TenantConfig;
use tradeloop_engine::error::EngineResult;
use tradeloop_engine::store::Store;
use tradeloop_engine::webhook::{Transport, WebhookConfig, WebhookDispatcher};
use tradeloop_engine::TenantRuntime;

/// Shared state behind every request: one lazily-spawned `TenantRuntime`
/// per tenant id, held behind an `axum::extract::State`.
#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    default_config: TenantConfig,
    runtimes: DashMap<String, TenantRuntime>,
}

impl AppState {
    pub(crate) fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>, default_config: TenantConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                default_config,
                runtimes: DashMap::new(),
            }),
        }
    }

    /// Returns the tenant's runtime, spawning it (and loading any prior
    /// snapshot through `Store`) on first use.
    pub(crate) async fn tenant(&self, tenant_id: &str) -> EngineResult<TenantRuntime> {
        if let Some(runtime) = self.inner.runtimes.get(tenant_id) {
            return Ok(runtime.clone());
        }

        let config = self.inner.default_config.clone();
        let dispatcher = WebhookDispatcher::spawn(
            WebhookConfig {
                url: config.webhook.url.clone(),
                secret: config.webhook.secret.clone(),
                enabled: config.webhook.enabled,
            },
            self.inner.transport.clone(),
            tenant_id.to_string(),
            tenant_id.to_string(),
        );
        let runtime = TenantRuntime::spawn(tenant_id.to_string(), config, self.inner.store.clone(), dispatcher).await?;

        Ok(self
            .inner
            .runtimes
            .entry(tenant_id.to_string())
            .or_insert(runtime)
            .clone())
    }
}
