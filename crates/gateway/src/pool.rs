//! Per-provider selection pools.
//!
//! Each pool holds the ids of workers whose latest known health is
//! healthy; it is recomputed from the registry on every lifecycle or
//! health event touching the provider. Selection is uniformly random,
//! which needs no shared counter under concurrency and gives uniform
//! load in steady state.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::registry::WorkerRegistry;

pub struct ProviderPools {
    inner: RwLock<HashMap<String, Vec<String>>>,
}

impl ProviderPools {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild one provider's pool from the registry's current view.
    pub async fn recompute(&self, provider: &str, registry: &WorkerRegistry) {
        let healthy: Vec<String> = registry
            .healthy(provider)
            .await
            .into_iter()
            .map(|w| w.id)
            .collect();
        let mut pools = self.inner.write().await;
        if healthy.is_empty() {
            pools.remove(provider);
        } else {
            pools.insert(provider.to_string(), healthy);
        }
    }

    /// Uniform random pick; `None` when the pool is empty.
    pub async fn pick(&self, provider: &str) -> Option<String> {
        let pools = self.inner.read().await;
        pools
            .get(provider)?
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    pub async fn members(&self, provider: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.inner.read().await.clone()
    }
}

impl Default for ProviderPools {
    fn default() -> Self {
        Self::new()
    }
}
