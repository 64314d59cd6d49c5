use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use zeus_core::Config;

use crate::hub::ClientHub;
use crate::launcher::WorkerLauncher;
use crate::pool::ProviderPools;
use crate::ports::PortAllocator;
use crate::prompts::ConfigStore;
use crate::registry::WorkerRegistry;
use crate::supervisor::Fleet;

/// Shared gateway state: every component the router, fanout, monitor,
/// and HTTP surface operate on. Each map is guarded by its owning
/// component; nothing here is mutated directly.
pub struct Gateway {
    pub config: Config,
    pub session_id: String,
    pub started_at: Instant,
    /// Reused client for worker health/status probes.
    pub http: reqwest::Client,
    pub ports: PortAllocator,
    pub registry: WorkerRegistry,
    pub pools: ProviderPools,
    pub hub: ClientHub,
    pub store: ConfigStore,
    pub fleet: Fleet,
    pub launcher: Arc<dyn WorkerLauncher>,
    /// Fires once on graceful shutdown.
    pub shutdown: Notify,
}

impl Gateway {
    pub fn new(config: Config, launcher: Arc<dyn WorkerLauncher>) -> Arc<Self> {
        Arc::new(Self {
            ports: PortAllocator::new(config.fleet.port_low, config.fleet.port_high),
            store: ConfigStore::new(&config),
            session_id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            http: reqwest::Client::new(),
            registry: WorkerRegistry::new(),
            pools: ProviderPools::new(),
            hub: ClientHub::new(),
            fleet: Fleet::new(),
            launcher,
            shutdown: Notify::new(),
            config,
        })
    }

    /// Gateway + fleet snapshot served on both the stream and HTTP
    /// status surfaces.
    pub async fn status_snapshot(&self) -> Value {
        let workers = self.registry.list(None).await;
        let providers: Vec<Value> = self
            .store
            .all()
            .await
            .iter()
            .map(|c| c.summary())
            .collect();
        json!({
            "sessionId": self.session_id,
            "uptimeSeconds": self.started_at.elapsed().as_secs(),
            "clients": self.hub.client_count().await,
            "workers": workers,
            "providers": providers,
            "pools": self.pools.snapshot().await,
            "portsInUse": self.ports.in_use().await,
        })
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.store.all().await.into_iter().map(|c| c.name).collect()
    }
}
