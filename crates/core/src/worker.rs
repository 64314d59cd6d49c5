use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Starting,
    Running,
    Degraded,
    Stopped,
    Failed,
}

/// Last known probe verdict for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// One running assistant process, as tracked by the registry.
///
/// Status and health are mutated only by the supervisor and the health
/// monitor; everything else is fixed at spawn except `model` and
/// `available_models`, which are refreshed from the worker's own reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub provider: String,
    pub port: u16,
    pub status: WorkerStatus,
    pub health: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub available_models: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// Stable worker id, unique for the gateway's lifetime while the
    /// (provider, port) pair is held.
    pub fn worker_id(provider: &str, port: u16) -> String {
        format!("zeus-{provider}-{port}")
    }

    pub fn new(provider: &str, port: u16, model: Option<String>) -> Self {
        Self {
            id: Self::worker_id(provider, port),
            provider: provider.to_string(),
            port,
            status: WorkerStatus::Starting,
            health: HealthState::Unknown,
            model,
            available_models: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Workers in a terminal state must not appear in any provider pool.
    pub fn is_selectable(&self) -> bool {
        self.status == WorkerStatus::Running && self.health == HealthState::Healthy
    }
}

/// Registry lifecycle events, broadcast to interested components.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started { worker: Worker },
    Stopped { worker_id: String, provider: String },
    Failed { worker_id: String, provider: String },
}

impl LifecycleEvent {
    pub fn worker_id(&self) -> &str {
        match self {
            Self::Started { worker } => &worker.id,
            Self::Stopped { worker_id, .. } | Self::Failed { worker_id, .. } => worker_id,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Started { worker } => &worker.provider,
            Self::Stopped { provider, .. } | Self::Failed { provider, .. } => provider,
        }
    }
}
