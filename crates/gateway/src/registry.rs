//! Catalog of live workers, keyed by id with a provider view.
//!
//! Reads overlap mutations freely; every accessor returns a cloned
//! snapshot of a single worker so callers never observe a torn record.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use zeus_core::{LifecycleEvent, Worker};

pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Worker>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            workers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Lifecycle broadcast; lagging receivers drop, they never block.
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    pub async fn insert(&self, worker: Worker) {
        self.workers.write().await.insert(worker.id.clone(), worker);
    }

    pub async fn get(&self, id: &str) -> Option<Worker> {
        self.workers.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Worker> {
        self.workers.write().await.remove(id)
    }

    /// All workers, optionally filtered by provider, oldest first.
    pub async fn list(&self, provider: Option<&str>) -> Vec<Worker> {
        let workers = self.workers.read().await;
        let mut out: Vec<Worker> = workers
            .values()
            .filter(|w| provider.map_or(true, |p| w.provider == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn healthy(&self, provider: &str) -> Vec<Worker> {
        self.list(Some(provider))
            .await
            .into_iter()
            .filter(Worker::is_selectable)
            .collect()
    }

    /// Distinct provider tags with at least one live worker.
    pub async fn providers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut out: Vec<String> = workers.values().map(|w| w.provider.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Apply a mutation under the write lock; returns the updated snapshot.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Option<Worker>
    where
        F: FnOnce(&mut Worker),
    {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(id)?;
        mutate(worker);
        Some(worker.clone())
    }

    pub async fn count(&self) -> usize {
        self.workers.read().await.len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeus_core::{HealthState, WorkerStatus};

    #[tokio::test]
    async fn list_filters_by_provider() {
        let reg = WorkerRegistry::new();
        reg.insert(Worker::new("gemini", 4000, None)).await;
        reg.insert(Worker::new("claude", 4001, None)).await;
        reg.insert(Worker::new("gemini", 4002, None)).await;

        assert_eq!(reg.list(Some("gemini")).await.len(), 2);
        assert_eq!(reg.list(None).await.len(), 3);
        assert_eq!(reg.providers().await, vec!["claude", "gemini"]);
    }

    #[tokio::test]
    async fn healthy_excludes_non_running_workers() {
        let reg = WorkerRegistry::new();
        reg.insert(Worker::new("gemini", 4000, None)).await;
        reg.insert(Worker::new("gemini", 4001, None)).await;
        reg.update("zeus-gemini-4001", |w| {
            w.status = WorkerStatus::Running;
            w.health = HealthState::Healthy;
        })
        .await
        .unwrap();

        let healthy = reg.healthy("gemini").await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "zeus-gemini-4001");
    }

    #[tokio::test]
    async fn update_returns_consistent_snapshot() {
        let reg = WorkerRegistry::new();
        reg.insert(Worker::new("gemini", 4000, None)).await;
        let updated = reg
            .update("zeus-gemini-4000", |w| {
                w.status = WorkerStatus::Running;
                w.health = HealthState::Healthy;
                w.model = Some("gemini-2.0-flash".into());
            })
            .await
            .unwrap();
        assert_eq!(updated.status, WorkerStatus::Running);
        assert_eq!(updated.model.as_deref(), Some("gemini-2.0-flash"));
    }

    #[tokio::test]
    async fn lifecycle_events_reach_subscribers() {
        let reg = WorkerRegistry::new();
        let mut rx = reg.subscribe();
        reg.emit(LifecycleEvent::Stopped {
            worker_id: "zeus-gemini-4000".into(),
            provider: "gemini".into(),
        });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.worker_id(), "zeus-gemini-4000");
        assert_eq!(ev.provider(), "gemini");
    }
}
