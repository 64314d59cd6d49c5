//! Client connection table, subscription indexes, and affinity tracking.
//!
//! Both directions of the subscription relation (per-client sets and the
//! reverse worker/provider indexes) live behind one lock, so subscription
//! symmetry holds by construction and detach tears everything down
//! atomically. Delivery to a client goes through its unbounded channel;
//! one writer task per client drains it to the socket, which serializes
//! writes per client.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type ClientId = String;

/// Subscription kind, mirroring the wire commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    Worker,
    Provider,
}

struct ClientEntry {
    sender: mpsc::UnboundedSender<String>,
    current_worker: Option<String>,
    worker_subs: HashSet<String>,
    provider_subs: HashSet<String>,
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<ClientId, ClientEntry>,
    worker_subscribers: HashMap<String, HashSet<ClientId>>,
    provider_subscribers: HashMap<String, HashSet<ClientId>>,
}

pub struct ClientHub {
    inner: RwLock<HubInner>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
        }
    }

    /// Register a connected client; the sender feeds its writer task.
    pub async fn attach(&self, sender: mpsc::UnboundedSender<String>) -> ClientId {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        self.inner.write().await.clients.insert(
            id.clone(),
            ClientEntry {
                sender,
                current_worker: None,
                worker_subs: HashSet::new(),
                provider_subs: HashSet::new(),
            },
        );
        id
    }

    /// Remove the client and every index entry it holds.
    pub async fn detach(&self, client_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.clients.remove(client_id) else {
            return;
        };
        for worker in &entry.worker_subs {
            if let Some(subs) = inner.worker_subscribers.get_mut(worker) {
                subs.remove(client_id);
                if subs.is_empty() {
                    inner.worker_subscribers.remove(worker);
                }
            }
        }
        for provider in &entry.provider_subs {
            if let Some(subs) = inner.provider_subscribers.get_mut(provider) {
                subs.remove(client_id);
                if subs.is_empty() {
                    inner.provider_subscribers.remove(provider);
                }
            }
        }
    }

    /// Enqueue one frame for a client. Returns false if the client is gone.
    pub async fn send_to(&self, client_id: &str, frame: String) -> bool {
        let inner = self.inner.read().await;
        match inner.clients.get(client_id) {
            Some(entry) => entry.sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Send a frame to every connected client (shutdown notices).
    pub async fn broadcast(&self, frame: &str) {
        let inner = self.inner.read().await;
        for entry in inner.clients.values() {
            let _ = entry.sender.send(frame.to_string());
        }
    }

    pub async fn set_current_worker(&self, client_id: &str, worker_id: Option<String>) {
        if let Some(entry) = self.inner.write().await.clients.get_mut(client_id) {
            entry.current_worker = worker_id;
        }
    }

    pub async fn current_worker(&self, client_id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .clients
            .get(client_id)
            .and_then(|e| e.current_worker.clone())
    }

    /// Clients whose in-flight request is bound to this worker.
    pub async fn clients_bound_to(&self, worker_id: &str) -> Vec<ClientId> {
        self.inner
            .read()
            .await
            .clients
            .iter()
            .filter(|(_, e)| e.current_worker.as_deref() == Some(worker_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clear every affinity pointing at a worker that terminated.
    pub async fn clear_affinity_to(&self, worker_id: &str) {
        let mut inner = self.inner.write().await;
        for entry in inner.clients.values_mut() {
            if entry.current_worker.as_deref() == Some(worker_id) {
                entry.current_worker = None;
            }
        }
    }

    /// Returns false if the client is unknown (no index entry is created).
    pub async fn add_sub(&self, client_id: &str, kind: SubKind, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(client_id) {
            return false;
        }
        let index = match kind {
            SubKind::Worker => &mut inner.worker_subscribers,
            SubKind::Provider => &mut inner.provider_subscribers,
        };
        index
            .entry(key.to_string())
            .or_default()
            .insert(client_id.to_string());
        let entry = inner.clients.get_mut(client_id).expect("checked above");
        match kind {
            SubKind::Worker => entry.worker_subs.insert(key.to_string()),
            SubKind::Provider => entry.provider_subs.insert(key.to_string()),
        };
        true
    }

    pub async fn remove_sub(&self, client_id: &str, kind: SubKind, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        let index = match kind {
            SubKind::Worker => &mut inner.worker_subscribers,
            SubKind::Provider => &mut inner.provider_subscribers,
        };
        if let Some(subs) = index.get_mut(key) {
            subs.remove(client_id);
            if subs.is_empty() {
                index.remove(key);
            }
        }
        match inner.clients.get_mut(client_id) {
            Some(entry) => match kind {
                SubKind::Worker => entry.worker_subs.remove(key),
                SubKind::Provider => entry.provider_subs.remove(key),
            },
            None => false,
        }
    }

    /// Drop every subscription of one client; returns (workers, providers)
    /// counts removed.
    pub async fn remove_all_subs(&self, client_id: &str) -> (usize, usize) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.clients.get_mut(client_id) else {
            return (0, 0);
        };
        let workers: Vec<String> = entry.worker_subs.drain().collect();
        let providers: Vec<String> = entry.provider_subs.drain().collect();
        for worker in &workers {
            if let Some(subs) = inner.worker_subscribers.get_mut(worker) {
                subs.remove(client_id);
                if subs.is_empty() {
                    inner.worker_subscribers.remove(worker);
                }
            }
        }
        for provider in &providers {
            if let Some(subs) = inner.provider_subscribers.get_mut(provider) {
                subs.remove(client_id);
                if subs.is_empty() {
                    inner.provider_subscribers.remove(provider);
                }
            }
        }
        (workers.len(), providers.len())
    }

    /// (worker subs, provider subs) of one client, sorted for stable output.
    pub async fn subscriptions_of(&self, client_id: &str) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.read().await;
        match inner.clients.get(client_id) {
            Some(entry) => {
                let mut w: Vec<String> = entry.worker_subs.iter().cloned().collect();
                let mut p: Vec<String> = entry.provider_subs.iter().cloned().collect();
                w.sort();
                p.sort();
                (w, p)
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    pub async fn worker_subscribers(&self, worker_id: &str) -> Vec<ClientId> {
        self.inner
            .read()
            .await
            .worker_subscribers
            .get(worker_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn provider_subscribers(&self, provider: &str) -> Vec<ClientId> {
        self.inner
            .read()
            .await
            .provider_subscribers
            .get(provider)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}
