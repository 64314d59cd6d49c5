//! Port allocation for worker processes.
//!
//! Centralized allocation prevents collisions across concurrent spawns;
//! the OS-level bind probe prevents handing out a port an unrelated
//! process already listens on.

use std::collections::BTreeMap;
use std::net::TcpListener;

use tokio::sync::Mutex;

use zeus_core::GatewayError;

/// Hands out and reclaims ports in a fixed half-open range `[low, high)`.
/// The table maps each reserved port to the id of the worker holding it.
pub struct PortAllocator {
    low: u16,
    high: u16,
    table: Mutex<BTreeMap<u16, String>>,
}

impl PortAllocator {
    pub fn new(low: u16, high: u16) -> Self {
        Self {
            low,
            high,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// Best-effort foreign-binding check: bind on loopback and release
    /// immediately. If the probe itself fails, the port is assumed taken.
    fn os_available(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    /// Reserve the lowest in-range port that is neither in the table nor
    /// bound by a foreign process. Pair with [`assign`](Self::assign) once
    /// the owning worker id is known.
    pub async fn reserve(&self) -> Result<u16, GatewayError> {
        let mut table = self.table.lock().await;
        for port in self.low..self.high {
            if table.contains_key(&port) {
                continue;
            }
            if !Self::os_available(port) {
                continue;
            }
            table.insert(port, String::new());
            return Ok(port);
        }
        Err(GatewayError::NoPortsAvailable(self.low, self.high))
    }

    /// Reserve a caller-supplied port, verifying availability.
    pub async fn claim(&self, port: u16) -> Result<(), GatewayError> {
        let mut table = self.table.lock().await;
        if table.contains_key(&port) || !Self::os_available(port) {
            return Err(GatewayError::PortInUse(port));
        }
        table.insert(port, String::new());
        Ok(())
    }

    /// Record the worker id owning a reserved port.
    pub async fn assign(&self, port: u16, owner: &str) {
        if let Some(entry) = self.table.lock().await.get_mut(&port) {
            *entry = owner.to_string();
        }
    }

    /// Idempotent.
    pub async fn release(&self, port: u16) {
        self.table.lock().await.remove(&port);
    }

    pub async fn is_reserved(&self, port: u16) -> bool {
        self.table.lock().await.contains_key(&port)
    }

    pub async fn allocated(&self) -> Vec<(u16, String)> {
        self.table
            .lock()
            .await
            .iter()
            .map(|(p, o)| (*p, o.clone()))
            .collect()
    }

    pub async fn in_use(&self) -> usize {
        self.table.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // High range so tests don't race with workers on developer machines.
    const LOW: u16 = 49500;

    #[tokio::test]
    async fn reserves_lowest_free_port_first() {
        let alloc = PortAllocator::new(LOW, LOW + 10);
        let a = alloc.reserve().await.unwrap();
        let b = alloc.reserve().await.unwrap();
        assert_eq!(a, LOW);
        assert_eq!(b, LOW + 1);
    }

    #[tokio::test]
    async fn release_makes_port_allocatable_again() {
        let alloc = PortAllocator::new(LOW + 10, LOW + 12);
        let a = alloc.reserve().await.unwrap();
        let _b = alloc.reserve().await.unwrap();
        alloc.release(a).await;
        assert_eq!(alloc.reserve().await.unwrap(), a);
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let alloc = PortAllocator::new(LOW + 20, LOW + 22);
        alloc.reserve().await.unwrap();
        alloc.reserve().await.unwrap();
        assert!(matches!(
            alloc.reserve().await,
            Err(GatewayError::NoPortsAvailable(_, _))
        ));
    }

    #[tokio::test]
    async fn skips_ports_bound_by_foreign_processes() {
        let blocker = TcpListener::bind(("127.0.0.1", LOW + 30)).unwrap();
        let alloc = PortAllocator::new(LOW + 30, LOW + 33);
        assert_eq!(alloc.reserve().await.unwrap(), LOW + 31);
        drop(blocker);
    }

    #[tokio::test]
    async fn claim_rejects_reserved_ports() {
        let alloc = PortAllocator::new(LOW + 40, LOW + 45);
        alloc.claim(LOW + 41).await.unwrap();
        assert!(matches!(
            alloc.claim(LOW + 41).await,
            Err(GatewayError::PortInUse(_))
        ));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let alloc = PortAllocator::new(LOW + 50, LOW + 55);
        let p = alloc.reserve().await.unwrap();
        alloc.release(p).await;
        alloc.release(p).await;
        assert_eq!(alloc.in_use().await, 0);
    }
}
