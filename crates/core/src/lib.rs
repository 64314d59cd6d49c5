pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod worker;

pub use config::Config;
pub use error::GatewayError;
pub use protocol::{ClientCommand, Envelope};
pub use provider::{ProviderConfig, ProviderPatch};
pub use worker::{HealthState, LifecycleEvent, Worker, WorkerStatus};
