use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env_opt(key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub fleet: FleetConfig,
    pub storage: StorageConfig,
    /// Providers allowed to auto-spawn a worker on `chat` with an empty pool.
    pub auto_spawn: Vec<String>,
    /// Forwarded to workers as ZEUS_DEBUG.
    pub debug: bool,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            fleet: FleetConfig::from_env(),
            storage: StorageConfig::from_env(),
            auto_spawn: env_list("ZEUS_AUTO_SPAWN", &["gemini", "claude", "copilot"]),
            debug: env_bool("ZEUS_DEBUG", false),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  server:   {}:{}",
            self.server.host,
            self.server.port
        );
        tracing::info!(
            "  fleet:    ports=[{}, {}), health_interval={}s, spawn_deadline={}s, stop_grace={}s",
            self.fleet.port_low,
            self.fleet.port_high,
            self.fleet.health_interval.as_secs(),
            self.fleet.spawn_deadline.as_secs(),
            self.fleet.stop_grace.as_secs()
        );
        tracing::info!(
            "  storage:  workspace={}, prompts={}, runtime={}",
            self.storage.workspace_dir.display(),
            self.storage.prompts_dir.display(),
            self.storage.runtime_dir.display()
        );
        tracing::info!("  auto-spawn: {:?}", self.auto_spawn);
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("ZEUS_HOST", "0.0.0.0"),
            port: env_u16("ZEUS_PORT", 3001),
        }
    }
}

// ── Fleet ─────────────────────────────────────────────────────

/// Worker-fleet tuning: port range and lifecycle timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Inclusive low end of the worker port range.
    pub port_low: u16,
    /// Exclusive high end of the worker port range.
    pub port_high: u16,
    /// Interval between health sweeps.
    pub health_interval: Duration,
    /// How long a spawned worker gets to report ready.
    pub spawn_deadline: Duration,
    /// Grace window before a stop escalates to a kill.
    pub stop_grace: Duration,
    /// Per-request timeout for health/status probes.
    pub probe_timeout: Duration,
}

impl FleetConfig {
    fn from_env() -> Self {
        Self {
            port_low: env_u16("ZEUS_PORT_RANGE_LOW", 4000),
            port_high: env_u16("ZEUS_PORT_RANGE_HIGH", 4100),
            health_interval: Duration::from_secs(env_u64("ZEUS_HEALTH_INTERVAL_SECS", 30)),
            spawn_deadline: Duration::from_secs(env_u64("ZEUS_SPAWN_DEADLINE_SECS", 60)),
            stop_grace: Duration::from_secs(env_u64("ZEUS_STOP_GRACE_SECS", 10)),
            probe_timeout: Duration::from_secs(env_u64("ZEUS_PROBE_TIMEOUT_SECS", 3)),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Workspace directory bind-mounted into workers and served via /serve.
    pub workspace_dir: PathBuf,
    /// Shared prompts directory; ConfigStore writes, workers read.
    pub prompts_dir: PathBuf,
    /// Runtime artifacts (pid files) for stale-worker cleanup.
    pub runtime_dir: PathBuf,
}

impl StorageConfig {
    fn from_env() -> Self {
        let workspace_dir = PathBuf::from(env_or("ZEUS_WORKSPACE", "workspace"));
        let prompts_dir = env_opt("ZEUS_PROMPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_dir.join("prompts"));
        let runtime_dir = env_opt("ZEUS_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_dir.join("run"));
        Self {
            workspace_dir,
            prompts_dir,
            runtime_dir,
        }
    }
}
