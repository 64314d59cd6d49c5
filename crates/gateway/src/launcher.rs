//! Worker process launching.
//!
//! [`WorkerLauncher`] is the seam between the supervisor and whatever
//! actually runs a worker. The shipped implementation spawns plain
//! subprocesses; a container-based launcher slots in behind the same
//! trait without touching the supervisor.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use zeus_core::GatewayError;

/// Lines of captured stdout/stderr retained per worker.
const LOG_CAPACITY: usize = 1000;

/// Everything a launcher needs to run one worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub worker_id: String,
    pub provider: String,
    /// Argv template; first element is the program.
    pub command: Vec<String>,
    /// Host-side port; the subprocess variant listens here directly.
    pub host_port: u16,
    /// Port the worker would use inside a container namespace.
    pub inner_port: u16,
    pub model: Option<String>,
    pub workspace_dir: PathBuf,
    pub prompts_dir: PathBuf,
    /// Provider-declared environment forwarded from the gateway.
    pub env: Vec<(String, String)>,
    pub debug: bool,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), GatewayError>;

    /// Graceful termination, escalating to a kill after `grace`.
    /// Idempotent; also reaps bookkeeping for already-dead workers.
    async fn stop(&self, worker_id: &str, grace: Duration);

    /// OS-level liveness of the worker process.
    async fn is_alive(&self, worker_id: &str) -> bool;

    /// Last `tail` captured log lines.
    async fn logs(&self, worker_id: &str, tail: usize) -> Vec<String>;

    /// Remove artifacts left by a previous gateway run (called once at
    /// start, before any spawn). Returns the number cleared.
    async fn cleanup_stale(&self) -> Result<usize, GatewayError>;
}

// ── Subprocess launcher ──────────────────────────────────────────────

type LogBuffer = Arc<StdMutex<VecDeque<String>>>;

struct ManagedWorker {
    child: Child,
    pid: Option<u32>,
    logs: LogBuffer,
}

/// Runs workers as child processes with piped output and a pid file per
/// worker under the runtime directory, so a later gateway run can clear
/// leftovers that match the `zeus-` naming prefix.
pub struct ProcessLauncher {
    runtime_dir: PathBuf,
    children: Mutex<HashMap<String, ManagedWorker>>,
}

impl ProcessLauncher {
    pub fn new(runtime_dir: PathBuf) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(&runtime_dir)?;
        Ok(Self {
            runtime_dir,
            children: Mutex::new(HashMap::new()),
        })
    }

    fn pid_path(&self, worker_id: &str) -> PathBuf {
        self.runtime_dir.join(format!("{worker_id}.pid"))
    }

    fn capture<R>(reader: R, logs: LogBuffer)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = logs.lock().expect("log buffer poisoned");
                if buf.len() == LOG_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });
    }

    fn signal_term(pid: u32) {
        #[cfg(unix)]
        {
            let _ = std::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .output();
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), GatewayError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| GatewayError::Launch(format!("empty command for {}", spec.provider)))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("PORT", spec.host_port.to_string())
            .env("WORKSPACE", &spec.workspace_dir)
            .env("PROMPTS_DIR", &spec.prompts_dir)
            .env("ZEUS_WORKER_ID", &spec.worker_id)
            .env("ZEUS_DEBUG", if spec.debug { "1" } else { "0" })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &spec.model {
            cmd.env("ZEUS_MODEL", model);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::Launch(format!("{program}: {e}")))?;

        let logs: LogBuffer = Arc::new(StdMutex::new(VecDeque::with_capacity(LOG_CAPACITY)));
        if let Some(stdout) = child.stdout.take() {
            Self::capture(stdout, logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            Self::capture(stderr, logs.clone());
        }

        let pid = child.id();
        if let Some(pid) = pid {
            if let Err(e) = std::fs::write(self.pid_path(&spec.worker_id), pid.to_string()) {
                warn!(worker = %spec.worker_id, error = %e, "failed to write pid file");
            }
        }
        info!(worker = %spec.worker_id, pid = ?pid, port = spec.host_port, "worker process spawned");

        self.children
            .lock()
            .await
            .insert(spec.worker_id.clone(), ManagedWorker { child, pid, logs });
        Ok(())
    }

    async fn stop(&self, worker_id: &str, grace: Duration) {
        let Some(mut managed) = self.children.lock().await.remove(worker_id) else {
            return;
        };
        let _ = std::fs::remove_file(self.pid_path(worker_id));

        if matches!(managed.child.try_wait(), Ok(Some(_))) {
            return; // already exited
        }

        if let Some(pid) = managed.pid {
            Self::signal_term(pid);
        }
        match tokio::time::timeout(grace, managed.child.wait()).await {
            Ok(_) => {
                info!(worker = %worker_id, "worker exited gracefully");
            }
            Err(_) => {
                warn!(worker = %worker_id, "grace window elapsed, killing worker");
                let _ = managed.child.kill().await;
            }
        }
    }

    async fn is_alive(&self, worker_id: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(worker_id) {
            Some(managed) => matches!(managed.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn logs(&self, worker_id: &str, tail: usize) -> Vec<String> {
        let children = self.children.lock().await;
        match children.get(worker_id) {
            Some(managed) => {
                let buf = managed.logs.lock().expect("log buffer poisoned");
                buf.iter()
                    .rev()
                    .take(tail)
                    .rev()
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    async fn cleanup_stale(&self) -> Result<usize, GatewayError> {
        let mut cleared = 0usize;
        let mut entries = tokio::fs::read_dir(&self.runtime_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("zeus-") || !name.ends_with(".pid") {
                continue;
            }
            if let Ok(contents) = tokio::fs::read_to_string(entry.path()).await {
                if let Ok(pid) = contents.trim().parse::<u32>() {
                    warn!(artifact = %name, pid, "clearing stale worker from previous run");
                    Self::signal_term(pid);
                }
            }
            let _ = tokio::fs::remove_file(entry.path()).await;
            cleared += 1;
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(worker_id: &str, command: Vec<String>) -> LaunchSpec {
        LaunchSpec {
            worker_id: worker_id.into(),
            provider: "gemini".into(),
            command,
            host_port: 4000,
            inner_port: 3002,
            model: None,
            workspace_dir: PathBuf::from("workspace"),
            prompts_dir: PathBuf::from("workspace/prompts"),
            env: Vec::new(),
            debug: false,
        }
    }

    #[tokio::test]
    async fn empty_command_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path().to_path_buf()).unwrap();
        let err = launcher
            .launch(&spec("zeus-gemini-4000", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Launch(_)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_for_unknown_workers() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path().to_path_buf()).unwrap();
        launcher.stop("zeus-gemini-4000", Duration::from_millis(10)).await;
        assert!(!launcher.is_alive("zeus-gemini-4000").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_captures_output_and_stop_reaps() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path().to_path_buf()).unwrap();
        let spec = spec(
            "zeus-gemini-4001",
            vec!["sh".into(), "-c".into(), "echo hello; sleep 30".into()],
        );
        launcher.launch(&spec).await.unwrap();
        assert!(launcher.is_alive("zeus-gemini-4001").await);

        // Give the capture task a moment to drain the pipe.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let logs = launcher.logs("zeus-gemini-4001", 10).await;
        assert!(logs.iter().any(|l| l.contains("hello")), "logs: {logs:?}");

        launcher.stop("zeus-gemini-4001", Duration::from_secs(2)).await;
        assert!(!launcher.is_alive("zeus-gemini-4001").await);
        assert!(!dir.path().join("zeus-gemini-4001.pid").exists());
    }

    #[tokio::test]
    async fn cleanup_stale_removes_prefixed_pid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeus-gemini-4000.pid"), "999999999").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        let launcher = ProcessLauncher::new(dir.path().to_path_buf()).unwrap();
        let cleared = launcher.cleanup_stale().await.unwrap();
        assert_eq!(cleared, 1);
        assert!(!dir.path().join("zeus-gemini-4000.pid").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
