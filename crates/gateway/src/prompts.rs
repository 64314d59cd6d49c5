//! Per-provider dynamic configuration.
//!
//! The store seeds the known providers from built-in defaults, applies
//! the gateway's auto-spawn allowlist, and synthesizes entries for any
//! other provider tag on first use. System prompts are materialized to
//! `<prompts_dir>/<provider>.md`, the file workers read at startup, so a
//! prompt change only takes effect in workers spawned (or restarted)
//! after the update.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use zeus_core::{Config, GatewayError, ProviderConfig, ProviderPatch};

use crate::registry::WorkerRegistry;

const KNOWN_PROVIDERS: &[&str] = &["gemini", "claude", "copilot"];

pub struct ConfigStore {
    prompts_dir: PathBuf,
    inner: RwLock<HashMap<String, ProviderConfig>>,
}

impl ConfigStore {
    pub fn new(config: &Config) -> Self {
        let mut map = HashMap::new();
        for name in KNOWN_PROVIDERS {
            let mut cfg = ProviderConfig::defaults_for(name);
            cfg.auto_spawn = config.auto_spawn.iter().any(|p| p == name);
            map.insert(name.to_string(), cfg);
        }
        // Allowlisted providers outside the known set still get entries.
        for name in &config.auto_spawn {
            map.entry(name.clone()).or_insert_with(|| {
                let mut cfg = ProviderConfig::defaults_for(name);
                cfg.auto_spawn = true;
                cfg
            });
        }
        Self {
            prompts_dir: config.storage.prompts_dir.clone(),
            inner: RwLock::new(map),
        }
    }

    pub async fn get(&self, provider: &str) -> ProviderConfig {
        if let Some(cfg) = self.inner.read().await.get(provider) {
            return cfg.clone();
        }
        self.inner
            .write()
            .await
            .entry(provider.to_string())
            .or_insert_with(|| ProviderConfig::defaults_for(provider))
            .clone()
    }

    pub async fn all(&self) -> Vec<ProviderConfig> {
        let mut out: Vec<ProviderConfig> = self.inner.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn prompt_path(&self, provider: &str) -> PathBuf {
        self.prompts_dir.join(format!("{provider}.md"))
    }

    /// Write the provider's current system prompt to the shared file.
    pub async fn materialize(&self, provider: &str) -> Result<PathBuf, GatewayError> {
        let cfg = self.get(provider).await;
        tokio::fs::create_dir_all(&self.prompts_dir).await?;
        let path = self.prompt_path(provider);
        tokio::fs::write(&path, cfg.system_prompt.as_bytes()).await?;
        Ok(path)
    }

    /// Apply a patch. Returns the updated config and the ids of workers
    /// whose runtime depends on the change (non-empty only when the
    /// system prompt actually changed — those workers must be restarted
    /// by the caller for the new prompt to take effect).
    pub async fn update(
        &self,
        provider: &str,
        patch: ProviderPatch,
        registry: &WorkerRegistry,
    ) -> Result<(ProviderConfig, Vec<String>), GatewayError> {
        let mut prompt_changed = false;
        let cfg = {
            let mut map = self.inner.write().await;
            let entry = map
                .entry(provider.to_string())
                .or_insert_with(|| ProviderConfig::defaults_for(provider));
            if let Some(prompt) = patch.system_prompt {
                if prompt != entry.system_prompt {
                    entry.system_prompt = prompt;
                    prompt_changed = true;
                }
            }
            if let Some(model) = patch.default_model {
                entry.default_model = Some(model);
            }
            if let Some(auto) = patch.auto_spawn {
                entry.auto_spawn = auto;
            }
            entry.clone()
        };

        let affected = if prompt_changed {
            self.materialize(provider).await?;
            registry
                .list(Some(provider))
                .await
                .into_iter()
                .map(|w| w.id)
                .collect()
        } else {
            Vec::new()
        };
        Ok((cfg, affected))
    }
}
