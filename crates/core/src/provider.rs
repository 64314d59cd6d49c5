use serde::{Deserialize, Serialize};

/// Per-provider runtime configuration.
///
/// Providers form an open set: unknown tags get a synthesized default
/// entry, so the gateway never rejects a provider it has not seen before.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Port the worker process listens on inside its own namespace. The
    /// subprocess launcher collapses this to the host port.
    pub default_inner_port: u16,
    /// Environment keys forwarded from the gateway environment at launch.
    pub env_keys: Vec<String>,
    /// Current system prompt; materialized to `<prompts_dir>/<name>.md`.
    #[serde(default)]
    pub system_prompt: String,
    /// Argv template for the subprocess launcher.
    pub command: Vec<String>,
    /// Whether `chat` may spawn a worker when the pool is empty.
    pub auto_spawn: bool,
}

impl ProviderConfig {
    /// Built-in defaults for the known providers; any other tag gets a
    /// generic entry named after itself.
    pub fn defaults_for(name: &str) -> Self {
        match name {
            "gemini" => Self {
                name: name.into(),
                default_model: Some("gemini-2.0-flash".into()),
                default_inner_port: 3002,
                env_keys: vec!["GEMINI_API_KEY".into()],
                system_prompt: String::new(),
                command: vec!["zeus-worker-gemini".into()],
                auto_spawn: false,
            },
            "claude" => Self {
                name: name.into(),
                default_model: None,
                default_inner_port: 3003,
                env_keys: vec!["ANTHROPIC_API_KEY".into()],
                system_prompt: String::new(),
                command: vec!["zeus-worker-claude".into()],
                auto_spawn: false,
            },
            "copilot" => Self {
                name: name.into(),
                default_model: None,
                default_inner_port: 3004,
                env_keys: vec!["GITHUB_TOKEN".into()],
                system_prompt: String::new(),
                command: vec!["zeus-worker-copilot".into()],
                auto_spawn: false,
            },
            other => Self {
                name: other.into(),
                default_model: None,
                default_inner_port: 3010,
                env_keys: Vec::new(),
                system_prompt: String::new(),
                command: vec![format!("zeus-worker-{other}")],
                auto_spawn: false,
            },
        }
    }

    /// Redacted view for API responses: env key names, never values.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "defaultModel": self.default_model,
            "defaultInnerPort": self.default_inner_port,
            "envKeys": self.env_keys,
            "systemPrompt": self.system_prompt,
            "autoSpawn": self.auto_spawn,
        })
    }
}

/// Partial update applied by the config endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPatch {
    pub system_prompt: Option<String>,
    pub default_model: Option<String>,
    pub auto_spawn: Option<bool>,
}

impl ProviderPatch {
    pub fn is_empty(&self) -> bool {
        self.system_prompt.is_none() && self.default_model.is_none() && self.auto_spawn.is_none()
    }
}
