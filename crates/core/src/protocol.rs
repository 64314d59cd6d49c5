//! Wire protocol for the client and worker streams.
//!
//! Every frame is one UTF-8 JSON object with a `type` string and an
//! optional `payload` object. The gateway accepts both the nested form
//! `{type, payload:{k:v}}` and the legacy flat form `{type, k:v}`;
//! nested fields win on duplicates, and writers always emit the nested
//! form. Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::GatewayError;

/// Client commands the gateway forwards verbatim to a selected worker.
pub const ORCHESTRATION_FORWARD: &[&str] = &[
    "new_session",
    "set_session",
    "get_session",
    "set_system_prompt",
    "set_append_system_prompt",
    "get_system_prompt",
    "set_allowed_tools",
    "get_allowed_tools",
    "get_agent_state",
];

/// Worker event types that end a chat exchange and clear client affinity.
pub const TERMINAL_EVENTS: &[&str] = &["done", "error"];

// ── Envelope ─────────────────────────────────────────────────────────

/// One stream frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Legacy flat-form fields (everything besides `type` and `payload`).
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Effective parameters: flat fields overlaid by the nested payload.
    pub fn params(&self) -> Map<String, Value> {
        let mut out = self.rest.clone();
        if let Some(Value::Object(payload)) = &self.payload {
            for (k, v) in payload {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Serialize in the nested form, regardless of how the frame arrived.
    pub fn forward_frame(&self) -> String {
        frame(&self.kind, Value::Object(self.params()))
    }
}

// ── Command sum ──────────────────────────────────────────────────────

/// Parsed client command, dispatched by the router.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Ping,
    Status,
    ListProcesses {
        provider: Option<String>,
    },
    ListProviders,
    ListModels {
        provider: Option<String>,
    },
    ListSubscriptions,
    Spawn {
        provider: String,
        model: Option<String>,
        port: Option<u16>,
    },
    Stop {
        process_id: Option<String>,
        provider: Option<String>,
    },
    Scale {
        provider: String,
        count: usize,
    },
    Chat {
        provider: Option<String>,
        process_id: Option<String>,
    },
    Subscribe {
        process_id: Option<String>,
        provider: Option<String>,
    },
    Unsubscribe {
        process_id: Option<String>,
        provider: Option<String>,
        all: bool,
    },
    SetModel {
        process_id: String,
        model: String,
    },
    GetLogs {
        process_id: String,
        tail: Option<usize>,
    },
    /// One of [`ORCHESTRATION_FORWARD`]; the original envelope is relayed.
    Forward {
        process_id: Option<String>,
        provider: Option<String>,
    },
}

fn str_field(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn uint_field(params: &Map<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

fn require(field: Option<String>, name: &'static str) -> Result<String, GatewayError> {
    field.ok_or(GatewayError::MissingField(name))
}

impl ClientCommand {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, GatewayError> {
        let p = envelope.params();
        let provider = str_field(&p, "provider");
        let process_id = str_field(&p, "processId");

        let cmd = match envelope.kind.as_str() {
            "ping" => Self::Ping,
            "status" => Self::Status,
            "list_processes" => Self::ListProcesses { provider },
            "list_providers" => Self::ListProviders,
            "list_models" => Self::ListModels { provider },
            "list_subscriptions" => Self::ListSubscriptions,
            "spawn" => Self::Spawn {
                provider: require(provider, "provider")?,
                model: str_field(&p, "model"),
                port: uint_field(&p, "port").map(|v| v as u16),
            },
            "stop" => {
                if provider.is_none() && process_id.is_none() {
                    return Err(GatewayError::MissingField("processId or provider"));
                }
                Self::Stop {
                    process_id,
                    provider,
                }
            }
            "scale" => Self::Scale {
                provider: require(provider, "provider")?,
                count: uint_field(&p, "count")
                    .ok_or(GatewayError::MissingField("count"))?
                    as usize,
            },
            "chat" => {
                if provider.is_none() && process_id.is_none() {
                    return Err(GatewayError::MissingField("provider"));
                }
                Self::Chat {
                    provider,
                    process_id,
                }
            }
            "subscribe" => {
                if provider.is_none() && process_id.is_none() {
                    return Err(GatewayError::MissingField("processId or provider"));
                }
                Self::Subscribe {
                    process_id,
                    provider,
                }
            }
            "unsubscribe" => {
                let all = p.get("all").and_then(Value::as_bool).unwrap_or(false);
                if !all && provider.is_none() && process_id.is_none() {
                    return Err(GatewayError::MissingField("processId, provider, or all"));
                }
                Self::Unsubscribe {
                    process_id,
                    provider,
                    all,
                }
            }
            "set_model" => Self::SetModel {
                process_id: require(process_id, "processId")?,
                model: require(str_field(&p, "model"), "model")?,
            },
            "get_logs" => Self::GetLogs {
                process_id: require(process_id, "processId")?,
                tail: uint_field(&p, "tail").map(|v| v as usize),
            },
            kind if ORCHESTRATION_FORWARD.contains(&kind) => Self::Forward {
                process_id,
                provider,
            },
            other => return Err(GatewayError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}

// ── Outbound frame constructors ──────────────────────────────────────

/// Build a nested-form frame `{"type": kind, "payload": payload}`.
pub fn frame(kind: &str, payload: Value) -> String {
    json!({ "type": kind, "payload": payload }).to_string()
}

pub fn error_frame(message: impl Into<String>) -> String {
    frame("error", json!({ "message": message.into() }))
}

pub fn error_frame_with_hint(message: impl Into<String>, hint: Value) -> String {
    frame("error", json!({ "message": message.into(), "hint": hint }))
}

/// Wrapped shape delivered to worker/provider subscribers.
pub fn stream_frame(
    source: &str,
    event: &str,
    payload: &Value,
    provider: &str,
    process_id: &str,
    process_name: &str,
) -> String {
    json!({
        "type": "stream",
        "source": source,
        "event": event,
        "payload": payload,
        "provider": provider,
        "processId": process_id,
        "processName": process_name,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_flat_forms_parse_alike() {
        let nested = Envelope::parse(r#"{"type":"spawn","payload":{"provider":"gemini"}}"#).unwrap();
        let flat = Envelope::parse(r#"{"type":"spawn","provider":"gemini"}"#).unwrap();
        for env in [nested, flat] {
            match ClientCommand::from_envelope(&env).unwrap() {
                ClientCommand::Spawn { provider, .. } => assert_eq!(provider, "gemini"),
                other => panic!("unexpected command: {other:?}"),
            }
        }
    }

    #[test]
    fn payload_wins_over_flat_duplicate() {
        let env = Envelope::parse(
            r#"{"type":"spawn","provider":"claude","payload":{"provider":"gemini"}}"#,
        )
        .unwrap();
        assert_eq!(env.params()["provider"], "gemini");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let env =
            Envelope::parse(r#"{"type":"ping","payload":{"bogus":1},"alsoBogus":true}"#).unwrap();
        assert!(matches!(
            ClientCommand::from_envelope(&env).unwrap(),
            ClientCommand::Ping
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let env = Envelope::parse(r#"{"type":"invalid_xyz"}"#).unwrap();
        let err = ClientCommand::from_envelope(&env).unwrap_err();
        assert!(err.to_string().contains("Unknown"));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let env = Envelope::parse(r#"{"type":"spawn"}"#).unwrap();
        let err = ClientCommand::from_envelope(&env).unwrap_err();
        assert!(err.to_string().contains("provider"));
    }

    #[test]
    fn orchestration_commands_become_forwards() {
        for kind in ORCHESTRATION_FORWARD {
            let env = Envelope::parse(&format!(
                r#"{{"type":"{kind}","payload":{{"processId":"zeus-gemini-4000"}}}}"#
            ))
            .unwrap();
            assert!(matches!(
                ClientCommand::from_envelope(&env).unwrap(),
                ClientCommand::Forward { .. }
            ));
        }
    }

    #[test]
    fn forward_frame_normalizes_to_nested() {
        let env = Envelope::parse(r#"{"type":"chat","provider":"gemini","text":"hi"}"#).unwrap();
        let v: Value = serde_json::from_str(&env.forward_frame()).unwrap();
        assert_eq!(v["type"], "chat");
        assert_eq!(v["payload"]["provider"], "gemini");
        assert_eq!(v["payload"]["text"], "hi");
        assert!(v.get("provider").is_none());
    }
}
