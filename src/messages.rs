// Message types exchanged with the RPC runtime

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request from a client -> runtime
// `args` are positional, motors are given by name or index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: u64,
    pub func: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

// Reply from runtime -> client, one per request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcReply {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind, e.g. "MotorFault" or "UnknownMotor"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Decoded status of a faulting motor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl RpcReply {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result,
            error: None,
            kind: None,
            status: None,
        }
    }

    pub fn failure(id: u64, error: String, kind: &str) -> Self {
        Self {
            id,
            ok: false,
            result: Value::Null,
            error: Some(error),
            kind: Some(kind.to_string()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<Value>) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: RpcRequest = serde_json::from_str(r#"{"func": "reboot"}"#).unwrap();
        assert_eq!(request.id, 0);
        assert!(request.args.is_empty());
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let reply = serde_json::to_value(RpcReply::success(3, Value::Null)).unwrap();
        assert_eq!(reply, json!({"id": 3, "ok": true}));

        let reply = serde_json::to_value(RpcReply::failure(4, "boom".into(), "Bus")).unwrap();
        assert_eq!(reply, json!({"id": 4, "ok": false, "error": "boom", "kind": "Bus"}));
    }
}
