//! Wire shapes for the JSON-RPC 2.0 conversation with the agent subprocess.
//!
//! Mirrors the constructor-pair idiom of `skynet_protocol::frames` (`ok()` /
//! `err()` builders, a permissive inbound shape that is re-classified after
//! parsing) but reshaped from skynet's websocket envelope to plain
//! line-delimited JSON-RPC 2.0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A request/notification id. JSON-RPC permits string or number ids; we
/// additionally use it internally for our own monotonically increasing
/// integer ids on outbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcId::Number(n) => write!(f, "{n}"),
            RpcId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RpcId {
    fn from(v: u64) -> Self {
        RpcId::Number(v as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: RpcId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn ok(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<RpcId>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Permissive inbound shape: every field optional, classified by
/// [`RawMessage::classify`] after a successful parse. Mirrors
/// `skynet_protocol::frames::InboundFrame`'s parse-then-reclassify idiom,
/// adapted from a `type`-discriminated envelope to bare JSON-RPC field
/// presence.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub jsonrpc: Option<String>,
    pub id: Option<RpcId>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone)]
pub enum Classified {
    Request {
        id: RpcId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RpcId,
        result: Option<Value>,
        error: Option<RpcErrorObject>,
    },
    /// Present but missing `jsonrpc: "2.0"` or otherwise unrecognizable.
    Invalid {
        id: Option<RpcId>,
    },
}

impl RawMessage {
    pub fn classify(self) -> Classified {
        if self.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Classified::Invalid { id: self.id };
        }
        match (self.id, self.method, self.result, self.error) {
            (Some(id), Some(method), _, _) => Classified::Request { id, method, params: self.params },
            (None, Some(method), _, _) => Classified::Notification { method, params: self.params },
            (Some(id), None, result, error) if result.is_some() || error.is_some() => {
                Classified::Response { id, result, error }
            }
            (id, _, _, _) => Classified::Invalid { id },
        }
    }
}
