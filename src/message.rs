//! Wire types for the newline-delimited JSON node protocol
//!
//! Every line on stdin/stdout is one [`Envelope`]. Bodies are tagged by their
//! `type` field; `msg_id` and `in_reply_to` carry request/response
//! correlation and are shared by every payload kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::AxonError;

/// A broadcast value. Identity is value equality.
pub type Message = i64;

/// Identifier of a node or client in the cluster (`"n1"`, `"c4"`, ...)
pub type NodeId = String;

/// Error codes understood by the cluster harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ErrorCode {
    Timeout,
    NodeNotFound,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    PreconditionFailed,
    Other(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            22 => Self::PreconditionFailed,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NodeNotFound => 1,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::PreconditionFailed => 22,
            ErrorCode::Other(other) => other,
        }
    }
}

/// Request and response payloads, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Echo {
        echo: Value,
    },
    EchoOk {
        echo: Value,
    },
    Generate,
    GenerateOk {
        id: u64,
    },
    Broadcast {
        message: Message,
    },
    BroadcastOk,
    Read,
    ReadOk {
        messages: Vec<Message>,
    },
    Topology {
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
    TopologyOk,
    Error {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl Payload {
    /// Every `type` tag this node can decode
    pub const KINDS: &'static [&'static str] = &[
        "init",
        "init_ok",
        "echo",
        "echo_ok",
        "generate",
        "generate_ok",
        "broadcast",
        "broadcast_ok",
        "read",
        "read_ok",
        "topology",
        "topology_ok",
        "error",
    ];

    /// Build an `error` payload from a handler failure
    pub fn error(err: &AxonError) -> Self {
        Self::Error {
            code: err.code(),
            text: Some(err.to_string()),
        }
    }
}

/// Message body: correlation ids plus the typed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Body {
    /// Decode a body, separating unknown kinds from malformed known ones
    pub fn decode(value: Value) -> Result<Self, AxonError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AxonError::malformed("body has no string `type` field"))?
            .to_owned();

        if !Payload::KINDS.contains(&kind.as_str()) {
            return Err(AxonError::unsupported(kind));
        }

        serde_json::from_value(value).map_err(|e| AxonError::malformed(format!("{kind}: {e}")))
    }

    /// The `type` tag of this body
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Echo { .. } => "echo",
            Payload::EchoOk { .. } => "echo_ok",
            Payload::Generate => "generate",
            Payload::GenerateOk { .. } => "generate_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Error { .. } => "error",
        }
    }
}

/// One line of the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Envelope {
    /// Serialize to a single protocol line, without the trailing newline
    pub fn to_line(&self) -> Result<String, AxonError> {
        Ok(serde_json::to_string(self)?)
    }

    /// True when this envelope answers an earlier request
    pub fn is_response(&self) -> bool {
        self.body.in_reply_to.is_some()
    }
}

/// Envelope whose body has not been decoded yet
///
/// Decoding happens in two steps so that a request with a bad body can still
/// be answered with an `error` reply addressed to its sender.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Value,
}

impl RawEnvelope {
    /// Parse a protocol line
    pub fn parse(line: &str) -> Result<Self, AxonError> {
        serde_json::from_str(line).map_err(|e| AxonError::malformed(e.to_string()))
    }

    /// `msg_id` of the request, if it carried a valid one
    pub fn msg_id(&self) -> Option<u64> {
        self.body.get("msg_id").and_then(Value::as_u64)
    }

    /// True when the body answers an earlier request
    pub fn is_response(&self) -> bool {
        self.body.get("in_reply_to").is_some_and(|v| !v.is_null())
    }

    /// Decode the body into a typed envelope
    pub fn decode(self) -> Result<Envelope, AxonError> {
        Ok(Envelope {
            src: self.src,
            dest: self.dest,
            body: Body::decode(self.body)?,
        })
    }
}
