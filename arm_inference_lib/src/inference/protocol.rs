//! JSON frames exchanged with the inference service.
//!
//! Every WebSocket text message is one frame, tagged by its `type` field.
//! A session starts with `hello` → `ready` (or `rejected`); after that each
//! `observation` is answered by exactly one `action` or `error` carrying the
//! same `request_id`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::Tensor;

pub const PROTOCOL_VERSION: u32 = 1;

/// Frames sent by the robot side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        client_id: Uuid,
        protocol_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        robot_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },
    Observation {
        request_id: u64,
        observation: BTreeMap<String, Tensor>,
        #[serde(default)]
        task: Option<String>,
    },
}

/// Frames sent by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready {
        protocol_version: u32,
        #[serde(default)]
        policy: Option<String>,
    },
    Rejected {
        reason: String,
    },
    Action {
        request_id: u64,
        action: Tensor,
    },
    Error {
        request_id: u64,
        message: String,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Ready { .. } => "ready",
            ServerFrame::Rejected { .. } => "rejected",
            ServerFrame::Action { .. } => "action",
            ServerFrame::Error { .. } => "error",
        }
    }
}
