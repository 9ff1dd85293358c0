use crate::classifier::Origin;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One captured append call. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub collection_name: String,
    pub timestamp_millis: u64,
    pub arguments: Vec<Value>,
    pub origin: Option<Origin>,
}

/// Entries that were already in the collection when it was first hooked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreHookSnapshot {
    pub collection_name: String,
    pub timestamp_millis: u64,
    pub entries: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialized {
    pub collection_name: String,
    pub timestamp_millis: u64,
}

/// Messages the engine sends across the isolation boundary.
///
/// Serialized with a `type` tag so every consumer can dispatch on the kind
/// without knowing the payload shape up front.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    PushIntercepted(Observation),
    PreHookSnapshot(PreHookSnapshot),
    DebuggerInitialized(Initialized),
}

impl EngineEvent {
    pub fn collection_name(&self) -> &str {
        match self {
            EngineEvent::PushIntercepted(o) => &o.collection_name,
            EngineEvent::PreHookSnapshot(s) => &s.collection_name,
            EngineEvent::DebuggerInitialized(i) => &i.collection_name,
        }
    }

    pub fn timestamp_millis(&self) -> u64 {
        match self {
            EngineEvent::PushIntercepted(o) => o.timestamp_millis,
            EngineEvent::PreHookSnapshot(s) => s.timestamp_millis,
            EngineEvent::DebuggerInitialized(i) => i.timestamp_millis,
        }
    }

    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::PushIntercepted(_) => "PUSH_INTERCEPTED",
            EngineEvent::PreHookSnapshot(_) => "PRE_HOOK_SNAPSHOT",
            EngineEvent::DebuggerInitialized(_) => "DEBUGGER_INITIALIZED",
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}
