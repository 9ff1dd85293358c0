use crate::error::RelayError;
use layerscope_core::EngineEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one monitored environment (one loaded page or frame).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

/// Identity of one viewer session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty(value.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                $ty(value)
            }
        }

        impl From<u64> for $ty {
            fn from(value: u64) -> Self {
                $ty(value.to_string())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(InstanceId);
string_id!(SessionId);

/// Messages a viewer sends to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewerMessage {
    /// Bind this session to a monitored instance.
    Init {
        #[serde(rename = "instanceId")]
        instance_id: InstanceId,
    },
}

impl ViewerMessage {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One engine event as handed to a viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub instance_id: InstanceId,
    pub event: EngineEvent,
}

/// Receipt returned to the reporter for every ingested event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub instance_id: InstanceId,
    pub delivered: usize,
    pub failed: usize,
}
