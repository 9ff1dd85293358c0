use serde_json::Value;

/// A value living inside the monitored environment.
///
/// Only `Data` survives a structural copy. Everything else (functions, host
/// objects, cyclic graphs) is `Opaque` and carries the text the host would
/// print for it.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Data(Value),
    Opaque { repr: String },
}

impl HostValue {
    pub fn opaque(repr: impl Into<String>) -> Self {
        HostValue::Opaque { repr: repr.into() }
    }

    /// Deep, JSON-safe copy. Opaque values degrade to their string form.
    pub fn snapshot(&self) -> Value {
        match self {
            HostValue::Data(value) => value.clone(),
            HostValue::Opaque { repr } => Value::String(repr.clone()),
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            HostValue::Data(value) => Some(value),
            HostValue::Opaque { .. } => None,
        }
    }
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        HostValue::Data(value)
    }
}

/// Snapshot a run of values, preserving order.
pub fn snapshot_all(values: &[HostValue]) -> Vec<Value> {
    values.iter().map(HostValue::snapshot).collect()
}
