//! The monitored environment's global namespace.
//!
//! Bindings are either plain values or accessor pairs. Plain assignment goes
//! through an installed setter; `redefine` replaces the binding outright and
//! bypasses it, the way a property redefinition would.

use crate::collection::Collection;
use crate::value::HostValue;
use layerscope_core_macros::Redacted;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Whatever currently occupies a binding.
#[derive(Clone, Debug)]
pub enum SlotValue {
    /// Array-like ordered collection.
    Collection(Collection),
    Other(HostValue),
}

impl SlotValue {
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            SlotValue::Collection(collection) => Some(collection),
            SlotValue::Other(_) => None,
        }
    }
}

impl From<Collection> for SlotValue {
    fn from(collection: Collection) -> Self {
        SlotValue::Collection(collection)
    }
}

impl From<HostValue> for SlotValue {
    fn from(value: HostValue) -> Self {
        SlotValue::Other(value)
    }
}

/// Getter/setter pair installed on a binding.
pub trait Accessor: Send + Sync {
    fn get(&self) -> Option<SlotValue>;
    fn set(&self, value: SlotValue);
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("binding `{name}` is not configurable")]
    NonConfigurable { name: String },
}

#[derive(Clone, Redacted)]
enum Binding {
    Plain {
        value: SlotValue,
        configurable: bool,
    },
    Accessor {
        #[redact]
        accessor: Arc<dyn Accessor>,
        configurable: bool,
    },
}

impl Binding {
    fn configurable(&self) -> bool {
        match self {
            Binding::Plain { configurable, .. } | Binding::Accessor { configurable, .. } => {
                *configurable
            }
        }
    }
}

#[derive(Default)]
pub struct GlobalScope {
    bindings: Mutex<HashMap<String, Binding>>,
    installed: Mutex<HashSet<String>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a binding, running its getter if it has one.
    pub fn read(&self, name: &str) -> Option<SlotValue> {
        let binding = self.bindings().get(name).cloned()?;
        match binding {
            Binding::Plain { value, .. } => Some(value),
            Binding::Accessor { accessor, .. } => accessor.get(),
        }
    }

    /// Ordinary assignment (`name = value`). Creates a configurable binding
    /// when none exists.
    pub fn assign(&self, name: &str, value: impl Into<SlotValue>) {
        let value = value.into();
        let mut bindings = self.bindings();
        match bindings.get(name) {
            Some(Binding::Accessor { accessor, .. }) => {
                let accessor = Arc::clone(accessor);
                drop(bindings);
                accessor.set(value);
            }
            Some(Binding::Plain { configurable, .. }) => {
                let configurable = *configurable;
                bindings.insert(
                    name.to_string(),
                    Binding::Plain {
                        value,
                        configurable,
                    },
                );
            }
            None => {
                bindings.insert(
                    name.to_string(),
                    Binding::Plain {
                        value,
                        configurable: true,
                    },
                );
            }
        }
    }

    /// Variable declaration: a plain binding that can never be redefined.
    pub fn declare(&self, name: &str, value: impl Into<SlotValue>) {
        self.bindings().insert(
            name.to_string(),
            Binding::Plain {
                value: value.into(),
                configurable: false,
            },
        );
    }

    pub fn define_accessor(
        &self,
        name: &str,
        accessor: Arc<dyn Accessor>,
        configurable: bool,
    ) -> Result<(), ScopeError> {
        let mut bindings = self.bindings();
        if bindings.get(name).is_some_and(|b| !b.configurable()) {
            return Err(ScopeError::NonConfigurable {
                name: name.to_string(),
            });
        }
        bindings.insert(
            name.to_string(),
            Binding::Accessor {
                accessor,
                configurable,
            },
        );
        Ok(())
    }

    /// Replace the binding with a plain value, bypassing any setter.
    pub fn redefine(&self, name: &str, value: impl Into<SlotValue>) -> Result<(), ScopeError> {
        let mut bindings = self.bindings();
        if bindings.get(name).is_some_and(|b| !b.configurable()) {
            return Err(ScopeError::NonConfigurable {
                name: name.to_string(),
            });
        }
        bindings.insert(
            name.to_string(),
            Binding::Plain {
                value: value.into(),
                configurable: true,
            },
        );
        Ok(())
    }

    pub fn has_accessor(&self, name: &str) -> bool {
        matches!(self.bindings().get(name), Some(Binding::Accessor { .. }))
    }

    /// True when the binding holds a plain value that may be turned into an
    /// accessor.
    pub fn is_plain_configurable(&self, name: &str) -> bool {
        matches!(
            self.bindings().get(name),
            Some(Binding::Plain {
                configurable: true,
                ..
            })
        )
    }

    /// Record that an engine has claimed `name`. Returns false when one
    /// already had.
    pub fn mark_installed(&self, name: &str) -> bool {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }
}
