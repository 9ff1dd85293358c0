use crate::value::HostValue;
use layerscope_core_macros::Redacted;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Append entry point of a collection: receives the collection it was invoked
/// on plus the call arguments, returns the new length.
pub type AppendFn = Arc<dyn Fn(&Collection, Vec<HostValue>) -> usize + Send + Sync>;

/// The unhooked append behaviour every fresh collection starts with.
pub fn native_append() -> AppendFn {
    Arc::new(|collection: &Collection, args: Vec<HostValue>| collection.extend_entries(args))
}

#[derive(Redacted)]
struct CollectionState {
    entries: Vec<HostValue>,
    intercepted: bool,
    #[redact]
    append: AppendFn,
    #[redact]
    hook: Option<AppendFn>,
}

/// Shared handle to an append-only collection owned by the monitored
/// environment. Clones share identity.
#[derive(Clone, Debug)]
pub struct Collection {
    state: Arc<Mutex<CollectionState>>,
}

/// What happened when a hook was installed on a collection.
#[derive(Debug)]
pub(crate) struct HookInstall {
    /// False when an existing hook was replaced because the append operation
    /// had been overwritten.
    pub first_hook: bool,
    /// Entries present before the first hook, if any.
    pub pre_existing: Option<Vec<HostValue>>,
}

impl Collection {
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    pub fn from_entries(entries: Vec<HostValue>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectionState {
                entries,
                intercepted: false,
                append: native_append(),
                hook: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call the collection's current append operation.
    ///
    /// The lock is released before the operation runs so hooks and observers
    /// may touch the collection again without deadlocking.
    pub fn push(&self, args: Vec<HostValue>) -> usize {
        let append = self.lock().append.clone();
        append(self, args)
    }

    /// Native append: store the arguments, return the new length.
    pub fn extend_entries(&self, args: Vec<HostValue>) -> usize {
        let mut state = self.lock();
        state.entries.extend(args);
        state.entries.len()
    }

    pub fn append_fn(&self) -> AppendFn {
        self.lock().append.clone()
    }

    /// Overwrite the append operation, the way unrelated page code would.
    pub fn set_append(&self, append: AppendFn) {
        self.lock().append = append;
    }

    pub fn entries(&self) -> Vec<HostValue> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn is_intercepted(&self) -> bool {
        self.lock().intercepted
    }

    /// True when the collection was never hooked, or its append operation was
    /// replaced after hooking.
    pub fn needs_hook(&self) -> bool {
        let state = self.lock();
        match (&state.hook, state.intercepted) {
            (Some(hook), true) => !same_fn(hook, &state.append),
            _ => true,
        }
    }

    pub fn same_as(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Replace the current append operation with `make(current)` and mark the
    /// collection intercepted. Returns `None` when the installed hook is still
    /// in place.
    pub(crate) fn install_hook(
        &self,
        make: impl FnOnce(AppendFn) -> AppendFn,
    ) -> Option<HookInstall> {
        let mut state = self.lock();
        let hooked = matches!(&state.hook, Some(hook) if same_fn(hook, &state.append));
        if state.intercepted && hooked {
            return None;
        }

        let first_hook = !state.intercepted;
        let pre_existing = (first_hook && !state.entries.is_empty()).then(|| state.entries.clone());
        let wrapper = make(state.append.clone());
        state.append = wrapper.clone();
        state.hook = Some(wrapper);
        state.intercepted = true;

        Some(HookInstall {
            first_hook,
            pre_existing,
        })
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

fn same_fn(a: &AppendFn, b: &AppendFn) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_push_returns_new_length() {
        let collection = Collection::new();
        assert_eq!(collection.push(vec![json!({"event": "a"}).into()]), 1);
        assert_eq!(
            collection.push(vec![json!(1).into(), json!(2).into()]),
            3
        );
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn install_hook_reports_pre_existing_entries_once() {
        let collection = Collection::from_entries(vec![json!({"event": "existing"}).into()]);
        let install = collection
            .install_hook(|original| original)
            .expect("first hook installs");
        assert!(install.first_hook);
        assert_eq!(install.pre_existing.map(|e| e.len()), Some(1));

        assert!(collection.install_hook(|original| original).is_none());
        assert!(collection.is_intercepted());
        assert!(!collection.needs_hook());
    }

    #[test]
    fn overwritten_append_needs_hook_again() {
        let collection = Collection::new();
        collection
            .install_hook(|original| original)
            .expect("first hook installs");
        collection.set_append(native_append());
        assert!(collection.needs_hook());

        let rehook = collection
            .install_hook(|original| original)
            .expect("rehook installs");
        assert!(!rehook.first_hook);
        assert!(rehook.pre_existing.is_none());
    }

    #[test]
    fn clones_share_identity() {
        let a = Collection::new();
        let b = a.clone();
        b.push(vec![json!("x").into()]);
        assert!(a.same_as(&b));
        assert_eq!(a.len(), 1);
        assert!(!a.same_as(&Collection::new()));
    }
}
