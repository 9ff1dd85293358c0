use crate::observation::EngineEvent;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Observer function type
pub type ObserverFn = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// No-op observer
pub fn no_op_observer() -> ObserverFn {
    Arc::new(|_event: &EngineEvent| {})
}

/// Tracing observer - logs to tracing crate
pub fn tracing_observer() -> ObserverFn {
    Arc::new(move |event: &EngineEvent| match event {
        EngineEvent::PushIntercepted(observation) => {
            let origin = observation
                .origin
                .as_ref()
                .map(|o| format!("{}:{}:{}", o.file, o.line, o.column))
                .unwrap_or_else(|| "-".to_string());
            tracing::info!(
                target: "layerscope-core::push",
                "{}.push({:?}) from {}",
                observation.collection_name,
                observation.arguments,
                origin
            );
        }
        EngineEvent::PreHookSnapshot(snapshot) => {
            tracing::debug!(
                target: "layerscope-core::snapshot",
                "{} had {} entries before hooking",
                snapshot.collection_name,
                snapshot.entries.len()
            );
        }
        EngineEvent::DebuggerInitialized(init) => {
            tracing::debug!(target: "layerscope-core::init", "watching {}", init.collection_name);
        }
    })
}

/// Filter observer - include/exclude kinds
pub fn filter_observer(
    wrapped: ObserverFn,
    include_pushes: bool,
    include_snapshots: bool,
    include_lifecycle: bool,
) -> ObserverFn {
    Arc::new(move |event: &EngineEvent| {
        let should_pass = match event {
            EngineEvent::PushIntercepted(_) => include_pushes,
            EngineEvent::PreHookSnapshot(_) => include_snapshots,
            EngineEvent::DebuggerInitialized(_) => include_lifecycle,
        };

        if should_pass {
            wrapped(event);
        }
    })
}

/// Filter observer with custom predicate
pub fn filter_with<F>(wrapped: ObserverFn, predicate: F) -> ObserverFn
where
    F: Fn(&EngineEvent) -> bool + Send + Sync + 'static,
{
    Arc::new(move |event: &EngineEvent| {
        if predicate(event) {
            wrapped(event);
        }
    })
}

/// Tee observer - call multiple observers
pub fn tee_observer(observers: Vec<ObserverFn>) -> ObserverFn {
    Arc::new(move |event: &EngineEvent| {
        for observer in &observers {
            observer(event);
        }
    })
}

/// Channel observer - forwards a copy of every event; a closed receiver is
/// ignored.
pub fn channel_observer(tx: UnboundedSender<EngineEvent>) -> ObserverFn {
    Arc::new(move |event: &EngineEvent| {
        let _ = tx.send(event.clone());
    })
}

/// Collecting observer - appends every event to a shared buffer.
pub fn collecting_observer(buffer: Arc<Mutex<Vec<EngineEvent>>>) -> ObserverFn {
    Arc::new(move |event: &EngineEvent| {
        buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    })
}
