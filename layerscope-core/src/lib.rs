mod classifier;
mod collection;
mod config;
mod engine;
mod observation;
mod observer;
mod poll;
mod scope;
mod value;

pub use classifier::{
    classify, Classifier, Frame, FrameLayout, Origin, DEFAULT_INSTRUMENTATION_PREFIXES,
};
pub use collection::{native_append, AppendFn, Collection};
pub use config::{
    resolve_collection_name, ConfigError, EngineConfig, DEFAULT_COLLECTION_NAME,
    MAX_POLL_DURATION_MS,
};
pub use engine::{
    backtrace_capture, Engine, EngineBuilder, EngineStatus, GuardMode, InitMode, InitOutcome,
    InitReport, StackCapture,
};
pub use observation::{now_millis, EngineEvent, Initialized, Observation, PreHookSnapshot};
pub use observer::{
    channel_observer, collecting_observer, filter_observer, filter_with, no_op_observer,
    tee_observer, tracing_observer, ObserverFn,
};
pub use poll::PollHandle;
pub use scope::{Accessor, GlobalScope, ScopeError, SlotValue};
pub use value::{snapshot_all, HostValue};
