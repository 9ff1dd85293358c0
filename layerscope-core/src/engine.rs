//! Interception engine.
//!
//! Hooks the append operation of the collection bound to one global name,
//! keeps the hook in place across reassignment and late creation, and emits
//! an [`EngineEvent`] for every call. The engine only observes: arguments
//! reach the original append untouched and its return value is handed back
//! unchanged.

use crate::classifier::Classifier;
use crate::collection::{AppendFn, Collection};
use crate::config::EngineConfig;
use crate::observation::{now_millis, EngineEvent, Initialized, Observation, PreHookSnapshot};
use crate::observer::{no_op_observer, ObserverFn};
use crate::poll::PollHandle;
use crate::scope::{Accessor, GlobalScope, SlotValue};
use crate::value::{snapshot_all, HostValue};
use layerscope_core_macros::Redacted;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Produces the raw stack text for the current call, if the host can.
pub type StackCapture = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Symbol of the append entry point every hooked call passes through.
const APPEND_SYMBOL: &str = "layerscope_core::collection::Collection::push";

/// Capture the calling thread's backtrace as `at name (file:line:column)`
/// lines, starting at the append call so the caller is the second frame.
///
/// Symbol resolution walks the whole backtrace on every push; hosts that need
/// cheaper pushes should supply their own capture.
pub fn backtrace_capture() -> StackCapture {
    Arc::new(|| Some(caller_relative(&Backtrace::force_capture().to_string())))
}

/// Rewrite std's numbered frame listing, dropping every frame inside the hook.
fn caller_relative(trace: &str) -> String {
    let mut frames: Vec<(&str, Option<&str>)> = Vec::new();
    for line in trace.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some((_, slot @ None)) = frames.last_mut() {
                *slot = Some(location);
            }
        } else if let Some((index, symbol)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                frames.push((symbol, None));
            }
        }
    }

    let start = frames
        .iter()
        .rposition(|(symbol, _)| symbol.starts_with(APPEND_SYMBOL))
        .unwrap_or(0);
    let mut out = String::from("Error");
    for (symbol, location) in &frames[start..] {
        out.push_str("\n    at ");
        out.push_str(symbol);
        if let Some(location) = location {
            out.push_str(" (");
            out.push_str(location);
            out.push(')');
        }
    }
    out
}

/// What `initialize` found in the binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitMode {
    Wrapped,
    AlreadyIntercepted,
    CreatedEmpty,
    /// The binding held something that is not a collection.
    LeftUntouched,
}

/// Whether reassignment of the binding is trapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardMode {
    Installed,
    /// The binding could not take an accessor; only the one-shot wrap and the
    /// poll protect it.
    Degraded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    AlreadyInitialized,
    Ready {
        mode: InitMode,
        guard: GuardMode,
        poll_started: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitReport {
    pub collection_name: String,
    pub outcome: InitOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub collection_name: String,
    pub initialized: bool,
    pub guard: Option<GuardMode>,
    pub poll_running: bool,
}

/// Shared state behind every hooked append operation.
#[derive(Redacted)]
struct Hook {
    collection_name: String,
    classifier: Classifier,
    #[redact]
    scope: Weak<GlobalScope>,
    #[redact]
    observer: ObserverFn,
    #[redact]
    stack: StackCapture,
}

impl Hook {
    fn emit(&self, event: EngineEvent) {
        if catch_unwind(AssertUnwindSafe(|| (self.observer)(&event))).is_err() {
            tracing::warn!(
                target: "layerscope-core::engine",
                "observer panicked while handling {}; event dropped",
                event.kind()
            );
        }
    }

    /// Only the collection currently bound to the name is observed; pushes to
    /// a replaced collection go through silently.
    fn is_active(&self, target: &Collection) -> bool {
        let Some(scope) = self.scope.upgrade() else {
            return false;
        };
        matches!(
            scope.read(&self.collection_name),
            Some(SlotValue::Collection(current)) if current.same_as(target)
        )
    }

    fn record_push(&self, target: &Collection, args: &[HostValue]) {
        let stack = catch_unwind(AssertUnwindSafe(|| (self.stack)()))
            .ok()
            .flatten();
        if !self.is_active(target) {
            return;
        }
        let origin = stack.map(|text| self.classifier.classify(&text));
        self.emit(EngineEvent::PushIntercepted(Observation {
            collection_name: self.collection_name.clone(),
            timestamp_millis: now_millis(),
            arguments: snapshot_all(args),
            origin,
        }));
    }

    /// Hook `collection`'s append operation. Returns false when the installed
    /// hook is still current.
    fn wrap(self: &Arc<Self>, collection: &Collection) -> bool {
        let hook = Arc::clone(self);
        let install = collection.install_hook(move |original: AppendFn| -> AppendFn {
            Arc::new(move |target: &Collection, args: Vec<HostValue>| {
                hook.record_push(target, &args);
                original(target, args)
            })
        });

        let Some(install) = install else {
            return false;
        };

        if let Some(entries) = install.pre_existing {
            self.emit(EngineEvent::PreHookSnapshot(PreHookSnapshot {
                collection_name: self.collection_name.clone(),
                timestamp_millis: now_millis(),
                entries: snapshot_all(&entries),
            }));
        }
        tracing::debug!(
            target: "layerscope-core::engine",
            "{} {}",
            if install.first_hook { "hooked" } else { "re-hooked overwritten append on" },
            self.collection_name
        );
        true
    }
}

/// Accessor that stands in for the plain binding: every collection assigned
/// through it is hooked before it becomes visible.
#[derive(Redacted)]
struct ReassignmentGuard {
    active: Mutex<Option<SlotValue>>,
    #[redact]
    hook: Arc<Hook>,
}

impl ReassignmentGuard {
    fn new(hook: Arc<Hook>, current: Option<SlotValue>) -> Self {
        Self {
            active: Mutex::new(current),
            hook,
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<SlotValue>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Accessor for ReassignmentGuard {
    fn get(&self) -> Option<SlotValue> {
        self.active().clone()
    }

    fn set(&self, value: SlotValue) {
        if let SlotValue::Collection(collection) = &value {
            if collection.needs_hook() {
                self.hook.wrap(collection);
            }
        }
        *self.active() = Some(value);
    }
}

#[derive(Default)]
struct EngineState {
    initialized: bool,
    guard: Option<GuardMode>,
    poll: Option<PollHandle>,
}

struct EngineInner {
    config: EngineConfig,
    scope: Arc<GlobalScope>,
    hook: Arc<Hook>,
    state: Mutex<EngineState>,
}

impl EngineInner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name(&self) -> &str {
        &self.config.collection_name
    }

    fn install_guard(&self) -> GuardMode {
        let guard = Arc::new(ReassignmentGuard::new(
            Arc::clone(&self.hook),
            self.scope.read(self.name()),
        ));
        match self.scope.define_accessor(self.name(), guard, true) {
            Ok(()) => GuardMode::Installed,
            Err(err) => {
                tracing::warn!(
                    target: "layerscope-core::engine",
                    "{err}; continuing without reassignment protection"
                );
                if let Some(SlotValue::Collection(collection)) = self.scope.read(self.name()) {
                    self.hook.wrap(&collection);
                }
                GuardMode::Degraded
            }
        }
    }

    /// One poll tick: hook whatever collection now sits in the binding and put
    /// the guard back if the binding was redefined underneath it.
    fn reconcile(&self) -> bool {
        let mut changed = false;
        if let Some(SlotValue::Collection(collection)) = self.scope.read(self.name()) {
            if collection.needs_hook() {
                changed |= self.hook.wrap(&collection);
            }
        }
        let guarded = self.state().guard == Some(GuardMode::Installed);
        if guarded && self.scope.is_plain_configurable(self.name()) {
            tracing::debug!(
                target: "layerscope-core::engine",
                "guard on {} was replaced; reinstalling",
                self.name()
            );
            changed |= self.install_guard() == GuardMode::Installed;
        }
        changed
    }
}

#[derive(Redacted)]
pub struct EngineBuilder {
    config: EngineConfig,
    #[redact]
    scope: Arc<GlobalScope>,
    #[redact]
    observer: ObserverFn,
    #[redact]
    stack: StackCapture,
    classifier: Option<Classifier>,
}

impl EngineBuilder {
    pub fn with_observer(mut self, observer: ObserverFn) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stack_capture(mut self, stack: StackCapture) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Engine {
        let classifier = self
            .classifier
            .unwrap_or_else(|| Classifier::new(self.config.instrumentation_prefixes.iter().cloned()));
        let hook = Arc::new(Hook {
            collection_name: self.config.collection_name.clone(),
            classifier,
            scope: Arc::downgrade(&self.scope),
            observer: self.observer,
            stack: self.stack,
        });
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                scope: self.scope,
                hook,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }
}

pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(config: EngineConfig, scope: Arc<GlobalScope>) -> EngineBuilder {
        EngineBuilder {
            config,
            scope,
            observer: no_op_observer(),
            stack: backtrace_capture(),
            classifier: None,
        }
    }

    pub fn collection_name(&self) -> &str {
        self.inner.name()
    }

    /// Start watching the configured name. Idempotent per scope and name.
    pub fn initialize(&self) -> InitReport {
        let inner = &self.inner;
        let name = inner.name().to_string();

        if !inner.scope.mark_installed(&name) {
            tracing::debug!(target: "layerscope-core::engine", "{name} already watched");
            return InitReport {
                collection_name: name,
                outcome: InitOutcome::AlreadyInitialized,
            };
        }

        let mode = match inner.scope.read(&name) {
            Some(SlotValue::Collection(collection)) => {
                if inner.hook.wrap(&collection) {
                    InitMode::Wrapped
                } else {
                    InitMode::AlreadyIntercepted
                }
            }
            Some(SlotValue::Other(_)) => InitMode::LeftUntouched,
            None => {
                let collection = Collection::new();
                inner.hook.wrap(&collection);
                inner.scope.assign(&name, collection);
                InitMode::CreatedEmpty
            }
        };

        let guard = inner.install_guard();

        let poll = match inner.config.validate() {
            Ok(()) => {
                let weak = Arc::downgrade(inner);
                let poll = PollHandle::spawn(
                    inner.config.poll_interval(),
                    inner.config.poll_duration(),
                    move || match weak.upgrade() {
                        Some(inner) => {
                            inner.reconcile();
                            true
                        }
                        None => false,
                    },
                );
                if poll.is_none() {
                    tracing::warn!(
                        target: "layerscope-core::engine",
                        "no async runtime; late-creation poll for {name} not started"
                    );
                }
                poll
            }
            Err(err) => {
                tracing::warn!(
                    target: "layerscope-core::engine",
                    "{err}; late-creation poll for {name} not started"
                );
                None
            }
        };
        let poll_started = poll.is_some();

        {
            let mut state = inner.state();
            state.initialized = true;
            state.guard = Some(guard);
            state.poll = poll;
        }

        inner.hook.emit(EngineEvent::DebuggerInitialized(Initialized {
            collection_name: name.clone(),
            timestamp_millis: now_millis(),
        }));
        tracing::info!(
            target: "layerscope-core::engine",
            "watching {name} ({mode:?}, guard {guard:?})"
        );

        InitReport {
            collection_name: name,
            outcome: InitOutcome::Ready {
                mode,
                guard,
                poll_started,
            },
        }
    }

    /// Hook a collection directly. Returns false if it was already hooked.
    pub fn wrap(&self, collection: &Collection) -> bool {
        self.inner.hook.wrap(collection)
    }

    /// Run one reconciliation pass outside the poll.
    pub fn reconcile(&self) -> bool {
        self.inner.reconcile()
    }

    /// Cancel the late-creation poll ahead of its bound.
    pub fn stop_poll(&self) {
        if let Some(poll) = self.inner.state().poll.take() {
            poll.cancel();
        }
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.inner.state();
        EngineStatus {
            collection_name: self.inner.name().to_string(),
            initialized: state.initialized,
            guard: state.guard,
            poll_running: state.poll.as_ref().is_some_and(|p| !p.is_finished()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_poll();
    }
}
