use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use layerscope_core::{
    collecting_observer, Collection, Engine, EngineConfig, EngineEvent, GlobalScope, HostValue,
    InitOutcome, PollHandle, SlotValue,
};
use serde_json::json;
use tokio::runtime::Builder;

fn runtime() -> tokio::runtime::Runtime {
    Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

fn engine(scope: &Arc<GlobalScope>, events: &Arc<Mutex<Vec<EngineEvent>>>) -> Engine {
    let config = EngineConfig {
        poll_interval_ms: 50,
        poll_duration_ms: 1_000,
        ..EngineConfig::default()
    };
    Engine::builder(config, Arc::clone(scope))
        .with_observer(collecting_observer(Arc::clone(events)))
        .with_stack_capture(Arc::new(|| None))
        .build()
}

fn current(scope: &GlobalScope) -> Collection {
    match scope.read("dataLayer") {
        Some(SlotValue::Collection(c)) => c,
        other => panic!("unexpected binding {other:?}"),
    }
}

#[test]
fn poll_hooks_collection_created_behind_the_setter() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    runtime().block_on(async {
        tokio::time::pause();
        let scope = Arc::new(GlobalScope::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(&scope, &events);

        let report = engine.initialize();
        assert!(matches!(
            report.outcome,
            InitOutcome::Ready {
                poll_started: true,
                ..
            }
        ));

        scope
            .redefine(
                "dataLayer",
                Collection::from_entries(vec![HostValue::Data(json!({"event": "gtm.js"}))]),
            )
            .unwrap();
        assert!(!current(&scope).is_intercepted());

        // Virtual time auto-advances through the first poll tick.
        tokio::time::sleep(Duration::from_millis(75)).await;

        assert!(current(&scope).is_intercepted());
        assert!(scope.has_accessor("dataLayer"));
        current(&scope).push(vec![HostValue::Data(json!({"event": "late"}))]);

        let kinds: Vec<&str> = events.lock().unwrap().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["DEBUGGER_INITIALIZED", "PRE_HOOK_SNAPSHOT", "PUSH_INTERCEPTED"]
        );
    });
}

#[test]
fn poll_stops_after_its_bound() {
    runtime().block_on(async {
        tokio::time::pause();
        let scope = Arc::new(GlobalScope::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(&scope, &events);
        engine.initialize();
        assert!(engine.status().poll_running);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!engine.status().poll_running);

        // Past the bound nothing reconciles a bypassing redefinition.
        scope.redefine("dataLayer", Collection::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!current(&scope).is_intercepted());
    });
}

#[test]
fn stop_poll_cancels_early() {
    runtime().block_on(async {
        tokio::time::pause();
        let scope = Arc::new(GlobalScope::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(&scope, &events);
        engine.initialize();

        engine.stop_poll();
        scope.redefine("dataLayer", Collection::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!engine.status().poll_running);
        assert!(!current(&scope).is_intercepted());
    });
}

#[test]
fn poll_handle_ticks_until_released() {
    runtime().block_on(async {
        tokio::time::pause();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = PollHandle::spawn(
            Duration::from_millis(10),
            Duration::from_secs(10),
            move || counter.fetch_add(1, Ordering::Relaxed) < 2,
        )
        .expect("inside runtime");

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.is_finished());
        assert_eq!(handle.ticks(), 3);
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    });
}

#[test]
fn invalid_poll_timing_skips_the_poll_without_panicking() {
    runtime().block_on(async {
        tokio::time::pause();
        for (interval, duration) in [(0, 1_000), (50, u64::MAX)] {
            let scope = Arc::new(GlobalScope::new());
            let events = Arc::new(Mutex::new(Vec::new()));
            let config = EngineConfig {
                poll_interval_ms: interval,
                poll_duration_ms: duration,
                ..EngineConfig::default()
            };
            let engine = Engine::builder(config, Arc::clone(&scope))
                .with_observer(collecting_observer(Arc::clone(&events)))
                .with_stack_capture(Arc::new(|| None))
                .build();

            let report = engine.initialize();
            assert!(matches!(
                report.outcome,
                InitOutcome::Ready {
                    poll_started: false,
                    ..
                }
            ));
            assert!(!engine.status().poll_running);

            current(&scope).push(vec![HostValue::Data(json!({"event": "still observed"}))]);
            assert_eq!(events.lock().unwrap().len(), 2);
        }
    });
}
