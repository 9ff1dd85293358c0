//! Per-instance fan-out of engine events to viewer sessions.
//!
//! Sessions are owned by the session table; each instance's channel is an
//! ordered list of the session ids bound to it. Channels disappear as soon as
//! their last session leaves. Events for an instance with no channel are
//! dropped, never queued. A session whose transport was lost keeps its record,
//! without the transport, until a viewer binds to the same instance again.

use crate::error::RelayError;
use crate::session::{ConnectionState, ViewerSession, ViewerTransport};
use crate::wire::{Ack, Delivery, InstanceId, SessionId};
use layerscope_core::EngineEvent;
use layerscope_core_macros::Redacted;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Redacted)]
struct SessionEntry {
    session: ViewerSession,
    #[redact]
    transport: Option<Arc<dyn ViewerTransport>>,
    /// Instance the session was watching when its transport went away.
    lost_from: Option<InstanceId>,
}

#[derive(Default, Redacted)]
pub struct Multiplexer {
    channels: HashMap<InstanceId, Vec<SessionId>>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a session in the `connecting` state. Any binding the
    /// id previously had is dropped.
    pub fn begin_session(&mut self, session_id: SessionId, transport: Arc<dyn ViewerTransport>) {
        self.detach(&session_id);
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                session: ViewerSession {
                    session_id,
                    bound_instance: None,
                    state: ConnectionState::Connecting,
                },
                transport: Some(transport),
                lost_from: None,
            },
        );
    }

    /// Bind a session to an instance's channel and mark it connected.
    pub fn bind(&mut self, session_id: &SessionId, instance_id: InstanceId) -> Result<(), RelayError> {
        if !self.sessions.contains_key(session_id) {
            return Err(RelayError::UnknownSession(session_id.clone()));
        }
        self.detach(session_id);

        self.reap_lost(&instance_id, session_id);
        let channel = self.channels.entry(instance_id.clone()).or_default();
        channel.push(session_id.clone());

        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.session.bound_instance = Some(instance_id);
            entry.session.state = ConnectionState::Connected;
            entry.lost_from = None;
        }
        Ok(())
    }

    pub fn register_viewer(
        &mut self,
        session_id: SessionId,
        instance_id: InstanceId,
        transport: Arc<dyn ViewerTransport>,
    ) {
        self.begin_session(session_id.clone(), transport);
        // begin_session just inserted the id, so bind cannot miss it.
        let _ = self.bind(&session_id, instance_id);
        tracing::debug!(target: "layerscope-relay::mux", "viewer {session_id} registered");
    }

    /// Deliver `event` to every session bound to `instance_id`. Always
    /// acknowledges, even when nobody is listening.
    pub fn ingest(&mut self, instance_id: &InstanceId, event: &EngineEvent) -> Ack {
        let targets: Vec<(SessionId, Arc<dyn ViewerTransport>)> = self
            .channels
            .get(instance_id)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                let transport = self.sessions.get(id)?.transport.as_ref()?;
                Some((id.clone(), Arc::clone(transport)))
            })
            .collect();

        let mut ack = Ack {
            instance_id: instance_id.clone(),
            delivered: 0,
            failed: 0,
        };
        if targets.is_empty() {
            return ack;
        }

        let delivery = Delivery {
            instance_id: instance_id.clone(),
            event: event.clone(),
        };
        let mut lost = Vec::new();
        for (session_id, transport) in targets {
            match transport.deliver(&delivery) {
                Ok(()) => ack.delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        target: "layerscope-relay::mux",
                        "delivery to viewer {session_id} failed: {err}"
                    );
                    ack.failed += 1;
                    lost.push(session_id);
                }
            }
        }

        for session_id in lost {
            self.transport_lost(&session_id);
        }
        ack
    }

    /// Forget a session entirely. Returns false for unknown ids.
    pub fn unregister_viewer(&mut self, session_id: &SessionId) -> bool {
        self.detach(session_id);
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::debug!(target: "layerscope-relay::mux", "viewer {session_id} unregistered");
        }
        removed
    }

    /// Mark a session disconnected and discard its binding. The record stays
    /// until the viewer re-registers or unregisters.
    pub fn transport_lost(&mut self, session_id: &SessionId) {
        let lost_from = self.detach(session_id);
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.session.state = ConnectionState::Disconnected;
            entry.transport = None;
            if lost_from.is_some() {
                entry.lost_from = lost_from;
            }
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&ViewerSession> {
        self.sessions.get(session_id).map(|entry| &entry.session)
    }

    pub fn session_state(&self, session_id: &SessionId) -> Option<ConnectionState> {
        self.session(session_id).map(|s| s.state)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn viewers_of(&self, instance_id: &InstanceId) -> Vec<SessionId> {
        self.channels.get(instance_id).cloned().unwrap_or_default()
    }

    /// Remove a session from its channel, dropping the channel if it empties.
    /// Returns the instance it was bound to.
    fn detach(&mut self, session_id: &SessionId) -> Option<InstanceId> {
        let instance_id = self
            .sessions
            .get_mut(session_id)
            .and_then(|entry| entry.session.bound_instance.take())?;
        if let Some(channel) = self.channels.get_mut(&instance_id) {
            channel.retain(|id| id != session_id);
            if channel.is_empty() {
                self.channels.remove(&instance_id);
            }
        }
        Some(instance_id)
    }

    /// Drop disconnected records left behind by earlier viewers of
    /// `instance_id`; a new binding means the viewer has come back.
    fn reap_lost(&mut self, instance_id: &InstanceId, binding: &SessionId) {
        let before = self.sessions.len();
        self.sessions.retain(|id, entry| {
            id == binding
                || entry.session.state != ConnectionState::Disconnected
                || entry.lost_from.as_ref() != Some(instance_id)
        });
        let reaped = before - self.sessions.len();
        if reaped > 0 {
            tracing::debug!(
                target: "layerscope-relay::mux",
                "reaped {reaped} disconnected viewer(s) of {instance_id}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use layerscope_core::{Initialized, Observation};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Delivery>>,
        broken: bool,
    }

    impl ViewerTransport for Recorder {
        fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
            if self.broken {
                return Err(DeliveryError::Closed);
            }
            self.seen.lock().unwrap().push(delivery.clone());
            Ok(())
        }
    }

    fn push(n: i64) -> EngineEvent {
        EngineEvent::PushIntercepted(Observation {
            collection_name: "dataLayer".into(),
            timestamp_millis: 0,
            arguments: vec![json!({"n": n})],
            origin: None,
        })
    }

    #[test]
    fn ingest_without_viewers_still_acknowledges() {
        let mut mux = Multiplexer::new();
        let ack = mux.ingest(&"tab-1".into(), &push(1));
        assert_eq!(ack.delivered, 0);
        assert_eq!(ack.failed, 0);
        assert_eq!(mux.channel_count(), 0);
    }

    #[test]
    fn fan_out_then_unregister_one() {
        let mut mux = Multiplexer::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        mux.register_viewer("a".into(), "tab-1".into(), a.clone());
        mux.register_viewer("b".into(), "tab-1".into(), b.clone());

        assert_eq!(mux.ingest(&"tab-1".into(), &push(1)).delivered, 2);
        assert!(mux.unregister_viewer(&"a".into()));
        assert_eq!(mux.ingest(&"tab-1".into(), &push(2)).delivered, 1);

        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_delivery_does_not_stop_the_rest() {
        let mut mux = Multiplexer::new();
        let broken = Arc::new(Recorder {
            broken: true,
            ..Recorder::default()
        });
        let healthy = Arc::new(Recorder::default());
        mux.register_viewer("broken".into(), "tab-1".into(), broken);
        mux.register_viewer("healthy".into(), "tab-1".into(), healthy.clone());

        let ack = mux.ingest(&"tab-1".into(), &push(1));
        assert_eq!((ack.delivered, ack.failed), (1, 1));
        assert_eq!(healthy.seen.lock().unwrap().len(), 1);
        assert_eq!(
            mux.session_state(&"broken".into()),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(mux.viewers_of(&"tab-1".into()), vec![SessionId::from("healthy")]);
    }

    #[test]
    fn empty_channels_are_removed() {
        let mut mux = Multiplexer::new();
        mux.register_viewer("a".into(), "tab-1".into(), Arc::new(Recorder::default()));
        mux.register_viewer("b".into(), "tab-2".into(), Arc::new(Recorder::default()));
        assert_eq!(mux.channel_count(), 2);

        mux.unregister_viewer(&"a".into());
        mux.transport_lost(&"b".into());
        assert_eq!(mux.channel_count(), 0);
        assert_eq!(mux.session_count(), 1);
    }

    #[test]
    fn rebinding_moves_a_session_between_instances() {
        let mut mux = Multiplexer::new();
        let viewer = Arc::new(Recorder::default());
        mux.register_viewer("a".into(), "tab-1".into(), viewer.clone());
        mux.bind(&"a".into(), "tab-2".into()).unwrap();

        assert!(mux.viewers_of(&"tab-1".into()).is_empty());
        mux.ingest(&"tab-2".into(), &push(1));
        assert_eq!(viewer.seen.lock().unwrap()[0].instance_id, InstanceId::from("tab-2"));
    }

    #[test]
    fn reconnect_resumes_without_replay() {
        let mut mux = Multiplexer::new();
        mux.register_viewer("old".into(), "tab-1".into(), Arc::new(Recorder::default()));
        mux.transport_lost(&"old".into());

        let missed = mux.ingest(&"tab-1".into(), &push(1));
        assert_eq!(missed.delivered, 0);

        let fresh = Arc::new(Recorder::default());
        mux.begin_session("new".into(), fresh.clone());
        assert_eq!(mux.session_state(&"new".into()), Some(ConnectionState::Connecting));
        assert_eq!(mux.session_state(&"old".into()), Some(ConnectionState::Disconnected));
        mux.bind(&"new".into(), "tab-1".into()).unwrap();
        assert_eq!(mux.session_state(&"new".into()), Some(ConnectionState::Connected));
        assert_eq!(mux.session_state(&"old".into()), None);
        assert_eq!(mux.session_count(), 1);

        let init = EngineEvent::DebuggerInitialized(Initialized {
            collection_name: "dataLayer".into(),
            timestamp_millis: 1,
        });
        mux.ingest(&"tab-1".into(), &init);
        let seen = fresh.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, init);
    }

    #[test]
    fn repeated_drop_and_reconnect_keeps_one_record() {
        let mut mux = Multiplexer::new();
        for cycle in 0..10 {
            let broken = Arc::new(Recorder {
                broken: true,
                ..Recorder::default()
            });
            mux.register_viewer(format!("panel-{cycle}").into(), "tab-1".into(), broken);
            assert_eq!(mux.ingest(&"tab-1".into(), &push(cycle)).failed, 1);
        }
        assert_eq!(mux.session_count(), 1);
        assert_eq!(mux.channel_count(), 0);

        mux.register_viewer("other".into(), "tab-2".into(), Arc::new(Recorder::default()));
        assert_eq!(mux.session_state(&"panel-9".into()), Some(ConnectionState::Disconnected));
        assert_eq!(mux.session_count(), 2);
    }

    #[test]
    fn bind_unknown_session_fails() {
        let mut mux = Multiplexer::new();
        assert!(matches!(
            mux.bind(&"ghost".into(), "tab-1".into()),
            Err(RelayError::UnknownSession(_))
        ));
    }
}
