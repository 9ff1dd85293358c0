use crate::error::RelayError;
use crate::multiplexer::Multiplexer;
use crate::session::{ConnectionState, ViewerTransport};
use crate::wire::{Ack, Delivery, InstanceId, SessionId, ViewerMessage};
use layerscope_core::EngineEvent;
use layerscope_core_macros::Redacted;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Work items for the broker loop. Processed strictly in arrival order.
#[derive(Redacted)]
pub enum RelayCommand {
    Connect {
        session_id: SessionId,
        #[redact]
        transport: Arc<dyn ViewerTransport>,
    },
    Viewer {
        session_id: SessionId,
        message: ViewerMessage,
    },
    Ingest {
        instance_id: InstanceId,
        event: EngineEvent,
        #[redact]
        ack: Option<oneshot::Sender<Ack>>,
    },
    Unregister {
        session_id: SessionId,
    },
    TransportLost {
        session_id: SessionId,
    },
    Inspect {
        #[redact]
        reply: oneshot::Sender<RelayStats>,
    },
    Shutdown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub sessions: usize,
    pub channels: usize,
    pub ingested: u64,
}

/// Cloneable front door to a running broker, shared by reporters and
/// viewers.
#[derive(Clone)]
pub struct RelayHandle {
    tx: UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    pub fn new(tx: UnboundedSender<RelayCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(command).map_err(|_| RelayError::BrokerGone)
    }

    /// Open a viewer session backed by a channel. The session stays
    /// `connecting` until an INIT arrives.
    pub fn connect(&self, session_id: impl Into<SessionId>) -> UnboundedReceiver<Delivery> {
        let (tx, rx) = unbounded_channel();
        self.connect_with(session_id, Arc::new(tx));
        rx
    }

    pub fn connect_with(&self, session_id: impl Into<SessionId>, transport: Arc<dyn ViewerTransport>) {
        let _ = self.send(RelayCommand::Connect {
            session_id: session_id.into(),
            transport,
        });
    }

    pub fn viewer_message(&self, session_id: impl Into<SessionId>, message: ViewerMessage) {
        let _ = self.send(RelayCommand::Viewer {
            session_id: session_id.into(),
            message,
        });
    }

    /// Connect and bind in one step.
    pub fn register_viewer(
        &self,
        session_id: impl Into<SessionId>,
        instance_id: impl Into<InstanceId>,
    ) -> UnboundedReceiver<Delivery> {
        let session_id = session_id.into();
        let rx = self.connect(session_id.clone());
        self.viewer_message(
            session_id,
            ViewerMessage::Init {
                instance_id: instance_id.into(),
            },
        );
        rx
    }

    /// Fire-and-forget ingest used from synchronous observers.
    pub fn report(&self, instance_id: impl Into<InstanceId>, event: EngineEvent) {
        let _ = self.send(RelayCommand::Ingest {
            instance_id: instance_id.into(),
            event,
            ack: None,
        });
    }

    pub async fn ingest(
        &self,
        instance_id: impl Into<InstanceId>,
        event: EngineEvent,
    ) -> Result<Ack, RelayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(RelayCommand::Ingest {
            instance_id: instance_id.into(),
            event,
            ack: Some(ack_tx),
        })?;
        ack_rx.await.map_err(|_| RelayError::BrokerGone)
    }

    pub fn unregister(&self, session_id: impl Into<SessionId>) {
        let _ = self.send(RelayCommand::Unregister {
            session_id: session_id.into(),
        });
    }

    pub fn transport_lost(&self, session_id: impl Into<SessionId>) {
        let _ = self.send(RelayCommand::TransportLost {
            session_id: session_id.into(),
        });
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Inspect { reply })?;
        rx.await.map_err(|_| RelayError::BrokerGone)
    }

    pub fn shutdown(&self) {
        let _ = self.send(RelayCommand::Shutdown);
    }
}

/// Long-lived loop owning the multiplexer.
pub struct RelayBroker {
    mux: Multiplexer,
    rx: UnboundedReceiver<RelayCommand>,
    ingested: u64,
}

impl RelayBroker {
    pub fn new(rx: UnboundedReceiver<RelayCommand>) -> Self {
        Self {
            mux: Multiplexer::new(),
            rx,
            ingested: 0,
        }
    }

    /// Run until shutdown or until every handle is dropped. Returns the final
    /// multiplexer state.
    pub async fn run(mut self) -> Multiplexer {
        while let Some(command) = self.rx.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        tracing::debug!(
            target: "layerscope-relay::broker",
            "broker stopped after {} events",
            self.ingested
        );
        self.mux
    }

    fn handle(&mut self, command: RelayCommand) -> bool {
        match command {
            RelayCommand::Connect {
                session_id,
                transport,
            } => {
                self.mux.begin_session(session_id, transport);
            }
            RelayCommand::Viewer {
                session_id,
                message: ViewerMessage::Init { instance_id },
            } => {
                if let Err(err) = self.mux.bind(&session_id, instance_id) {
                    tracing::warn!(target: "layerscope-relay::broker", "INIT ignored: {err}");
                }
            }
            RelayCommand::Ingest {
                instance_id,
                event,
                ack,
            } => {
                self.ingested += 1;
                let receipt = self.mux.ingest(&instance_id, &event);
                tracing::trace!(
                    target: "layerscope-relay::broker",
                    "{} for {} -> {} delivered, {} failed",
                    event.kind(),
                    instance_id,
                    receipt.delivered,
                    receipt.failed
                );
                if let Some(ack) = ack {
                    let _ = ack.send(receipt);
                }
            }
            RelayCommand::Unregister { session_id } => {
                self.mux.unregister_viewer(&session_id);
            }
            RelayCommand::TransportLost { session_id } => {
                if self.mux.session_state(&session_id) == Some(ConnectionState::Connected) {
                    tracing::debug!(
                        target: "layerscope-relay::broker",
                        "viewer {session_id} lost its transport"
                    );
                }
                self.mux.transport_lost(&session_id);
            }
            RelayCommand::Inspect { reply } => {
                let _ = reply.send(RelayStats {
                    sessions: self.mux.session_count(),
                    channels: self.mux.channel_count(),
                    ingested: self.ingested,
                });
            }
            RelayCommand::Shutdown => return false,
        }
        true
    }
}

/// Paired handle and broker, ready to be spawned.
pub struct RelayChannels {
    pub handle: RelayHandle,
    pub broker: RelayBroker,
}

impl RelayChannels {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            handle: RelayHandle::new(tx),
            broker: RelayBroker::new(rx),
        }
    }
}

impl Default for RelayChannels {
    fn default() -> Self {
        Self::new()
    }
}
