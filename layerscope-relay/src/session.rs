use crate::error::DeliveryError;
use crate::wire::{Delivery, InstanceId, SessionId};
use tokio::sync::mpsc::UnboundedSender;

/// `connecting → connected` on INIT, `connected → disconnected` on transport
/// loss, back to `connecting` only through a new registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerSession {
    pub session_id: SessionId,
    pub bound_instance: Option<InstanceId>,
    pub state: ConnectionState,
}

/// Outbound half of a viewer connection.
pub trait ViewerTransport: Send + Sync {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError>;
}

impl ViewerTransport for UnboundedSender<Delivery> {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        self.send(delivery.clone()).map_err(|_| DeliveryError::Closed)
    }
}
