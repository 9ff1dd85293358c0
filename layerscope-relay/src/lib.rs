//! Relay between monitored environments and live viewers.
//!
//! Reporters push engine events tagged with their instance id; the broker fans
//! each one out to every viewer session bound to that instance, in arrival
//! order, and acknowledges it whether or not anyone was listening.

mod broker;
mod error;
mod multiplexer;
mod reporter;
mod session;
mod wire;

pub use broker::{RelayBroker, RelayChannels, RelayCommand, RelayHandle, RelayStats};
pub use error::{DeliveryError, RelayError};
pub use multiplexer::Multiplexer;
pub use reporter::reporter_observer;
pub use session::{ConnectionState, ViewerSession, ViewerTransport};
pub use wire::{Ack, Delivery, InstanceId, SessionId, ViewerMessage};
