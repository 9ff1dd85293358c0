use crate::wire::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay broker is no longer running")]
    BrokerGone,
    #[error("unknown viewer session {0}")]
    UnknownSession(SessionId),
    #[error("malformed viewer message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure to hand a delivery to one viewer's transport.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("viewer transport closed")]
    Closed,
    #[error("viewer rejected delivery: {0}")]
    Rejected(String),
}
