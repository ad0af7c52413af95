//! Error types for the cluster crate.

use std::time::Duration;

use thiserror::Error;

/// Fatal setup and caller errors surfaced by the broker lifecycle.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind inbound listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("join() called before listen() completed")]
    NotListening,

    #[error("join() may only be called once per broker instance")]
    JoinAlreadyCalled,

    #[error("first connect to the state node failed: {0}")]
    Connect(#[from] TransportError),

    #[error("first join attempt was refused: {0}")]
    Join(#[from] JoinCallError),

    #[error("join task stopped before the first join settled")]
    JoinInterrupted,
}

/// Failures raised by the state-node transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid state node uri {uri:?}: {message}")]
    InvalidUri { uri: String, message: String },

    #[error("could not connect to the state node: {0}")]
    Connect(String),

    #[error("attach handshake failed: {0}")]
    Handshake(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A join call that did not succeed.
#[derive(Debug, Error)]
pub enum JoinCallError {
    #[error("node id {0} is already used in the cluster")]
    IdAlreadyUsed(String),

    #[error("join call failed: {0}")]
    Failed(String),
}
