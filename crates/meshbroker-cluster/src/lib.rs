//! meshbroker-cluster — the cluster-join protocol and connection
//! lifecycle of a broker node.
//!
//! # Architecture
//!
//! ```text
//! Broker node
//!   ├── inbound listener (gRPC)
//!   │   └── handshake gate: attachment → 400 / 403 / 412 or accept
//!   └── join client
//!       ├── attaches to the state node (secret + cluster version + self descriptor)
//!       ├── registers via Join, retrying refused calls while connected
//!       └── reconnects with jittered constant-interval delays on drops
//!
//! State node (external)
//!   ├── Attach() → session stream, first event carries the state id
//!   └── Join()   → registers the node; duplicate id ⇒ ALREADY_EXISTS
//! ```
//!
//! The externally observable result of the join client's work is
//! [`membership::Membership`]: a connected flag plus the state id
//! assigned by the state node, cleared on every disconnect.

pub mod broker;
pub mod error;
pub mod handshake;
pub mod join;
pub mod membership;
pub mod server;
pub mod transport;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("meshbroker.v1");
}

pub use broker::Broker;
pub use error::{BrokerError, JoinCallError, TransportError};
pub use handshake::{Attachment, HandshakeReject, NodeDescriptor};
pub use join::ReconnectPolicy;
pub use membership::Membership;

/// Protocol-compatibility tag; a mismatch is a hard rejection, not a
/// negotiation.
pub const CLUSTER_VERSION: u32 = 1;

/// Node type carried in the handshake descriptor of a broker.
pub const NODE_TYPE_BROKER: u32 = 1;

/// Request metadata key carrying the JSON handshake attachment.
pub const ATTACHMENT_METADATA_KEY: &str = "x-mesh-attachment";
