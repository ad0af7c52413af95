//! Handshake attachments and inbound validation.
//!
//! Every connection between mesh nodes opens with a JSON attachment
//! carried in the `x-mesh-attachment` request metadata. Inbound, the
//! attachment is checked before the request reaches the service — the
//! same gate a connection-upgrade middleware provides. Rules are
//! evaluated in order, first match wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tonic::metadata::MetadataMap;
use tonic::{Code, Request, Status};

use crate::{ATTACHMENT_METADATA_KEY, CLUSTER_VERSION};

/// Handshake attachment sent when attaching to another node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub secret: String,
    pub cluster_version: u32,
    pub node: NodeDescriptor,
}

/// Self-description of the attaching node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: u32,
    pub ip: String,
    pub port: u16,
    pub path: String,
}

impl Attachment {
    pub fn new(secret: String, node: NodeDescriptor) -> Self {
        Self {
            secret,
            cluster_version: CLUSTER_VERSION,
            node,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A refused handshake: numeric status plus reason, mirrored onto the
/// gRPC status returned to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReject {
    pub status: u16,
    pub message: &'static str,
}

impl HandshakeReject {
    pub const INVALID_STRUCTURE: Self = Self {
        status: 400,
        message: "Invalid attachment structure",
    };
    pub const PERMISSION_DENIED: Self = Self {
        status: 403,
        message: "Permission denied",
    };
    pub const INCOMPATIBLE_VERSION: Self = Self {
        status: 412,
        message: "Incompatible cluster versions",
    };
}

impl From<HandshakeReject> for Status {
    fn from(reject: HandshakeReject) -> Self {
        let code = match reject.status {
            400 => Code::InvalidArgument,
            403 => Code::PermissionDenied,
            412 => Code::FailedPrecondition,
            _ => Code::Internal,
        };
        let mut metadata = MetadataMap::new();
        if let Ok(value) = reject.status.to_string().parse() {
            metadata.insert("x-mesh-reject-code", value);
        }
        Status::with_metadata(code, reject.message, metadata)
    }
}

/// Validate a raw inbound attachment against the broker's join secret.
///
/// Rules, first match wins:
/// 1. missing, unparseable, or non-object attachment → 400
/// 2. wrong secret → 403
/// 3. wrong cluster version → 412
pub fn validate_attachment(
    raw: Option<&str>,
    expected_secret: &str,
) -> Result<(), HandshakeReject> {
    let value: Value = match raw.and_then(|r| serde_json::from_str(r).ok()) {
        Some(value) => value,
        None => return Err(HandshakeReject::INVALID_STRUCTURE),
    };
    let Value::Object(attachment) = value else {
        return Err(HandshakeReject::INVALID_STRUCTURE);
    };
    if attachment.get("secret").and_then(Value::as_str) != Some(expected_secret) {
        return Err(HandshakeReject::PERMISSION_DENIED);
    }
    if attachment.get("clusterVersion").and_then(Value::as_u64) != Some(u64::from(CLUSTER_VERSION))
    {
        return Err(HandshakeReject::INCOMPATIBLE_VERSION);
    }
    Ok(())
}

/// Server interceptor enforcing the handshake gate on every inbound
/// request.
pub fn handshake_interceptor(
    expected_secret: String,
) -> impl tonic::service::Interceptor + Clone {
    move |request: Request<()>| {
        let raw = request
            .metadata()
            .get(ATTACHMENT_METADATA_KEY)
            .and_then(|value| value.to_str().ok());
        validate_attachment(raw, &expected_secret).map_err(Status::from)?;
        Ok(request)
    }
}
