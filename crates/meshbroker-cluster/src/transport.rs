//! State-node transport — the seam between the join state machine and
//! the wire.
//!
//! The production implementation dials the state node over gRPC,
//! carries the handshake attachment as request metadata, and turns the
//! attach event stream into session liveness. Tests substitute scripted
//! transports.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use crate::ATTACHMENT_METADATA_KEY;
use crate::error::{JoinCallError, TransportError};
use crate::handshake::Attachment;
use crate::proto;
use crate::proto::state_service_client::StateServiceClient;

/// Connection-establishment and request/response timeout.
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Dials the state node and performs the attach handshake.
#[async_trait]
pub trait StateTransport: Send + Sync + 'static {
    type Session: StateSession;

    async fn connect(&self, attachment: &Attachment) -> Result<Self::Session, TransportError>;
}

/// An established session with the state node.
#[async_trait]
pub trait StateSession: Send + 'static {
    /// Id of the state node, from the handshake reply.
    fn state_id(&self) -> &str;

    /// Whether the session is still established.
    fn is_connected(&self) -> bool;

    /// Ask the state node to register this node.
    async fn join(&mut self) -> Result<(), JoinCallError>;

    /// Resolves when the session drops.
    async fn closed(&mut self);
}

/// Production transport over tonic.
pub struct GrpcTransport {
    uri: String,
}

impl GrpcTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let uri = if self.uri.contains("://") {
            self.uri.clone()
        } else {
            format!("http://{}", self.uri)
        };
        Endpoint::from_shared(uri.clone())
            .map(|endpoint| endpoint.connect_timeout(TRANSPORT_TIMEOUT))
            .map_err(|e| TransportError::InvalidUri {
                uri,
                message: e.to_string(),
            })
    }
}

type AttachedClient = StateServiceClient<InterceptedService<Channel, AttachmentInterceptor>>;

/// Client interceptor adding the handshake attachment to every request.
#[derive(Clone)]
struct AttachmentInterceptor {
    attachment: MetadataValue<Ascii>,
}

impl tonic::service::Interceptor for AttachmentInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(ATTACHMENT_METADATA_KEY, self.attachment.clone());
        Ok(request)
    }
}

#[async_trait]
impl StateTransport for GrpcTransport {
    type Session = GrpcSession;

    async fn connect(&self, attachment: &Attachment) -> Result<GrpcSession, TransportError> {
        let json = attachment
            .to_json()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let metadata = MetadataValue::try_from(json.as_str())
            .map_err(|e| TransportError::Handshake(format!("attachment is not metadata-safe: {e}")))?;

        let channel = self
            .endpoint()?
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let mut client = StateServiceClient::with_interceptor(
            channel,
            AttachmentInterceptor {
                attachment: metadata,
            },
        );

        let mut events = client
            .attach(proto::AttachRequest {})
            .await
            .map_err(|status| TransportError::Handshake(status.message().to_string()))?
            .into_inner();

        // The first event carries the state id; without it the session
        // is useless.
        let state_id = match tokio::time::timeout(TRANSPORT_TIMEOUT, events.message())
            .await
            .map_err(|_| TransportError::Timeout(TRANSPORT_TIMEOUT))?
            .map_err(|status| TransportError::Handshake(status.message().to_string()))?
        {
            Some(event) if !event.node_id.is_empty() => event.node_id,
            _ => return Err(TransportError::Handshake("state node sent no id".to_string())),
        };

        let (connected_tx, connected_rx) = watch::channel(true);
        let watcher = tokio::spawn(async move {
            while let Ok(Some(_)) = events.message().await {}
            let _ = connected_tx.send(false);
        });

        Ok(GrpcSession {
            state_id,
            node_id: attachment.node.id.clone(),
            client,
            connected: connected_rx,
            watcher,
        })
    }
}

/// A live gRPC session with the state node.
pub struct GrpcSession {
    state_id: String,
    node_id: String,
    client: AttachedClient,
    connected: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
}

#[async_trait]
impl StateSession for GrpcSession {
    fn state_id(&self) -> &str {
        &self.state_id
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn join(&mut self) -> Result<(), JoinCallError> {
        let call = self.client.join(proto::JoinRequest {});
        match tokio::time::timeout(TRANSPORT_TIMEOUT, call).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) if status.code() == Code::AlreadyExists => {
                Err(JoinCallError::IdAlreadyUsed(self.node_id.clone()))
            }
            Ok(Err(status)) => Err(JoinCallError::Failed(format!(
                "{:?}: {}",
                status.code(),
                status.message()
            ))),
            Err(_) => Err(JoinCallError::Failed(format!(
                "no reply within {TRANSPORT_TIMEOUT:?}"
            ))),
        }
    }

    async fn closed(&mut self) {
        while *self.connected.borrow() {
            if self.connected.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for GrpcSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
