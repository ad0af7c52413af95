//! Inbound listener — accepts connections from clients and peers.
//!
//! Every inbound request passes the handshake gate before it reaches
//! the service. Accepted sessions are greeted with the broker's own id;
//! what flows over a session after that is the concern of the
//! receiver/procedure dispatch layer, not of this crate.

use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use futures::stream::{self, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

use crate::error::BrokerError;
use crate::handshake::handshake_interceptor;
use crate::proto;
use crate::proto::broker_service_server::{BrokerService, BrokerServiceServer};

/// Keepalive ping interval on inbound connections.
const PING_INTERVAL: Duration = Duration::from_millis(4000);

/// gRPC implementation of the broker's inbound session surface.
pub struct InboundSessions {
    node_id: String,
}

impl InboundSessions {
    pub fn new(node_id: String) -> Self {
        Self { node_id }
    }
}

#[tonic::async_trait]
impl BrokerService for InboundSessions {
    type AttachStream = Pin<Box<dyn Stream<Item = Result<proto::SessionEvent, Status>> + Send>>;

    async fn attach(
        &self,
        request: Request<proto::AttachRequest>,
    ) -> Result<Response<Self::AttachStream>, Status> {
        debug!(remote = ?request.remote_addr(), "peer attached");
        let hello = proto::SessionEvent {
            node_id: self.node_id.clone(),
        };
        // One id event; the stream then stays open until the peer drops
        // the connection.
        let events = stream::once(async move { Ok(hello) }).chain(stream::pending());
        Ok(Response::new(Box::pin(events)))
    }
}

/// Handle on the serving task.
pub(crate) struct ListenerHandle {
    pub(crate) local_addr: SocketAddr,
    pub(crate) handle: JoinHandle<()>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

/// Bind the inbound port and start serving. Bind failures surface here,
/// before anything else is allowed to depend on the listener.
pub(crate) async fn bind(
    port: u16,
    node_id: String,
    secret: String,
) -> Result<ListenerHandle, BrokerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| BrokerError::Bind { port, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| BrokerError::Bind { port, source })?;
    let incoming = TcpIncoming::from_listener(listener, true, None).map_err(|e| {
        BrokerError::Bind {
            port,
            source: std::io::Error::other(e.to_string()),
        }
    })?;

    let service = BrokerServiceServer::with_interceptor(
        InboundSessions::new(node_id),
        handshake_interceptor(secret),
    );
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let served = Server::builder()
            .http2_keepalive_interval(Some(PING_INTERVAL))
            .add_service(service)
            .serve_with_incoming_shutdown(incoming, async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "inbound listener failed");
        }
    });

    info!(%local_addr, "broker listening");
    Ok(ListenerHandle {
        local_addr,
        handle,
        shutdown_tx,
    })
}
