//! Broker lifecycle — listen, join, terminate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::info;

use meshbroker_core::BrokerConfig;

use crate::NODE_TYPE_BROKER;
use crate::error::BrokerError;
use crate::handshake::{Attachment, NodeDescriptor};
use crate::join::{JoinClientHandle, ReconnectPolicy, spawn_join_client};
use crate::membership::Membership;
use crate::server::{self, ListenerHandle};
use crate::transport::{GrpcTransport, StateTransport};

/// A broker node: accepts client connections on its inbound port and
/// keeps itself registered with the cluster's state node.
///
/// Lifecycle: [`listen`](Broker::listen) (idempotent) must complete
/// before [`join`](Broker::join) (single-shot);
/// [`terminate`](Broker::terminate) tears both down.
pub struct Broker<T: StateTransport = GrpcTransport> {
    config: BrokerConfig,
    id: String,
    membership: Arc<Membership>,
    policy: ReconnectPolicy,
    transport: Mutex<Option<T>>,
    listener: Mutex<Option<ListenerHandle>>,
    join_client: Mutex<Option<JoinClientHandle>>,
    join_called: AtomicBool,
}

impl Broker<GrpcTransport> {
    pub fn new(config: BrokerConfig) -> Self {
        let transport = GrpcTransport::new(config.token.uri.clone());
        Self::with_transport(config, transport)
    }
}

impl<T: StateTransport> Broker<T> {
    /// Build a broker over a custom state-node transport.
    pub fn with_transport(config: BrokerConfig, transport: T) -> Self {
        let id = generate_broker_id(&config.advertise_ip, config.port);
        info!(broker_id = %id, "launching broker");
        Self {
            config,
            id,
            membership: Arc::new(Membership::default()),
            policy: ReconnectPolicy::default(),
            transport: Mutex::new(Some(transport)),
            listener: Mutex::new(None),
            join_client: Mutex::new(None),
            join_called: AtomicBool::new(false),
        }
    }

    /// Override the reconnect scheduling of the state connection.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Port actually bound; differs from the configured one when that
    /// was 0.
    pub async fn local_port(&self) -> Option<u16> {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(|listener| listener.local_addr.port())
    }

    /// Bind the inbound listener and install the handshake gate.
    /// Idempotent: a broker that is already listening is left untouched.
    pub async fn listen(&self) -> Result<(), BrokerError> {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(
            server::bind(
                self.config.port,
                self.id.clone(),
                self.config.token.secret.clone(),
            )
            .await?,
        );
        Ok(())
    }

    /// Join the cluster through the state node.
    ///
    /// Single-shot: resolves on the first successful join, fails on the
    /// first refused connect or join call; later outcomes are handled by
    /// the background task and only logged. A second call is a caller
    /// error and leaves the running join session untouched.
    pub async fn join(&self) -> Result<(), BrokerError> {
        let port = match self.local_port().await {
            Some(port) => port,
            None => return Err(BrokerError::NotListening),
        };
        if self.join_called.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::JoinAlreadyCalled);
        }
        let transport = match self.transport.lock().await.take() {
            Some(transport) => transport,
            None => return Err(BrokerError::JoinAlreadyCalled),
        };

        let attachment = Attachment::new(
            self.config.token.secret.clone(),
            NodeDescriptor {
                id: self.id.clone(),
                node_type: NODE_TYPE_BROKER,
                ip: self.config.advertise_ip.clone(),
                port,
                path: self.config.path.clone(),
            },
        );
        let (client, first) = spawn_join_client(
            transport,
            attachment,
            self.membership.clone(),
            self.policy.clone(),
        );
        *self.join_client.lock().await = Some(client);

        match first.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BrokerError::JoinInterrupted),
        }
    }

    /// `listen()` then `join()`, propagating the first failure.
    pub async fn listen_and_join(&self) -> Result<(), BrokerError> {
        self.listen().await?;
        self.join().await?;
        info!(
            port = self.local_port().await.unwrap_or(self.config.port),
            "broker launched and joined the cluster"
        );
        Ok(())
    }

    /// Tear down the inbound listener and, when one exists, the state
    /// connection. Safe to call on a broker that never joined.
    pub async fn terminate(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            let _ = listener.shutdown_tx.send(true);
            listener.handle.abort();
        }
        if let Some(client) = self.join_client.lock().await.take() {
            let _ = client.shutdown_tx.send(true);
            client.handle.abort();
        }
        self.membership.disconnected();
        info!("broker terminated");
    }
}

/// Id for this broker instance; unique enough across a cluster.
fn generate_broker_id(ip: &str, port: u16) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    port.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("broker-{:08x}", hasher.finish() as u32)
}
