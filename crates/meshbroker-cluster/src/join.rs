//! Join client — owns the outbound state-node connection and keeps this
//! broker registered across disconnects.
//!
//! Two schedulers cooperate and are never merged: the reconnect loop
//! handles network-level drops with jittered constant-interval delays,
//! and a short in-session timer re-issues join calls the state node
//! refused while the connection itself stayed up. The in-session timer
//! lives inside the session scope and is cancelled by session close, so
//! the two can never race.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{BrokerError, JoinCallError};
use crate::handshake::Attachment;
use crate::membership::Membership;
use crate::transport::{StateSession, StateTransport};

/// Interval between join calls refused while the session stayed up.
pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(2000);

/// Reconnect scheduling for the state-node connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    /// Upper bound of the uniform jitter added to every delay.
    pub randomness: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            randomness: Duration::from_millis(1000),
            multiplier: 1.0,
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let jitter = if self.randomness.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.randomness.as_millis() as u64)
        };
        let delay = (base as u64).saturating_add(jitter);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}

/// Signal completed by the first terminal join outcome.
type FirstJoin = oneshot::Sender<Result<(), BrokerError>>;

/// Handle on the background join task.
pub(crate) struct JoinClientHandle {
    pub(crate) handle: JoinHandle<()>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

/// Spawn the background join task. The returned receiver settles on the
/// first terminal outcome (connect failure, refused join, or success);
/// the task itself runs until shut down.
pub(crate) fn spawn_join_client<T: StateTransport>(
    transport: T,
    attachment: Attachment,
    membership: Arc<Membership>,
    policy: ReconnectPolicy,
) -> (JoinClientHandle, oneshot::Receiver<Result<(), BrokerError>>) {
    let (first_tx, first_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run(
        transport,
        attachment,
        membership,
        policy,
        first_tx,
        shutdown_rx,
    ));
    (
        JoinClientHandle {
            handle,
            shutdown_tx,
        },
        first_rx,
    )
}

/// Connection supervision loop: connect, register, hold, reconnect.
async fn run<T: StateTransport>(
    transport: T,
    attachment: Attachment,
    membership: Arc<Membership>,
    policy: ReconnectPolicy,
    first: FirstJoin,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut first = Some(first);
    let mut attempt = 0u32;
    loop {
        match transport.connect(&attachment).await {
            Ok(mut session) => {
                attempt = 0;
                let state_id = session.state_id().to_string();
                membership.connected(state_id.clone());
                info!(%state_id, "connected to the state node");

                hold_session(&mut session, &attachment, &mut first, &mut shutdown).await;

                membership.disconnected();
                if *shutdown.borrow() {
                    return;
                }
                warn!("lost connection to the state node");
            }
            Err(err) => {
                error!(error = %err, "could not connect to the state node");
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(BrokerError::Connect(err)));
                }
            }
        }

        attempt += 1;
        tokio::select! {
            _ = tokio::time::sleep(policy.delay(attempt)) => {}
            _ = shutdown.wait_for(|stop| *stop) => return,
        }
    }
}

/// Drive join attempts on an established session and hold it until it
/// drops or shutdown is requested.
async fn hold_session<S: StateSession>(
    session: &mut S,
    attachment: &Attachment,
    first: &mut Option<FirstJoin>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let node_id = attachment.node.id.as_str();
    loop {
        match session.join().await {
            Ok(()) => {
                if first.is_some() {
                    info!(%node_id, "joined the cluster");
                } else {
                    info!(%node_id, "rejoined the cluster");
                }
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                break;
            }
            Err(err) => {
                match &err {
                    JoinCallError::IdAlreadyUsed(id) => {
                        warn!(%id, "node id is already used in the cluster");
                    }
                    JoinCallError::Failed(cause) => {
                        error!(%cause, "join call failed");
                    }
                }
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(BrokerError::Join(err)));
                }
                // Once the transport is gone the reconnect loop owns the
                // next attempt; only retry here while the session is up.
                if !session.is_connected() {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(JOIN_RETRY_INTERVAL) => {}
                    _ = session.closed() => return,
                    _ = shutdown.wait_for(|stop| *stop) => return,
                }
            }
        }
    }

    // Registered; hold the session until it drops.
    tokio::select! {
        _ = session.closed() => {}
        _ = shutdown.wait_for(|stop| *stop) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::handshake::NodeDescriptor;
    use crate::transport::testing::{ConnectScript, ScriptedSession, ScriptedTransport};

    fn test_attachment() -> Attachment {
        Attachment::new(
            "s".to_string(),
            NodeDescriptor {
                id: "broker-1".to_string(),
                node_type: crate::NODE_TYPE_BROKER,
                ip: "127.0.0.1".to_string(),
                port: 8888,
                path: String::new(),
            },
        )
    }

    fn no_jitter() -> ReconnectPolicy {
        ReconnectPolicy {
            randomness: Duration::ZERO,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn delay_is_constant_interval_with_a_ceiling() {
        let policy = no_jitter();
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));

        let policy = ReconnectPolicy {
            multiplier: 4.0,
            randomness: Duration::ZERO,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        // The ceiling wins over the growing base.
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn delay_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..50 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_join_success_settles_and_sets_the_state_id() {
        let (session, _keep) = ScriptedSession::new("state-1", vec![Ok(())]);
        let transport = ScriptedTransport::new(vec![ConnectScript::Accept(session)]);
        let membership = Arc::new(Membership::default());

        let (_client, first) = spawn_join_client(
            transport,
            test_attachment(),
            membership.clone(),
            no_jitter(),
        );

        first.await.unwrap().unwrap();
        assert!(membership.is_connected());
        assert_eq!(membership.state_id().as_deref(), Some("state-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_connect_failure_settles_with_an_error() {
        let transport = ScriptedTransport::new(vec![
            ConnectScript::Refuse("connection refused"),
            ConnectScript::Hang,
        ]);
        let attempts = transport.connect_attempts.clone();
        let membership = Arc::new(Membership::default());

        let (_client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());

        let outcome = first.await.unwrap();
        assert!(matches!(
            outcome,
            Err(BrokerError::Connect(TransportError::Connect(_)))
        ));
        assert!(!membership.is_connected());

        // The reconnect loop keeps trying in the background.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(attempts.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_join_settles_retries_once_after_the_interval_then_stops() {
        let (session, _keep) = ScriptedSession::new(
            "state-1",
            vec![
                Err(JoinCallError::IdAlreadyUsed("broker-1".to_string())),
                Ok(()),
            ],
        );
        let join_calls = session.join_calls.clone();
        let join_instants = session.join_instants.clone();
        let transport = ScriptedTransport::new(vec![ConnectScript::Accept(session)]);
        let membership = Arc::new(Membership::default());

        let (_client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());

        let outcome = first.await.unwrap();
        assert!(matches!(
            outcome,
            Err(BrokerError::Join(JoinCallError::IdAlreadyUsed(_)))
        ));
        // The refusal does not tear down the session.
        assert!(membership.is_connected());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(join_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        let instants = join_instants.lock();
        assert_eq!(instants[1] - instants[0], JOIN_RETRY_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn no_in_session_retry_once_the_transport_dropped() {
        // First session is already dead when its join call fails; the
        // reconnect loop, not the retry timer, must own the next attempt.
        let (dead, dead_tx) = ScriptedSession::new(
            "state-1",
            vec![Err(JoinCallError::Failed("stream reset".to_string()))],
        );
        let dead_calls = dead.join_calls.clone();
        let (fresh, _keep) = ScriptedSession::new("state-2", vec![Ok(())]);
        let fresh_calls = fresh.join_calls.clone();
        let transport = ScriptedTransport::new(vec![
            ConnectScript::Accept(dead),
            ConnectScript::Accept(fresh),
        ]);
        let membership = Arc::new(Membership::default());
        dead_tx.send(false).unwrap();

        let (_client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());

        let outcome = first.await.unwrap();
        assert!(matches!(outcome, Err(BrokerError::Join(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dead_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fresh_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(membership.state_id().as_deref(), Some("state-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_the_state_id() {
        let (session, session_tx) = ScriptedSession::new("state-1", vec![Ok(())]);
        let transport =
            ScriptedTransport::new(vec![ConnectScript::Accept(session), ConnectScript::Hang]);
        let membership = Arc::new(Membership::default());

        let (_client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());
        first.await.unwrap().unwrap();
        assert_eq!(membership.state_id().as_deref(), Some("state-1"));

        session_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!membership.is_connected());
        assert_eq!(membership.state_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_after_the_initial_delay() {
        let (first_session, first_tx) = ScriptedSession::new("state-1", vec![Ok(())]);
        let (second_session, _keep) = ScriptedSession::new("state-2", vec![Ok(())]);
        let second_instants = second_session.join_instants.clone();
        let transport = ScriptedTransport::new(vec![
            ConnectScript::Accept(first_session),
            ConnectScript::Accept(second_session),
        ]);
        let membership = Arc::new(Membership::default());

        let (_client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());
        first.await.unwrap().unwrap();

        let dropped_at = tokio::time::Instant::now();
        first_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(membership.is_connected());
        assert_eq!(membership.state_id().as_deref(), Some("state-2"));
        let instants = second_instants.lock();
        assert_eq!(instants[0] - dropped_at, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let (session, _keep) = ScriptedSession::new("state-1", vec![Ok(())]);
        let transport = ScriptedTransport::new(vec![ConnectScript::Accept(session)]);
        let membership = Arc::new(Membership::default());

        let (client, first) =
            spawn_join_client(transport, test_attachment(), membership.clone(), no_jitter());
        first.await.unwrap().unwrap();

        client.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.handle.is_finished());
    }
}
