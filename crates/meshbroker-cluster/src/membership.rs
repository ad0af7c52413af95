//! Externally observable cluster membership state.

use parking_lot::RwLock;

/// Broker-side view of its own cluster membership.
///
/// `state_id` is assigned by the state node in its handshake reply and
/// cleared on every disconnect; the broker never invents one. Mutation
/// is reserved to the join client's event handling — the outside world
/// only reads.
#[derive(Debug, Default)]
pub struct Membership {
    inner: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    state_id: Option<String>,
}

impl Membership {
    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    /// Id of the state node this broker is currently attached to.
    pub fn state_id(&self) -> Option<String> {
        self.inner.read().state_id.clone()
    }

    pub(crate) fn connected(&self, state_id: String) {
        let mut inner = self.inner.write();
        inner.connected = true;
        inner.state_id = Some(state_id);
    }

    pub(crate) fn disconnected(&self) {
        let mut inner = self.inner.write();
        inner.connected = false;
        inner.state_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_detached() {
        let membership = Membership::default();
        assert!(!membership.is_connected());
        assert_eq!(membership.state_id(), None);
    }

    #[test]
    fn connect_sets_both_fields() {
        let membership = Membership::default();
        membership.connected("state-1".to_string());
        assert!(membership.is_connected());
        assert_eq!(membership.state_id().as_deref(), Some("state-1"));
    }

    #[test]
    fn disconnect_clears_the_state_id() {
        let membership = Membership::default();
        membership.connected("state-1".to_string());
        membership.disconnected();
        assert!(!membership.is_connected());
        assert_eq!(membership.state_id(), None);
    }
}
