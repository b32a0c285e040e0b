use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One side's subscription health, as published on the wire and fed into the
/// session calculation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriberState {
    Disconnected,
    Connected,
}

/// Combined session indicator for one remote node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DsfSessionState {
    /// No subscription has ever come up in either direction.
    Idle,
    /// Both directions down after at least one had connected.
    Connect,
    /// Exactly one direction is up.
    WaitForRemote,
    /// Both directions up.
    Established,
}

/// Immutable session snapshot for observability.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DsfSessionSnapshot {
    pub remote_name: String,
    pub state: DsfSessionState,
    pub last_established_at: Option<u64>,
    pub last_disconnected_at: Option<u64>,
}

/// Per-remote-node session tracker. Pure state transitions over in-memory
/// fields; the owning subscription serializes all calls.
#[derive(Debug)]
pub struct DsfSession {
    remote_endpoint: String,
    local_sub_state: SubscriberState,
    remote_sub_state: SubscriberState,
    attempted: bool,
    state: DsfSessionState,
    last_established_at: Option<SystemTime>,
    last_disconnected_at: Option<SystemTime>,
}

impl DsfSession {
    pub fn new(remote_endpoint: impl Into<String>) -> Self {
        Self {
            remote_endpoint: remote_endpoint.into(),
            local_sub_state: SubscriberState::Disconnected,
            remote_sub_state: SubscriberState::Disconnected,
            attempted: false,
            state: DsfSessionState::Idle,
            last_established_at: None,
            last_disconnected_at: None,
        }
    }

    pub fn local_sub_state_changed(&mut self, new_state: SubscriberState) {
        self.local_sub_state = new_state;
        if new_state == SubscriberState::Connected {
            self.attempted = true;
        } else {
            // The remote's view cannot reach us while our inbound stream is
            // down; do not keep trusting the last echoed value.
            self.remote_sub_state = SubscriberState::Disconnected;
        }
        self.recalculate();
    }

    pub fn remote_sub_state_changed(&mut self, new_state: SubscriberState) {
        self.remote_sub_state = new_state;
        if new_state == SubscriberState::Connected {
            self.attempted = true;
        }
        self.recalculate();
    }

    pub fn state(&self) -> DsfSessionState {
        self.state
    }

    pub fn snapshot(&self) -> DsfSessionSnapshot {
        DsfSessionSnapshot {
            remote_name: self.remote_endpoint.clone(),
            state: self.state,
            last_established_at: self.last_established_at.map(epoch_secs),
            last_disconnected_at: self.last_disconnected_at.map(epoch_secs),
        }
    }

    fn recalculate(&mut self) {
        let next = calculate_session_state(
            self.local_sub_state,
            self.remote_sub_state,
            self.attempted,
        );
        if next == self.state {
            return;
        }
        if next == DsfSessionState::Established {
            self.last_established_at = Some(SystemTime::now());
        } else if self.state == DsfSessionState::Established {
            self.last_disconnected_at = Some(SystemTime::now());
        }
        debug!(
            endpoint = %self.remote_endpoint,
            old = ?self.state,
            new = ?next,
            "session state changed"
        );
        self.state = next;
    }
}

fn calculate_session_state(
    local: SubscriberState,
    remote: SubscriberState,
    attempted: bool,
) -> DsfSessionState {
    match (local, remote) {
        (SubscriberState::Connected, SubscriberState::Connected) => DsfSessionState::Established,
        (SubscriberState::Connected, _) | (_, SubscriberState::Connected) => {
            DsfSessionState::WaitForRemote
        }
        _ if attempted => DsfSessionState::Connect,
        _ => DsfSessionState::Idle,
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let session = DsfSession::new("remote::::1");
        assert_eq!(session.state(), DsfSessionState::Idle);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.remote_name, "remote::::1");
        assert!(snapshot.last_established_at.is_none());
        assert!(snapshot.last_disconnected_at.is_none());
    }

    #[test]
    fn one_side_up_waits_for_remote() {
        let mut session = DsfSession::new("remote::::1");
        session.local_sub_state_changed(SubscriberState::Connected);
        assert_eq!(session.state(), DsfSessionState::WaitForRemote);

        let mut session = DsfSession::new("remote::::1");
        session.remote_sub_state_changed(SubscriberState::Connected);
        assert_eq!(session.state(), DsfSessionState::WaitForRemote);
    }

    #[test]
    fn both_sides_up_establishes() {
        let mut session = DsfSession::new("remote::::1");
        session.local_sub_state_changed(SubscriberState::Connected);
        session.remote_sub_state_changed(SubscriberState::Connected);
        assert_eq!(session.state(), DsfSessionState::Established);
        assert!(session.snapshot().last_established_at.is_some());
    }

    #[test]
    fn drop_after_attempt_goes_to_connect() {
        let mut session = DsfSession::new("remote::::1");
        session.local_sub_state_changed(SubscriberState::Connected);
        session.local_sub_state_changed(SubscriberState::Disconnected);
        assert_eq!(session.state(), DsfSessionState::Connect);
    }

    #[test]
    fn local_drop_discards_stale_remote_view() {
        let mut session = DsfSession::new("remote::::1");
        session.local_sub_state_changed(SubscriberState::Connected);
        session.remote_sub_state_changed(SubscriberState::Connected);
        session.local_sub_state_changed(SubscriberState::Disconnected);
        // Not WaitForRemote: the echoed remote view died with the stream.
        assert_eq!(session.state(), DsfSessionState::Connect);
        assert!(session.snapshot().last_disconnected_at.is_some());
    }

    #[test]
    fn reestablish_updates_timestamp() {
        let mut session = DsfSession::new("remote::::1");
        session.local_sub_state_changed(SubscriberState::Connected);
        session.remote_sub_state_changed(SubscriberState::Connected);
        let first = session.snapshot().last_established_at;
        session.local_sub_state_changed(SubscriberState::Disconnected);
        session.local_sub_state_changed(SubscriberState::Connected);
        session.remote_sub_state_changed(SubscriberState::Connected);
        assert_eq!(session.state(), DsfSessionState::Established);
        assert!(session.snapshot().last_established_at >= first);
    }
}
