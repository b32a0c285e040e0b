use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A state-tree path, as a list of tokens from the root.
pub type Path = Vec<String>;

pub fn path(tokens: &[&str]) -> Path {
    tokens.iter().map(|t| t.to_string()).collect()
}

/// Stream-level connection state, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Cancelled,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPriority {
    Normal,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub subscriber_id: String,
    pub subscribe_stats: bool,
    /// Hold window advertised to the publisher. The subscriber side owns the
    /// actual countdown; the transport only forwards the value.
    pub gr_hold_time: Duration,
}

/// Addressing for one remote stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub src_ip: IpAddr,
    pub priority: StreamPriority,
}

impl ServerOptions {
    fn key(&self) -> (IpAddr, u16) {
        (self.dst_ip, self.dst_port)
    }
}

/// One published value for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: Path,
    pub contents: Bytes,
}

/// A batch of path changes delivered together on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUnit {
    pub changes: Vec<PathChange>,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    StateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    Data(PathUnit),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("subscription already registered for {0}")]
    AlreadySubscribed(String),
    #[error("stream channel closed")]
    Closed,
}

/// Read-only view of a registered subscription, for introspection.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub subscriber_id: String,
    pub server: String,
    pub paths: Vec<Path>,
    pub state: ConnectionState,
}

/// The stream-transport seam. Implementations deliver connection-state
/// transitions and data units over the returned channel; reconnection and
/// keepalive policy are theirs alone.
pub trait StreamClient: Send + Sync {
    fn add_state_path_subscription(
        &self,
        opts: SubscriptionOptions,
        paths: Vec<Path>,
        server: ServerOptions,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, StreamError>;

    fn remove_state_path_subscription(&self, paths: &[Path], server: &ServerOptions);

    fn subscription_state(&self, paths: &[Path], server: &ServerOptions) -> ConnectionState;

    fn subscription_info(&self, paths: &[Path], server: &ServerOptions)
        -> Option<SubscriptionInfo>;
}

struct SubEntry {
    subscriber_id: String,
    paths: Vec<Path>,
    state: ConnectionState,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl SubEntry {
    fn transition(&mut self, new: ConnectionState) {
        if self.state == new {
            return;
        }
        let old = self.state;
        self.state = new;
        let _ = self.tx.send(StreamEvent::StateChanged { old, new });
    }

    fn deliver(&self, changes: Vec<PathChange>) {
        if !changes.is_empty() {
            let _ = self.tx.send(StreamEvent::Data(PathUnit { changes }));
        }
    }

    fn retained_for(&self, retained: &HashMap<Path, Bytes>) -> Vec<PathChange> {
        self.paths
            .iter()
            .filter_map(|p| {
                retained.get(p).map(|contents| PathChange {
                    path: p.clone(),
                    contents: contents.clone(),
                })
            })
            .collect()
    }
}

#[derive(Default)]
struct ServerEntry {
    publisher_up: bool,
    retained: HashMap<Path, Bytes>,
    subs: Vec<SubEntry>,
}

type ServerTable = parking_lot::Mutex<HashMap<(IpAddr, u16), ServerEntry>>;

/// Simple in-memory stream hub for tests and single-process clusters.
///
/// Publishers retain the last value per path; a subscriber that connects (or
/// reconnects) receives the retained values for its paths as one initial
/// data unit before live updates.
#[derive(Default, Clone)]
pub struct LocalStreamHub {
    servers: Arc<ServerTable>,
}

impl LocalStreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the publishing side of `addr` up. Connected subscribers get an
    /// initial sync of everything retained for their paths.
    pub fn start_publisher(&self, addr: (IpAddr, u16)) -> PublisherHandle {
        let mut servers = self.servers.lock();
        let entry = servers.entry(addr).or_default();
        entry.publisher_up = true;
        for sub in entry.subs.iter_mut() {
            sub.transition(ConnectionState::Connected);
            sub.deliver(sub.retained_for(&entry.retained));
        }
        debug!(server = %addr.0, port = addr.1, "publisher up");
        PublisherHandle {
            servers: Arc::clone(&self.servers),
            addr,
        }
    }
}

fn publish_changes(servers: &ServerTable, addr: (IpAddr, u16), changes: Vec<PathChange>) {
    let mut servers = servers.lock();
    let entry = servers.entry(addr).or_default();
    for change in &changes {
        entry
            .retained
            .insert(change.path.clone(), change.contents.clone());
    }
    for sub in entry.subs.iter() {
        if sub.state != ConnectionState::Connected {
            continue;
        }
        let matching: Vec<PathChange> = changes
            .iter()
            .filter(|c| sub.paths.contains(&c.path))
            .cloned()
            .collect();
        sub.deliver(matching);
    }
}

fn stop_publisher(servers: &ServerTable, addr: (IpAddr, u16)) {
    let mut servers = servers.lock();
    if let Some(entry) = servers.get_mut(&addr) {
        entry.publisher_up = false;
        for sub in entry.subs.iter_mut() {
            sub.transition(ConnectionState::Disconnected);
        }
    }
    debug!(server = %addr.0, port = addr.1, "publisher down");
}

impl StreamClient for LocalStreamHub {
    fn add_state_path_subscription(
        &self,
        opts: SubscriptionOptions,
        paths: Vec<Path>,
        server: ServerOptions,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, StreamError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut servers = self.servers.lock();
        let entry = servers.entry(server.key()).or_default();
        if entry.subs.iter().any(|s| s.paths == paths) {
            return Err(StreamError::AlreadySubscribed(opts.subscriber_id));
        }
        let mut sub = SubEntry {
            subscriber_id: opts.subscriber_id,
            paths,
            state: ConnectionState::Disconnected,
            tx,
        };
        sub.transition(ConnectionState::Connecting);
        if entry.publisher_up {
            sub.transition(ConnectionState::Connected);
            sub.deliver(sub.retained_for(&entry.retained));
        }
        entry.subs.push(sub);
        Ok(rx)
    }

    fn remove_state_path_subscription(&self, paths: &[Path], server: &ServerOptions) {
        let mut servers = self.servers.lock();
        if let Some(entry) = servers.get_mut(&server.key()) {
            if let Some(pos) = entry.subs.iter().position(|s| s.paths == paths) {
                let mut sub = entry.subs.remove(pos);
                sub.transition(ConnectionState::Cancelled);
            }
        }
    }

    fn subscription_state(&self, paths: &[Path], server: &ServerOptions) -> ConnectionState {
        let servers = self.servers.lock();
        servers
            .get(&server.key())
            .and_then(|entry| entry.subs.iter().find(|s| s.paths == paths))
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn subscription_info(
        &self,
        paths: &[Path],
        server: &ServerOptions,
    ) -> Option<SubscriptionInfo> {
        let servers = self.servers.lock();
        servers
            .get(&server.key())
            .and_then(|entry| entry.subs.iter().find(|s| s.paths == paths))
            .map(|s| SubscriptionInfo {
                subscriber_id: s.subscriber_id.clone(),
                server: format!("{}:{}", server.dst_ip, server.dst_port),
                paths: s.paths.clone(),
                state: s.state,
            })
    }
}

/// Handle for one server's publishing side. Dropping it takes the publisher
/// down, disconnecting its subscribers.
pub struct PublisherHandle {
    servers: Arc<ServerTable>,
    addr: (IpAddr, u16),
}

impl PublisherHandle {
    pub fn publish(&self, path: Path, contents: Bytes) {
        publish_changes(&self.servers, self.addr, vec![PathChange { path, contents }]);
    }

    pub fn publish_many(&self, changes: Vec<PathChange>) {
        publish_changes(&self.servers, self.addr, changes);
    }

    pub fn stop(self) {
        // Drop runs the actual teardown.
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        stop_publisher(&self.servers, self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn server() -> ServerOptions {
        ServerOptions {
            dst_ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            dst_port: 5908,
            src_ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            priority: StreamPriority::Critical,
        }
    }

    fn opts() -> SubscriptionOptions {
        SubscriptionOptions {
            subscriber_id: "local_::1:agent".into(),
            subscribe_stats: false,
            gr_hold_time: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn replays_retained_state_on_connect() {
        let hub = Arc::new(LocalStreamHub::new());
        let publisher = hub.start_publisher((server().dst_ip, server().dst_port));
        publisher.publish(path(&["a", "b"]), Bytes::from_static(b"v1"));

        let mut rx = hub
            .add_state_path_subscription(opts(), vec![path(&["a", "b"])], server())
            .expect("subscribe");

        // Disconnected -> Connecting -> Connected, then the retained value.
        let mut states = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.expect("event") {
                StreamEvent::StateChanged { new, .. } => states.push(new),
                StreamEvent::Data(_) => panic!("expected state transitions first"),
            }
        }
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        match rx.recv().await.expect("event") {
            StreamEvent::Data(unit) => {
                assert_eq!(unit.changes.len(), 1);
                assert_eq!(unit.changes[0].contents, Bytes::from_static(b"v1"));
            }
            other => panic!("expected initial sync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publisher_stop_disconnects_subscribers() {
        let hub = Arc::new(LocalStreamHub::new());
        let publisher = hub.start_publisher((server().dst_ip, server().dst_port));
        let mut rx = hub
            .add_state_path_subscription(opts(), vec![path(&["a"])], server())
            .expect("subscribe");

        // Drain the connect transitions.
        for _ in 0..2 {
            rx.recv().await.expect("event");
        }

        publisher.stop();
        match rx.recv().await.expect("event") {
            StreamEvent::StateChanged { new, .. } => {
                assert_eq!(new, ConnectionState::Disconnected);
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert_eq!(
            hub.subscription_state(&[path(&["a"])], &server()),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn remove_closes_the_stream() {
        let hub = Arc::new(LocalStreamHub::new());
        let paths = vec![path(&["a"])];
        let mut rx = hub
            .add_state_path_subscription(opts(), paths.clone(), server())
            .expect("subscribe");
        rx.recv().await.expect("connecting transition");

        hub.remove_state_path_subscription(&paths, &server());
        match rx.recv().await.expect("event") {
            StreamEvent::StateChanged { new, .. } => {
                assert_eq!(new, ConnectionState::Cancelled);
            }
            other => panic!("expected cancel, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        assert!(hub.subscription_info(&paths, &server()).is_none());
    }

    #[tokio::test]
    async fn late_publisher_connects_waiting_subscribers() {
        let hub = Arc::new(LocalStreamHub::new());
        let mut rx = hub
            .add_state_path_subscription(opts(), vec![path(&["a"])], server())
            .expect("subscribe");
        rx.recv().await.expect("connecting transition");
        assert_eq!(
            hub.subscription_state(&[path(&["a"])], &server()),
            ConnectionState::Connecting
        );

        let publisher = hub.start_publisher((server().dst_ip, server().dst_port));
        publisher.publish(path(&["a"]), Bytes::from_static(b"late"));
        match rx.recv().await.expect("event") {
            StreamEvent::StateChanged { new, .. } => assert_eq!(new, ConnectionState::Connected),
            other => panic!("expected connect, got {other:?}"),
        }
        match rx.recv().await.expect("event") {
            StreamEvent::Data(unit) => {
                assert_eq!(unit.changes[0].contents, Bytes::from_static(b"late"));
            }
            other => panic!("expected data, got {other:?}"),
        }
    }
}
