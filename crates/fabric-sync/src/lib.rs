//! Keeps a fleet of switch agents eventually consistent on the system ports
//! and router interfaces that live on other nodes: per-remote-node stream
//! subscriptions feeding a rollback-protected merge into a versioned
//! copy-on-write switch state, with graceful-restart hold semantics across
//! bounded disconnects.

pub mod config;
pub mod manager;
pub mod metrics;
pub mod paths;
pub mod session;
pub mod state;
pub mod subscription;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use config::SyncConfig;
pub use manager::{FleetObserver, FleetSyncManager};
pub use metrics::SwitchStats;
pub use session::{DsfSession, DsfSessionSnapshot, DsfSessionState, SubscriberState};
pub use state::updater::{HwProgrammer, NullProgrammer, StateUpdater, UpdateError};
pub use state::SwitchState;
pub use subscription::apply::RemoteContribution;
pub use subscription::{Subscription, SubscriptionCallbacks, SubscriptionState};
pub use types::{
    make_remote_endpoint, Interface, InterfaceId, InterfaceKind, InterfaceMap, RemoteNodeIdentity,
    SwitchId, SwitchInterfaces, SwitchSystemPorts, SystemPort, SystemPortId, SystemPortMap,
};
