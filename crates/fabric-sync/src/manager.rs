use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use stream_bus::{StreamClient, StreamError, SubscriptionInfo};

use crate::config::SyncConfig;
use crate::metrics::SwitchStats;
use crate::session::DsfSessionSnapshot;
use crate::state::updater::StateUpdater;
use crate::subscription::{Subscription, SubscriptionCallbacks, SubscriptionState};
use crate::types::{RemoteNodeIdentity, SwitchId, SwitchInterfaces, SwitchSystemPorts};

/// Fleet-level notifications, one implementor shared by every subscription.
/// All methods default to no-ops.
pub trait FleetObserver: Send + Sync {
    fn subscription_state_changed(
        &self,
        _endpoint: &str,
        _old: SubscriptionState,
        _new: SubscriptionState,
    ) {
    }

    fn gr_hold_expired(&self, _endpoint: &str) {}

    fn remote_state_applied(
        &self,
        _endpoint: &str,
        _ports: &SwitchSystemPorts,
        _intfs: &SwitchInterfaces,
    ) {
    }
}

struct NullObserver;

impl FleetObserver for NullObserver {}

/// Owns one subscription per configured remote node and aggregates their
/// sessions for introspection.
pub struct FleetSyncManager {
    local_node_name: String,
    local_inband_ip: IpAddr,
    local_switch_ids: BTreeSet<SwitchId>,
    config: SyncConfig,
    client: Arc<dyn StreamClient>,
    updater: StateUpdater,
    stats: SwitchStats,
    observer: Arc<dyn FleetObserver>,
    subscriptions: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl FleetSyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_node_name: impl Into<String>,
        local_inband_ip: IpAddr,
        local_switch_ids: BTreeSet<SwitchId>,
        config: SyncConfig,
        client: Arc<dyn StreamClient>,
        updater: StateUpdater,
        stats: SwitchStats,
        observer: Option<Arc<dyn FleetObserver>>,
    ) -> Self {
        Self {
            local_node_name: local_node_name.into(),
            local_inband_ip,
            local_switch_ids,
            config,
            client,
            updater,
            stats,
            observer: observer.unwrap_or_else(|| Arc::new(NullObserver)),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts syncing from a newly configured remote node. Replaces (and
    /// stops) any previous subscription for the same endpoint.
    pub fn add_remote_node(
        &self,
        remote_node_name: impl Into<String>,
        remote_inband_ip: IpAddr,
        remote_switch_ids: BTreeSet<SwitchId>,
    ) -> Result<(), StreamError> {
        let identity = RemoteNodeIdentity {
            local_node_name: self.local_node_name.clone(),
            remote_node_name: remote_node_name.into(),
            remote_switch_ids,
            local_inband_ip: self.local_inband_ip,
            remote_inband_ip,
        };
        let endpoint = identity.remote_endpoint();
        if let Some(previous) = self.subscriptions.lock().remove(&endpoint) {
            previous.stop();
        }
        let callbacks = self.callbacks_for(endpoint.clone());
        let subscription = Subscription::spawn(
            identity,
            self.local_switch_ids.clone(),
            &self.config,
            Arc::clone(&self.client),
            self.updater.clone(),
            self.stats.clone(),
            callbacks,
        )?;
        debug!(endpoint = %endpoint, "remote node configured");
        self.subscriptions.lock().insert(endpoint, subscription);
        Ok(())
    }

    /// Stops syncing from a deconfigured remote node.
    pub fn remove_remote_node(&self, endpoint: &str) {
        let removed = self.subscriptions.lock().remove(endpoint);
        match removed {
            Some(subscription) => {
                subscription.stop();
                debug!(endpoint = %endpoint, "remote node deconfigured");
            }
            None => warn!(endpoint = %endpoint, "remove for unknown remote node"),
        }
    }

    /// Session snapshots for every configured remote node, for the
    /// fleet-wide listing RPC.
    pub fn dsf_sessions(&self) -> Vec<DsfSessionSnapshot> {
        self.subscriptions
            .lock()
            .values()
            .map(|s| s.dsf_session_snapshot())
            .collect()
    }

    /// Transport-level info for every subscription, for debugging.
    pub fn subscription_infos(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .lock()
            .values()
            .filter_map(|s| s.subscription_info())
            .collect()
    }

    pub fn subscription(&self, endpoint: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().get(endpoint).cloned()
    }

    pub fn stop(&self) {
        let drained: Vec<_> = self.subscriptions.lock().drain().collect();
        for (_, subscription) in drained {
            subscription.stop();
        }
    }

    fn callbacks_for(&self, endpoint: String) -> SubscriptionCallbacks {
        let on_state_change = {
            let observer = Arc::clone(&self.observer);
            let endpoint = endpoint.clone();
            Arc::new(move |old: SubscriptionState, new: SubscriptionState| {
                observer.subscription_state_changed(&endpoint, old, new);
            }) as Arc<dyn Fn(SubscriptionState, SubscriptionState) + Send + Sync>
        };
        let on_gr_hold_expired = {
            let observer = Arc::clone(&self.observer);
            let endpoint = endpoint.clone();
            Arc::new(move || {
                observer.gr_hold_expired(&endpoint);
            }) as Arc<dyn Fn() + Send + Sync>
        };
        let on_state_update = {
            let observer = Arc::clone(&self.observer);
            Arc::new(move |ports: &SwitchSystemPorts, intfs: &SwitchInterfaces| {
                observer.remote_state_applied(&endpoint, ports, intfs);
            }) as Arc<dyn Fn(&SwitchSystemPorts, &SwitchInterfaces) + Send + Sync>
        };
        SubscriptionCallbacks {
            on_state_change,
            on_gr_hold_expired,
            on_state_update,
        }
    }
}

impl Drop for FleetSyncManager {
    fn drop(&mut self) {
        self.stop();
    }
}
