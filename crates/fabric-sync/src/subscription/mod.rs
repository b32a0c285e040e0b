pub mod apply;
pub mod gr_timer;
pub mod validator;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stream_bus::{
    ConnectionState, Path, PathUnit, ServerOptions, StreamClient, StreamError, StreamEvent,
    StreamPriority, SubscriptionInfo, SubscriptionOptions,
};

use crate::config::SyncConfig;
use crate::metrics::SwitchStats;
use crate::paths;
use crate::session::{DsfSession, DsfSessionSnapshot, DsfSessionState, SubscriberState};
use crate::state::updater::{StateUpdater, UpdateError};
use crate::state::SwitchState;
use crate::types::{RemoteNodeIdentity, SwitchId, SwitchInterfaces, SwitchSystemPorts};
use crate::wire;

use apply::{apply_contribution, RemoteContribution};
use gr_timer::GrHoldTimer;
use validator::UpdateValidator;

/// Subscription-layer view of the stream, richer than the transport's
/// connection state: the disconnect side encodes where the graceful-restart
/// hold stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connected,
    DisconnectedGrHold,
    DisconnectedGrHoldExpired,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscriptionState::Disconnected => "disconnected",
            SubscriptionState::Connected => "connected",
            SubscriptionState::DisconnectedGrHold => "disconnected-gr-hold",
            SubscriptionState::DisconnectedGrHoldExpired => "disconnected-gr-hold-expired",
        };
        f.write_str(name)
    }
}

/// Callbacks into the owning manager. All of them may be invoked from the
/// subscription's worker tasks.
#[derive(Clone)]
pub struct SubscriptionCallbacks {
    pub on_state_change: Arc<dyn Fn(SubscriptionState, SubscriptionState) + Send + Sync>,
    pub on_gr_hold_expired: Arc<dyn Fn() + Send + Sync>,
    pub on_state_update: Arc<dyn Fn(&SwitchSystemPorts, &SwitchInterfaces) + Send + Sync>,
}

impl SubscriptionCallbacks {
    pub fn noop() -> Self {
        Self {
            on_state_change: Arc::new(|_, _| {}),
            on_gr_hold_expired: Arc::new(|| {}),
            on_state_update: Arc::new(|_, _| {}),
        }
    }
}

impl Default for SubscriptionCallbacks {
    fn default() -> Self {
        Self::noop()
    }
}

struct Inner {
    /// Most recent not-yet-applied chunk, coalesced per switch id.
    pending: Option<RemoteContribution>,
    /// Last successfully applied contribution; partial chunks are completed
    /// against it before applying.
    cached: RemoteContribution,
    apply_in_flight: bool,
}

/// One logical replication stream from a single remote node.
pub struct Subscription {
    weak: Weak<Subscription>,
    identity: RemoteNodeIdentity,
    server: ServerOptions,
    all_paths: Vec<Path>,
    system_ports_path: Path,
    interfaces_path: Path,
    subscriptions_path: Path,
    client: Arc<dyn StreamClient>,
    updater: StateUpdater,
    stats: SwitchStats,
    validator: UpdateValidator,
    callbacks: SubscriptionCallbacks,
    session: Mutex<DsfSession>,
    gr_timer: GrHoldTimer,
    inner: Mutex<Inner>,
    sub_state: Mutex<SubscriptionState>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Registers the stream paths with the transport and spawns the event
    /// worker. Must be called within a tokio runtime. The subscription
    /// counts as failed until a connect is observed.
    pub fn spawn(
        identity: RemoteNodeIdentity,
        local_switch_ids: BTreeSet<SwitchId>,
        config: &SyncConfig,
        client: Arc<dyn StreamClient>,
        updater: StateUpdater,
        stats: SwitchStats,
        callbacks: SubscriptionCallbacks,
    ) -> Result<Arc<Self>, StreamError> {
        let server = ServerOptions {
            dst_ip: identity.remote_inband_ip,
            dst_port: config.sync_port,
            src_ip: identity.local_inband_ip,
            priority: StreamPriority::Critical,
        };
        let system_ports_path = paths::system_ports();
        let interfaces_path = paths::interfaces();
        let subscriptions_path = paths::subscriptions(&identity.local_endpoint());
        let all_paths = vec![
            system_ports_path.clone(),
            interfaces_path.clone(),
            subscriptions_path.clone(),
        ];
        let opts = SubscriptionOptions {
            subscriber_id: format!(
                "{}_{}:agent",
                identity.local_node_name, identity.remote_inband_ip
            ),
            subscribe_stats: false,
            gr_hold_time: config.gr_hold,
        };

        stats.failed_dsf_subscription(&identity.remote_node_name, 1);
        let rx = match client.add_state_path_subscription(
            opts.clone(),
            all_paths.clone(),
            server.clone(),
        ) {
            Ok(rx) => rx,
            Err(err) => {
                stats.failed_dsf_subscription(&identity.remote_node_name, -1);
                return Err(err);
            }
        };

        let validator = UpdateValidator::new(local_switch_ids, identity.remote_switch_ids.clone());
        let session = DsfSession::new(identity.remote_endpoint());
        let gr_timer = GrHoldTimer::new(config.gr_hold);
        let subscription = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            identity,
            server,
            all_paths,
            system_ports_path,
            interfaces_path,
            subscriptions_path,
            client,
            updater,
            stats,
            validator,
            callbacks,
            session: Mutex::new(session),
            gr_timer,
            inner: Mutex::new(Inner {
                pending: None,
                cached: RemoteContribution::default(),
                apply_in_flight: false,
            }),
            sub_state: Mutex::new(SubscriptionState::Disconnected),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(None),
        });
        debug!(
            endpoint = %subscription.identity.remote_endpoint(),
            subscriber_id = %opts.subscriber_id,
            "added subscription"
        );
        let worker = {
            let subscription = Arc::clone(&subscription);
            tokio::spawn(async move { subscription.run(rx).await })
        };
        *subscription.worker.lock() = Some(worker);
        Ok(subscription)
    }

    /// Unregisters the stream paths and cancels any armed hold timer. Safe
    /// to call concurrently with in-flight applies; their results are
    /// discarded once the stopped flag is up.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if *self.sub_state.lock() != SubscriptionState::Connected {
            // The subscription never (re)connected; release its slot in the
            // failed gauge rather than leaking a permanently-failing entry.
            self.stats
                .failed_dsf_subscription(&self.identity.remote_node_name, -1);
        }
        self.gr_timer.cancel();
        self.inner.lock().pending = None;
        self.client
            .remove_state_path_subscription(&self.all_paths, &self.server);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        debug!(endpoint = %self.identity.remote_endpoint(), "removed subscription");
    }

    pub fn identity(&self) -> &RemoteNodeIdentity {
        &self.identity
    }

    pub fn remote_endpoint(&self) -> String {
        self.identity.remote_endpoint()
    }

    /// The subscription-layer state last reported through the callbacks.
    pub fn subscription_state(&self) -> SubscriptionState {
        *self.sub_state.lock()
    }

    /// Transport-level stream state, straight from the client.
    pub fn stream_state(&self) -> ConnectionState {
        self.client.subscription_state(&self.all_paths, &self.server)
    }

    pub fn subscription_info(&self) -> Option<SubscriptionInfo> {
        self.client.subscription_info(&self.all_paths, &self.server)
    }

    pub fn dsf_session_snapshot(&self) -> DsfSessionSnapshot {
        self.session.lock().snapshot()
    }

    pub fn dsf_session_state(&self) -> DsfSessionState {
        self.session.lock().state()
    }

    /// Test support: the last successfully applied contribution. Not part of
    /// the production contract.
    pub fn cached_state(&self) -> RemoteContribution {
        self.inner.lock().cached.clone()
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<StreamEvent>) {
        while let Some(event) = rx.recv().await {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            match event {
                StreamEvent::StateChanged { old, new } => {
                    self.handle_stream_state_update(old, new);
                }
                StreamEvent::Data(unit) => self.handle_stream_data(unit),
            }
        }
    }

    fn handle_stream_state_update(&self, old: ConnectionState, new: ConnectionState) {
        debug!(
            endpoint = %self.identity.remote_endpoint(),
            %old,
            %new,
            "stream state changed"
        );
        if new == ConnectionState::Connected {
            // Reconnecting inside the hold window keeps previously applied
            // state as-is; the publisher's initial sync patches the cache.
            self.gr_timer.cancel();
            self.transition_sub_state(SubscriptionState::Connected);
            return;
        }
        let was_connected = *self.sub_state.lock() == SubscriptionState::Connected;
        if !was_connected {
            return;
        }
        let has_applied_state = !self.inner.lock().cached.is_empty();
        if has_applied_state && self.arm_gr_hold() {
            self.transition_sub_state(SubscriptionState::DisconnectedGrHold);
        } else {
            if has_applied_state {
                self.evict("stream disconnected");
            }
            self.transition_sub_state(SubscriptionState::Disconnected);
        }
    }

    fn handle_stream_data(&self, unit: PathUnit) {
        let mut chunk = RemoteContribution::default();
        let mut ports_or_intfs_changed = false;
        for change in unit.changes {
            if change.path == self.system_ports_path {
                match wire::decode_system_ports(&change.contents) {
                    Ok(ports) => {
                        debug!(endpoint = %self.identity.remote_endpoint(), "got system port update");
                        chunk.system_ports = ports;
                        ports_or_intfs_changed = true;
                    }
                    Err(err) => {
                        warn!(
                            endpoint = %self.identity.remote_endpoint(),
                            error = %err,
                            "dropping undecodable system port update"
                        );
                        self.stats.dsf_update_failed();
                        return;
                    }
                }
            } else if change.path == self.interfaces_path {
                match wire::decode_interfaces(&change.contents) {
                    Ok(intfs) => {
                        debug!(endpoint = %self.identity.remote_endpoint(), "got rif update");
                        chunk.interfaces = intfs;
                        ports_or_intfs_changed = true;
                    }
                    Err(err) => {
                        warn!(
                            endpoint = %self.identity.remote_endpoint(),
                            error = %err,
                            "dropping undecodable rif update"
                        );
                        self.stats.dsf_update_failed();
                        return;
                    }
                }
            } else if change.path == self.subscriptions_path {
                match wire::decode_subscriber_state(&change.contents) {
                    Ok(state) => {
                        debug!(
                            endpoint = %self.identity.remote_endpoint(),
                            state = ?state,
                            "got subscriber echo update"
                        );
                        self.session.lock().remote_sub_state_changed(state);
                    }
                    Err(err) => {
                        warn!(
                            endpoint = %self.identity.remote_endpoint(),
                            error = %err,
                            "dropping undecodable subscriber echo"
                        );
                    }
                }
            } else {
                warn!(
                    endpoint = %self.identity.remote_endpoint(),
                    path = ?change.path,
                    "unexpected path in stream update"
                );
            }
        }
        if !ports_or_intfs_changed {
            return;
        }
        // Reject bad ownership per chunk, before coalescing can fold a bad
        // chunk into a good candidate.
        if let Err(err) = self
            .validator
            .validate_switch_ids(&chunk.system_ports, &chunk.interfaces)
        {
            warn!(
                endpoint = %self.identity.remote_endpoint(),
                error = %err,
                "dropping remote chunk"
            );
            self.stats.dsf_update_failed();
            return;
        }
        self.queue_update(chunk);
    }

    /// Coalesces the chunk into the pending buffer and starts a drain unless
    /// one is already running; the running drain will pick the chunk up.
    fn queue_update(&self, chunk: RemoteContribution) {
        let start_drain = {
            let mut inner = self.inner.lock();
            match inner.pending.as_mut() {
                Some(pending) => pending.merge_from(chunk),
                None => inner.pending = Some(chunk),
            }
            if inner.apply_in_flight {
                false
            } else {
                inner.apply_in_flight = true;
                true
            }
        };
        if start_drain {
            if let Some(subscription) = self.weak.upgrade() {
                tokio::spawn(async move { subscription.drain_pending().await });
            }
        }
    }

    async fn drain_pending(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                let mut inner = self.inner.lock();
                inner.pending = None;
                inner.apply_in_flight = false;
                return;
            }
            let update = {
                let mut inner = self.inner.lock();
                match inner.pending.take() {
                    Some(update) => update,
                    None => {
                        inner.apply_in_flight = false;
                        return;
                    }
                }
            };
            self.update_with_rollback_protection(update).await;
        }
    }

    /// Merges one coalesced chunk into the shared tree. A partial chunk is
    /// first completed against the applied-state cache; a candidate the
    /// validator rejects is dropped whole; a candidate hardware refuses is
    /// answered with a single eviction of this remote's contribution.
    pub async fn update_with_rollback_protection(&self, update: RemoteContribution) {
        let candidate = {
            let inner = self.inner.lock();
            update.patched_onto(&inner.cached)
        };
        if let Err(err) = self
            .validator
            .validate(&candidate.system_ports, &candidate.interfaces)
        {
            warn!(
                endpoint = %self.identity.remote_endpoint(),
                error = %err,
                "rejecting remote update"
            );
            self.stats.dsf_update_failed();
            return;
        }
        let description = format!(
            "update remote state for {}",
            self.identity.remote_endpoint()
        );
        match self.apply_to_tree(candidate.clone(), description).await {
            Ok(_) => {
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                self.inner.lock().cached = candidate.clone().compacted();
                (self.callbacks.on_state_update)(&candidate.system_ports, &candidate.interfaces);
            }
            Err(err) => {
                self.stats.dsf_update_failed();
                warn!(
                    endpoint = %self.identity.remote_endpoint(),
                    error = %err,
                    "remote update failed to program, evicting this node's contribution"
                );
                self.evict("programming failure");
            }
        }
    }

    /// Queues the empty contribution for every owned switch id and drops the
    /// cache and anything else pending. Running through the drain queue keeps
    /// the eviction ordered after any apply already in flight. The next
    /// legitimate update or reconnect re-attempts a non-empty apply; there is
    /// no retry of a failed candidate.
    fn evict(&self, reason: &str) {
        debug!(
            endpoint = %self.identity.remote_endpoint(),
            reason,
            "evicting remote contribution"
        );
        let eviction = RemoteContribution::eviction(&self.identity.remote_switch_ids);
        let start_drain = {
            let mut inner = self.inner.lock();
            inner.cached = RemoteContribution::default();
            inner.pending = Some(eviction);
            if inner.apply_in_flight {
                false
            } else {
                inner.apply_in_flight = true;
                true
            }
        };
        if start_drain {
            if let Some(subscription) = self.weak.upgrade() {
                tokio::spawn(async move { subscription.drain_pending().await });
            }
        }
    }

    async fn apply_to_tree(
        &self,
        contribution: RemoteContribution,
        description: String,
    ) -> Result<Arc<SwitchState>, UpdateError> {
        self.updater
            .submit(description, move |state| {
                apply_contribution(state, &contribution)
            })
            .await
    }

    fn arm_gr_hold(&self) -> bool {
        let weak = self.weak.clone();
        self.gr_timer.arm(move || {
            if let Some(subscription) = weak.upgrade() {
                subscription.process_gr_hold_expired();
            }
        })
    }

    fn process_gr_hold_expired(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if *self.sub_state.lock() == SubscriptionState::Connected {
            // Lost the race with a reconnect; the stream is healthy again.
            return;
        }
        self.stats.dsf_session_gr_expired();
        warn!(
            endpoint = %self.identity.remote_endpoint(),
            "graceful-restart hold expired, evicting remote state"
        );
        self.evict("gr hold expired");
        (self.callbacks.on_gr_hold_expired)();
        self.transition_sub_state(SubscriptionState::DisconnectedGrHoldExpired);
    }

    fn transition_sub_state(&self, new: SubscriptionState) {
        let old = {
            let mut current = self.sub_state.lock();
            if *current == new {
                return;
            }
            let old = *current;
            *current = new;
            old
        };
        let old_connected = old == SubscriptionState::Connected;
        let new_connected = new == SubscriptionState::Connected;
        if old_connected != new_connected {
            let delta = if new_connected { -1 } else { 1 };
            self.stats
                .failed_dsf_subscription(&self.identity.remote_node_name, delta);
            let local = if new_connected {
                SubscriberState::Connected
            } else {
                SubscriberState::Disconnected
            };
            self.session.lock().local_sub_state_changed(local);
        }
        debug!(
            endpoint = %self.identity.remote_endpoint(),
            %old,
            %new,
            "subscription state changed"
        );
        (self.callbacks.on_state_change)(old, new);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Owners call stop() themselves; this covers direct construction in
        // tests.
        self.stop();
    }
}
