//! Candidate construction for the rollback-protected apply path: coalescing
//! of pending chunks, patching of partial chunks onto the last applied
//! picture, and the eviction fallback.

use std::collections::BTreeSet;

use crate::state::SwitchState;
use crate::types::{SwitchId, SwitchInterfaces, SwitchSystemPorts};

/// One remote node's system-port/interface contribution, keyed by switch id.
/// Doubles as the pending-update buffer and the applied-state cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteContribution {
    pub system_ports: SwitchSystemPorts,
    pub interfaces: SwitchInterfaces,
}

impl RemoteContribution {
    pub fn is_empty(&self) -> bool {
        self.system_ports.is_empty() && self.interfaces.is_empty()
    }

    /// Coalesces a newer chunk into this buffer: last writer wins per switch
    /// id, independently for each of the two maps.
    pub fn merge_from(&mut self, newer: RemoteContribution) {
        for (switch_id, map) in newer.system_ports {
            self.system_ports.insert(switch_id, map);
        }
        for (switch_id, map) in newer.interfaces {
            self.interfaces.insert(switch_id, map);
        }
    }

    /// Completes a partial chunk against the last successfully applied
    /// picture: any per-switch-id map the chunk omits is taken from the
    /// cache, so an interface-only chunk cannot read as "all system ports
    /// deleted".
    pub fn patched_onto(&self, cache: &RemoteContribution) -> RemoteContribution {
        let mut full = self.clone();
        for (switch_id, map) in &cache.system_ports {
            full.system_ports
                .entry(*switch_id)
                .or_insert_with(|| map.clone());
        }
        for (switch_id, map) in &cache.interfaces {
            full.interfaces
                .entry(*switch_id)
                .or_insert_with(|| map.clone());
        }
        full
    }

    /// Drops per-switch-id maps that carry nothing, so an applied eviction
    /// caches as empty rather than as a map of empty maps.
    pub fn compacted(mut self) -> RemoteContribution {
        self.system_ports.retain(|_, map| !map.is_empty());
        self.interfaces.retain(|_, map| !map.is_empty());
        self
    }

    /// The empty contribution for every given switch id; applying it removes
    /// the remote node's data from the tree.
    pub fn eviction(switch_ids: &BTreeSet<SwitchId>) -> RemoteContribution {
        let mut contribution = RemoteContribution::default();
        for switch_id in switch_ids {
            contribution.system_ports.insert(*switch_id, Default::default());
            contribution.interfaces.insert(*switch_id, Default::default());
        }
        contribution
    }
}

/// Transform for the state-update pipeline: merges the contribution into the
/// tree, or returns `None` when the owned key ranges already hold exactly
/// this data (no hardware submission for structural no-ops).
pub fn apply_contribution(
    state: &SwitchState,
    contribution: &RemoteContribution,
) -> Option<SwitchState> {
    if state.matches_remote_contribution(&contribution.system_ports, &contribution.interfaces) {
        return None;
    }
    Some(state.with_remote_contribution(&contribution.system_ports, &contribution.interfaces))
}
