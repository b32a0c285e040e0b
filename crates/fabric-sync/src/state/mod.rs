pub mod updater;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{
    InterfaceMap, SwitchId, SwitchInterfaces, SwitchSystemPorts, SystemPortMap,
};

/// Versioned switch state. Cloning a root is cheap: per-switch sub-maps are
/// shared by reference and replaced wholesale on write, never mutated in
/// place while a previous root may still hold them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwitchState {
    remote_system_ports: BTreeMap<SwitchId, Arc<SystemPortMap>>,
    remote_interfaces: BTreeMap<SwitchId, Arc<InterfaceMap>>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_system_ports(&self) -> &BTreeMap<SwitchId, Arc<SystemPortMap>> {
        &self.remote_system_ports
    }

    pub fn remote_interfaces(&self) -> &BTreeMap<SwitchId, Arc<InterfaceMap>> {
        &self.remote_interfaces
    }

    pub fn remote_system_ports_for(&self, switch_id: SwitchId) -> Option<&Arc<SystemPortMap>> {
        self.remote_system_ports.get(&switch_id)
    }

    pub fn remote_interfaces_for(&self, switch_id: SwitchId) -> Option<&Arc<InterfaceMap>> {
        self.remote_interfaces.get(&switch_id)
    }

    /// All remote system ports across switch ids, flattened.
    pub fn all_remote_system_ports(&self) -> SystemPortMap {
        let mut all = SystemPortMap::new();
        for map in self.remote_system_ports.values() {
            all.extend(map.iter().map(|(id, port)| (*id, port.clone())));
        }
        all
    }

    pub fn all_remote_interfaces(&self) -> InterfaceMap {
        let mut all = InterfaceMap::new();
        for map in self.remote_interfaces.values() {
            all.extend(map.iter().map(|(id, intf)| (*id, intf.clone())));
        }
        all
    }

    /// Returns a new root with the given per-switch-id maps replaced. An
    /// empty map for a switch id removes that id's entry; switch ids not
    /// named in the contribution keep their current entries by reference.
    pub fn with_remote_contribution(
        &self,
        ports: &SwitchSystemPorts,
        intfs: &SwitchInterfaces,
    ) -> SwitchState {
        let mut next = self.clone();
        for (switch_id, map) in ports {
            if map.is_empty() {
                next.remote_system_ports.remove(switch_id);
            } else {
                next.remote_system_ports
                    .insert(*switch_id, Arc::new(map.clone()));
            }
        }
        for (switch_id, map) in intfs {
            if map.is_empty() {
                next.remote_interfaces.remove(switch_id);
            } else {
                next.remote_interfaces
                    .insert(*switch_id, Arc::new(map.clone()));
            }
        }
        next
    }

    /// True when the tree already holds exactly this contribution for every
    /// switch id the contribution names.
    pub fn matches_remote_contribution(
        &self,
        ports: &SwitchSystemPorts,
        intfs: &SwitchInterfaces,
    ) -> bool {
        for (switch_id, map) in ports {
            match self.remote_system_ports.get(switch_id) {
                Some(current) => {
                    if current.as_ref() != map {
                        return false;
                    }
                }
                None => {
                    if !map.is_empty() {
                        return false;
                    }
                }
            }
        }
        for (switch_id, map) in intfs {
            match self.remote_interfaces.get(switch_id) {
                Some(current) => {
                    if current.as_ref() != map {
                        return false;
                    }
                }
                None => {
                    if !map.is_empty() {
                        return false;
                    }
                }
            }
        }
        true
    }
}
