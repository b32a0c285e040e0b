use std::collections::BTreeSet;

use thiserror::Error;

use crate::types::{InterfaceId, SwitchId, SwitchInterfaces, SwitchSystemPorts, SystemPortId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("update names local switch id {0}")]
    LocalSwitchId(SwitchId),
    #[error("update names switch id {0} outside the remote node's set")]
    UnownedSwitchId(SwitchId),
    #[error("interface {0} references system port {1} absent from the update")]
    DanglingSystemPort(InterfaceId, SystemPortId),
}

/// Policy hook filtering inbound remote data before it reaches the apply
/// path. Rejected candidates are dropped whole; the remote resends on its
/// own cadence.
pub struct UpdateValidator {
    local_switch_ids: BTreeSet<SwitchId>,
    remote_switch_ids: BTreeSet<SwitchId>,
}

impl UpdateValidator {
    pub fn new(local_switch_ids: BTreeSet<SwitchId>, remote_switch_ids: BTreeSet<SwitchId>) -> Self {
        Self {
            local_switch_ids,
            remote_switch_ids,
        }
    }

    /// Ownership check alone, cheap enough to run on every inbound chunk
    /// before it is coalesced into the pending buffer.
    pub fn validate_switch_ids(
        &self,
        ports: &SwitchSystemPorts,
        intfs: &SwitchInterfaces,
    ) -> Result<(), ValidationError> {
        for switch_id in ports.keys().chain(intfs.keys()) {
            if self.local_switch_ids.contains(switch_id) {
                return Err(ValidationError::LocalSwitchId(*switch_id));
            }
            if !self.remote_switch_ids.contains(switch_id) {
                return Err(ValidationError::UnownedSwitchId(*switch_id));
            }
        }
        Ok(())
    }

    /// Full check for a merged candidate, including cross-references between
    /// the two maps.
    pub fn validate(
        &self,
        ports: &SwitchSystemPorts,
        intfs: &SwitchInterfaces,
    ) -> Result<(), ValidationError> {
        self.validate_switch_ids(ports, intfs)?;
        for (switch_id, intf_map) in intfs {
            for intf in intf_map.values() {
                let Some(system_port) = intf.system_port else {
                    continue;
                };
                let present = ports
                    .get(switch_id)
                    .map(|map| map.contains_key(&system_port))
                    .unwrap_or(false);
                if !present {
                    return Err(ValidationError::DanglingSystemPort(intf.id, system_port));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interface, InterfaceKind, InterfaceMap, SystemPort, SystemPortMap};

    fn validator() -> UpdateValidator {
        UpdateValidator::new(
            BTreeSet::from([SwitchId(0)]),
            BTreeSet::from([SwitchId(4), SwitchId(8)]),
        )
    }

    fn ports(switch_id: u32, ids: &[u64]) -> SwitchSystemPorts {
        let mut map = SystemPortMap::new();
        for id in ids {
            map.insert(
                SystemPortId(*id),
                SystemPort {
                    id: SystemPortId(*id),
                    switch_id: SwitchId(switch_id),
                    name: format!("eth{id}"),
                    speed_mbps: 400_000,
                    num_voqs: 8,
                },
            );
        }
        SwitchSystemPorts::from([(SwitchId(switch_id), map)])
    }

    fn rif(switch_id: u32, intf_id: u64, system_port: u64) -> SwitchInterfaces {
        let mut map = InterfaceMap::new();
        map.insert(
            InterfaceId(intf_id),
            Interface {
                id: InterfaceId(intf_id),
                kind: InterfaceKind::SystemPort,
                system_port: Some(SystemPortId(system_port)),
                mtu: 9000,
                addresses: vec!["42.42.42.1/31".into()],
            },
        );
        SwitchInterfaces::from([(SwitchId(switch_id), map)])
    }

    #[test]
    fn accepts_well_formed_updates() {
        let v = validator();
        assert_eq!(v.validate(&ports(4, &[201]), &rif(4, 201, 201)), Ok(()));
    }

    #[test]
    fn rejects_local_switch_ids() {
        let v = validator();
        assert_eq!(
            v.validate(&ports(0, &[1]), &SwitchInterfaces::new()),
            Err(ValidationError::LocalSwitchId(SwitchId(0)))
        );
    }

    #[test]
    fn rejects_unowned_switch_ids() {
        let v = validator();
        assert_eq!(
            v.validate(&ports(12, &[1]), &SwitchInterfaces::new()),
            Err(ValidationError::UnownedSwitchId(SwitchId(12)))
        );
    }

    #[test]
    fn rejects_interfaces_with_missing_system_ports() {
        let v = validator();
        assert_eq!(
            v.validate(&ports(4, &[201]), &rif(4, 202, 202)),
            Err(ValidationError::DanglingSystemPort(
                InterfaceId(202),
                SystemPortId(202)
            ))
        );
    }

    #[test]
    fn vlan_interfaces_need_no_system_port() {
        let v = validator();
        let mut map = InterfaceMap::new();
        map.insert(
            InterfaceId(300),
            Interface {
                id: InterfaceId(300),
                kind: InterfaceKind::Vlan,
                system_port: None,
                mtu: 1500,
                addresses: Vec::new(),
            },
        );
        let intfs = SwitchInterfaces::from([(SwitchId(4), map)]);
        assert_eq!(v.validate(&SwitchSystemPorts::new(), &intfs), Ok(()));
    }
}
