use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Identifier for one ASIC/switch instance, local or remote.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SwitchId(pub u32);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "switch{}", self.0)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SystemPortId(pub u64);

impl fmt::Display for SystemPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sysport{}", self.0)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct InterfaceId(pub u64);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "intf{}", self.0)
    }
}

/// A port on a remote switch chip, as seen for routing purposes here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPort {
    pub id: SystemPortId,
    pub switch_id: SwitchId,
    pub name: String,
    pub speed_mbps: u32,
    pub num_voqs: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    SystemPort,
    Vlan,
}

/// A router interface bound to a system port or VLAN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub kind: InterfaceKind,
    pub system_port: Option<SystemPortId>,
    pub mtu: u32,
    pub addresses: Vec<String>,
}

pub type SystemPortMap = BTreeMap<SystemPortId, SystemPort>;
pub type InterfaceMap = BTreeMap<InterfaceId, Interface>;

/// Per-switch-id system ports, as carried on the wire and merged into state.
pub type SwitchSystemPorts = BTreeMap<SwitchId, SystemPortMap>;
/// Per-switch-id router interfaces.
pub type SwitchInterfaces = BTreeMap<SwitchId, InterfaceMap>;

pub fn make_remote_endpoint(name: &str, ip: IpAddr) -> String {
    format!("{name}::{ip}")
}

/// Fixed identity of one remote node, held for the lifetime of its
/// configured membership.
#[derive(Clone, Debug)]
pub struct RemoteNodeIdentity {
    pub local_node_name: String,
    pub remote_node_name: String,
    pub remote_switch_ids: BTreeSet<SwitchId>,
    pub local_inband_ip: IpAddr,
    pub remote_inband_ip: IpAddr,
}

impl RemoteNodeIdentity {
    pub fn remote_endpoint(&self) -> String {
        make_remote_endpoint(&self.remote_node_name, self.remote_inband_ip)
    }

    /// The name this node publishes under on the remote side; used for the
    /// echoed-subscription path.
    pub fn local_endpoint(&self) -> String {
        make_remote_endpoint(&self.local_node_name, self.local_inband_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn remote_endpoint_format() {
        let identity = RemoteNodeIdentity {
            local_node_name: "local".into(),
            remote_node_name: "remote".into(),
            remote_switch_ids: BTreeSet::from([SwitchId(4)]),
            local_inband_ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            remote_inband_ip: IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 2)),
        };
        assert_eq!(identity.remote_endpoint(), "remote::::2");
        assert_eq!(identity.local_endpoint(), "local::::1");
    }
}
