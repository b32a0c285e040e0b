//! Wire encoding for path-unit payloads. Each payload carries the
//! publisher's current full map for its path, not a diff.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::session::SubscriberState;
use crate::types::{SwitchInterfaces, SwitchSystemPorts};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload encode failed: {0}")]
    Encode(String),
    #[error("payload decode failed: {0}")]
    Decode(String),
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, WireError> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| WireError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(contents: &Bytes) -> Result<T, WireError> {
    bincode::deserialize(contents).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn encode_system_ports(ports: &SwitchSystemPorts) -> Result<Bytes, WireError> {
    encode(ports)
}

pub fn decode_system_ports(contents: &Bytes) -> Result<SwitchSystemPorts, WireError> {
    decode(contents)
}

pub fn encode_interfaces(intfs: &SwitchInterfaces) -> Result<Bytes, WireError> {
    encode(intfs)
}

pub fn decode_interfaces(contents: &Bytes) -> Result<SwitchInterfaces, WireError> {
    decode(contents)
}

pub fn encode_subscriber_state(state: SubscriberState) -> Result<Bytes, WireError> {
    encode(&state)
}

pub fn decode_subscriber_state(contents: &Bytes) -> Result<SubscriberState, WireError> {
    decode(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SwitchId, SystemPort, SystemPortId, SystemPortMap};

    #[test]
    fn system_ports_survive_the_wire() {
        let mut per_switch = SystemPortMap::new();
        per_switch.insert(
            SystemPortId(1001),
            SystemPort {
                id: SystemPortId(1001),
                switch_id: SwitchId(0),
                name: "eth1/1/1".into(),
                speed_mbps: 400_000,
                num_voqs: 8,
            },
        );
        let mut ports = SwitchSystemPorts::new();
        ports.insert(SwitchId(0), per_switch);

        let bytes = encode_system_ports(&ports).expect("encode");
        let decoded = decode_system_ports(&bytes).expect("decode");
        assert_eq!(decoded, ports);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode_system_ports(&Bytes::from_static(b"\xff\xff"))
            .expect_err("garbage must not decode");
        assert!(matches!(err, WireError::Decode(_)));
    }
}
