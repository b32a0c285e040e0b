use stream_bus::{path, Path};

pub fn system_ports() -> Path {
    path(&["agent", "switch-state", "system-port-maps"])
}

pub fn interfaces() -> Path {
    path(&["agent", "switch-state", "interface-maps"])
}

/// The remote node's copy of one subscriber's health entry, keyed by the
/// subscriber's endpoint name.
pub fn subscriptions(endpoint: &str) -> Path {
    let mut p = path(&["agent", "subscriptions"]);
    p.push(endpoint.to_string());
    p
}
