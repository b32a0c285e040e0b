use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static FAILED_SUBSCRIPTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "fabric_sync_failed_subscriptions",
            "currently failed or unestablished subscriptions per remote node",
        ),
        &["peer"],
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static UPDATE_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "fabric_sync_update_failed_total",
        "remote state updates rejected by validation or hardware programming",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static GR_HOLD_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "fabric_sync_gr_hold_expired_total",
        "graceful-restart hold windows that lapsed without reconnection",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode failed");
    }
    buffer
}

/// Counter sink handed to subscriptions. Cheap to clone; all instances feed
/// the same registry.
#[derive(Clone, Default)]
pub struct SwitchStats;

impl SwitchStats {
    pub fn new() -> Self {
        Self
    }

    pub fn failed_dsf_subscription(&self, peer: &str, delta: i64) {
        FAILED_SUBSCRIPTIONS.with_label_values(&[peer]).add(delta);
    }

    pub fn failed_dsf_subscriptions(&self, peer: &str) -> i64 {
        FAILED_SUBSCRIPTIONS.with_label_values(&[peer]).get()
    }

    pub fn dsf_update_failed(&self) {
        UPDATE_FAILED.inc();
    }

    pub fn update_failures(&self) -> u64 {
        UPDATE_FAILED.get()
    }

    pub fn dsf_session_gr_expired(&self) {
        GR_HOLD_EXPIRED.inc();
    }

    pub fn gr_expirations(&self) -> u64 {
        GR_HOLD_EXPIRED.get()
    }
}
