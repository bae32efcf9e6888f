//! Stack-wide tunables.
//!
//! Plain struct, no CLI or file layer: hosts build one (usually via
//! `Default`) and pass it to the stack at construction.

/// Timing, capacity and seeding knobs.
///
/// All durations are milliseconds on the stack's monotonic clock.
#[derive(Clone, Debug)]
pub struct StackConfig {
    /// ARP entries older than this are evicted when next encountered.
    pub arp_hard_timeout_ms: u64,
    /// Resolved ARP entries older than this trigger a refresh request on
    /// lookup; `None` disables refresh probing.
    pub arp_soft_timeout_ms: Option<u64>,
    /// Maximum ARP cache entries; creation past this bound drops.
    pub arp_max_entries: usize,

    /// ND6 entries older than this are evicted when next encountered.
    pub nd6_hard_timeout_ms: u64,
    /// Soft-refresh analog for ND6; `None` disables.
    pub nd6_soft_timeout_ms: Option<u64>,
    /// Maximum ND6 cache entries.
    pub nd6_max_entries: usize,
    /// REACHABLE entries older than this demote to STALE (RFC 4861
    /// ReachableTime).
    pub nd6_reachable_ms: u64,
    /// DELAY entries older than this move to PROBE and request a
    /// solicitation (RFC 4861 DELAY_FIRST_PROBE_TIME).
    pub nd6_delay_probe_ms: u64,

    /// A TCP header template older than this is rebuilt before reuse.
    pub tcp_template_lifetime_ms: u64,
    /// Seed for the initial-send-sequence counter.
    pub iss_seed: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            arp_hard_timeout_ms: 128_000,
            arp_soft_timeout_ms: Some(125_000),
            arp_max_entries: 4096,
            nd6_hard_timeout_ms: 1_500_000,
            nd6_soft_timeout_ms: None,
            nd6_max_entries: 4096,
            nd6_reachable_ms: 30_000,
            nd6_delay_probe_ms: 5_000,
            tcp_template_lifetime_ms: 60_000,
            iss_seed: 0x1F2E_3D4C,
        }
    }
}
