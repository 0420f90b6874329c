//! Subsystem counters, designed for JSON export.

use serde::Serialize;

use crate::pkt::DropReason;

/// Control-thread counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NdpStats {
    /// Solicitations emitted (probes).
    pub ns_tx: u64,
    /// Advertisements processed on the control thread.
    pub na_rx: u64,
    /// Peers learned from gratuitous solicitations.
    pub learns: u64,
    /// Next-hops that reached REACHABLE.
    pub resolved: u64,
    /// Next-hops that exhausted their probe budget.
    pub failed: u64,
    /// Packets queued awaiting resolution.
    pub held: u64,
    /// Packets re-posted to the output node (hold-queue flushes and
    /// reachable-race re-injections).
    pub flushed: u64,
    /// Probe emissions that failed (no source address, iface gone).
    pub probe_errors: u64,
    /// Datapath drops by edge.
    pub drops: DropStats,
}

/// Per-edge drop counters; every datapath error lands here instead of
/// surfacing as a value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DropStats {
    pub invalid: u64,
    pub no_route: u64,
    pub ring_full: u64,
    pub hold_overflow: u64,
    pub unreachable: u64,
}

impl DropStats {
    pub fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::Invalid => self.invalid += 1,
            DropReason::NoRoute => self.no_route += 1,
            DropReason::RingFull => self.ring_full += 1,
            DropReason::HoldOverflow => self.hold_overflow += 1,
            DropReason::Unreachable => self.unreachable += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.invalid + self.no_route + self.ring_full + self.hold_overflow + self.unreachable
    }
}

/// Per-worker datapath counters. Each worker owns its copy; no sharing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DpStats {
    /// Solicitations seen by the NS input node.
    pub ns_rx: u64,
    /// Advertisements seen by the NA input node.
    pub na_rx: u64,
    /// Advertisements emitted in reply to solicitations.
    pub na_tx: u64,
    /// Learn copies handed to the control thread.
    pub learn_tx: u64,
    /// Misses posted to the control thread.
    pub miss_tx: u64,
    pub drops: DropStats,
}
