//! # Resolution state machine
//!
//! Drives each next-hop through its lifecycle:
//!
//! ```text
//!   (new) ──create──▶ INCOMPLETE ──advert──▶ REACHABLE ──lifetime──▶ STALE
//!                        │    ▲                  ▲                     │
//!                 budget │    └──────────────────┼──────── advert ─────┤
//!                        ▼                       │                     ▼
//!                     FAILED ──new packet──▶ INCOMPLETE            PROBE (PENDING)
//! ```
//!
//! Every entry point returns [`NhAction`]s for the caller to perform —
//! the machine itself never touches rings, interfaces, or the route table,
//! which keeps each transition directly testable. All entry points run on
//! the single control thread.

use tracing::{debug, trace};
use trellis_common::types::NhFlags;

use crate::clock::Tick;
use crate::pkt::{DropReason, Pkt};
use crate::pool::{NhIndex, NhPool};

use std::fmt::Debug;
use std::hash::Hash;

// ─── Actions ─────────────────────────────────────────────────────────────────

/// Side effects requested by a transition, performed by the caller.
#[derive(Debug)]
pub enum NhAction {
    /// Emit a neighbor solicitation for this next-hop.
    Probe { nh: NhIndex, unicast: bool },
    /// Re-inject a packet toward the IPv6 output node.
    Forward(Pkt),
    /// Free a packet, counting it against the given edge.
    Drop(Pkt, DropReason),
    /// The next-hop exhausted its probe budget.
    Failed(NhIndex),
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Timer and budget parameters, all in control-plane ticks.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub ucast_probes: u8,
    pub bcast_probes: u8,
    pub probe_interval: Tick,
    pub reachable_lifetime: Tick,
    pub max_held: usize,
}

impl From<&crate::config::NdpConfig> for ResolverConfig {
    fn from(cfg: &crate::config::NdpConfig) -> Self {
        ResolverConfig {
            ucast_probes: cfg.ucast_probes,
            bcast_probes: cfg.bcast_probes,
            probe_interval: cfg.probe_interval_ticks(),
            reachable_lifetime: cfg.reachable_ticks(),
            max_held: cfg.max_held_pkts,
        }
    }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Executes the transition table against pool records.
#[derive(Debug, Clone)]
pub struct Resolver {
    cfg: ResolverConfig,
}

impl Resolver {
    pub fn new(cfg: ResolverConfig) -> Self {
        Resolver { cfg }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.cfg
    }

    fn probe_budget(&self) -> u32 {
        u32::from(self.cfg.ucast_probes) + u32::from(self.cfg.bcast_probes)
    }

    /// An advertisement (or a learned solicitation) confirmed the neighbor.
    ///
    /// Records the link-layer address, moves to REACHABLE, and flushes the
    /// hold queue in enqueue order.
    pub fn on_advert<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        idx: NhIndex,
        lladdr: trellis_common::types::MacAddr,
        now: Tick,
        out: &mut Vec<NhAction>,
    ) {
        let Some(nh) = pool.get_mut(idx) else { return };
        if nh
            .flags
            .intersects(NhFlags::STATIC | NhFlags::LOCAL | NhFlags::LINK)
        {
            // Administrative and own-address records keep their configured
            // link-layer address.
            nh.last_reply = now;
            return;
        }
        nh.lladdr = Some(lladdr);
        nh.flags
            .remove(NhFlags::PENDING | NhFlags::STALE | NhFlags::FAILED);
        nh.flags.insert(NhFlags::REACHABLE);
        nh.ucast_probes = 0;
        nh.bcast_probes = 0;
        nh.last_reply = now;
        let out_iface = nh.out_iface;
        let held = nh.drain_held();
        if !held.is_empty() {
            debug!(nh = %idx, pkts = held.len(), lladdr = %lladdr, "resolved, flushing hold queue");
        } else {
            trace!(nh = %idx, lladdr = %lladdr, "resolved");
        }
        for mut pkt in held {
            pkt.meta.nh = Some(idx);
            pkt.meta.iface = out_iface;
            pkt.meta.dst_lladdr = Some(lladdr);
            out.push(NhAction::Forward(pkt));
        }
    }

    /// A packet needs this next-hop.
    ///
    /// REACHABLE forwards immediately. STALE forwards with the stale
    /// address and begins a unicast re-probe. FAILED restarts resolution.
    /// Anything unresolved holds the packet, kicking a probe if none is in
    /// flight.
    pub fn on_need_forward<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        idx: NhIndex,
        mut pkt: Pkt,
        now: Tick,
        out: &mut Vec<NhAction>,
    ) {
        let Some(nh) = pool.get_mut(idx) else {
            out.push(NhAction::Drop(pkt, DropReason::NoRoute));
            return;
        };

        if nh.flags.contains(NhFlags::REACHABLE) || nh.flags.contains(NhFlags::STALE) {
            if let Some(lladdr) = nh.lladdr {
                pkt.meta.nh = Some(idx);
                pkt.meta.iface = nh.out_iface;
                pkt.meta.dst_lladdr = Some(lladdr);
                let stale = nh.flags.contains(NhFlags::STALE);
                out.push(NhAction::Forward(pkt));
                if stale && !nh.flags.contains(NhFlags::PENDING) {
                    nh.flags.insert(NhFlags::PENDING);
                    self.emit_probe(pool, idx, now, out);
                }
                return;
            }
        }

        if nh.flags.contains(NhFlags::FAILED) {
            debug!(nh = %idx, "restarting resolution of failed next-hop");
            nh.flags.remove(NhFlags::FAILED);
            nh.ucast_probes = 0;
            nh.bcast_probes = 0;
        }

        match nh.hold(pkt, self.cfg.max_held) {
            Ok(()) => {}
            Err(pkt) => {
                debug!(nh = %idx, "hold queue full, dropping newest packet");
                out.push(NhAction::Drop(pkt, DropReason::HoldOverflow));
            }
        }

        let need_probe = !nh.flags.contains(NhFlags::PENDING);
        if need_probe {
            nh.flags.insert(NhFlags::PENDING);
            self.emit_probe(pool, idx, now, out);
        }
    }

    /// Periodic sweep: probe retransmission, probe-budget exhaustion, and
    /// reachable-lifetime ageing. STATIC, LOCAL, and LINK records are
    /// exempt.
    pub fn on_tick<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        now: Tick,
        out: &mut Vec<NhAction>,
    ) {
        let idxs: Vec<NhIndex> = pool.iter().map(|(i, _)| i).collect();
        for idx in idxs {
            self.tick_one(pool, idx, now, out);
        }
    }

    fn tick_one<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        idx: NhIndex,
        now: Tick,
        out: &mut Vec<NhAction>,
    ) {
        let Some(nh) = pool.get_mut(idx) else { return };
        if nh
            .flags
            .intersects(NhFlags::STATIC | NhFlags::LOCAL | NhFlags::LINK)
        {
            return;
        }

        if nh.flags.contains(NhFlags::PENDING)
            && now.saturating_sub(nh.last_request) >= self.cfg.probe_interval
        {
            if nh.probes_sent() >= self.probe_budget() {
                self.fail(pool, idx, out);
            } else {
                self.emit_probe(pool, idx, now, out);
            }
            return;
        }

        if nh.flags.contains(NhFlags::REACHABLE)
            && now.saturating_sub(nh.last_reply) >= self.cfg.reachable_lifetime
        {
            nh.flags.remove(NhFlags::REACHABLE);
            nh.flags.insert(NhFlags::STALE);
            trace!(nh = %idx, "reachable lifetime expired, now stale");
        }
    }

    /// Probe-budget exhaustion: drop every held packet and mark FAILED.
    fn fail<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        idx: NhIndex,
        out: &mut Vec<NhAction>,
    ) {
        let Some(nh) = pool.get_mut(idx) else { return };
        nh.flags.remove(NhFlags::PENDING | NhFlags::STALE);
        nh.flags.insert(NhFlags::FAILED);
        let held = nh.drain_held();
        debug!(nh = %idx, dropped = held.len(), "resolution failed, probe budget exhausted");
        out.push(NhAction::Failed(idx));
        for pkt in held {
            out.push(NhAction::Drop(pkt, DropReason::Unreachable));
        }
    }

    /// Pick the probe destination and account for it.
    ///
    /// Unicast to the known address while the neighbor has answered before
    /// and the unicast budget remains; multicast otherwise.
    fn emit_probe<A: Copy + Eq + Hash + Debug>(
        &self,
        pool: &mut NhPool<A>,
        idx: NhIndex,
        now: Tick,
        out: &mut Vec<NhAction>,
    ) {
        let Some(nh) = pool.get_mut(idx) else { return };
        let unicast = nh.last_reply != 0 && nh.ucast_probes < self.cfg.ucast_probes;
        if unicast {
            nh.ucast_probes += 1;
        } else {
            nh.bcast_probes += 1;
        }
        nh.last_request = now;
        out.push(NhAction::Probe { nh: idx, unicast });
    }
}
