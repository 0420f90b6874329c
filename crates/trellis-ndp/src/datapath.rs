//! # Datapath nodes
//!
//! The worker-side packet transforms. Each node runs to completion inside a
//! burst, never blocks, and never mutates next-hop state — anything that
//! needs the state machine crosses the control ring as a packet.
//!
//! A [`Datapath`] instance belongs to exactly one worker; counters are plain
//! fields, not shared atomics.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::iface::{Ifaces, IfaceTable};
use crate::pkt::{DropReason, Pkt};
use crate::ring::{HandlerId, PostError, StackPort};
use crate::stats::DpStats;
use crate::wire;

/// Control-ring handler ids a worker posts to.
#[derive(Debug, Clone, Copy)]
pub struct DatapathHandlers {
    /// Forwarding miss: resolve and hold or re-inject.
    pub unreachable: HandlerId,
    /// Validated advertisement for the state machine.
    pub na_input: HandlerId,
    /// Solicitation copy carrying the peer address in the target field.
    pub learn: HandlerId,
}

/// Per-worker datapath state for the neighbor-discovery nodes.
pub struct Datapath {
    ifaces: Arc<IfaceTable>,
    control: StackPort,
    handlers: DatapathHandlers,
    pub stats: DpStats,
}

impl Datapath {
    pub fn new(ifaces: Arc<IfaceTable>, control: StackPort, handlers: DatapathHandlers) -> Self {
        Datapath {
            ifaces,
            control,
            handlers,
            stats: DpStats::default(),
        }
    }

    /// NS input node.
    ///
    /// Validates per RFC 4861, independently (a) hands a learn copy to the
    /// control thread when the solicitation names a learnable source, and
    /// (b) answers with an advertisement when the target is one of the
    /// receiving interface's addresses. The advertisement reuses the input
    /// buffer; `Some` is the reply for the `ip6-output` edge.
    pub fn ndp_ns_input(&mut self, mut pkt: Pkt) -> Option<Pkt> {
        self.stats.ns_rx += 1;
        let (ip6, ns) = match parse_ns(&pkt) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(%err, "dropping invalid neighbor solicitation");
                self.stats.drops.record(DropReason::Invalid);
                return None;
            }
        };

        if !ip6.src.is_unspecified() && ns.source_lladdr.is_some() {
            // Rewrite the copy's target to the source address so the control
            // thread can key the neighbor without the IPv6 header.
            let mut copy = BytesMut::from(&pkt.data[..]);
            wire::set_ndp_target(&mut copy, &ip6.src);
            let learn = Pkt::new(pkt.meta.vrf, pkt.meta.iface, copy);
            match self.control.post(self.handlers.learn, learn) {
                Ok(()) => self.stats.learn_tx += 1,
                Err(PostError::Again(_)) | Err(PostError::Closed(_)) => {
                    self.stats.drops.record(DropReason::RingFull);
                }
            }
        }

        let iface = self.ifaces.iface_from_id(pkt.meta.iface)?;
        if !iface.has_addr(&ns.target) {
            trace!(target = %ns.target, "solicitation for a foreign target");
            return None;
        }

        let solicited = !ip6.src.is_unspecified();
        let dst = if solicited { ip6.src } else { wire::ALL_NODES };
        wire::build_neighbor_advert_into(
            &mut pkt.data,
            ns.target,
            dst,
            &wire::NeighborAdvert {
                router: true,
                solicited,
                override_flag: true,
                target: ns.target,
                target_lladdr: Some(iface.mac),
            },
        );
        pkt.meta.dst_lladdr = if solicited { ns.source_lladdr } else { None };
        self.stats.na_tx += 1;
        Some(pkt)
    }

    /// NA input node: validate, then hand to the state machine.
    pub fn ndp_na_input(&mut self, pkt: Pkt) {
        self.stats.na_rx += 1;
        if let Err(err) = parse_na(&pkt) {
            debug!(%err, "dropping invalid neighbor advertisement");
            self.stats.drops.record(DropReason::Invalid);
            return;
        }
        match self.control.post(self.handlers.na_input, pkt) {
            Ok(()) => {}
            Err(PostError::Again(_)) | Err(PostError::Closed(_)) => {
                self.stats.drops.record(DropReason::RingFull);
            }
        }
    }

    /// Forwarding-miss edge: the packet's destination has no resolved
    /// next-hop. Ship it to the control thread; a full ring sheds the load.
    pub fn post_miss(&mut self, pkt: Pkt) {
        match self.control.post(self.handlers.unreachable, pkt) {
            Ok(()) => self.stats.miss_tx += 1,
            Err(PostError::Again(_)) | Err(PostError::Closed(_)) => {
                self.stats.drops.record(DropReason::RingFull);
            }
        }
    }
}

fn parse_ns(pkt: &Pkt) -> Result<(wire::Ipv6Header, wire::NeighborSolicit), wire::WireError> {
    let ip6 = wire::Ipv6Header::parse(&pkt.data)?;
    let icmp = ip6.icmp_slice(&pkt.data)?;
    let ns = wire::check_ns(&ip6, icmp)?;
    Ok((ip6, ns))
}

fn parse_na(pkt: &Pkt) -> Result<(wire::Ipv6Header, wire::NeighborAdvert), wire::WireError> {
    let ip6 = wire::Ipv6Header::parse(&pkt.data)?;
    let icmp = ip6.icmp_slice(&pkt.data)?;
    let na = wire::check_na(&ip6, icmp)?;
    Ok((ip6, na))
}
