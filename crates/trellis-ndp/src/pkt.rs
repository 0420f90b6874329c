//! Packet buffer and per-packet metadata.
//!
//! The datapath hands packets around as owned buffers plus a small metadata
//! record; dropping a `Pkt` frees the buffer. Real drivers would back the
//! payload with pooled hugepage memory — the subsystem only cares about the
//! ownership contract.

use std::fmt;

use bytes::BytesMut;
use trellis_common::types::{IfaceId, MacAddr, VrfId};

use crate::pool::NhIndex;

/// Why a datapath node dropped a packet. Each reason maps to an edge counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Failed the receive filter or could not be parsed.
    Invalid,
    /// No route matched the destination.
    NoRoute,
    /// A control or graph ring was full.
    RingFull,
    /// The next-hop hold queue was at its bound.
    HoldOverflow,
    /// Resolution exhausted its probe budget.
    Unreachable,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::Invalid => "invalid",
            DropReason::NoRoute => "no-route",
            DropReason::RingFull => "ring-full",
            DropReason::HoldOverflow => "hold-overflow",
            DropReason::Unreachable => "unreachable",
        })
    }
}

/// Metadata carried alongside a packet buffer.
#[derive(Debug, Clone, Copy)]
pub struct PktMeta {
    /// VRF the packet was classified into.
    pub vrf: VrfId,
    /// Receive (or egress, once resolved) interface.
    pub iface: IfaceId,
    /// Attached next-hop, set once resolution succeeds.
    pub nh: Option<NhIndex>,
    /// Resolved destination link-layer address for the output node.
    pub dst_lladdr: Option<MacAddr>,
}

/// An owned packet: metadata plus the L3 frame starting at the IPv6 header.
#[derive(Debug)]
pub struct Pkt {
    pub meta: PktMeta,
    pub data: BytesMut,
}

impl Pkt {
    pub fn new(vrf: VrfId, iface: IfaceId, data: BytesMut) -> Self {
        Pkt {
            meta: PktMeta {
                vrf,
                iface,
                nh: None,
                dst_lladdr: None,
            },
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
