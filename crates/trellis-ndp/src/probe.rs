//! # Probe emitter
//!
//! Builds the outgoing Neighbor Solicitation for a next-hop: picks the
//! IPv6 source from the egress interface, the destination per the
//! unicast/solicited-node tie-break, and stamps the interface MAC into the
//! source-lladdr option.

use tracing::debug;
use trellis_common::Error;

use crate::iface::Ifaces;
use crate::pkt::Pkt;
use crate::pool::Nh6;
use crate::wire;

/// Build a solicitation packet for `nh`.
///
/// `unicast` comes from the resolver's tie-break: a neighbor that has
/// answered before is probed at its unicast address while the unicast
/// budget lasts, then at its solicited-node group.
pub fn build_probe(ifaces: &dyn Ifaces, nh: &Nh6, unicast: bool) -> Result<Pkt, Error> {
    let iface = ifaces.iface_from_id(nh.out_iface).ok_or(Error::NotFound)?;
    let Some(src) = iface.source_for(&nh.key.addr) else {
        debug!(iface = %iface.id, "no usable source address for solicitation");
        return Err(Error::Resource);
    };
    let dst = if unicast {
        nh.key.addr
    } else {
        wire::solicited_node(&nh.key.addr)
    };
    let data = wire::build_neighbor_solicit(src, dst, nh.key.addr, iface.mac);
    let mut pkt = Pkt::new(nh.key.vrf, iface.id, data);
    if unicast {
        // The output node can skip neighbor lookup for a unicast probe.
        pkt.meta.dst_lladdr = nh.lladdr;
    }
    Ok(pkt)
}
