//! # Forwarding-miss resolution
//!
//! A datapath worker classified a packet as "no resolved next-hop" and
//! shipped it over the control ring. This module re-resolves the route,
//! materializes a host next-hop for connected destinations, installs the
//! /128 so the next packet resolves in one lookup, and either re-injects
//! the packet or parks it on the hold queue.

use tracing::{debug, error};
use trellis_common::types::{IfaceId, NhFlags};

use crate::clock::Tick;
use crate::fsm::{NhAction, Resolver};
use crate::pkt::{DropReason, Pkt};
use crate::pool::{Nh6Pool, NhIndex, NhKey};
use crate::route::RouteTable;
use crate::wire::Ipv6Header;

/// Resolve a missed packet. Every outcome is expressed through `out`:
/// a `Forward` re-injection, a probe kick, or a drop with its edge reason.
/// The packet is held on the next-hop when resolution is still in flight.
pub fn handle_miss(
    pool: &mut Nh6Pool,
    routes: &RouteTable,
    resolver: &Resolver,
    now: Tick,
    pkt: Pkt,
    out: &mut Vec<NhAction>,
) {
    let dst = match Ipv6Header::parse(&pkt.data) {
        Ok(hdr) => hdr.dst,
        Err(err) => {
            debug!(%err, "miss for an unparsable packet");
            out.push(NhAction::Drop(pkt, DropReason::Invalid));
            return;
        }
    };
    let vrf = pkt.meta.vrf;

    let Some(parent_idx) = routes.lookup(vrf, pkt.meta.iface, &dst) else {
        out.push(NhAction::Drop(pkt, DropReason::NoRoute));
        return;
    };
    let Some(parent) = pool.get(parent_idx) else {
        out.push(NhAction::Drop(pkt, DropReason::NoRoute));
        return;
    };
    let parent_out = parent.out_iface;

    // A connected-route match whose address is not the destination matched
    // the subnet, not the host: resolve through a per-host child record.
    let child_idx = if parent.flags.contains(NhFlags::LINK) && parent.key.addr != dst {
        match pool.lookup(vrf, IfaceId::UNDEF, dst) {
            Some(idx) => {
                if let Some(child) = pool.get_mut(idx) {
                    if child.flags.contains(NhFlags::GATEWAY) && child.out_iface.is_undef() {
                        child.out_iface = parent_out;
                    }
                }
                idx
            }
            None => match pool.create(NhKey {
                vrf,
                iface: parent_out,
                addr: dst,
            }) {
                Ok(idx) => idx,
                Err(err) => {
                    debug!(%err, %dst, "cannot allocate next-hop for destination");
                    out.push(NhAction::Drop(pkt, DropReason::Unreachable));
                    return;
                }
            },
        }
    } else {
        parent_idx
    };

    if let Some(child) = pool.get(child_idx) {
        // An interface disagreement between the connected route and the
        // host record means the tables are corrupt; forwarding through it
        // would silently blackhole traffic.
        if child.out_iface != parent_out {
            error!(
                nh = %child_idx,
                child_iface = %child.out_iface,
                parent_iface = %parent_out,
                "next-hop interface does not match its connected route"
            );
            panic!("route table corruption: next-hop/route interface mismatch");
        }
    }

    // Install the host route so subsequent packets resolve in one lookup.
    if child_idx != parent_idx
        && routes.lookup_exact(vrf, IfaceId::UNDEF, &dst, 128).is_none()
        && routes.insert(vrf, IfaceId::UNDEF, dst, 128, child_idx).is_ok()
    {
        pool.incref(child_idx);
        debug!(%dst, nh = %child_idx, "installed host route");
    }

    // Forwards immediately when the child is already reachable (the packet
    // raced an advertisement); otherwise holds and kicks a probe.
    resolver.on_need_forward(pool, child_idx, pkt, now, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::net::Ipv6Addr;
    use trellis_common::types::{IfaceId, MacAddr};

    use crate::fsm::ResolverConfig;
    use crate::wire;

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig {
            ucast_probes: 3,
            bcast_probes: 3,
            probe_interval: 100,
            reachable_lifetime: 3_000,
            max_held: 4,
        })
    }

    /// A pool and table with `2001:db8::/64` connected on iface 5.
    fn connected() -> (Nh6Pool, RouteTable, NhIndex) {
        let mut pool = Nh6Pool::new(16);
        let routes = RouteTable::new();
        let link = pool
            .create(NhKey {
                vrf: 0,
                iface: IfaceId(5),
                addr: ip("2001:db8::a"),
            })
            .unwrap();
        pool.get_mut(link).unwrap().flags = NhFlags::LINK | NhFlags::LOCAL | NhFlags::REACHABLE;
        routes
            .insert(0, IfaceId::UNDEF, ip("2001:db8::"), 64, link)
            .unwrap();
        pool.incref(link);
        (pool, routes, link)
    }

    fn data_pkt(dst: &str) -> Pkt {
        let mut buf = BytesMut::new();
        wire::Ipv6Header {
            src: ip("2001:db8:ffff::1"),
            dst: ip(dst),
            next_header: 17,
            hop_limit: 64,
            payload_len: 0,
        }
        .encode(&mut buf);
        Pkt::new(0, IfaceId(5), buf)
    }

    #[test]
    fn miss_creates_child_and_host_route() {
        let (mut pool, routes, link) = connected();
        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &resolver(), 1, data_pkt("2001:db8::1"), &mut out);

        let child = pool
            .lookup(0, IfaceId(5), ip("2001:db8::1"))
            .expect("child next-hop created");
        assert_ne!(child, link);
        assert_eq!(
            routes.lookup_exact(0, IfaceId::UNDEF, &ip("2001:db8::1"), 128),
            Some(child)
        );
        assert_eq!(pool.get(child).unwrap().ref_count, 1);
        assert_eq!(pool.get(child).unwrap().held_len(), 1, "packet held");
        assert!(
            matches!(out[0], NhAction::Probe { nh, unicast: false } if nh == child),
            "multicast probe kicked"
        );
    }

    #[test]
    fn second_miss_reuses_child() {
        let (mut pool, routes, _) = connected();
        let r = resolver();
        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &r, 1, data_pkt("2001:db8::1"), &mut out);
        let probes_before = out.len();
        handle_miss(&mut pool, &routes, &r, 1, data_pkt("2001:db8::1"), &mut out);

        let child = pool.lookup(0, IfaceId(5), ip("2001:db8::1")).unwrap();
        assert_eq!(pool.get(child).unwrap().held_len(), 2);
        assert_eq!(pool.get(child).unwrap().ref_count, 1, "single host route");
        assert_eq!(out.len(), probes_before, "no second probe while pending");
    }

    #[test]
    fn reachable_child_forwards_immediately() {
        let (mut pool, routes, _) = connected();
        let r = resolver();
        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &r, 1, data_pkt("2001:db8::1"), &mut out);
        let child = pool.lookup(0, IfaceId(5), ip("2001:db8::1")).unwrap();
        let mac: MacAddr = "52:54:00:aa:bb:cc".parse().unwrap();
        r.on_advert(&mut pool, child, mac, 2, &mut out);
        out.clear();

        handle_miss(&mut pool, &routes, &r, 3, data_pkt("2001:db8::1"), &mut out);
        match &out[0] {
            NhAction::Forward(p) => {
                assert_eq!(p.meta.nh, Some(child));
                assert_eq!(p.meta.dst_lladdr, Some(mac));
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn no_route_drops() {
        let (mut pool, routes, _) = connected();
        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &resolver(), 1, data_pkt("2001:db9::1"), &mut out);
        assert!(matches!(out[0], NhAction::Drop(_, DropReason::NoRoute)));
        assert_eq!(pool.len(), 1, "no record created");
    }

    #[test]
    fn gateway_child_inherits_parent_iface() {
        let (mut pool, routes, _) = connected();
        let gw = pool
            .create(NhKey {
                vrf: 0,
                iface: IfaceId::UNDEF,
                addr: ip("2001:db8::1"),
            })
            .unwrap();
        pool.get_mut(gw).unwrap().flags = NhFlags::GATEWAY;

        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &resolver(), 1, data_pkt("2001:db8::1"), &mut out);
        assert_eq!(pool.get(gw).unwrap().out_iface, IfaceId(5));
    }

    #[test]
    #[should_panic(expected = "route table corruption")]
    fn iface_mismatch_aborts() {
        let (mut pool, routes, _) = connected();
        let stray = pool
            .create(NhKey {
                vrf: 0,
                iface: IfaceId(9),
                addr: ip("2001:db8::1"),
            })
            .unwrap();
        pool.get_mut(stray).unwrap().out_iface = IfaceId(9);

        let mut out = Vec::new();
        handle_miss(&mut pool, &routes, &resolver(), 1, data_pkt("2001:db8::1"), &mut out);
    }

    #[test]
    fn unparsable_packet_dropped_invalid() {
        let (mut pool, routes, _) = connected();
        let mut out = Vec::new();
        let pkt = Pkt::new(0, IfaceId(5), BytesMut::from(&b"short"[..]));
        handle_miss(&mut pool, &routes, &resolver(), 1, pkt, &mut out);
        assert!(matches!(out[0], NhAction::Drop(_, DropReason::Invalid)));
    }
}
