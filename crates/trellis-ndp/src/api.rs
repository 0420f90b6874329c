//! # Administrative next-hop operations
//!
//! The three management verbs over static next-hops. These run on the
//! control thread; the service maps their results onto wire status codes.

use tracing::{debug, info};
use trellis_common::protocol::{NexthopSpec, Nh6Info};
use trellis_common::types::{IfaceId, MacAddr, NhFlags, VrfId, VRF_ALL};
use trellis_common::Error;

use crate::clock::Tick;
use crate::iface::Ifaces;
use crate::pool::{Nh6Pool, NhKey};
use crate::route::RouteTable;

/// Create an administratively configured next-hop with its /128 route.
///
/// Idempotent under `exist_ok` when the existing record matches interface
/// and MAC; any other collision is `Exists`. A failed route insert undoes
/// the allocation and surfaces the route error.
pub fn nh6_add(
    pool: &mut Nh6Pool,
    routes: &RouteTable,
    ifaces: &dyn Ifaces,
    max_vrfs: u16,
    now: Tick,
    spec: &NexthopSpec,
    exist_ok: bool,
) -> Result<(), Error> {
    if spec.ipv6.is_unspecified() {
        return Err(Error::Invalid("next-hop address is unspecified"));
    }
    if spec.ipv6.is_multicast() {
        return Err(Error::Invalid("next-hop address is multicast"));
    }
    if spec.vrf >= max_vrfs {
        return Err(Error::Overflow);
    }
    if ifaces.iface_from_id(spec.iface).is_none() {
        return Err(Error::NotFound);
    }

    if let Some(idx) = pool.lookup(spec.vrf, IfaceId::UNDEF, spec.ipv6) {
        let existing = pool.get(idx).ok_or(Error::NotFound)?;
        let same = existing.key.iface == spec.iface && existing.lladdr == Some(spec.mac);
        return if exist_ok && same { Ok(()) } else { Err(Error::Exists) };
    }

    let idx = pool.create(NhKey {
        vrf: spec.vrf,
        iface: spec.iface,
        addr: spec.ipv6,
    })?;
    {
        let nh = pool
            .get_mut(idx)
            .ok_or(Error::NotFound)?;
        nh.lladdr = Some(spec.mac);
        nh.flags = spec.flags | NhFlags::STATIC | NhFlags::REACHABLE;
        nh.last_reply = now;
    }

    match routes.insert(spec.vrf, IfaceId::UNDEF, spec.ipv6, 128, idx) {
        Ok(()) => {
            pool.incref(idx);
            info!(addr = %spec.ipv6, iface = %spec.iface, mac = %spec.mac, "static next-hop added");
            Ok(())
        }
        Err(err) => {
            pool.remove(idx);
            Err(err)
        }
    }
}

/// Delete a static next-hop by `(vrf, host)`.
///
/// Refuses records referenced by more than their own host route or pinned
/// by LOCAL/LINK/GATEWAY. Deletion goes through route removal, which drops
/// the last reference and reclaims the record.
pub fn nh6_del(
    pool: &mut Nh6Pool,
    routes: &RouteTable,
    vrf: VrfId,
    host: std::net::Ipv6Addr,
    missing_ok: bool,
) -> Result<(), Error> {
    let Some(idx) = pool.lookup(vrf, IfaceId::UNDEF, host) else {
        return if missing_ok { Ok(()) } else { Err(Error::NotFound) };
    };
    let nh = pool.get(idx).ok_or(Error::NotFound)?;
    if nh.ref_count > 1 || nh.is_protected() {
        return Err(Error::Busy);
    }

    match routes.remove(vrf, IfaceId::UNDEF, &host, 128) {
        Ok(route_nh) => {
            if pool.decref(route_nh).is_some() {
                debug!(addr = %host, "next-hop reclaimed");
            }
            Ok(())
        }
        Err(Error::NotFound) => {
            // No host route (refcount 0): reclaim the record directly.
            pool.remove(idx);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Project the pool into flat listing records.
///
/// `VRF_ALL` lists every VRF; multicast records (should none sneak in) are
/// excluded.
pub fn nh6_list(pool: &Nh6Pool, vrf: VrfId, now: Tick, hz: u64) -> Vec<Nh6Info> {
    pool.iter()
        .filter(|(_, nh)| vrf == VRF_ALL || nh.key.vrf == vrf)
        .filter(|(_, nh)| !nh.key.addr.is_multicast())
        .map(|(_, nh)| Nh6Info {
            ipv6: nh.key.addr,
            iface_id: nh.out_iface,
            vrf_id: nh.key.vrf,
            mac: nh.lladdr.unwrap_or(MacAddr::ZERO),
            flags: nh.flags,
            age_s: nh.age_s(now, hz),
            held_pkts: nh.held_len() as u16,
        })
        .collect()
}
