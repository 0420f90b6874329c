//! # Route table
//!
//! Longest-prefix-match table with lock-free readers: the control thread is
//! the single writer and publishes copy-on-write snapshots through
//! `arc-swap`; datapath workers load a snapshot per burst and never block.
//!
//! Routes are keyed `(vrf, iface, prefix, len)`. Most routes are
//! vrf-global (`IfaceId::UNDEF`); link-local prefixes are scoped to the
//! interface they arrived on. The production router owns the full table —
//! this subsystem reads it through exactly the contract below and writes
//! only host routes and connected prefixes.

use std::net::Ipv6Addr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use trellis_common::types::{IfaceId, VrfId};
use trellis_common::Error;

use crate::pool::NhIndex;

/// One route entry in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub vrf: VrfId,
    /// Interface scope; `UNDEF` means visible on every interface in the VRF.
    pub iface: IfaceId,
    pub prefix: Ipv6Addr,
    pub len: u8,
    pub nh: NhIndex,
}

/// Does `addr` fall inside `prefix/len`?
fn prefix_match(addr: &Ipv6Addr, prefix: &Ipv6Addr, len: u8) -> bool {
    if len == 0 {
        return true;
    }
    if len > 128 {
        return false;
    }
    let a = u128::from_be_bytes(addr.octets());
    let p = u128::from_be_bytes(prefix.octets());
    let mask = u128::MAX << (128 - u32::from(len));
    a & mask == p & mask
}

/// Copy-on-write route table. Cloning the handle is cheap; lookups never
/// take a lock.
#[derive(Debug, Default)]
pub struct RouteTable {
    snap: ArcSwap<Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest-prefix match for a packet received in `(vrf, iface)`.
    /// At equal length, an interface-scoped route beats a global one.
    pub fn lookup(&self, vrf: VrfId, iface: IfaceId, dst: &Ipv6Addr) -> Option<NhIndex> {
        let snap = self.snap.load();
        snap.iter()
            .filter(|r| {
                r.vrf == vrf
                    && (r.iface.is_undef() || r.iface == iface)
                    && prefix_match(dst, &r.prefix, r.len)
            })
            .max_by_key(|r| (r.len, !r.iface.is_undef()))
            .map(|r| r.nh)
    }

    /// Exact-key lookup, used before installing host routes.
    pub fn lookup_exact(
        &self,
        vrf: VrfId,
        iface: IfaceId,
        prefix: &Ipv6Addr,
        len: u8,
    ) -> Option<NhIndex> {
        let snap = self.snap.load();
        snap.iter()
            .find(|r| r.vrf == vrf && r.iface == iface && r.len == len && r.prefix == *prefix)
            .map(|r| r.nh)
    }

    /// Insert a route. The caller takes the matching next-hop reference
    /// (`incref`) — the table stores only the index.
    pub fn insert(
        &self,
        vrf: VrfId,
        iface: IfaceId,
        prefix: Ipv6Addr,
        len: u8,
        nh: NhIndex,
    ) -> Result<(), Error> {
        if len > 128 {
            return Err(Error::Invalid("prefix length exceeds 128"));
        }
        if self.lookup_exact(vrf, iface, &prefix, len).is_some() {
            return Err(Error::Exists);
        }
        let mut next: Vec<Route> = self.snap.load().as_ref().clone();
        next.push(Route {
            vrf,
            iface,
            prefix,
            len,
            nh,
        });
        self.snap.store(Arc::new(next));
        Ok(())
    }

    /// Remove an exact route, returning the next-hop it pointed at so the
    /// caller can drop the reference.
    pub fn remove(
        &self,
        vrf: VrfId,
        iface: IfaceId,
        prefix: &Ipv6Addr,
        len: u8,
    ) -> Result<NhIndex, Error> {
        let snap = self.snap.load();
        let pos = snap
            .iter()
            .position(|r| r.vrf == vrf && r.iface == iface && r.len == len && r.prefix == *prefix)
            .ok_or(Error::NotFound)?;
        let nh = snap[pos].nh;
        let mut next = snap.as_ref().clone();
        next.swap_remove(pos);
        self.snap.store(Arc::new(next));
        Ok(nh)
    }

    /// Number of route entries pointing at a next-hop.
    pub fn routes_to(&self, nh: NhIndex) -> usize {
        self.snap.load().iter().filter(|r| r.nh == nh).count()
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snap.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANY: IfaceId = IfaceId::UNDEF;

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::"), 64, NhIndex(1)).unwrap();
        table.insert(0, ANY, ip("2001:db8::1"), 128, NhIndex(2)).unwrap();
        table.insert(0, ANY, ip("::"), 0, NhIndex(3)).unwrap();

        assert_eq!(table.lookup(0, IfaceId(1), &ip("2001:db8::1")), Some(NhIndex(2)));
        assert_eq!(table.lookup(0, IfaceId(1), &ip("2001:db8::2")), Some(NhIndex(1)));
        assert_eq!(table.lookup(0, IfaceId(1), &ip("2001:db9::1")), Some(NhIndex(3)));
    }

    #[test]
    fn vrfs_are_disjoint() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::"), 64, NhIndex(1)).unwrap();
        assert_eq!(table.lookup(1, IfaceId(1), &ip("2001:db8::1")), None);
    }

    #[test]
    fn iface_scoped_routes_stay_scoped() {
        let table = RouteTable::new();
        table.insert(0, IfaceId(5), ip("fe80::"), 64, NhIndex(1)).unwrap();
        table.insert(0, IfaceId(6), ip("fe80::"), 64, NhIndex(2)).unwrap();

        assert_eq!(table.lookup(0, IfaceId(5), &ip("fe80::2")), Some(NhIndex(1)));
        assert_eq!(table.lookup(0, IfaceId(6), &ip("fe80::2")), Some(NhIndex(2)));
        assert_eq!(table.lookup(0, IfaceId(7), &ip("fe80::2")), None);
    }

    #[test]
    fn scoped_beats_global_at_equal_length() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::"), 64, NhIndex(1)).unwrap();
        table.insert(0, IfaceId(5), ip("2001:db8::"), 64, NhIndex(2)).unwrap();
        assert_eq!(table.lookup(0, IfaceId(5), &ip("2001:db8::9")), Some(NhIndex(2)));
        assert_eq!(table.lookup(0, IfaceId(6), &ip("2001:db8::9")), Some(NhIndex(1)));
    }

    #[test]
    fn duplicate_exact_route_rejected() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::1"), 128, NhIndex(1)).unwrap();
        assert_eq!(
            table.insert(0, ANY, ip("2001:db8::1"), 128, NhIndex(2)),
            Err(Error::Exists)
        );
    }

    #[test]
    fn remove_returns_nexthop() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::1"), 128, NhIndex(7)).unwrap();
        assert_eq!(table.remove(0, ANY, &ip("2001:db8::1"), 128), Ok(NhIndex(7)));
        assert_eq!(
            table.remove(0, ANY, &ip("2001:db8::1"), 128),
            Err(Error::NotFound)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn routes_to_counts_references() {
        let table = RouteTable::new();
        table.insert(0, ANY, ip("2001:db8::1"), 128, NhIndex(7)).unwrap();
        table.insert(0, ANY, ip("2001:db8:1::"), 64, NhIndex(7)).unwrap();
        table.insert(0, ANY, ip("2001:db8:2::"), 64, NhIndex(8)).unwrap();
        assert_eq!(table.routes_to(NhIndex(7)), 2);
        assert_eq!(table.routes_to(NhIndex(8)), 1);
    }
}
