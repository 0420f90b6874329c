//! Interface inventory contract.
//!
//! The real inventory lives with the driver layer; this subsystem only
//! needs `iface_from_id` and enough address data to pick a solicitation
//! source. [`IfaceTable`] is the plain in-memory implementation.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use trellis_common::types::{IfaceId, MacAddr, VrfId};

use crate::wire::is_link_local;

/// One network interface as this subsystem sees it.
#[derive(Debug, Clone)]
pub struct Iface {
    pub id: IfaceId,
    pub name: String,
    pub vrf: VrfId,
    pub mac: MacAddr,
    /// fe80::/64 address of the interface.
    pub link_local: Ipv6Addr,
    /// Configured unicast addresses with prefix lengths.
    pub addrs: Vec<(Ipv6Addr, u8)>,
}

impl Iface {
    /// Whether `addr` is one of this interface's own addresses.
    pub fn has_addr(&self, addr: &Ipv6Addr) -> bool {
        *addr == self.link_local || self.addrs.iter().any(|(a, _)| a == addr)
    }

    /// Preferred solicitation source toward `target`: the link-local
    /// address for link-local targets, else the first global address,
    /// falling back to link-local.
    pub fn source_for(&self, target: &Ipv6Addr) -> Option<Ipv6Addr> {
        if is_link_local(target) {
            return self.usable(&self.link_local);
        }
        self.addrs
            .iter()
            .map(|(a, _)| *a)
            .find(|a| !is_link_local(a))
            .or_else(|| self.usable(&self.link_local))
    }

    fn usable(&self, addr: &Ipv6Addr) -> Option<Ipv6Addr> {
        (!addr.is_unspecified()).then_some(*addr)
    }
}

/// `id → iface` lookup, the contract the resolution paths depend on.
pub trait Ifaces {
    fn iface_from_id(&self, id: IfaceId) -> Option<&Iface>;
}

/// Plain table implementation of the inventory.
#[derive(Debug, Default)]
pub struct IfaceTable {
    map: HashMap<IfaceId, Iface>,
}

impl IfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, iface: Iface) {
        self.map.insert(iface.id, iface);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Iface> {
        self.map.values()
    }
}

impl Ifaces for IfaceTable {
    fn iface_from_id(&self, id: IfaceId) -> Option<&Iface> {
        self.map.get(&id)
    }
}
