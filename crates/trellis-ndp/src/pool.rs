//! # Next-hop pool
//!
//! Fixed-capacity slab arena of next-hop records plus a tuple index. Slot
//! indices are stable for a record's lifetime, so datapath nodes can carry
//! an index while a packet is in flight; all mutation happens on the
//! control thread.
//!
//! The pool is generic over the address type — the ARP sibling instantiates
//! it with `Ipv4Addr`; this crate uses [`Nh6Pool`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::net::Ipv6Addr;

use slab::Slab;
use tracing::debug;
use trellis_common::types::{IfaceId, MacAddr, NhFlags, VrfId};
use trellis_common::Error;

use crate::clock::Tick;
use crate::pkt::Pkt;

// ─── Key and handle ──────────────────────────────────────────────────────────

/// Identity of a next-hop: `(vrf, iface, addr)` is unique pool-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NhKey<A> {
    pub vrf: VrfId,
    pub iface: IfaceId,
    pub addr: A,
}

/// Stable handle to a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NhIndex(pub usize);

impl fmt::Display for NhIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nh#{}", self.0)
    }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One next-hop record: identity, resolution state, and the hold queue.
#[derive(Debug)]
pub struct Nexthop<A> {
    pub key: NhKey<A>,
    /// Resolved egress interface; differs from `key.iface` when the match
    /// came via a connected route.
    pub out_iface: IfaceId,
    pub lladdr: Option<MacAddr>,
    pub flags: NhFlags,
    pub ucast_probes: u8,
    pub bcast_probes: u8,
    /// Tick of the last solicitation we sent. 0 = never.
    pub last_request: Tick,
    /// Tick of the last advertisement from the neighbor. 0 = never.
    pub last_reply: Tick,
    /// Route entries pointing at this record.
    pub ref_count: u32,
    held: VecDeque<Pkt>,
}

impl<A: Copy> Nexthop<A> {
    fn new(key: NhKey<A>) -> Self {
        Nexthop {
            key,
            out_iface: key.iface,
            lladdr: None,
            flags: NhFlags::empty(),
            ucast_probes: 0,
            bcast_probes: 0,
            last_request: 0,
            last_reply: 0,
            ref_count: 0,
            held: VecDeque::new(),
        }
    }

    /// Total solicitations since the last successful resolution.
    pub fn probes_sent(&self) -> u32 {
        u32::from(self.ucast_probes) + u32::from(self.bcast_probes)
    }

    /// Flags that pin a record regardless of refcount.
    pub fn is_protected(&self) -> bool {
        self.flags
            .intersects(NhFlags::LOCAL | NhFlags::LINK | NhFlags::GATEWAY)
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Queue a packet awaiting resolution. Gives the packet back when the
    /// queue is at `max` — the caller frees it (drop-newest policy).
    pub fn hold(&mut self, pkt: Pkt, max: usize) -> Result<(), Pkt> {
        if self.held.len() >= max {
            return Err(pkt);
        }
        self.held.push_back(pkt);
        Ok(())
    }

    /// Take the whole hold queue, preserving enqueue order.
    pub fn drain_held(&mut self) -> VecDeque<Pkt> {
        std::mem::take(&mut self.held)
    }

    /// Seconds since the neighbor last confirmed itself.
    pub fn age_s(&self, now: Tick, hz: u64) -> u64 {
        now.saturating_sub(self.last_reply) / hz
    }
}

// ─── Pool ────────────────────────────────────────────────────────────────────

/// Fixed-capacity next-hop arena with a `(vrf, iface, addr)` index.
pub struct NhPool<A> {
    slots: Slab<Nexthop<A>>,
    index: HashMap<NhKey<A>, usize>,
    capacity: usize,
}

/// The IPv6 instantiation used by this crate.
pub type Nh6Pool = NhPool<Ipv6Addr>;
pub type Nh6 = Nexthop<Ipv6Addr>;
pub type Nh6Key = NhKey<Ipv6Addr>;

impl<A: Copy + Eq + Hash + fmt::Debug> NhPool<A> {
    /// Create a pool with the given capacity. The slab pre-allocates.
    pub fn new(capacity: usize) -> Self {
        NhPool {
            slots: Slab::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Allocate a record for the tuple.
    ///
    /// Fails with `Resource` when the arena is full and `Exists` when a
    /// record for the tuple is already present.
    pub fn create(&mut self, key: NhKey<A>) -> Result<NhIndex, Error> {
        if self.index.contains_key(&key) {
            return Err(Error::Exists);
        }
        if self.slots.len() >= self.capacity {
            return Err(Error::Resource);
        }
        let idx = self.slots.insert(Nexthop::new(key));
        self.index.insert(key, idx);
        Ok(NhIndex(idx))
    }

    pub fn get(&self, idx: NhIndex) -> Option<&Nexthop<A>> {
        self.slots.get(idx.0)
    }

    pub fn get_mut(&mut self, idx: NhIndex) -> Option<&mut Nexthop<A>> {
        self.slots.get_mut(idx.0)
    }

    /// Exact-tuple lookup. `IfaceId::UNDEF` matches any interface in the
    /// VRF (used by administrative deletion).
    pub fn lookup(&self, vrf: VrfId, iface: IfaceId, addr: A) -> Option<NhIndex> {
        if iface.is_undef() {
            return self
                .slots
                .iter()
                .find(|(_, nh)| nh.key.vrf == vrf && nh.key.addr == addr)
                .map(|(i, _)| NhIndex(i));
        }
        self.index
            .get(&NhKey { vrf, iface, addr })
            .map(|&i| NhIndex(i))
    }

    /// Visit every live next-hop exactly once.
    pub fn iter(&self) -> impl Iterator<Item = (NhIndex, &Nexthop<A>)> {
        self.slots.iter().map(|(i, nh)| (NhIndex(i), nh))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a strong reference on behalf of a route entry.
    pub fn incref(&mut self, idx: NhIndex) {
        if let Some(nh) = self.slots.get_mut(idx.0) {
            nh.ref_count += 1;
        }
    }

    /// Drop a route reference. When the count reaches zero and no
    /// protecting flag remains, the slot is reclaimed: held packets are
    /// freed and the record is returned to the caller.
    ///
    /// Route deletion is the only path that can drop the last reference,
    /// so the route table needs no further unwiring here.
    pub fn decref(&mut self, idx: NhIndex) -> Option<Nexthop<A>> {
        let nh = self.slots.get_mut(idx.0)?;
        nh.ref_count = nh.ref_count.saturating_sub(1);
        if nh.ref_count == 0 && !nh.is_protected() {
            return self.remove(idx);
        }
        None
    }

    /// Unconditionally reclaim a slot, freeing any held packets.
    pub fn remove(&mut self, idx: NhIndex) -> Option<Nexthop<A>> {
        if !self.slots.contains(idx.0) {
            return None;
        }
        let mut nh = self.slots.remove(idx.0);
        self.index.remove(&nh.key);
        let held = nh.drain_held();
        if !held.is_empty() {
            debug!(nh = %idx, freed = held.len(), "freed held packets on reclaim");
        }
        Some(nh)
    }
}
