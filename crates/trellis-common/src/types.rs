//! Core identifier types shared between the datapath and the control plane.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── VRF ─────────────────────────────────────────────────────────────────────

/// Virtual Routing and Forwarding instance identifier.
pub type VrfId = u16;

/// Wildcard VRF: "all VRFs" in list requests.
pub const VRF_ALL: VrfId = u16::MAX;

// ─── Interface ───────────────────────────────────────────────────────────────

/// Dense interface identifier assigned by the interface inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IfaceId(pub u16);

impl IfaceId {
    /// Sentinel meaning "any interface in this VRF" (lookup) or
    /// "not yet resolved" (gateway next-hops).
    pub const UNDEF: IfaceId = IfaceId(u16::MAX);

    pub fn is_undef(self) -> bool {
        self == Self::UNDEF
    }
}

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undef() {
            write!(f, "undef")
        } else {
            self.0.fmt(f)
        }
    }
}

// ─── Link-layer address ──────────────────────────────────────────────────────

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_multicast(self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Error parsing a MAC address from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError;

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected six colon-separated hex octets")
    }
}

impl std::error::Error for MacParseError {}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(MacParseError)?;
            if part.len() != 2 {
                return Err(MacParseError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError)?;
        }
        if parts.next().is_some() {
            return Err(MacParseError);
        }
        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Next-hop flags ──────────────────────────────────────────────────────────

bitflags! {
    /// Flag set carried by every next-hop record.
    ///
    /// `REACHABLE`/`FAILED` are mutually exclusive; `PENDING` implies not
    /// `REACHABLE`. `STATIC` next-hops are exempt from probing and ageing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NhFlags: u16 {
        /// Administratively configured; never expires.
        const STATIC    = 1 << 0;
        /// Address owned by this router.
        const LOCAL     = 1 << 1;
        /// Represents a connected subnet, not a host.
        const LINK      = 1 << 2;
        /// Gateway for routed traffic.
        const GATEWAY   = 1 << 3;
        /// Link-layer address is known and fresh.
        const REACHABLE = 1 << 4;
        /// Link-layer address is known but aged out.
        const STALE     = 1 << 5;
        /// A solicitation is in flight.
        const PENDING   = 1 << 6;
        /// Resolution exhausted its probe budget.
        const FAILED    = 1 << 7;
    }
}

impl Default for NhFlags {
    fn default() -> Self {
        NhFlags::empty()
    }
}

// Flags cross the wire as their raw bit pattern; unknown bits from newer
// peers are dropped on read.
impl Serialize for NhFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

impl<'de> Deserialize<'de> for NhFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;
        Ok(NhFlags::from_bits_truncate(bits))
    }
}

impl fmt::Display for NhFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, flag) in [
            ("static", NhFlags::STATIC),
            ("local", NhFlags::LOCAL),
            ("link", NhFlags::LINK),
            ("gateway", NhFlags::GATEWAY),
            ("reachable", NhFlags::REACHABLE),
            ("stale", NhFlags::STALE),
            ("pending", NhFlags::PENDING),
            ("failed", NhFlags::FAILED),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}
