//! Control-protocol messages for the next-hop management API.
//!
//! All messages are JSON-encodable and transport-agnostic: the same
//! payloads can ride a management socket in production or plain function
//! calls in tests.

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use crate::types::{IfaceId, MacAddr, NhFlags, VrfId};

// ── Requests ────────────────────────────────────────────────────────

/// All next-hop management requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ApiRequest {
    /// Create an administratively configured next-hop.
    #[serde(rename = "nh6.add")]
    Nh6Add(Nh6AddPayload),

    /// Delete a static next-hop by VRF and host address.
    #[serde(rename = "nh6.del")]
    Nh6Del(Nh6DelPayload),

    /// List next-hops, optionally filtered by VRF.
    #[serde(rename = "nh6.list")]
    Nh6List(Nh6ListPayload),
}

/// Administrative description of a next-hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexthopSpec {
    pub vrf: VrfId,
    pub iface: IfaceId,
    pub ipv6: Ipv6Addr,
    pub mac: MacAddr,
    #[serde(default)]
    pub flags: NhFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nh6AddPayload {
    pub nexthop: NexthopSpec,
    /// Treat an identical existing record as success.
    #[serde(default)]
    pub exist_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nh6DelPayload {
    pub vrf: VrfId,
    pub host: Ipv6Addr,
    /// Suppress ENOENT when the record does not exist.
    #[serde(default)]
    pub missing_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nh6ListPayload {
    /// VRF filter; `VRF_ALL` (u16::MAX) lists every VRF.
    pub vrf: VrfId,
}

// ── Responses ───────────────────────────────────────────────────────

/// Reply to any management request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// errno-style status; 0 on success.
    pub status: u32,
    /// Listing body, present only for `nh6.list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexthops: Option<Vec<Nh6Info>>,
}

impl ApiResponse {
    pub fn status(status: u32) -> Self {
        Self {
            status,
            nexthops: None,
        }
    }

    pub fn listing(nexthops: Vec<Nh6Info>) -> Self {
        Self {
            status: crate::error::codes::OK,
            nexthops: Some(nexthops),
        }
    }

    pub fn ok(&self) -> bool {
        self.status == crate::error::codes::OK
    }
}

/// Flat projection of one next-hop record for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nh6Info {
    pub ipv6: Ipv6Addr,
    pub iface_id: IfaceId,
    pub vrf_id: VrfId,
    pub mac: MacAddr,
    pub flags: NhFlags,
    /// Seconds since the last advertisement from this neighbor.
    pub age_s: u64,
    /// Packets currently queued awaiting resolution.
    pub held_pkts: u16,
}
