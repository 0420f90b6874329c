//! # trellis-ndp
//!
//! IPv6 neighbor-discovery resolution for the trellis router: the subsystem
//! that answers "what link-layer address should this datagram use toward
//! next-hop N out of interface I?" while packets keep arriving and the
//! answer may take milliseconds to learn.
//!
//! ## Crate structure
//!
//! - [`wire`] — IPv6 / ICMPv6 NS/NA codec, options, checksum, receive filter
//! - [`pool`] — fixed-capacity next-hop arena with tuple index and refcounts
//! - [`fsm`] — per-next-hop resolution state machine and its actions
//! - [`ring`] — handler registry and bounded control/graph rings
//! - [`datapath`] — worker-side packet transforms (NS/NA input, miss posting)
//! - [`probe`] — neighbor-solicitation emitter
//! - [`unreachable`] — control-side datapath-miss resolution
//! - [`route`] — longest-prefix-match table with lock-free readers
//! - [`iface`] — interface inventory contract
//! - [`api`] — administrative add/del/list operations
//! - [`service`] — the control-thread event loop and its runtime handle
//! - [`stats`] — serializable subsystem counters

pub mod api;
pub mod clock;
pub mod config;
pub mod datapath;
pub mod fsm;
pub mod iface;
pub mod pkt;
pub mod pool;
pub mod probe;
pub mod ring;
pub mod route;
pub mod service;
pub mod stats;
pub mod unreachable;
pub mod wire;
