//! Subsystem tunables.
//!
//! All values have defaults matching a small edge router; deployments
//! override them from a TOML fragment.

use serde::Deserialize;
use trellis_common::Error;

use crate::clock::Tick;

/// Tunables for the neighbor-discovery subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NdpConfig {
    /// Next-hop arena capacity.
    pub num_nexthops: usize,
    /// Per-next-hop hold-queue bound.
    pub max_held_pkts: usize,
    /// Unicast solicitations before falling back to multicast.
    pub ucast_probes: u8,
    /// Multicast solicitations before declaring the neighbor failed.
    pub bcast_probes: u8,
    /// Interval between solicitations, in milliseconds.
    pub probe_interval_ms: u64,
    /// Lifetime of a confirmed link-layer address before it goes stale.
    pub reachable_ms: u64,
    /// Depth of each control/graph ring.
    pub ring_depth: usize,
    /// Number of configured VRFs; add requests outside this range fail.
    pub max_vrfs: u16,
    /// Control-plane tick rate.
    pub tick_hz: u64,
}

impl Default for NdpConfig {
    fn default() -> Self {
        NdpConfig {
            num_nexthops: 1024,
            max_held_pkts: 256,
            ucast_probes: 3,
            bcast_probes: 3,
            probe_interval_ms: 1_000,
            reachable_ms: 30_000,
            ring_depth: 4_096,
            max_vrfs: 256,
            tick_hz: 100,
        }
    }
}

impl NdpConfig {
    /// Parse from a TOML fragment, falling back to defaults for absent keys.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: NdpConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.num_nexthops == 0 {
            return Err(Error::Invalid("num_nexthops must be non-zero"));
        }
        if self.tick_hz == 0 {
            return Err(Error::Invalid("tick_hz must be non-zero"));
        }
        if self.ring_depth == 0 {
            return Err(Error::Invalid("ring_depth must be non-zero"));
        }
        if self.ucast_probes == 0 && self.bcast_probes == 0 {
            return Err(Error::Invalid("probe budget must be non-zero"));
        }
        Ok(())
    }

    fn ms_to_ticks(&self, ms: u64) -> Tick {
        (ms * self.tick_hz).div_ceil(1_000).max(1)
    }

    /// Probe interval in control-plane ticks.
    pub fn probe_interval_ticks(&self) -> Tick {
        self.ms_to_ticks(self.probe_interval_ms)
    }

    /// Reachable lifetime in control-plane ticks.
    pub fn reachable_ticks(&self) -> Tick {
        self.ms_to_ticks(self.reachable_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = NdpConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.probe_interval_ticks(), 100);
        assert_eq!(cfg.reachable_ticks(), 3_000);
    }

    #[test]
    fn toml_overrides() {
        let cfg = NdpConfig::from_toml_str(
            r#"
            num_nexthops = 64
            probe_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.num_nexthops, 64);
        assert_eq!(cfg.probe_interval_ticks(), 50);
        assert_eq!(cfg.max_held_pkts, 256);
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(NdpConfig::from_toml_str("num_nexthops = 0").is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(NdpConfig::from_toml_str("no_such_knob = 1").is_err());
    }

    #[test]
    fn interval_rounds_up_to_one_tick() {
        let cfg = NdpConfig {
            probe_interval_ms: 1,
            tick_hz: 100,
            ..Default::default()
        };
        assert_eq!(cfg.probe_interval_ticks(), 1);
    }
}
