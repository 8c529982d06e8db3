// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Flow options.
//!
//! Options recognized by the flow compiler. They are deserializable so a
//! frontend can load them from a TOML file; every field has a default so
//! an empty table is a valid configuration.

use serde::Deserialize;

use crate::core::error::{Result, SynthError};

/// Architecture parameters consumed by area estimation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchParams {
    /// Native width of one LUTRAM block.
    pub lutram_width: u32,
    /// Native depth of one LUTRAM block.
    pub lutram_depth: u32,
    /// Registers packed per ALM. Drives the register-chain vs memory-delay
    /// decision when realizing latencies.
    pub regs_per_alm: u32,
}

impl Default for ArchParams {
    fn default() -> Self {
        Self {
            lutram_width: 20,
            lutram_depth: 32,
            regs_per_alm: 2,
        }
    }
}

/// Options controlling the flow compiler.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowOptions {
    /// Skip the merge-exclusivity check; every merge gets the general
    /// arbiter implementation.
    pub force_full_merge: bool,
    /// Disable merge fan-in tree-ification.
    pub no_merge_tree: bool,
    /// Enable split fan-out tree-ification.
    pub split_tree: bool,
    /// Always realize multi-cycle latencies as register chains.
    pub no_mdelay: bool,
    /// Maximum unregistered combinational depth, in LUTs.
    pub max_logic_depth: u32,
    /// Skip the post-routing topology optimizer globally.
    pub no_topo_opt: bool,
    /// Systems for which the topology optimizer stays enabled even when
    /// `no_topo_opt` is set.
    pub topo_opt_systems: Vec<String>,
    /// Mark split nodes as pure-unicast when their address representation
    /// allows it.
    pub split_unicast: bool,
    /// Write per-network DOT dumps of each compiled system.
    pub dump_dot: bool,
    /// Write the latency solver's register graph as DOT.
    pub dump_reggraph: bool,
    /// Emit a JSON area report per system.
    pub dump_area: bool,
    /// Name auto-created split/merge nodes after their source port rather
    /// than with numeric suffixes.
    pub desc_spmg: bool,

    pub arch: ArchParams,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            force_full_merge: false,
            no_merge_tree: false,
            split_tree: false,
            no_mdelay: false,
            max_logic_depth: 5,
            no_topo_opt: false,
            topo_opt_systems: Vec::new(),
            split_unicast: false,
            dump_dot: false,
            dump_reggraph: false,
            dump_area: false,
            desc_spmg: false,
            arch: ArchParams::default(),
        }
    }
}

impl FlowOptions {
    /// Parse options from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SynthError::Configuration(e.to_string()))
    }

    /// Whether the topology optimizer runs for the named system.
    pub fn topo_opt_enabled(&self, system: &str) -> bool {
        !self.no_topo_opt || self.topo_opt_systems.iter().any(|s| s == system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = FlowOptions::default();
        assert_eq!(opts.max_logic_depth, 5);
        assert!(!opts.force_full_merge);
        assert_eq!(opts.arch.regs_per_alm, 2);
    }

    #[test]
    fn from_toml() {
        let opts = FlowOptions::from_toml_str(
            r#"
            force_full_merge = true
            max_logic_depth = 7

            [arch]
            regs_per_alm = 4
            "#,
        )
        .unwrap();
        assert!(opts.force_full_merge);
        assert_eq!(opts.max_logic_depth, 7);
        assert_eq!(opts.arch.regs_per_alm, 4);
        assert_eq!(opts.arch.lutram_width, 20);
    }

    #[test]
    fn empty_toml_is_defaults() {
        let opts = FlowOptions::from_toml_str("").unwrap();
        assert_eq!(opts, FlowOptions::default());
    }

    #[test]
    fn topo_opt_allow_list() {
        let mut opts = FlowOptions::default();
        assert!(opts.topo_opt_enabled("sys0"));
        opts.no_topo_opt = true;
        assert!(!opts.topo_opt_enabled("sys0"));
        opts.topo_opt_systems.push("sys0".to_string());
        assert!(opts.topo_opt_enabled("sys0"));
        assert!(!opts.topo_opt_enabled("sys1"));
    }
}
