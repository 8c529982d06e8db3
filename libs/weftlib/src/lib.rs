// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! weftlib: hardware interconnect synthesis.
//!
//! weft compiles a user-described **system** (instantiated black-box
//! modules plus high-level logical streaming links between their ports)
//! into a concrete interconnect netlist: split and merge nodes, address
//! converters, pipeline registers, memory delays and clock-domain
//! crossings, wired up with resolved HDL port names and bit widths.
//!
//! The heart of the crate is the multi-network flow compiler
//! ([`core::flow::compile`]): a sequence of graph refinements that turns
//! logical links into a routed topology, the topology into physical
//! connections with consistent field protocols and backpressure, and
//! finally solves an ILP to place the registers that satisfy user
//! latency constraints within the combinational depth budget.
//!
//! ```no_run
//! use weftlib::core::prelude::*;
//!
//! let mut sys = System::new("top");
//! // ... populate modules, ports and links ...
//! let opts = FlowOptions::default();
//! compile(&mut sys, &opts, primdb::builtin())?;
//! # Ok::<(), SynthError>(())
//! ```

pub mod core;

pub use crate::core::error::{Result, SynthError};
