// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Point-to-point pipeline: a user topo link with a register floor, the
//! latency solver honoring it, and the registers materialized into the
//! netlist.

mod common;

use common::*;
use weftlib::core::flow::compile;
use weftlib::core::latency::evaluate_constraint;
use weftlib::core::model::{
    ChainSign, ChainTerm, ConstraintOp, NetType, ObjectKind, SyncConstraint, System,
    REGS_UNLIMITED,
};
use weftlib::core::options::FlowOptions;
use weftlib::core::primdb;

#[test]
fn min_regs_realized_as_reg_chain() {
    let mut sys = System::new("pipe");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 8, "d");
    let dst = add_sink(&mut sys, "b", clk, 8, "d", false);

    let logical = sys.create_rs_link(src, dst, 0, 0).unwrap();
    let topo = sys.create_topo_link(src, dst).unwrap();
    sys.set_topo_minmax(topo, 3, REGS_UNLIMITED);

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    // Three pipe stages, one cycle each, and the link latencies folded
    // back to zero.
    let regs = nodes_matching(&sys, |k| matches!(k, ObjectKind::Reg(_)));
    assert_eq!(regs.len(), 3);
    for phys in sys.links_of(NetType::RsPhys) {
        assert_eq!(sys.link(phys).unwrap().latency(), 0);
    }

    // The chain of realized latencies still sums to the floor.
    let check = SyncConstraint {
        chains: vec![ChainTerm {
            sign: ChainSign::Plus,
            links: vec![logical],
        }],
        op: ConstraintOp::Ge,
        rhs: 3,
    };
    assert_eq!(evaluate_constraint(&sys, &check), Some(3));

    // Four 8-bit data segments: a -> r -> r -> r -> b.
    let eight_bit_nets = sys.hdl.nets.iter().filter(|n| n.width == 8).count();
    assert_eq!(eight_bit_nets, 4);

    // Every physical hop carries exactly the 8 payload bits.
    for (_, width) in &sys.hdl.rs_link_widths {
        assert_eq!(*width, 8);
    }

    // Each logical link is realized by at least one physical chain.
    assert!(!sys.relations.children(logical, NetType::RsPhys).is_empty());
}

#[test]
fn no_constraints_means_no_registers() {
    let mut sys = System::new("direct");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 16, "d");
    let dst = add_sink(&mut sys, "b", clk, 16, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::Reg(_))).is_empty());
    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::MDelay(..))).is_empty());
    // One physical link, full width.
    let phys = sys.links_of(NetType::RsPhys);
    assert_eq!(phys.len(), 1);
    assert_eq!(sys.hdl.rs_link_widths[&phys[0]], 16);
}

#[test]
fn wide_deep_delays_become_memory() {
    let mut sys = System::new("deep");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 64, "d");
    let dst = add_sink(&mut sys, "b", clk, 64, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();
    let topo = sys.create_topo_link(src, dst).unwrap();
    sys.set_topo_minmax(topo, 8, REGS_UNLIMITED);

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    let mdelays = nodes_matching(&sys, |k| matches!(k, ObjectKind::MDelay(..)));
    assert_eq!(mdelays.len(), 1);
    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::Reg(_))).is_empty());
}

#[test]
fn no_mdelay_forces_register_chains() {
    let mut sys = System::new("deep_regs");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 64, "d");
    let dst = add_sink(&mut sys, "b", clk, 64, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();
    let topo = sys.create_topo_link(src, dst).unwrap();
    sys.set_topo_minmax(topo, 8, REGS_UNLIMITED);

    let opts = FlowOptions {
        no_mdelay: true,
        ..FlowOptions::default()
    };
    compile(&mut sys, &opts, primdb::builtin()).unwrap();

    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::MDelay(..))).is_empty());
    assert_eq!(
        nodes_matching(&sys, |k| matches!(k, ObjectKind::Reg(_))).len(),
        8
    );
}

#[test]
fn missing_reset_source_is_an_error() {
    let mut sys = System::new("noreset");
    let clk = add_clock_source(&mut sys, "clk");

    let src = add_source(&mut sys, "a", clk, 8, "d");
    let dst = add_sink(&mut sys, "b", clk, 8, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();
    let topo = sys.create_topo_link(src, dst).unwrap();
    sys.set_topo_minmax(topo, 1, REGS_UNLIMITED);

    // Realizing the register requires a reset for the pipe stage.
    let err = compile(&mut sys, &FlowOptions::default(), primdb::builtin());
    assert!(err.is_err());
    assert!(err.unwrap_err().to_string().contains("reset"));
}
