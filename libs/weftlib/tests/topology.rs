// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Default crossbar construction and the post-routing merge optimizer.

mod common;

use common::*;
use weftlib::core::flow::compile;
use weftlib::core::model::{NetType, ObjectKind, System};
use weftlib::core::options::FlowOptions;
use weftlib::core::primdb;

/// Two sources broadcasting to two sinks: the 2x2 crossbar shape.
fn broadcast_2x2(sys: &mut System) -> [weftlib::core::model::LinkId; 4] {
    let clk = add_clock_source(sys, "clk");
    add_reset_source(sys, "rst");

    let s1 = add_source(sys, "s1", clk, 8, "d");
    let s2 = add_source(sys, "s2", clk, 8, "d");
    let t1 = add_sink(sys, "t1", clk, 8, "d", false);
    let t2 = add_sink(sys, "t2", clk, 8, "d", false);

    // Same source address on both fanouts: each source's links form one
    // multicast transmission.
    [
        sys.create_rs_link(s1, t1, 0, 0).unwrap(),
        sys.create_rs_link(s1, t2, 0, 0).unwrap(),
        sys.create_rs_link(s2, t1, 0, 0).unwrap(),
        sys.create_rs_link(s2, t2, 0, 0).unwrap(),
    ]
}

#[test]
fn crossbar_creates_splits_and_merges() {
    let mut sys = System::new("xbar");
    broadcast_2x2(&mut sys);

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    let splits = nodes_matching(&sys, |k| matches!(k, ObjectKind::Split(..)));
    let merges = nodes_matching(&sys, |k| matches!(k, ObjectKind::Merge(..)));
    assert_eq!(splits.len(), 2);
    assert_eq!(merges.len(), 2);

    // Every logical link is realized by at least one physical chain.
    for log in sys.links_of(NetType::RsLogical) {
        assert!(
            !sys.relations.children(log, NetType::RsPhys).is_empty(),
            "unrealized logical link"
        );
    }
}

#[test]
fn exclusive_merges_are_combined() {
    let mut sys = System::new("xbar_excl");
    let links = broadcast_2x2(&mut sys);

    // The two sources never talk at the same time.
    sys.exclusive_pairs.push((links[0], links[2]));

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    let merges = nodes_matching(&sys, |k| matches!(k, ObjectKind::Merge(..)));
    assert_eq!(merges.len(), 1, "exclusive parallel merges should combine");

    // With no contention the survivor needs no arbiter.
    let merge_name = &sys
        .object(merges[0])
        .node_core()
        .unwrap()
        .module_name;
    assert_eq!(merge_name, "weft_merge_ex");
}

#[test]
fn force_full_merge_disables_combining() {
    let mut sys = System::new("xbar_force");
    let links = broadcast_2x2(&mut sys);
    sys.exclusive_pairs.push((links[0], links[2]));

    let opts = FlowOptions {
        force_full_merge: true,
        ..FlowOptions::default()
    };
    compile(&mut sys, &opts, primdb::builtin()).unwrap();

    let merges = nodes_matching(&sys, |k| matches!(k, ObjectKind::Merge(..)));
    assert_eq!(merges.len(), 2);
    for mg in merges {
        assert_eq!(
            sys.object(mg).node_core().unwrap().module_name,
            "weft_merge"
        );
    }
}

#[test]
fn unprovable_exclusivity_keeps_merges_apart() {
    let mut sys = System::new("xbar_plain");
    broadcast_2x2(&mut sys);

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    let merges = nodes_matching(&sys, |k| matches!(k, ObjectKind::Merge(..)));
    assert_eq!(merges.len(), 2);
}

#[test]
fn no_topo_opt_respects_allow_list() {
    let mut sys = System::new("xbar_allow");
    let links = broadcast_2x2(&mut sys);
    sys.exclusive_pairs.push((links[0], links[2]));

    let opts = FlowOptions {
        no_topo_opt: true,
        topo_opt_systems: vec!["xbar_allow".to_string()],
        ..FlowOptions::default()
    };
    compile(&mut sys, &opts, primdb::builtin()).unwrap();
    assert_eq!(
        nodes_matching(&sys, |k| matches!(k, ObjectKind::Merge(..))).len(),
        1
    );

    let mut sys2 = System::new("xbar_blocked");
    let links2 = broadcast_2x2(&mut sys2);
    sys2.exclusive_pairs.push((links2[0], links2[2]));

    let opts2 = FlowOptions {
        no_topo_opt: true,
        ..FlowOptions::default()
    };
    compile(&mut sys2, &opts2, primdb::builtin()).unwrap();
    assert_eq!(
        nodes_matching(&sys2, |k| matches!(k, ObjectKind::Merge(..))).len(),
        2
    );
}

#[test]
fn split_mask_is_constant_for_broadcast() {
    // A single source multicasting to two sinks has one address bin, so
    // the split mask ties off and no converter is inserted.
    let mut sys = System::new("bcast");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let s = add_source(&mut sys, "s", clk, 8, "d");
    let t1 = add_sink(&mut sys, "t1", clk, 8, "d", false);
    let t2 = add_sink(&mut sys, "t2", clk, 8, "d", false);
    sys.create_rs_link(s, t1, 0, 0).unwrap();
    sys.create_rs_link(s, t2, 0, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::Conv(..))).is_empty());

    let splits = nodes_matching(&sys, |k| matches!(k, ObjectKind::Split(..)));
    assert_eq!(splits.len(), 1);
    let input = sys.find("sp0.in").expect("split input port");
    let mask = sys
        .object(input)
        .rs()
        .unwrap()
        .proto
        .get_const(&weftlib::core::protocol::FieldId::new(
            weftlib::core::protocol::FieldType::SplitMask,
        ))
        .expect("tied split mask");
    assert_eq!(mask.to_u64(0), 0b11);
}
