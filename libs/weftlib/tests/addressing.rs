// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Address representations and converter insertion.

mod common;

use common::*;
use weftlib::core::address::ADDR_ANY;
use weftlib::core::flow::compile;
use weftlib::core::model::{ObjectKind, System};
use weftlib::core::options::FlowOptions;
use weftlib::core::primdb;

#[test]
fn distinct_sink_addresses_get_a_converter() {
    let mut sys = System::new("addressed");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    // ceil(log2(13)) = 4 address bits cover addresses 7 and 12.
    let s = add_addressed_source(&mut sys, "s", clk, 8, "d", 4);
    let t1 = add_sink(&mut sys, "t1", clk, 8, "d", false);
    let t2 = add_sink(&mut sys, "t2", clk, 8, "d", false);

    sys.create_rs_link(s, t1, 7, 0).unwrap();
    sys.create_rs_link(s, t2, 12, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    // One converter translating the user's addresses into the domain's
    // canonical ids, one converting those into the split mask.
    let convs = nodes_matching(&sys, |k| matches!(k, ObjectKind::Conv(..)));
    assert_eq!(convs.len(), 2);

    let user_conv = convs
        .iter()
        .find_map(|c| match &sys.object(*c).kind {
            ObjectKind::Conv(_, data) if data.in_width == 4 => Some(data.clone()),
            _ => None,
        })
        .expect("user-side converter");

    // Addresses bin in increasing order; canonical ids follow.
    assert_eq!(user_conv.table, vec![(7, 0), (12, 1)]);
    assert_eq!(user_conv.in_width, 4);
    assert_eq!(user_conv.out_width, 1);

    let mask_conv = convs
        .iter()
        .find_map(|c| match &sys.object(*c).kind {
            ObjectKind::Conv(_, data) if data.in_width == 1 => Some(data.clone()),
            _ => None,
        })
        .expect("split-side converter");
    // Canonical id 0 goes to one split output, id 1 to the other.
    assert_eq!(mask_conv.table.len(), 2);
    assert_ne!(mask_conv.table[0].1, mask_conv.table[1].1);
}

#[test]
fn single_any_address_bin_warns_and_uses_zero() {
    let mut sys = System::new("any_one");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let s = add_addressed_source(&mut sys, "s", clk, 8, "d", 4);
    let t = add_sink(&mut sys, "t", clk, 8, "d", false);

    // An address signal the user never binds.
    sys.create_rs_link(s, t, ADDR_ANY, 0).unwrap();

    // Proceeds (address 0 is picked); no converter is needed.
    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();
    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::Conv(..))).is_empty());
}

#[test]
fn unbound_transmissions_among_bound_ones_error() {
    let mut sys = System::new("any_mixed");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let s = add_addressed_source(&mut sys, "s", clk, 8, "d", 4);
    let t1 = add_sink(&mut sys, "t1", clk, 8, "d", false);
    let t2 = add_sink(&mut sys, "t2", clk, 8, "d", false);

    sys.create_rs_link(s, t1, 5, 0).unwrap();
    sys.create_rs_link(s, t2, ADDR_ANY, 0).unwrap();

    let err = compile(&mut sys, &FlowOptions::default(), primdb::builtin());
    assert!(err.is_err());
    assert!(err
        .unwrap_err()
        .to_string()
        .contains("not all transmissions are bound"));
}

#[test]
fn same_source_and_address_is_one_transmission() {
    let mut sys = System::new("one_xmis");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let s = add_source(&mut sys, "s", clk, 8, "d");
    let t1 = add_sink(&mut sys, "t1", clk, 8, "d", false);
    let t2 = add_sink(&mut sys, "t2", clk, 8, "d", false);

    let l1 = sys.create_rs_link(s, t1, 3, 0).unwrap();
    let l2 = sys.create_rs_link(s, t2, 3, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    // One multicast transmission: both links share a flow id.
    let f1 = match &sys.link(l1).unwrap().kind {
        weftlib::core::model::LinkKind::RsLogical { flow_id, .. } => *flow_id,
        _ => None,
    };
    let f2 = match &sys.link(l2).unwrap().kind {
        weftlib::core::model::LinkKind::RsLogical { flow_id, .. } => *flow_id,
        _ => None,
    };
    assert!(f1.is_some());
    assert_eq!(f1, f2);
}
