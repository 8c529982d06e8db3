// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock-domain assignment, CDC insertion, and latency constraints that
//! span multiple chains.

mod common;

use common::*;
use weftlib::core::flow::compile;
use weftlib::core::latency::evaluate_constraint;
use weftlib::core::model::{
    ChainSign, ChainTerm, ConstraintOp, NetType, ObjectKind, SyncConstraint, System,
};
use weftlib::core::nodes::clockx;
use weftlib::core::options::FlowOptions;
use weftlib::core::primdb;
use weftlib::core::protocol::{FieldId, FieldType};

#[test]
fn cross_clock_link_gets_a_clockx() {
    let mut sys = System::new("cdc");
    let clk_a = add_clock_source(&mut sys, "clk_a");
    let clk_b = add_clock_source(&mut sys, "clk_b");
    add_reset_source(&mut sys, "rst");

    // The crossing FIFO always stalls its writer, so the source must
    // listen to backpressure.
    let src = add_source_with_ready(&mut sys, "a", clk_a, 8, "d");
    let dst = add_sink(&mut sys, "b", clk_b, 8, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    let crossings = nodes_matching(&sys, |k| matches!(k, ObjectKind::ClockX(_)));
    assert_eq!(crossings.len(), 1);
    let cx = crossings[0];

    // Write side on the source's clock, read side on the sink's.
    let inclk = clockx::inclock(&sys, cx);
    let outclk = clockx::outclock(&sys, cx);
    assert_eq!(sys.clock_driver(inclk), Some(clk_a));
    assert_eq!(sys.clock_driver(outclk), Some(clk_b));

    // The crossing carries exactly the common payload.
    let carrier = sys.object(cx).carrier().unwrap();
    assert_eq!(carrier.total_width(), 8);
    assert!(carrier.has(
        &FieldId::tagged(FieldType::UserData, "d").with_domain(
            sys.links_of(NetType::RsLogical)
                .first()
                .and_then(|l| sys.link(*l).unwrap().domain_id())
                .unwrap()
        )
    ));

    // Both sides of every physical link share a clock driver now.
    for phys in sys.links_of(NetType::RsPhys) {
        let l = sys.link(phys).unwrap();
        let d_src = sys
            .clock_driver(sys.clock_port_of_rs(l.src).unwrap())
            .unwrap();
        let d_sink = sys
            .clock_driver(sys.clock_port_of_rs(l.sink).unwrap())
            .unwrap();
        assert_eq!(d_src, d_sink, "unfixed clock crossing remains");
    }
}

#[test]
fn same_clock_needs_no_crossing() {
    let mut sys = System::new("same_clk");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 8, "d");
    let dst = add_sink(&mut sys, "b", clk, 8, "d", false);
    sys.create_rs_link(src, dst, 0, 0).unwrap();

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();
    assert!(nodes_matching(&sys, |k| matches!(k, ObjectKind::ClockX(_))).is_empty());
}

#[test]
fn sync_constraint_with_subtraction_balances_chains() {
    let mut sys = System::new("balance");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let s1 = add_source(&mut sys, "s1", clk, 8, "d");
    let s2 = add_source(&mut sys, "s2", clk, 8, "d");
    let t1 = add_sink(&mut sys, "t1", clk, 8, "d", false);

    let l1 = sys.create_rs_link(s1, t1, 0, 0).unwrap();
    let l2 = sys.create_rs_link(s2, t1, 0, 0).unwrap();

    // Force one chain to have latency, and require both to match.
    sys.object_mut(s1).rs_mut().unwrap().logic_depth = 5;
    sys.sync_constraints.push(SyncConstraint {
        chains: vec![
            ChainTerm {
                sign: ChainSign::Plus,
                links: vec![l1],
            },
            ChainTerm {
                sign: ChainSign::Minus,
                links: vec![l2],
            },
        ],
        op: ConstraintOp::Eq,
        rhs: 0,
    });

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    // The logic-depth budget forces a register on s1's link; the
    // equality drags s2's chain along.
    let total1 = evaluate_constraint(
        &sys,
        &SyncConstraint {
            chains: vec![ChainTerm {
                sign: ChainSign::Plus,
                links: vec![l1],
            }],
            op: ConstraintOp::Ge,
            rhs: 0,
        },
    )
    .unwrap();
    let total2 = evaluate_constraint(
        &sys,
        &SyncConstraint {
            chains: vec![ChainTerm {
                sign: ChainSign::Plus,
                links: vec![l2],
            }],
            op: ConstraintOp::Ge,
            rhs: 0,
        },
    )
    .unwrap();

    assert!(total1 >= 1, "forced register missing");
    assert_eq!(total1, total2, "chains did not balance");
    assert!(
        !nodes_matching(&sys, |k| matches!(k, ObjectKind::Reg(_))).is_empty()
    );
}

#[test]
fn constraints_naming_missing_links_are_dropped() {
    let mut sys = System::new("dropped");
    let clk = add_clock_source(&mut sys, "clk");
    add_reset_source(&mut sys, "rst");

    let src = add_source(&mut sys, "a", clk, 8, "d");
    let dst = add_sink(&mut sys, "b", clk, 8, "d", false);
    let l = sys.create_rs_link(src, dst, 0, 0).unwrap();

    // A constraint over a link id that exists in no domain.
    sys.sync_constraints.push(SyncConstraint {
        chains: vec![ChainTerm {
            sign: ChainSign::Plus,
            links: vec![weftlib::core::model::LinkId::new(NetType::RsLogical, 999)],
        }],
        op: ConstraintOp::Ge,
        rhs: 7,
    });

    compile(&mut sys, &FlowOptions::default(), primdb::builtin()).unwrap();

    // The bogus constraint is ignored; the real link stays latency-free.
    let check = SyncConstraint {
        chains: vec![ChainTerm {
            sign: ChainSign::Plus,
            links: vec![l],
        }],
        op: ConstraintOp::Ge,
        rhs: 0,
    };
    assert_eq!(evaluate_constraint(&sys, &check), Some(0));
}
