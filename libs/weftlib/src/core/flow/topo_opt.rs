// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Post-crossbar topology optimization.
//!
//! Parallel merge nodes serving different sinks can share one merge when
//! every transmission through one is provably exclusive with every
//! transmission through the other: the combined node needs no extra
//! arbitration, and the downstream fan-out becomes a single split. This
//! trades per-sink merges for one shared bus.

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::error::Result;
use crate::core::flow::FlowStateOuter;
use crate::core::model::{Dir, NetType, ObjectId, System};
use crate::core::nodes::split;

/// Logical links terminating at the sinks a merge ultimately serves,
/// looking through any interconnect nodes downstream of it.
fn merge_traffic(sys: &System, mg: ObjectId) -> Vec<crate::core::model::LinkId> {
    let mut sinks = Vec::new();
    let mut stack = vec![mg];
    while let Some(node) = stack.pop() {
        let outs: Vec<ObjectId> = sys
            .object(node)
            .endpoint(NetType::Topo, Dir::Out)
            .map(|ep| {
                ep.links()
                    .iter()
                    .map(|l| sys.link(*l).unwrap().sink)
                    .collect()
            })
            .unwrap_or_default();
        for next in outs {
            if matches!(
                sys.object(next).kind,
                crate::core::model::ObjectKind::Split(..)
                    | crate::core::model::ObjectKind::Merge(..)
            ) {
                stack.push(next);
            } else if !sinks.contains(&next) {
                sinks.push(next);
            }
        }
    }

    sys.links_of(NetType::RsLogical)
        .into_iter()
        .filter(|l| sinks.contains(&sys.link(*l).unwrap().sink))
        .collect()
}

fn all_pairs_exclusive(
    fs: &FlowStateOuter,
    a: &[crate::core::model::LinkId],
    b: &[crate::core::model::LinkId],
) -> bool {
    for la in a {
        for lb in b {
            let (Some(xa), Some(xb)) = (
                fs.transmission_for_link(*la),
                fs.transmission_for_link(*lb),
            ) else {
                return false;
            };
            if !fs.are_transmissions_exclusive(xa, xb) {
                return false;
            }
        }
    }
    true
}

/// Combine pairs of auto-created merge nodes whose traffic is mutually
/// exclusive. Runs before routing, so only the topo net is rewritten.
pub fn combine_parallel_merges(
    sys: &mut System,
    fs: &FlowStateOuter,
    merges: &[ObjectId],
) -> Result<()> {
    let mut alive: Vec<ObjectId> = merges.to_vec();
    let mut combined_no = 0u32;

    'outer: loop {
        for i in 0..alive.len() {
            for j in (i + 1)..alive.len() {
                let m1 = alive[i];
                let m2 = alive[j];

                let traffic1 = merge_traffic(sys, m1);
                let traffic2 = merge_traffic(sys, m2);
                if traffic1.is_empty() || traffic2.is_empty() {
                    continue;
                }
                if !all_pairs_exclusive(fs, &traffic1, &traffic2) {
                    continue;
                }

                debug!(
                    keep = %sys.hier_path(m1),
                    absorb = %sys.hier_path(m2),
                    "combining exclusive parallel merges"
                );
                combine(sys, m1, m2, &mut combined_no)?;
                alive.remove(j);
                continue 'outer;
            }
        }
        break;
    }
    Ok(())
}

fn combine(sys: &mut System, m1: ObjectId, m2: ObjectId, combined_no: &mut u32) -> Result<()> {
    // Sources already feeding m1 must not be connected twice.
    let m1_srcs: BTreeSet<ObjectId> = sys
        .object(m1)
        .endpoint(NetType::Topo, Dir::In)
        .map(|ep| ep.links().iter().map(|l| sys.link(*l).unwrap().src).collect())
        .unwrap_or_default();

    // Re-route m2's inputs into m1.
    let m2_inputs: Vec<crate::core::model::LinkId> = sys
        .object(m2)
        .endpoint(NetType::Topo, Dir::In)
        .map(|ep| ep.links().to_vec())
        .unwrap_or_default();
    for input in m2_inputs {
        let src = sys.link(input).unwrap().src;
        if m1_srcs.contains(&src) {
            sys.disconnect(input);
        } else {
            sys.reconnect_sink(input, m1)?;
        }
    }

    // The combined merge feeds both original sinks through a new split.
    let out1 = sys
        .object(m1)
        .endpoint(NetType::Topo, Dir::Out)
        .and_then(|ep| ep.link0())
        .expect("merge with no output");
    let out2 = sys
        .object(m2)
        .endpoint(NetType::Topo, Dir::Out)
        .and_then(|ep| ep.link0())
        .expect("merge with no output");
    let sink1 = sys.link(out1).unwrap().sink;
    let sink2 = sys.link(out2).unwrap().sink;

    let sp = split::create(sys, &format!("sp_comb{}", *combined_no))?;
    *combined_no += 1;

    sys.disconnect(out1);
    sys.disconnect(out2);
    sys.connect(m1, sp, NetType::Topo)?;
    sys.connect(sp, sink1, NetType::Topo)?;
    sys.connect(sp, sink2, NetType::Topo)?;

    sys.remove_object(m2);
    Ok(())
}
