// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The register graph.
//!
//! Vertices are external physical links plus terminal vertices standing
//! for the registered cores of modules; edge weights are combinational
//! LUT depths contributed by ports and by zero-latency paths through
//! nodes. Any directed path whose total weight exceeds the logic-depth
//! budget must see at least one register; the snake enumeration below
//! produces that cover.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::flow::net_to_graph;
use crate::core::graph::{EdgeId, Graph, VertexId};
use crate::core::model::{Dir, LinkId, NetType, System};

#[derive(Debug, Default)]
pub struct RegGraph {
    pub graph: Graph,
    pub weights: BTreeMap<EdgeId, u32>,
    pub v_to_link: BTreeMap<VertexId, LinkId>,
    pub link_to_v: BTreeMap<LinkId, VertexId>,
}

/// Build the reg graph. Ports whose depth already meets the budget are
/// returned separately: their links must be registered unconditionally.
pub fn build(sys: &System, max_logic_depth: u32) -> (RegGraph, Vec<LinkId>) {
    let mut rg = RegGraph::default();
    let mut forced = Vec::new();

    let ng = net_to_graph(sys, NetType::RsPhys, true);
    let mut int_links = Vec::new();

    for (_, link_id) in &ng.e_to_link {
        if sys.is_internal_link(*link_id) {
            int_links.push(*link_id);
            continue;
        }

        let v = rg.graph.new_vert();
        rg.v_to_link.insert(v, *link_id);
        rg.link_to_v.insert(*link_id, v);

        let (src_port, sink_port) = {
            let l = sys.link(*link_id).unwrap();
            (l.src, l.sink)
        };

        for (port, port_is_src) in [(src_port, true), (sink_port, false)] {
            let depth = sys.object(port).rs().map(|r| r.logic_depth).unwrap_or(0);
            if depth >= max_logic_depth {
                // No budget left at all: the link is registered no matter
                // what, with no binary variable involved.
                if !forced.contains(link_id) {
                    forced.push(*link_id);
                }
            } else if depth > 0 {
                let term = rg.graph.new_vert();
                let e = if port_is_src {
                    rg.graph.new_edge(term, v)
                } else {
                    rg.graph.new_edge(v, term)
                };
                rg.weights.insert(e, depth);
            }
        }
    }

    // Zero-latency internal links bridge their neighboring external
    // links with the node's through-depth.
    for int_link in int_links {
        let link = sys.link(int_link).unwrap();
        if link.latency() > 0 {
            continue;
        }
        let depth = link.logic_depth();

        let feeder = sys
            .object(link.src)
            .endpoint(NetType::RsPhys, Dir::In)
            .and_then(|ep| ep.link0());
        let onward = sys
            .object(link.sink)
            .endpoint(NetType::RsPhys, Dir::Out)
            .and_then(|ep| ep.link0());

        if let (Some(feeder), Some(onward)) = (feeder, onward) {
            if let (Some(v1), Some(v2)) = (rg.link_to_v.get(&feeder), rg.link_to_v.get(&onward)) {
                let e = rg.graph.new_edge(*v1, *v2);
                rg.weights.insert(e, depth);
            }
        }
    }

    (rg, forced)
}

/// Merge away zero-weight edges; they carry no combinational logic and
/// only inflate the path enumeration.
pub fn postprocess(rg: &mut RegGraph) {
    let edges: Vec<EdgeId> = rg.graph.edges().collect();
    for e in edges {
        if !rg.graph.has_edge(e) {
            continue;
        }
        if rg.weights.get(&e).copied().unwrap_or(0) == 0 {
            let (v1, v2) = rg.graph.verts_of(e);
            rg.graph.merge_verts(v1, v2);
        }
    }
}

/// Enumerate maximal over-weight snakes and return, for each, the links
/// it covers: every path whose unregistered depth would exceed the
/// budget is covered by at least one returned set.
pub fn cover_sets(rg: &RegGraph, max_weight: u32) -> Vec<Vec<LinkId>> {
    struct Snake {
        verts: VecDeque<VertexId>,
        total_weight: u32,
        unvisited: u32,
    }

    let mut covers = Vec::new();
    let mut visited: BTreeSet<VertexId> = BTreeSet::new();
    let mut snakes: VecDeque<Snake> = VecDeque::new();

    for v in rg.graph.verts() {
        if rg.graph.dir_neigh_r(v).is_empty() {
            snakes.push_back(Snake {
                verts: VecDeque::from([v]),
                total_weight: 0,
                unvisited: 0,
            });
        }
    }

    while let Some(mut cur) = snakes.pop_front() {
        loop {
            let head = *cur.verts.back().unwrap();
            if !visited.contains(&head) {
                cur.unvisited += 1;
            }

            if cur.total_weight > max_weight {
                // Pull the tail in until the snake fits again, keeping at
                // least two vertices so head != tail.
                while cur.total_weight > max_weight && cur.verts.len() > 2 {
                    let old_tail = cur.verts.pop_front().unwrap();
                    let new_tail = *cur.verts.front().unwrap();
                    if visited.insert(old_tail) {
                        cur.unvisited -= 1;
                    }
                    if let Some(e) = rg.graph.dir_edge(old_tail, new_tail) {
                        cur.total_weight -= rg.weights.get(&e).copied().unwrap_or(0);
                    }
                }

                if cur.unvisited == 0 {
                    break;
                }

                // Everything in [tail, head) must offer a register.
                let cover: Vec<LinkId> = cur
                    .verts
                    .iter()
                    .take(cur.verts.len() - 1)
                    .filter_map(|v| rg.v_to_link.get(v).copied())
                    .collect();
                if !cover.is_empty() {
                    covers.push(cover);
                }
            }

            let next_vs = rg.graph.dir_neigh(head);
            if next_vs.is_empty() {
                for v in &cur.verts {
                    visited.insert(*v);
                }
                break;
            }

            // Fork: clone the snake for every neighbor but the first,
            // then advance this one into the first.
            for other in next_vs.iter().skip(1) {
                let mut clone = Snake {
                    verts: cur.verts.clone(),
                    total_weight: cur.total_weight,
                    unvisited: cur.unvisited,
                };
                if let Some(e) = rg.graph.dir_edge(head, *other) {
                    clone.total_weight += rg.weights.get(&e).copied().unwrap_or(0);
                }
                clone.verts.push_back(*other);
                snakes.push_back(clone);
            }
            let first = next_vs[0];
            if let Some(e) = rg.graph.dir_edge(head, first) {
                cur.total_weight += rg.weights.get(&e).copied().unwrap_or(0);
            }
            cur.verts.push_back(first);
        }
    }

    covers
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A straight chain of link vertices joined by the given weights.
    fn manual_rg(weights_between: &[u32]) -> RegGraph {
        let mut rg = RegGraph::default();
        let mut prev = None;
        for i in 0..=weights_between.len() {
            let v = rg.graph.new_vert();
            let link = LinkId::new(NetType::RsPhys, i as u32);
            rg.v_to_link.insert(v, link);
            rg.link_to_v.insert(link, v);
            if let Some(pv) = prev {
                let e = rg.graph.new_edge(pv, v);
                rg.weights.insert(e, weights_between[i - 1]);
            }
            prev = Some(v);
        }
        rg
    }

    #[test]
    fn under_budget_chain_emits_nothing() {
        let rg = manual_rg(&[2, 2]);
        let covers = cover_sets(&rg, 5);
        assert!(covers.is_empty());
    }

    #[test]
    fn over_budget_chain_is_covered() {
        // Three links joined by weight-3 logic: total 6 > budget 5.
        let rg = manual_rg(&[3, 3]);
        let covers = cover_sets(&rg, 5);
        assert!(!covers.is_empty());
        for cover in &covers {
            assert!(!cover.is_empty());
        }
    }

    #[test]
    fn postprocess_merges_zero_weight_edges() {
        let mut rg = manual_rg(&[0, 0]);
        assert_eq!(rg.graph.vert_count(), 3);
        postprocess(&mut rg);
        assert_eq!(rg.graph.vert_count(), 1);
        assert_eq!(rg.graph.edge_count(), 0);
    }
}
