// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Minimum s-t cut and greedy multiway cut.
//!
//! The s-t cut treats its input as undirected by reifying each edge as
//! two anti-parallel directed edges of equal capacity. After max-flow
//! terminates, the original weight of a saturated edge is recovered from
//! its twin: forward and backward residuals always sum to twice the
//! initial capacity.

use std::collections::BTreeMap;

use super::{EdgeId, Graph, VertexId};

/// Minimum s-t cut via augmenting paths. Removes the cut edges from `g`
/// and returns the total cut weight.
pub fn min_st_cut(
    g: &mut Graph,
    cap: &BTreeMap<EdgeId, i64>,
    s: VertexId,
    t: VertexId,
) -> i64 {
    assert_ne!(s, t);

    // Residual graph: every undirected edge becomes two directed ones.
    let mut r = g.clone();
    let mut res: BTreeMap<EdgeId, i64> = cap.clone();
    let originals: Vec<EdgeId> = g.edges().collect();
    for e in &originals {
        let (v1, v2) = g.verts_of(*e);
        let back = r.new_edge(v2, v1);
        res.insert(back, cap[e]);
    }

    loop {
        // Depth-first search for an augmenting path with residual capacity.
        let mut visited: BTreeMap<VertexId, bool> = BTreeMap::new();
        let mut path = vec![s];

        while let Some(&cur) = path.last() {
            visited.insert(cur, true);
            if cur == t {
                break;
            }

            let mut advanced = false;
            for e in r.edges_of(cur) {
                let (v1, v2) = r.verts_of(*e);
                if v1 == cur
                    && res.get(e).copied().unwrap_or(0) > 0
                    && !visited.get(&v2).copied().unwrap_or(false)
                {
                    path.push(v2);
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                path.pop();
            }
        }

        if path.is_empty() {
            break;
        }

        // Saturate the path by its bottleneck capacity.
        let mut bottleneck = i64::MAX;
        for pair in path.windows(2) {
            let e = r.dir_edge(pair[0], pair[1]).unwrap();
            bottleneck = bottleneck.min(res[&e]);
        }
        for pair in path.windows(2) {
            let fwd = r.dir_edge(pair[0], pair[1]).unwrap();
            let back = r.dir_edge(pair[1], pair[0]).unwrap();
            *res.get_mut(&fwd).unwrap() -= bottleneck;
            *res.get_mut(&back).unwrap() += bottleneck;
        }
    }

    // Saturated residual edges mark the cut. The twin's residual equals
    // twice the original weight.
    let mut total = 0;
    let res_edges: Vec<EdgeId> = r.edges().collect();
    for e in res_edges {
        if res.get(&e).copied().unwrap_or(0) != 0 {
            continue;
        }
        let (v1, v2) = r.verts_of(e);
        if let Some(back) = r.dir_edge(v2, v1) {
            total += res[&back] / 2;
        }
        if let Some(orig) = g.edge_between(v1, v2) {
            g.remove_edge(orig);
        }
    }

    total
}

/// Vertices reachable from `start`, undirected.
fn reachable(g: &Graph, start: VertexId) -> Vec<VertexId> {
    let mut visited: BTreeMap<VertexId, bool> = BTreeMap::new();
    let mut stack = vec![start];
    let mut out = Vec::new();
    while let Some(v) = stack.pop() {
        if visited.insert(v, true).is_some() {
            continue;
        }
        out.push(v);
        for u in g.neigh(v) {
            if !visited.contains_key(&u) {
                stack.push(u);
            }
        }
    }
    out
}

/// Greedy-isolation multiway cut: partition the graph so each partition
/// contains exactly one terminal, heuristically minimizing cut weight.
/// Returns the terminal assigned to each vertex.
pub fn multi_way_cut(
    g: &Graph,
    weights: &BTreeMap<EdgeId, i64>,
    terminals: &[VertexId],
) -> BTreeMap<VertexId, VertexId> {
    assert!(!terminals.is_empty());

    let mut result = BTreeMap::new();
    let mut work = g.clone();
    let mut t_list: Vec<VertexId> = terminals.to_vec();

    while t_list.len() > 1 {
        // For each terminal, isolate it from a super-sink made of all the
        // others and remember the cheapest cut.
        let mut best: Option<(i64, VertexId, Graph)> = None;

        for &t in &t_list {
            let mut h = work.clone();
            let others: Vec<VertexId> = t_list.iter().copied().filter(|x| *x != t).collect();
            let s = others[0];
            for o in &others[1..] {
                h.merge_verts(*o, s);
            }

            // Collapse parallel edges, summing weights.
            let mut merged: BTreeMap<EdgeId, i64> =
                h.edges().map(|e| (e, weights.get(&e).copied().unwrap_or(0))).collect();
            let verts: Vec<VertexId> = h.verts().collect();
            for &v in &verts {
                let mut neighbors = h.neigh(v);
                neighbors.sort();
                neighbors.dedup();
                for u in neighbors {
                    if u <= v {
                        continue;
                    }
                    let parallel = h.edges_between(v, u);
                    if parallel.len() > 1 {
                        let keep = parallel[0];
                        for extra in &parallel[1..] {
                            let w = merged.remove(extra).unwrap_or(0);
                            *merged.get_mut(&keep).unwrap() += w;
                            h.remove_edge(*extra);
                        }
                    }
                }
            }

            let cut_weight = min_st_cut(&mut h, &merged, t, s);
            let better = match &best {
                None => true,
                Some((w, _, _)) => cut_weight < *w,
            };
            if better {
                best = Some((cut_weight, t, h));
            }
        }

        let (_, min_terminal, residual) = best.unwrap();

        // Everything still connected to the winning terminal belongs to it.
        for v in reachable(&residual, min_terminal) {
            result.insert(v, min_terminal);
            work.remove_vert(v);
        }
        t_list.retain(|x| *x != min_terminal);
    }

    let last = t_list[0];
    for v in work.verts() {
        result.insert(v, last);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_separates_and_weighs() {
        // s -3- a -1- b -3- t : min cut is the middle edge, weight 1.
        let mut g = Graph::new();
        let s = g.new_vert();
        let a = g.new_vert();
        let b = g.new_vert();
        let t = g.new_vert();
        let e0 = g.new_edge(s, a);
        let e1 = g.new_edge(a, b);
        let e2 = g.new_edge(b, t);
        let cap: BTreeMap<EdgeId, i64> = [(e0, 3), (e1, 1), (e2, 3)].into();

        let w = min_st_cut(&mut g, &cap, s, t);
        assert_eq!(w, 1);
        assert!(g.edge_between(a, b).is_none());
        assert!(g.edge_between(s, a).is_some());
    }

    #[test]
    fn cut_across_parallel_paths() {
        // Two disjoint paths of bottleneck 2 and 1: cut weight 3.
        let mut g = Graph::new();
        let s = g.new_vert();
        let a = g.new_vert();
        let b = g.new_vert();
        let t = g.new_vert();
        let e0 = g.new_edge(s, a);
        let e1 = g.new_edge(a, t);
        let e2 = g.new_edge(s, b);
        let e3 = g.new_edge(b, t);
        let cap: BTreeMap<EdgeId, i64> = [(e0, 2), (e1, 5), (e2, 1), (e3, 4)].into();

        let w = min_st_cut(&mut g, &cap, s, t);
        assert_eq!(w, 3);
    }

    #[test]
    fn multiway_legal_partition() {
        // Triangle of terminals with a satellite each; verify every vertex
        // is assigned to exactly one terminal and terminals keep themselves.
        let mut g = Graph::new();
        let t0 = g.new_vert();
        let t1 = g.new_vert();
        let t2 = g.new_vert();
        let m0 = g.new_vert();
        let m1 = g.new_vert();
        let mut cap = BTreeMap::new();
        cap.insert(g.new_edge(t0, m0), 5);
        cap.insert(g.new_edge(m0, t1), 1);
        cap.insert(g.new_edge(t1, m1), 1);
        cap.insert(g.new_edge(m1, t2), 5);

        let assign = multi_way_cut(&g, &cap, &[t0, t1, t2]);
        assert_eq!(assign.len(), 5);
        assert_eq!(assign[&t0], t0);
        assert_eq!(assign[&t1], t1);
        assert_eq!(assign[&t2], t2);
        // Satellites follow their heavy edge.
        assert_eq!(assign[&m0], t0);
        assert_eq!(assign[&m1], t2);
    }

    #[test]
    fn multiway_single_terminal_takes_all() {
        let mut g = Graph::new();
        let t = g.new_vert();
        let a = g.new_vert();
        let cap: BTreeMap<EdgeId, i64> = [(g.new_edge(t, a), 1)].into();
        let assign = multi_way_cut(&g, &cap, &[t]);
        assert_eq!(assign[&a], t);
        assert_eq!(assign[&t], t);
    }
}
