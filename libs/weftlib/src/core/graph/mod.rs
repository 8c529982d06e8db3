// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generic labeled directed multigraph.
//!
//! Vertex and edge ids are allocated from independent counters and never
//! reused after deletion, so ids stay valid as keys in side tables across
//! graph mutation. Attributes (weights, labels) live in caller-owned maps
//! keyed by id rather than inside the graph.
//!
//! The flow uses this type for every graph-shaped question it asks:
//! domain discovery, route search, clock-domain assignment, link
//! containment, and the latency solver's register graph.

use std::collections::BTreeMap;
use std::fmt::Write as _;

mod algo;
mod cut;

pub use algo::{connected_components, dijkstra, Components};
pub use cut::{min_st_cut, multi_way_cut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Incident edges per vertex, in insertion order, both directions.
    verts: BTreeMap<VertexId, Vec<EdgeId>>,
    /// Edge id to (source, target).
    edges: BTreeMap<EdgeId, (VertexId, VertexId)>,
    next_vert: u32,
    next_edge: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_vert(&mut self) -> VertexId {
        let id = VertexId(self.next_vert);
        self.next_vert += 1;
        self.verts.insert(id, Vec::new());
        id
    }

    /// Insert a vertex with a caller-chosen id. Used where vertex ids
    /// mirror ids from another space (e.g. link ids in the reg graph).
    pub fn insert_vert(&mut self, id: VertexId) {
        self.next_vert = self.next_vert.max(id.0 + 1);
        self.verts.entry(id).or_default();
    }

    pub fn new_edge(&mut self, src: VertexId, dst: VertexId) -> EdgeId {
        assert!(self.verts.contains_key(&src) && self.verts.contains_key(&dst));
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(id, (src, dst));
        self.verts.get_mut(&src).unwrap().push(id);
        if src != dst {
            self.verts.get_mut(&dst).unwrap().push(id);
        }
        id
    }

    pub fn has_vert(&self, v: VertexId) -> bool {
        self.verts.contains_key(&v)
    }

    pub fn has_edge(&self, e: EdgeId) -> bool {
        self.edges.contains_key(&e)
    }

    pub fn remove_vert(&mut self, v: VertexId) {
        if let Some(incident) = self.verts.remove(&v) {
            for e in incident {
                if let Some((a, b)) = self.edges.remove(&e) {
                    let other = if a == v { b } else { a };
                    if other != v {
                        if let Some(list) = self.verts.get_mut(&other) {
                            list.retain(|x| *x != e);
                        }
                    }
                }
            }
        }
    }

    pub fn remove_edge(&mut self, e: EdgeId) {
        if let Some((a, b)) = self.edges.remove(&e) {
            for v in [a, b] {
                if let Some(list) = self.verts.get_mut(&v) {
                    list.retain(|x| *x != e);
                }
            }
        }
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn verts(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.verts.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges.keys().copied()
    }

    pub fn edges_of(&self, v: VertexId) -> &[EdgeId] {
        self.verts.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    /// (source, target) of an edge.
    pub fn verts_of(&self, e: EdgeId) -> (VertexId, VertexId) {
        self.edges[&e]
    }

    pub fn other_vert(&self, e: EdgeId, v: VertexId) -> VertexId {
        let (a, b) = self.verts_of(e);
        if a == v {
            b
        } else {
            a
        }
    }

    /// All edges between two vertices, either direction.
    pub fn edges_between(&self, v1: VertexId, v2: VertexId) -> Vec<EdgeId> {
        self.edges_of(v1)
            .iter()
            .copied()
            .filter(|e| {
                let (a, b) = self.verts_of(*e);
                (a == v1 && b == v2) || (a == v2 && b == v1)
            })
            .collect()
    }

    pub fn edge_between(&self, v1: VertexId, v2: VertexId) -> Option<EdgeId> {
        self.edges_between(v1, v2).first().copied()
    }

    /// The edge directed `src -> dst`, if any.
    pub fn dir_edge(&self, src: VertexId, dst: VertexId) -> Option<EdgeId> {
        self.edges_of(src)
            .iter()
            .copied()
            .find(|e| self.verts_of(*e) == (src, dst))
    }

    /// The anti-parallel twin of `e`, if present.
    pub fn reverse_edge(&self, e: EdgeId) -> Option<EdgeId> {
        let (a, b) = self.verts_of(e);
        self.dir_edge(b, a)
    }

    /// Undirected neighbors. May contain duplicates when parallel edges
    /// exist.
    pub fn neigh(&self, v: VertexId) -> Vec<VertexId> {
        self.edges_of(v)
            .iter()
            .map(|e| self.other_vert(*e, v))
            .filter(|u| *u != v)
            .collect()
    }

    /// Forward neighbors (edges directed out of `v`).
    pub fn dir_neigh(&self, v: VertexId) -> Vec<VertexId> {
        self.edges_of(v)
            .iter()
            .filter(|e| self.verts_of(**e).0 == v && self.verts_of(**e).1 != v)
            .map(|e| self.verts_of(*e).1)
            .collect()
    }

    /// Reverse neighbors (edges directed into `v`).
    pub fn dir_neigh_r(&self, v: VertexId) -> Vec<VertexId> {
        self.edges_of(v)
            .iter()
            .filter(|e| self.verts_of(**e).1 == v && self.verts_of(**e).0 != v)
            .map(|e| self.verts_of(*e).0)
            .collect()
    }

    /// Merge `src` into `dest`: redirect src's edges to dest, discard
    /// self-loops, keep duplicates, then remove `src`.
    pub fn merge_verts(&mut self, src: VertexId, dest: VertexId) {
        if src == dest {
            return;
        }
        let incident = self.verts.remove(&src).unwrap_or_default();
        for e in incident {
            let (a, b) = self.edges[&e];
            let other = if a == src { b } else { a };
            if other == dest || other == src {
                // Would become a self-loop.
                self.edges.remove(&e);
                if let Some(list) = self.verts.get_mut(&dest) {
                    list.retain(|x| *x != e);
                }
                continue;
            }
            let entry = self.edges.get_mut(&e).unwrap();
            if entry.0 == src {
                entry.0 = dest;
            }
            if entry.1 == src {
                entry.1 = dest;
            }
            self.verts.get_mut(&dest).unwrap().push(e);
        }
    }

    /// Union with another graph. Ids are preserved; the caller guarantees
    /// the id spaces are disjoint.
    pub fn union_with(&mut self, other: &Graph) {
        for (v, _) in &other.verts {
            self.insert_vert(*v);
        }
        for (e, (a, b)) in &other.edges {
            debug_assert!(!self.edges.contains_key(e));
            self.next_edge = self.next_edge.max(e.0 + 1);
            self.edges.insert(*e, (*a, *b));
            self.verts.get_mut(a).unwrap().push(*e);
            if a != b {
                self.verts.get_mut(b).unwrap().push(*e);
            }
        }
    }

    /// Flip edge existence between every vertex pair. Parallel edges
    /// collapse to "present". Only sensible for small helper graphs.
    pub fn complement(&mut self) {
        let verts: Vec<VertexId> = self.verts().collect();
        let old_edges: Vec<EdgeId> = self.edges().collect();
        let mut present: Vec<(VertexId, VertexId)> = Vec::new();
        for e in &old_edges {
            let (a, b) = self.verts_of(*e);
            let key = if a <= b { (a, b) } else { (b, a) };
            present.push(key);
        }
        for e in old_edges {
            self.remove_edge(e);
        }
        for (i, v1) in verts.iter().enumerate() {
            for v2 in verts.iter().skip(i + 1) {
                if !present.contains(&(*v1, *v2)) {
                    self.new_edge(*v1, *v2);
                }
            }
        }
    }

    /// Render as DOT for diagnostics.
    pub fn to_dot(
        &self,
        name: &str,
        vlabel: &dyn Fn(VertexId) -> String,
        elabel: &dyn Fn(EdgeId) -> String,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph {name} {{");
        for v in self.verts() {
            let _ = writeln!(out, "  v{} [label=\"{}\"];", v.0, vlabel(v));
        }
        for e in self.edges() {
            let (a, b) = self.verts_of(e);
            let _ = writeln!(out, "  v{} -> v{} [label=\"{}\"];", a.0, b.0, elabel(e));
        }
        let _ = writeln!(out, "}}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (Graph, [VertexId; 4], [EdgeId; 4]) {
        let mut g = Graph::new();
        let a = g.new_vert();
        let b = g.new_vert();
        let c = g.new_vert();
        let d = g.new_vert();
        let e0 = g.new_edge(a, b);
        let e1 = g.new_edge(a, c);
        let e2 = g.new_edge(b, d);
        let e3 = g.new_edge(c, d);
        (g, [a, b, c, d], [e0, e1, e2, e3])
    }

    #[test]
    fn ids_not_reused() {
        let mut g = Graph::new();
        let a = g.new_vert();
        let b = g.new_vert();
        let e = g.new_edge(a, b);
        g.remove_edge(e);
        let e2 = g.new_edge(a, b);
        assert_ne!(e, e2);
        g.remove_vert(b);
        let c = g.new_vert();
        assert_ne!(b, c);
    }

    #[test]
    fn neighbor_flavors() {
        let (g, [a, b, c, d], _) = diamond();
        assert_eq!(g.dir_neigh(a), vec![b, c]);
        assert!(g.dir_neigh_r(a).is_empty());
        assert_eq!(g.dir_neigh_r(d), vec![b, c]);
        assert_eq!(g.neigh(b), vec![a, d]);
    }

    #[test]
    fn merge_discards_self_loops_keeps_duplicates() {
        let (mut g, [a, b, c, d], _) = diamond();
        g.merge_verts(b, c);
        // a->b and a->c both became a->c (duplicates kept)
        assert_eq!(g.edges_between(a, c).len(), 2);
        assert_eq!(g.edges_between(c, d).len(), 2);
        assert!(!g.has_vert(b));
        // merging endpoints of an edge drops it
        let mut h = Graph::new();
        let x = h.new_vert();
        let y = h.new_vert();
        h.new_edge(x, y);
        h.merge_verts(x, y);
        assert_eq!(h.edge_count(), 0);
    }

    #[test]
    fn union_preserves_ids() {
        let mut g = Graph::new();
        let a = g.new_vert();
        let b = g.new_vert();
        g.new_edge(a, b);

        let mut h = Graph::new();
        h.next_vert = 10;
        h.next_edge = 10;
        let x = h.new_vert();
        let y = h.new_vert();
        let e = h.new_edge(x, y);

        g.union_with(&h);
        assert_eq!(g.vert_count(), 4);
        assert_eq!(g.verts_of(e), (x, y));
    }

    #[test]
    fn complement_flips_pairs() {
        let mut g = Graph::new();
        let a = g.new_vert();
        let b = g.new_vert();
        let c = g.new_vert();
        g.new_edge(a, b);
        g.complement();
        assert!(g.edge_between(a, b).is_none());
        assert!(g.edge_between(a, c).is_some());
        assert!(g.edge_between(b, c).is_some());
    }
}
