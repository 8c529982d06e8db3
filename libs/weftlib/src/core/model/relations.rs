// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Link-to-link containment.
//!
//! A separate directed graph whose vertices are link ids and whose edges
//! run parent → child. If L1 is a parent of L2, L2 realizes part of L1's
//! work at a lower refinement level: a logical RS link parents the topo
//! links along its route, and a topo link parents the physical RS links
//! realizing it. Queries are transitive.

use std::collections::BTreeMap;

use crate::core::graph::{Graph, VertexId};
use crate::core::model::link::LinkId;
use crate::core::model::network::NetType;

#[derive(Debug, Clone, Default)]
pub struct LinkRelations {
    graph: Graph,
    link_to_v: BTreeMap<LinkId, VertexId>,
    v_to_link: BTreeMap<VertexId, LinkId>,
}

impl LinkRelations {
    pub fn new() -> Self {
        Self::default()
    }

    fn vert_for(&mut self, link: LinkId) -> VertexId {
        if let Some(v) = self.link_to_v.get(&link) {
            return *v;
        }
        let v = self.graph.new_vert();
        self.link_to_v.insert(link, v);
        self.v_to_link.insert(v, link);
        v
    }

    /// Record that `parent` is realized (in part) by `child`.
    pub fn add(&mut self, parent: LinkId, child: LinkId) {
        let pv = self.vert_for(parent);
        let cv = self.vert_for(child);
        if self.graph.dir_edge(pv, cv).is_none() {
            self.graph.new_edge(pv, cv);
        }
    }

    pub fn remove(&mut self, parent: LinkId, child: LinkId) {
        if let (Some(pv), Some(cv)) = (self.link_to_v.get(&parent), self.link_to_v.get(&child)) {
            if let Some(e) = self.graph.dir_edge(*pv, *cv) {
                self.graph.remove_edge(e);
            }
        }
    }

    /// Must be called when a link is destroyed.
    pub fn unregister_link(&mut self, link: LinkId) {
        if let Some(v) = self.link_to_v.remove(&link) {
            self.v_to_link.remove(&v);
            self.graph.remove_vert(v);
        }
    }

    /// Transitive: is `child` among the descendants of `parent`?
    pub fn is_contained_in(&self, parent: LinkId, child: LinkId) -> bool {
        self.collect(parent, false, None).contains(&child)
    }

    pub fn immediate_parents(&self, link: LinkId) -> Vec<LinkId> {
        match self.link_to_v.get(&link) {
            Some(v) => self
                .graph
                .dir_neigh_r(*v)
                .into_iter()
                .map(|u| self.v_to_link[&u])
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn immediate_children(&self, link: LinkId) -> Vec<LinkId> {
        match self.link_to_v.get(&link) {
            Some(v) => self
                .graph
                .dir_neigh(*v)
                .into_iter()
                .map(|u| self.v_to_link[&u])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Transitive ancestors of `link` restricted to `net`.
    pub fn parents(&self, link: LinkId, net: NetType) -> Vec<LinkId> {
        self.collect(link, true, Some(net))
    }

    /// Transitive descendants of `link` restricted to `net`.
    pub fn children(&self, link: LinkId, net: NetType) -> Vec<LinkId> {
        self.collect(link, false, Some(net))
    }

    fn collect(&self, link: LinkId, reverse: bool, net: Option<NetType>) -> Vec<LinkId> {
        let mut out = Vec::new();
        let Some(start) = self.link_to_v.get(&link) else {
            return out;
        };
        let mut stack = vec![*start];
        let mut seen = vec![*start];
        while let Some(v) = stack.pop() {
            let next = if reverse {
                self.graph.dir_neigh_r(v)
            } else {
                self.graph.dir_neigh(v)
            };
            for u in next {
                if seen.contains(&u) {
                    continue;
                }
                seen.push(u);
                let l = self.v_to_link[&u];
                if net.map(|n| l.net == n).unwrap_or(true) {
                    out.push(l);
                }
                stack.push(u);
            }
        }
        out
    }

    /// Merge relation edges from another relations graph, translating
    /// nothing: link ids are shared between a snapshot and its parent.
    pub fn absorb(&mut self, other: &LinkRelations) {
        for (parent, pv) in &other.link_to_v {
            for cv in other.graph.dir_neigh(*pv) {
                let child = other.v_to_link[&cv];
                self.add(*parent, child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lid(net: NetType, i: u32) -> LinkId {
        LinkId::new(net, i)
    }

    #[test]
    fn transitive_queries_filter_by_net() {
        let mut rel = LinkRelations::new();
        let logical = lid(NetType::RsLogical, 0);
        let topo_a = lid(NetType::Topo, 0);
        let topo_b = lid(NetType::Topo, 1);
        let phys_a = lid(NetType::RsPhys, 0);
        let phys_b = lid(NetType::RsPhys, 1);

        rel.add(logical, topo_a);
        rel.add(logical, topo_b);
        rel.add(topo_a, phys_a);
        rel.add(topo_b, phys_b);

        let mut phys = rel.children(logical, NetType::RsPhys);
        phys.sort();
        assert_eq!(phys, vec![phys_a, phys_b]);

        assert_eq!(rel.parents(phys_a, NetType::RsLogical), vec![logical]);
        assert!(rel.is_contained_in(logical, phys_b));
        assert!(!rel.is_contained_in(topo_a, phys_b));
    }

    #[test]
    fn unregister_removes_edges() {
        let mut rel = LinkRelations::new();
        let a = lid(NetType::RsLogical, 0);
        let b = lid(NetType::Topo, 0);
        rel.add(a, b);
        rel.unregister_link(b);
        assert!(rel.children(a, NetType::Topo).is_empty());
    }

    #[test]
    fn absorb_merges() {
        let mut rel = LinkRelations::new();
        let a = lid(NetType::RsLogical, 0);
        let b = lid(NetType::Topo, 0);
        rel.add(a, b);

        let mut other = LinkRelations::new();
        let c = lid(NetType::RsPhys, 0);
        other.add(b, c);

        rel.absorb(&other);
        assert_eq!(rel.children(a, NetType::RsPhys), vec![c]);
    }
}
