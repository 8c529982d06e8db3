// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The flow compiler.
//!
//! `compile` drives one system through the whole refinement pipeline:
//! domain discovery and transmissions, per-domain topology construction
//! and routing, the inner flow (converters, carriage, clocking,
//! backpressure, latency), and finally HDL elaboration. Stages mutate
//! the system in place; a failing stage aborts the system.

use std::collections::BTreeMap;

use crate::core::address::TransmissionId;
use crate::core::error::Result;
use crate::core::graph::{EdgeId, Graph, VertexId};
use crate::core::model::{LinkId, NetType, ObjectId, System};
use crate::core::options::FlowOptions;
use crate::core::primdb::PrimDbSet;
use crate::core::protocol::{self, CarrierProtocol, FieldId};

pub mod inner;
pub mod outer;
pub mod topo_opt;

/// One RS domain: a connected component of the logical RS graph.
#[derive(Debug, Clone, Default)]
pub struct DomainRS {
    pub id: u32,
    pub name: String,
    pub is_manual: bool,
    pub opt_disabled: bool,
    pub links: Vec<LinkId>,
    pub transmissions: Vec<TransmissionId>,
}

#[derive(Debug, Clone, Default)]
struct TransmissionInfo {
    links: Vec<LinkId>,
    exclusive_with: Vec<TransmissionId>,
}

/// Flow state shared across domains of one system.
#[derive(Debug, Clone, Default)]
pub struct FlowStateOuter {
    domains: Vec<DomainRS>,
    transmissions: Vec<TransmissionInfo>,
    link_to_xmis: BTreeMap<LinkId, TransmissionId>,
}

impl FlowStateOuter {
    pub fn domains(&self) -> &[DomainRS] {
        &self.domains
    }

    pub fn domain(&self, id: u32) -> Option<&DomainRS> {
        self.domains.iter().find(|d| d.id == id)
    }

    pub fn domain_mut(&mut self, id: u32) -> Option<&mut DomainRS> {
        self.domains.iter_mut().find(|d| d.id == id)
    }

    pub fn new_domain(&mut self, id: u32) -> &mut DomainRS {
        self.domains.push(DomainRS {
            id,
            ..DomainRS::default()
        });
        self.domains.last_mut().unwrap()
    }

    pub fn new_transmission(&mut self) -> TransmissionId {
        self.transmissions.push(TransmissionInfo::default());
        (self.transmissions.len() - 1) as TransmissionId
    }

    pub fn add_link_to_transmission(&mut self, xmis: TransmissionId, link: LinkId) {
        self.transmissions[xmis as usize].links.push(link);
        self.link_to_xmis.insert(link, xmis);
    }

    pub fn transmission_links(&self, xmis: TransmissionId) -> &[LinkId] {
        &self.transmissions[xmis as usize].links
    }

    pub fn n_transmissions(&self) -> usize {
        self.transmissions.len()
    }

    pub fn transmission_for_link(&self, link: LinkId) -> Option<TransmissionId> {
        self.link_to_xmis.get(&link).copied()
    }

    pub fn set_transmissions_exclusive(&mut self, a: TransmissionId, b: TransmissionId) {
        if a == b {
            return;
        }
        if !self.transmissions[a as usize].exclusive_with.contains(&b) {
            self.transmissions[a as usize].exclusive_with.push(b);
        }
        if !self.transmissions[b as usize].exclusive_with.contains(&a) {
            self.transmissions[b as usize].exclusive_with.push(a);
        }
    }

    /// Two transmissions never contend: identical, or declared exclusive.
    pub fn are_transmissions_exclusive(&self, a: TransmissionId, b: TransmissionId) -> bool {
        a == b || self.transmissions[a as usize].exclusive_with.contains(&b)
    }
}

/// A network rendered as a graph, with the id mappings the algorithms
/// need to translate results back.
#[derive(Debug, Default)]
pub struct NetGraph {
    pub graph: Graph,
    pub v_to_obj: BTreeMap<VertexId, ObjectId>,
    pub obj_to_v: BTreeMap<ObjectId, VertexId>,
    pub e_to_link: BTreeMap<EdgeId, LinkId>,
    pub link_to_e: BTreeMap<LinkId, EdgeId>,
}

/// Render one network of a system as a graph: a vertex per participating
/// object, a directed edge per link. `include_internal` also walks the
/// node-internal links of primitives.
pub fn net_to_graph(sys: &System, net: NetType, include_internal: bool) -> NetGraph {
    let mut ng = NetGraph::default();
    let links = if include_internal {
        sys.all_links_of(net)
    } else {
        sys.links_of(net)
    };

    for id in links {
        let link = sys.link(id).unwrap();
        for obj in [link.src, link.sink] {
            if !ng.obj_to_v.contains_key(&obj) {
                let v = ng.graph.new_vert();
                ng.obj_to_v.insert(obj, v);
                ng.v_to_obj.insert(v, obj);
            }
        }
        let e = ng
            .graph
            .new_edge(ng.obj_to_v[&link.src], ng.obj_to_v[&link.sink]);
        ng.e_to_link.insert(e, id);
        ng.link_to_e.insert(id, e);
    }

    ng
}

/// The carrier protocol of the node owning a port, if that node is a
/// protocol carrier.
pub fn carrier_of_port(sys: &System, port: ObjectId) -> Option<&CarrierProtocol> {
    let parent = sys.object(port).parent?;
    sys.object(parent).carrier()
}

/// Transmitted width between two RS ports.
pub fn port_pair_width(sys: &System, src: ObjectId, sink: ObjectId) -> u32 {
    let src_proto = &sys.object(src).rs().expect("src is not an RS port").proto;
    let sink_proto = &sys.object(sink).rs().expect("sink is not an RS port").proto;
    protocol::transmitted_width(
        src_proto,
        carrier_of_port(sys, src),
        sink_proto,
        carrier_of_port(sys, sink),
    )
}

/// Transmitted width of a physical RS link.
pub fn link_width(sys: &System, link: LinkId) -> u32 {
    let l = sys.link(link).expect("stale link id");
    port_pair_width(sys, l.src, l.sink)
}

/// Populate a freshly-spliced carrier node's protocol with the fields it
/// must transport between `src` and `sink`.
pub fn splice_carrier_protocol(sys: &mut System, src: ObjectId, sink: ObjectId, node: ObjectId) {
    let carriage = protocol::splice_carriage(
        &sys.object(src).rs().expect("src is not an RS port").proto,
        carrier_of_port(sys, src),
        &sys.object(sink).rs().expect("sink is not an RS port").proto,
        carrier_of_port(sys, sink),
    );
    if let Some(carrier) = sys.object_mut(node).carrier_mut() {
        carrier.add_set(&carriage);
    }
}

/// Whether an RS port's protocol (or its node's carrier) supplies a
/// field.
pub fn port_provides_field(sys: &System, port: ObjectId, field: &FieldId) -> bool {
    if let Some(rs) = sys.object(port).rs() {
        if rs.proto.has_terminal_field(field) {
            return true;
        }
    }
    carrier_of_port(sys, port)
        .map(|c| c.has(field))
        .unwrap_or(false)
}

/// Compile one system: run the outer flow, then HDL elaboration.
pub fn compile(sys: &mut System, opts: &FlowOptions, dbs: &PrimDbSet) -> Result<()> {
    tracing::info!(system = sys.name(), "compiling");

    sys.resolve_all_params()?;

    let mut fs = FlowStateOuter::default();
    outer::assign_domains(sys, &mut fs);
    outer::create_transmissions(sys, &mut fs);
    outer::find_manual_domains(sys, &mut fs);
    outer::log_domain_stats(sys, &fs);

    outer::init_user_rs_ports(sys)?;
    outer::process_all_domains(sys, &mut fs, opts, dbs)?;
    outer::connect_conduits(sys)?;

    crate::core::elab::elaborate(sys, dbs)?;

    if opts.dump_dot {
        outer::dump_dot(sys)?;
    }
    if opts.dump_area {
        outer::dump_area(sys, dbs, opts)?;
    }

    tracing::info!(system = sys.name(), "compile complete");
    Ok(())
}
