// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-system preamble: domain discovery, transmissions, default
//! topology, routing, conduit wiring, and the snapshot boundary around
//! the per-domain inner flow.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::core::error::{Result, SynthError};
use crate::core::flow::{inner, net_to_graph, topo_opt, FlowStateOuter};
use crate::core::graph::dijkstra;
use crate::core::graph::connected_components;
use crate::core::model::port::{BpStatus, RoleKind};
use crate::core::model::{
    Dir, Link, LinkKind, NetType, ObjectId, ObjectKind, System,
};
use crate::core::nodes::{merge, split};
use crate::core::options::FlowOptions;
use crate::core::primdb::PrimDbSet;
use crate::core::protocol::{Field, FieldId, FieldType};

/// Hierarchical path relative to the system root.
pub(crate) fn rel_path(sys: &System, obj: ObjectId) -> String {
    let full = sys.hier_path(obj);
    match full.split_once('.') {
        Some((_, rest)) => rest.to_string(),
        None => full,
    }
}

/// RS ports belonging to user modules or exported at the system
/// boundary.
pub(crate) fn user_rs_ports(sys: &System) -> Vec<ObjectId> {
    let mut out = Vec::new();
    for (id, obj) in sys.objects() {
        if obj.rs().is_none() {
            continue;
        }
        match obj.parent {
            Some(p) if p == sys.root() => out.push(id),
            Some(p) => {
                if matches!(sys.object(p).kind, ObjectKind::Module(_)) {
                    out.push(id);
                }
            }
            None => {}
        }
    }
    out
}

/// Assign RS domains: connected components of the logical RS graph,
/// copied onto every port and logical link.
pub fn assign_domains(sys: &mut System, fs: &mut FlowStateOuter) {
    let ng = net_to_graph(sys, NetType::RsLogical, false);
    let comps = connected_components(&ng.graph);

    for (e, link_id) in &ng.e_to_link {
        let dom_id = comps.edge_comp[e];
        let (src, sink) = {
            let link = sys.link(*link_id).unwrap();
            (link.src, link.sink)
        };

        if fs.domain(dom_id).is_none() {
            let name = sys.hier_path(src);
            let dom = fs.new_domain(dom_id);
            dom.name = name;
        }
        fs.domain_mut(dom_id).unwrap().links.push(*link_id);

        if let LinkKind::RsLogical { domain_id, .. } = &mut sys.link_mut(*link_id).unwrap().kind {
            *domain_id = Some(dom_id);
        }
        for port in [src, sink] {
            if let Some(rs) = sys.object_mut(port).rs_mut() {
                rs.domain_id = Some(dom_id);
            }
        }
    }
}

/// Bin logical links by source object, then by source address: each bin
/// is one transmission (one elemental data stream).
pub fn create_transmissions(sys: &mut System, fs: &mut FlowStateOuter) {
    let mut by_src: BTreeMap<ObjectId, Vec<crate::core::model::LinkId>> = BTreeMap::new();
    for id in sys.links_of(NetType::RsLogical) {
        by_src.entry(sys.link(id).unwrap().src).or_default().push(id);
    }

    for (_, links) in by_src {
        let mut by_addr: BTreeMap<u64, Vec<crate::core::model::LinkId>> = BTreeMap::new();
        for id in links {
            if let LinkKind::RsLogical { src_addr, .. } = &sys.link(id).unwrap().kind {
                by_addr.entry(*src_addr).or_default().push(id);
            }
        }

        for (_, bin) in by_addr {
            let xmis = fs.new_transmission();
            let dom = sys.link(bin[0]).unwrap().domain_id();
            for id in &bin {
                fs.add_link_to_transmission(xmis, *id);
                if let LinkKind::RsLogical { flow_id, .. } = &mut sys.link_mut(*id).unwrap().kind {
                    *flow_id = Some(xmis);
                }
            }
            if let Some(dom_id) = dom {
                fs.domain_mut(dom_id).unwrap().transmissions.push(xmis);
            }
        }
    }

    // User-declared exclusivity binds at transmission granularity.
    let pairs = sys.exclusive_pairs.clone();
    for (a, b) in pairs {
        if let (Some(xa), Some(xb)) = (fs.transmission_for_link(a), fs.transmission_for_link(b)) {
            fs.set_transmissions_exclusive(xa, xb);
        }
    }
}

/// Domains holding user-created topo links keep their topology: mark
/// them manual so the automatic stages leave them alone.
pub fn find_manual_domains(sys: &mut System, fs: &mut FlowStateOuter) {
    for id in sys.links_of(NetType::Topo) {
        let link = sys.link(id).unwrap();
        for obj in [link.src, link.sink] {
            if let Some(dom_id) = sys.object(obj).rs().and_then(|r| r.domain_id) {
                fs.domain_mut(dom_id).unwrap().is_manual = true;
            }
        }
    }
}

pub fn log_domain_stats(sys: &System, fs: &FlowStateOuter) {
    if fs.domains().is_empty() {
        return;
    }
    info!(
        system = sys.name(),
        domains = fs.domains().len(),
        "found transmission domains"
    );
    for dom in fs.domains() {
        if dom.is_manual {
            info!(domain = %dom.name, "domain has manual topology");
        }
    }
}

/// Convert each user RS port's role bindings into terminal fields.
pub fn init_user_rs_ports(sys: &mut System) -> Result<()> {
    for port in user_rs_ports(sys) {
        let parent = sys.object(port).parent.unwrap();
        let bindings = sys.object(port).port_core().unwrap().bindings.clone();
        let domain = sys.object(port).rs().unwrap().domain_id;

        for rb in bindings {
            let resolver = |name: &str| sys.param_value(parent, name);
            let slices = rb.binding.slices.eval(&resolver)?;
            if slices > 1 {
                return Err(SynthError::synth(
                    sys.hier_path(port),
                    format!("{:?}: multi-dimensional HDL signal bindings not supported", rb.role.kind),
                ));
            }
            let bits = rb.binding.bits.eval(&resolver)? as u32;

            match rb.role.kind {
                RoleKind::Address => {
                    let field = Field::new(FieldId::new(FieldType::UserAddr), bits);
                    sys.object_mut(port)
                        .rs_mut()
                        .unwrap()
                        .proto
                        .add_terminal_field(field, rb.role.clone());
                }
                RoleKind::Eop => {
                    let field = Field::new(FieldId::new(FieldType::Eop), 1);
                    sys.object_mut(port)
                        .rs_mut()
                        .unwrap()
                        .proto
                        .add_terminal_field(field, rb.role.clone());
                }
                RoleKind::Data | RoleKind::DataBundle => {
                    // A port with no logical links belongs to no domain
                    // and carries nothing.
                    let Some(dom) = domain else {
                        continue;
                    };
                    let mut id = FieldId::new(FieldType::UserData).with_domain(dom);
                    id.tag = rb.role.tag.clone();
                    sys.object_mut(port)
                        .rs_mut()
                        .unwrap()
                        .proto
                        .add_terminal_field(Field::new(id, bits), rb.role.clone());
                }
                RoleKind::Ready => {
                    sys.object_mut(port).rs_mut().unwrap().bp.status = BpStatus::Enabled;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Build the default crossbar topology on a domain snapshot: a split
/// behind every source with more than one distinct destination, a merge
/// before every sink with more than one distinct source, heads
/// connected all-to-all along the logical links. Returns the merge
/// nodes created.
pub fn make_crossbar_topo(
    sys: &mut System,
    opts: &FlowOptions,
) -> Result<Vec<ObjectId>> {
    struct Entry {
        head: ObjectId,
        remotes: BTreeSet<ObjectId>,
    }

    let logical = sys.links_of(NetType::RsLogical);

    // Manual topology must cover a logical link completely or not at all.
    let mut uncovered = Vec::new();
    for id in &logical {
        let link = sys.link(*id).unwrap();
        let src_cov = sys
            .object(link.src)
            .endpoint(NetType::Topo, Dir::Out)
            .map(|ep| ep.is_connected())
            .unwrap_or(false);
        let sink_cov = sys
            .object(link.sink)
            .endpoint(NetType::Topo, Dir::In)
            .map(|ep| ep.is_connected())
            .unwrap_or(false);
        match (src_cov, sink_cov) {
            (true, true) => {}
            (false, false) => uncovered.push(*id),
            _ => {
                return Err(SynthError::synth(
                    sys.hier_path(link.src),
                    format!(
                        "manual topology partially covers the logical link to {}",
                        sys.hier_path(link.sink)
                    ),
                ))
            }
        }
    }

    let mut srces: BTreeMap<ObjectId, Entry> = BTreeMap::new();
    let mut sinks: BTreeMap<ObjectId, Entry> = BTreeMap::new();

    for id in &uncovered {
        let link = sys.link(*id).unwrap();
        let (src, sink) = (link.src, link.sink);
        srces
            .entry(src)
            .or_insert_with(|| Entry {
                head: src,
                remotes: BTreeSet::new(),
            })
            .remotes
            .insert(sink);
        sinks
            .entry(sink)
            .or_insert_with(|| Entry {
                head: sink,
                remotes: BTreeSet::new(),
            })
            .remotes
            .insert(src);
    }

    let mut merges = Vec::new();
    let mut sp_no = 0u32;
    let mut mg_no = 0u32;

    for (orig_src, entry) in srces.iter_mut() {
        if entry.remotes.len() > 1 {
            let name = if opts.desc_spmg {
                format!("sp_{}", rel_path(sys, *orig_src).replace('.', "_"))
            } else {
                let n = sp_no;
                sp_no += 1;
                format!("sp{n}")
            };
            let sp = split::create(sys, &name)?;
            sys.connect(*orig_src, sp, NetType::Topo)?;
            entry.head = sp;
        }
    }

    for (orig_sink, entry) in sinks.iter_mut() {
        if entry.remotes.len() > 1 {
            let name = if opts.desc_spmg {
                format!("mg_{}", rel_path(sys, *orig_sink).replace('.', "_"))
            } else {
                let n = mg_no;
                mg_no += 1;
                format!("mg{n}")
            };
            let mg = merge::create(sys, &name)?;
            sys.connect(mg, *orig_sink, NetType::Topo)?;
            entry.head = mg;
            merges.push(mg);
        }
    }

    for (_, src_entry) in &srces {
        for sink in &src_entry.remotes {
            let sink_head = sinks[sink].head;
            sys.connect(src_entry.head, sink_head, NetType::Topo)?;
        }
    }

    Ok(merges)
}

/// Remove interconnect nodes that ended up with no traffic on one side.
pub fn prune_superfluous(sys: &mut System) {
    loop {
        let mut doomed = None;
        for (id, obj) in sys.objects() {
            if !matches!(obj.kind, ObjectKind::Split(..) | ObjectKind::Merge(..)) {
                continue;
            }
            let in_deg = obj
                .endpoint(NetType::Topo, Dir::In)
                .map(|ep| ep.links().len())
                .unwrap_or(0);
            let out_deg = obj
                .endpoint(NetType::Topo, Dir::Out)
                .map(|ep| ep.links().len())
                .unwrap_or(0);
            if in_deg == 0 || out_deg == 0 {
                doomed = Some(id);
                break;
            }
        }
        match doomed {
            Some(id) => {
                warn!(node = %sys.hier_path(id), "removing superfluous interconnect node");
                sys.remove_object(id);
            }
            None => break,
        }
    }
}

/// Route every logical link over the topo graph, recording containment
/// for each topo edge on the path.
pub fn route_logical_links(sys: &mut System) -> Result<()> {
    let ng = net_to_graph(sys, NetType::Topo, false);

    for id in sys.links_of(NetType::RsLogical) {
        let link = sys.link(id).unwrap();
        let (src, sink) = (link.src, link.sink);

        let (Some(v_src), Some(v_sink)) = (
            ng.obj_to_v.get(&src).copied(),
            ng.obj_to_v.get(&sink).copied(),
        ) else {
            return Err(SynthError::synth(
                sys.hier_path(src),
                format!("no route found to {}", sys.hier_path(sink)),
            ));
        };

        let route = dijkstra(&ng.graph, v_src, v_sink, None).ok_or_else(|| {
            SynthError::synth(
                sys.hier_path(src),
                format!("no route found to {}", sys.hier_path(sink)),
            )
        })?;

        for e in route {
            sys.relations.add(id, ng.e_to_link[&e]);
        }
    }
    Ok(())
}

/// Wire up conduit links: match sub-ports by tag, warn at the sink for
/// missing tags, reverse sub-link direction when the source sub is an
/// input.
pub fn connect_conduits(sys: &mut System) -> Result<()> {
    for id in sys.links_of(NetType::Conduit) {
        let link = sys.link(id).unwrap();
        let (cnd_src, cnd_sink) = (link.src, link.sink);

        let src_subs: Vec<ObjectId> = sys
            .object(cnd_src)
            .children
            .values()
            .copied()
            .filter(|c| matches!(sys.object(*c).kind, ObjectKind::PortConduitSub(..)))
            .collect();

        for src_sub in src_subs {
            let tag = match &sys.object(src_sub).kind {
                ObjectKind::PortConduitSub(_, role) => role.tag.clone(),
                _ => None,
            };

            let sink_sub = sys.object(cnd_sink).children.values().copied().find(|c| {
                matches!(&sys.object(*c).kind,
                    ObjectKind::PortConduitSub(_, role) if role.tag == tag)
            });

            let Some(sink_sub) = sink_sub else {
                warn!(
                    src = %sys.hier_path(cnd_src),
                    sink = %sys.hier_path(cnd_sink),
                    tag = tag.as_deref().unwrap_or(""),
                    "conduit sink is missing a tagged field"
                );
                continue;
            };

            // Sub-link direction follows the signal, not the conduit.
            let src_dir = {
                let base = sys.object(src_sub).port_core().unwrap().dir;
                if sys.object(cnd_src).parent == Some(sys.root()) {
                    base.flipped()
                } else {
                    base
                }
            };
            if src_dir == Dir::In {
                sys.connect(sink_sub, src_sub, NetType::ConduitSub)?;
            } else {
                sys.connect(src_sub, sink_sub, NetType::ConduitSub)?;
            }
        }
    }
    Ok(())
}

/// Process every domain: automatic ones get the full pipeline inside a
/// snapshot; manual ones keep their user topology untouched.
pub fn process_all_domains(
    sys: &mut System,
    fs: &mut FlowStateOuter,
    opts: &FlowOptions,
    dbs: &PrimDbSet,
) -> Result<()> {
    let (auto, manual): (Vec<u32>, Vec<u32>) = {
        let mut a = Vec::new();
        let mut m = Vec::new();
        for d in fs.domains() {
            if d.is_manual {
                m.push(d.id);
            } else {
                a.push(d.id);
            }
        }
        (a, m)
    };

    for dom_id in auto {
        process_domain(sys, fs, dom_id, opts, dbs, false)?;
    }
    for dom_id in manual {
        // The user supplied the topology; everything downstream of
        // default-topology construction still applies.
        process_domain(sys, fs, dom_id, opts, dbs, true)?;
    }
    Ok(())
}

fn process_domain(
    sys: &mut System,
    fs: &mut FlowStateOuter,
    dom_id: u32,
    opts: &FlowOptions,
    dbs: &PrimDbSet,
    manual: bool,
) -> Result<()> {
    debug!(domain = dom_id, manual, "processing domain");

    let keep_object = |_id: ObjectId, obj: &crate::core::model::Object| {
        obj.rs().map(|r| r.domain_id == Some(dom_id)).unwrap_or(false)
    };
    let keep_link = |link: &Link| match link.id.net {
        NetType::RsLogical => link.domain_id() == Some(dom_id),
        NetType::Topo => [link.src, link.sink].iter().any(|o| {
            sys.object(*o)
                .rs()
                .map(|r| r.domain_id == Some(dom_id))
                .unwrap_or(false)
        }),
        NetType::RsPhys => false,
        _ => true,
    };

    let mut snap = sys.snapshot(&keep_object, &keep_link);

    if !manual {
        let merges = make_crossbar_topo(&mut snap, opts)?;

        let opt_enabled = opts.topo_opt_enabled(sys.name())
            && !opts.force_full_merge
            && !fs.domain(dom_id).map(|d| d.opt_disabled).unwrap_or(false);
        if opt_enabled {
            topo_opt::combine_parallel_merges(&mut snap, fs, &merges)?;
        }
        prune_superfluous(&mut snap);
    }

    route_logical_links(&mut snap)?;
    inner::do_inner(&mut snap, dom_id, fs, opts, dbs)?;

    sys.reintegrate(snap);
    Ok(())
}

/// Write per-network DOT dumps of the compiled system.
pub fn dump_dot(sys: &System) -> Result<()> {
    for net in [
        NetType::RsLogical,
        NetType::Topo,
        NetType::RsPhys,
        NetType::Clock,
        NetType::Reset,
    ] {
        let ng = net_to_graph(sys, net, true);
        let dot = ng.graph.to_dot(
            net.name(),
            &|v| rel_path(sys, ng.v_to_obj[&v]),
            &|e| format!("{:?}", ng.e_to_link[&e]),
        );
        std::fs::write(format!("{}_{}.dot", sys.name(), net.name()), dot)?;
    }
    Ok(())
}

/// Emit a JSON area report over every interconnect node.
pub fn dump_area(sys: &System, dbs: &PrimDbSet, opts: &FlowOptions) -> Result<()> {
    let mut report = serde_json::Map::new();
    for (id, obj) in sys.objects() {
        if !obj.kind.is_node() || id == sys.root() {
            continue;
        }
        if matches!(obj.kind, ObjectKind::Module(_)) {
            continue;
        }
        let metrics = crate::core::nodes::annotate_area(sys, id, dbs, &opts.arch)?;
        report.insert(
            rel_path(sys, id),
            serde_json::json!({
                "lut": metrics.lut,
                "comb": metrics.comb,
                "reg": metrics.reg,
                "mem_alm": metrics.mem_alm,
                "dist_ram": metrics.dist_ram,
            }),
        );
    }
    std::fs::write(
        format!("{}_area.json", sys.name()),
        serde_json::to_string_pretty(&serde_json::Value::Object(report))
            .expect("area report serialization"),
    )?;
    Ok(())
}
