// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The per-domain inner flow.
//!
//! Runs on a domain snapshot after default topology and routing:
//! tree-ification, physical realization of topo links, address
//! converters, protocol carriage, clock assignment and CDC insertion,
//! backpressure, latency solving and realization, resets, and field
//! defaulting. After the initial carriage pass, every protocol and
//! backpressure update is incremental and local to its splice.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::address::{AddressRep, AddressVal, ADDR_ANY};
use crate::core::bits::BitsVal;
use crate::core::error::{Result, SynthError};
use itertools::Itertools;

use crate::core::flow::{
    net_to_graph, outer::rel_path, outer::user_rs_ports, port_pair_width, port_provides_field,
    splice_carrier_protocol, FlowStateOuter,
};
use crate::core::graph::{multi_way_cut, Graph, VertexId};
use crate::core::latency;
use crate::core::model::port::BpStatus;
use crate::core::model::{Dir, LinkId, NetType, ObjectId, ObjectKind, System};
use crate::core::nodes::{self, clockx, conv, mdelay, merge, reg, split};
use crate::core::options::FlowOptions;
use crate::core::primdb::PrimDbSet;
use crate::core::protocol::{FieldId, FieldSet, FieldType};

pub fn do_inner(
    sys: &mut System,
    dom_id: u32,
    fs: &FlowStateOuter,
    opts: &FlowOptions,
    dbs: &PrimDbSet,
) -> Result<()> {
    treeify_merge_nodes(sys, opts)?;
    treeify_split_nodes(sys, opts)?;

    let domain_rep = make_domain_addr_rep(fs, dom_id);

    realize_topo_links(sys, fs, opts)?;
    insert_addr_converters_user(sys, fs, &domain_rep)?;
    insert_addr_converters_split(sys, fs, &domain_rep, opts)?;
    do_protocol_carriage(sys)?;

    connect_clocks(sys)?;
    insert_clockx(sys, dom_id)?;

    do_backpressure(sys)?;

    annotate_timing(sys, dbs)?;
    latency::solve_latency_constraints(sys, dom_id, opts)?;
    lat_systolic_transform(sys, fs)?;
    realize_latencies(sys, dom_id, opts, dbs)?;

    connect_resets(sys)?;
    default_eops(sys);
    default_xmis_ids(sys, fs, &domain_rep)?;

    Ok(())
}

/// Sequential ids for the domain's transmissions: the common exchange
/// currency every converter in the domain translates to or from.
fn make_domain_addr_rep(fs: &FlowStateOuter, dom_id: u32) -> AddressRep {
    let mut rep = AddressRep::new();
    if let Some(dom) = fs.domain(dom_id) {
        for (i, xmis) in dom.transmissions.iter().enumerate() {
            rep.insert(*xmis, i as AddressVal);
        }
    }
    rep
}

/// One-hot (or multi-hot) output masks: OR bit `i` into the address of
/// every transmission whose flows leave through output `i`.
fn make_split_node_rep(sys: &System, fs: &FlowStateOuter, sp: ObjectId) -> AddressRep {
    let mut trans2addr: BTreeMap<u32, AddressVal> = BTreeMap::new();

    let n = split::n_outputs(sys, sp);
    for i in 0..n {
        let port = split::output(sys, sp, i);
        let Some(out_link) = sys
            .object(port)
            .endpoint(NetType::RsPhys, Dir::Out)
            .and_then(|ep| ep.link0())
        else {
            continue;
        };
        for rs_link in sys.relations.parents(out_link, NetType::RsLogical) {
            if let Some(xmis) = fs.transmission_for_link(rs_link) {
                *trans2addr.entry(xmis).or_insert(0) |= 1u64 << i;
            }
        }
    }

    let mut rep = AddressRep::new();
    for (xmis, addr) in trans2addr {
        rep.insert(xmis, addr);
    }
    rep
}

/// The user's own address binning at a source or sink port.
fn make_srcsink_flow_rep(sys: &System, fs: &FlowStateOuter, port: ObjectId) -> AddressRep {
    let mut rep = AddressRep::new();
    let dir = sys.effective_dir(port);
    let links: Vec<LinkId> = sys
        .object(port)
        .endpoint(NetType::RsLogical, dir)
        .map(|ep| ep.links().to_vec())
        .unwrap_or_default();

    for link in links {
        let Some(xmis) = fs.transmission_for_link(link) else {
            continue;
        };
        if let crate::core::model::LinkKind::RsLogical {
            src_addr,
            sink_addr,
            ..
        } = &sys.link(link).unwrap().kind
        {
            let addr = match dir {
                Dir::Out => *src_addr,
                Dir::In => *sink_addr,
            };
            rep.insert(xmis, addr);
        }
    }
    rep
}

//
// Tree-ification
//

fn collect_nodes(sys: &System, pred: fn(&ObjectKind) -> bool) -> Vec<ObjectId> {
    sys.objects()
        .filter(|(_, o)| pred(&o.kind))
        .map(|(id, _)| id)
        .collect()
}

fn treeify_merge_nodes(sys: &mut System, opts: &FlowOptions) -> Result<()> {
    if opts.no_merge_tree {
        return Ok(());
    }

    for orig_mg in collect_nodes(sys, |k| matches!(k, ObjectKind::Merge(..))) {
        let orig_name = sys.object(orig_mg).name.clone();
        let mut cur_inputs: Vec<LinkId> = sys
            .object(orig_mg)
            .endpoint(NetType::Topo, Dir::In)
            .map(|ep| ep.links().to_vec())
            .unwrap_or_default();
        if cur_inputs.len() <= merge::MAX_INPUTS {
            continue;
        }

        let mut lvl = 0;
        while cur_inputs.len() > merge::MAX_INPUTS {
            let mut cur_outputs = Vec::new();
            let n_merges = cur_inputs.len().div_ceil(merge::MAX_INPUTS);

            for new_mg_i in 0..n_merges {
                // A fair share of whatever is left at this level.
                let share = cur_inputs.len() / (n_merges - new_mg_i);
                let this_inputs: Vec<LinkId> =
                    cur_inputs.split_off(cur_inputs.len() - share);

                let mg = merge::create(sys, &format!("{orig_name}_tree{lvl}_{new_mg_i}"))?;
                for input in &this_inputs {
                    sys.reconnect_sink(*input, mg)?;
                }

                // Output feeds the original merge until a later level
                // claims it.
                let out = sys.connect(mg, orig_mg, NetType::Topo)?;
                for input in &this_inputs {
                    for log in sys.relations.parents(*input, NetType::RsLogical) {
                        sys.relations.add(log, out);
                    }
                }
                cur_outputs.push(out);
            }

            cur_inputs = cur_outputs;
            lvl += 1;
        }
    }
    Ok(())
}

fn treeify_split_nodes(sys: &mut System, opts: &FlowOptions) -> Result<()> {
    if !opts.split_tree {
        return Ok(());
    }

    for orig_sp in collect_nodes(sys, |k| matches!(k, ObjectKind::Split(..))) {
        let orig_name = sys.object(orig_sp).name.clone();
        let mut cur_outputs: Vec<LinkId> = sys
            .object(orig_sp)
            .endpoint(NetType::Topo, Dir::Out)
            .map(|ep| ep.links().to_vec())
            .unwrap_or_default();
        if cur_outputs.len() <= split::MAX_OUTPUTS {
            continue;
        }

        let mut lvl = 0;
        while cur_outputs.len() > split::MAX_OUTPUTS {
            let mut cur_inputs = Vec::new();
            let n_splits = cur_outputs.len().div_ceil(split::MAX_OUTPUTS);

            for new_sp_i in 0..n_splits {
                let share = cur_outputs.len() / (n_splits - new_sp_i);
                let this_outputs: Vec<LinkId> =
                    cur_outputs.split_off(cur_outputs.len() - share);

                let sp = split::create(sys, &format!("{orig_name}_tree{lvl}_{new_sp_i}"))?;
                for output in &this_outputs {
                    sys.reconnect_src(*output, sp)?;
                }

                let inp = sys.connect(orig_sp, sp, NetType::Topo)?;
                for output in &this_outputs {
                    for log in sys.relations.parents(*output, NetType::RsLogical) {
                        sys.relations.add(log, inp);
                    }
                }
                cur_inputs.push(inp);
            }

            cur_outputs = cur_inputs;
            lvl += 1;
        }
    }
    Ok(())
}

//
// Physical realization
//

fn check_merge_node_exclusivity(sys: &mut System, fs: &FlowStateOuter, mg: ObjectId) {
    let tlinks: Vec<LinkId> = sys
        .object(mg)
        .endpoint(NetType::Topo, Dir::In)
        .map(|ep| ep.links().to_vec())
        .unwrap_or_default();

    let mut exclusive = true;
    'check: for (topo1, topo2) in tlinks.iter().tuple_combinations() {
        let logicals1 = sys.relations.parents(*topo1, NetType::RsLogical);
        let logicals2 = sys.relations.parents(*topo2, NetType::RsLogical);
        for (l1, l2) in logicals1.iter().cartesian_product(logicals2.iter()) {
            let (Some(x1), Some(x2)) = (
                fs.transmission_for_link(*l1),
                fs.transmission_for_link(*l2),
            ) else {
                exclusive = false;
                break 'check;
            };
            if !fs.are_transmissions_exclusive(x1, x2) {
                exclusive = false;
                break 'check;
            }
        }
    }

    merge::set_exclusive(sys, mg, exclusive);
}

/// Realize every topo link into a physical RS link between the
/// appropriate ports of its endpoints, recording containment.
fn realize_topo_links(sys: &mut System, fs: &FlowStateOuter, opts: &FlowOptions) -> Result<()> {
    for sp in collect_nodes(sys, |k| matches!(k, ObjectKind::Split(..))) {
        split::create_ports(sys, sp)?;
    }
    for mg in collect_nodes(sys, |k| matches!(k, ObjectKind::Merge(..))) {
        if !opts.force_full_merge {
            check_merge_node_exclusivity(sys, fs, mg);
        }
        merge::create_ports(sys, mg)?;
    }

    for topo_link in sys.links_of(NetType::Topo) {
        let (topo_src, topo_sink) = {
            let l = sys.link(topo_link).unwrap();
            (l.src, l.sink)
        };

        let rs_src = match &sys.object(topo_src).kind {
            ObjectKind::Split(..) => {
                let n = split::n_outputs(sys, topo_src);
                (0..n)
                    .map(|i| split::output(sys, topo_src, i))
                    .find(|p| {
                        sys.object(*p)
                            .endpoint(NetType::RsPhys, Dir::Out)
                            .map(|ep| !ep.is_connected())
                            .unwrap_or(true)
                    })
                    .ok_or_else(|| {
                        SynthError::synth(sys.hier_path(topo_src), "split has no free output")
                    })?
            }
            ObjectKind::Merge(..) => merge::output(sys, topo_src),
            ObjectKind::PortRs(..) => topo_src,
            _ => {
                return Err(SynthError::synth(
                    sys.hier_path(topo_src),
                    "not a valid topo source",
                ))
            }
        };

        let rs_sink = match &sys.object(topo_sink).kind {
            ObjectKind::Split(..) => split::input(sys, topo_sink),
            ObjectKind::Merge(..) => {
                let n = merge::n_inputs(sys, topo_sink);
                (0..n)
                    .map(|i| merge::input(sys, topo_sink, i))
                    .find(|p| {
                        sys.object(*p)
                            .endpoint(NetType::RsPhys, Dir::In)
                            .map(|ep| !ep.is_connected())
                            .unwrap_or(true)
                    })
                    .ok_or_else(|| {
                        SynthError::synth(sys.hier_path(topo_sink), "merge has no free input")
                    })?
            }
            ObjectKind::PortRs(..) => topo_sink,
            _ => {
                return Err(SynthError::synth(
                    sys.hier_path(topo_sink),
                    "not a valid topo sink",
                ))
            }
        };

        let phys = sys.connect(rs_src, rs_sink, NetType::RsPhys)?;
        sys.relations.add(topo_link, phys);
    }
    Ok(())
}

//
// Address converters
//

fn insert_addr_converters_user(
    sys: &mut System,
    fs: &FlowStateOuter,
    domain_rep: &AddressRep,
) -> Result<()> {
    let useraddr = FieldId::new(FieldType::UserAddr);

    for user_port in user_rs_ports(sys) {
        let dir = sys.effective_dir(user_port);
        let Some(rs_link) = sys
            .object(user_port)
            .endpoint(NetType::RsPhys, dir)
            .and_then(|ep| ep.link0())
        else {
            continue;
        };

        if !sys
            .object(user_port)
            .rs()
            .unwrap()
            .proto
            .has_terminal_field(&useraddr)
        {
            continue;
        }

        let user_rep = make_srcsink_flow_rep(sys, fs, user_port);
        if user_rep.n_addr_bins() == 1 {
            // One bin: its value rides as a constant; no converter.
            let (mut addr, _) = user_rep.addr_bins().next().unwrap();
            let addr_bits = user_rep.size_in_bits().max(1);

            if addr == ADDR_ANY {
                // An address signal with no bound transmissions: the user
                // does not care, so neither do we.
                warn!(
                    port = %sys.hier_path(user_port),
                    "has address signal but no bound transmissions"
                );
                addr = 0;
            }

            if dir == Dir::In {
                sys.object_mut(user_port)
                    .rs_mut()
                    .unwrap()
                    .proto
                    .set_const(&useraddr, BitsVal::from_u64(addr, addr_bits));
            }
            continue;
        } else if user_rep.has_addr(ADDR_ANY) {
            return Err(SynthError::synth(
                sys.hier_path(user_port),
                "not all transmissions are bound to an address",
            ));
        }

        let conv_name = format!("conv_{}", rel_path(sys, user_port).replace('.', "_"));
        let cv = conv::create(sys, &conv_name)?;
        sys.splice(rs_link, conv::input(sys, cv), conv::output(sys, cv))?;

        let to_user = dir == Dir::In;
        let xmis_id = FieldId::new(FieldType::XmisId);
        if to_user {
            conv::configure(sys, cv, domain_rep, xmis_id, &user_rep, useraddr.clone());
        } else {
            conv::configure(sys, cv, &user_rep, useraddr.clone(), domain_rep, xmis_id);
        }
    }
    Ok(())
}

fn insert_addr_converters_split(
    sys: &mut System,
    fs: &FlowStateOuter,
    domain_rep: &AddressRep,
    opts: &FlowOptions,
) -> Result<()> {
    for sp in collect_nodes(sys, |k| matches!(k, ObjectKind::Split(..))) {
        let sp_rep = make_split_node_rep(sys, fs, sp);

        if opts.split_unicast {
            if let ObjectKind::Split(_, data) = &mut sys.object_mut(sp).kind {
                data.unicast = sp_rep.is_pure_unicast();
            }
        }

        if sp_rep.n_addr_bins() == 1 {
            // Always the same outputs: tie the mask off.
            let (addr, _) = sp_rep.addr_bins().next().unwrap();
            let n_bits = split::n_outputs(sys, sp);
            let input = split::input(sys, sp);
            sys.object_mut(input)
                .rs_mut()
                .unwrap()
                .proto
                .set_const(&FieldId::new(FieldType::SplitMask), BitsVal::from_u64(addr, n_bits));
        } else {
            let conv_name = format!("conv_{}", rel_path(sys, sp).replace('.', "_"));
            let cv = conv::create(sys, &conv_name)?;

            let input = split::input(sys, sp);
            let sp_link = sys
                .object(input)
                .endpoint(NetType::RsPhys, Dir::In)
                .and_then(|ep| ep.link0())
                .ok_or_else(|| {
                    SynthError::synth(sys.hier_path(sp), "split input is not driven")
                })?;
            sys.splice(sp_link, conv::input(sys, cv), conv::output(sys, cv))?;

            conv::configure(
                sys,
                cv,
                domain_rep,
                FieldId::new(FieldType::XmisId),
                &sp_rep,
                FieldId::new(FieldType::SplitMask),
            );
        }
    }
    Ok(())
}

//
// Protocol carriage
//

/// Walk every end-to-end logical link sink→source, accumulating the
/// fields each hop's sink consumes but its source does not supply, and
/// depositing them into intermediate carriers.
fn do_protocol_carriage(sys: &mut System) -> Result<()> {
    for e2e in sys.links_of(NetType::RsLogical) {
        let (e2e_src, e2e_sink) = {
            let l = sys.link(e2e).unwrap();
            (l.src, l.sink)
        };

        let mut carriage_set = FieldSet::new();
        let mut cur_sink = e2e_sink;

        loop {
            let ext_link = sys
                .object(cur_sink)
                .endpoint(NetType::RsPhys, Dir::In)
                .and_then(|ep| ep.link0())
                .ok_or_else(|| {
                    SynthError::synth(sys.hier_path(cur_sink), "transmission chain is broken")
                })?;
            let cur_src = sys.link(ext_link).unwrap().src;

            if cur_src == e2e_src {
                break;
            }

            let sink_needs = sys
                .object(cur_sink)
                .rs()
                .unwrap()
                .proto
                .terminal_fields_nonconst();
            carriage_set.add_set(&sink_needs);
            carriage_set.subtract(sys.object(cur_src).rs().unwrap().proto.terminal_fields());

            let node = sys.object(cur_src).parent.unwrap();
            if sys.object(node).carrier().is_some() {
                let set = carriage_set.clone();
                sys.object_mut(node).carrier_mut().unwrap().add_set(&set);
            } else {
                carriage_set.clear();
            }

            // Traverse backwards through the node to the input port that
            // feeds this transmission.
            let internal: Vec<LinkId> = sys
                .object(cur_src)
                .endpoint(NetType::RsPhys, Dir::In)
                .map(|ep| ep.links().to_vec())
                .unwrap_or_default();
            let mut next_sink = None;
            for int_link in internal {
                let cand_sink = sys.link(int_link).unwrap().src;
                let Some(cand_feeder) = sys
                    .object(cand_sink)
                    .endpoint(NetType::RsPhys, Dir::In)
                    .and_then(|ep| ep.link0())
                else {
                    continue;
                };
                if sys.relations.is_contained_in(e2e, cand_feeder) {
                    next_sink = Some(cand_sink);
                    break;
                }
            }

            cur_sink = next_sink.ok_or_else(|| {
                SynthError::synth(
                    sys.hier_path(cur_src),
                    "carriage traversal lost the transmission",
                )
            })?;
        }
    }
    Ok(())
}

//
// Clocking
//

/// Assign clock domains by multiway cut: terminals are driven clock
/// sources, free vertices are undriven clock sinks, edge weights are the
/// transmitted bit widths (plus one, so zero-width links still count).
fn connect_clocks(sys: &mut System) -> Result<()> {
    let mut g = Graph::new();
    let mut terminals: Vec<VertexId> = Vec::new();
    let mut weights = BTreeMap::new();

    let mut sink_to_v: BTreeMap<ObjectId, VertexId> = BTreeMap::new();
    let mut src_to_v: BTreeMap<ObjectId, VertexId> = BTreeMap::new();
    let mut v_to_src: BTreeMap<VertexId, ObjectId> = BTreeMap::new();

    for phys in sys.links_of(NetType::RsPhys) {
        let (port_a, port_b) = {
            let l = sys.link(phys).unwrap();
            (l.src, l.sink)
        };

        let csink_a = sys.clock_port_of_rs(port_a)?;
        let csink_b = sys.clock_port_of_rs(port_b)?;
        if csink_a == csink_b {
            continue;
        }

        let mut vert_for = |sys: &System, csink: ObjectId| -> VertexId {
            match sys.clock_driver(csink) {
                Some(csrc) => *src_to_v.entry(csrc).or_insert_with(|| {
                    let v = g.new_vert();
                    v_to_src.insert(v, csrc);
                    terminals.push(v);
                    v
                }),
                None => *sink_to_v.entry(csink).or_insert_with(|| g.new_vert()),
            }
        };

        let v_a = vert_for(sys, csink_a);
        let v_b = vert_for(sys, csink_b);
        if v_a == v_b {
            continue;
        }

        let weight = port_pair_width(sys, port_a, port_b) as i64 + 1;
        let e = g.new_edge(v_a, v_b);
        weights.insert(e, weight);
    }

    if sink_to_v.is_empty() {
        return Ok(());
    }
    if terminals.is_empty() {
        return Err(SynthError::synth(
            sys.hier_path(sys.root()),
            "interconnect needs a clock but the system drives none",
        ));
    }

    let assignment = multi_way_cut(&g, &weights, &terminals);

    for (csink, v) in sink_to_v {
        let v_term = assignment[&v];
        let csrc = v_to_src[&v_term];
        sys.connect(csrc, csink, NetType::Clock)?;
    }
    Ok(())
}

/// Splice a dual-clock FIFO into every physical link whose endpoints'
/// clock drivers differ.
fn insert_clockx(sys: &mut System, dom_id: u32) -> Result<()> {
    let mut nodenum = 0;
    for orig_link in sys.links_of(NetType::RsPhys) {
        let (port_a, port_b) = {
            let l = sys.link(orig_link).unwrap();
            (l.src, l.sink)
        };

        let csrc_a = sys.clock_driver(sys.clock_port_of_rs(port_a)?);
        let csrc_b = sys.clock_driver(sys.clock_port_of_rs(port_b)?);
        let (Some(csrc_a), Some(csrc_b)) = (csrc_a, csrc_b) else {
            return Err(SynthError::synth(
                sys.hier_path(port_a),
                "clock sink is undriven after clock assignment",
            ));
        };
        if csrc_a == csrc_b {
            continue;
        }

        let cx = clockx::create(sys, &format!("clockx{dom_id}_{nodenum}"))?;
        nodenum += 1;

        sys.connect(csrc_a, clockx::inclock(sys, cx), NetType::Clock)?;
        sys.connect(csrc_b, clockx::outclock(sys, cx), NetType::Clock)?;

        sys.splice(orig_link, clockx::indata(sys, cx), clockx::outdata(sys, cx))?;
        splice_carrier_protocol(sys, port_a, port_b, cx);
    }
    Ok(())
}

//
// Backpressure
//

/// Reverse-topological propagation of backpressure decisions. Terminal
/// sinks and fixed ports seed the walk; configurable ports default to
/// DISABLED and get upgraded when anything downstream demands ENABLED.
fn do_backpressure(sys: &mut System) -> Result<()> {
    let ng = net_to_graph(sys, NetType::RsPhys, true);

    let mut to_visit: Vec<VertexId> = ng
        .graph
        .verts()
        .filter(|v| {
            let port = ng.v_to_obj[v];
            let is_terminal = ng.graph.dir_neigh(*v).is_empty();
            let bp_known = !sys.object(port).rs().unwrap().bp.configurable;
            is_terminal || bp_known
        })
        .collect();

    while let Some(cur_v) = to_visit.pop() {
        let cur_port = ng.v_to_obj[&cur_v];

        {
            let bp = &mut sys.object_mut(cur_port).rs_mut().unwrap().bp;
            if bp.configurable && bp.status == BpStatus::Unset {
                // Given the choice, prefer no backpressure.
                bp.status = BpStatus::Disabled;
            }
        }
        let cur_bp = sys.object(cur_port).rs().unwrap().bp;

        for next_v in ng.graph.dir_neigh_r(cur_v) {
            let next_port = ng.v_to_obj[&next_v];
            let next_bp = sys.object(next_port).rs().unwrap().bp;

            if next_bp.configurable {
                if next_bp.status == BpStatus::Unset
                    || (next_bp.status == BpStatus::Disabled && cur_bp.status == BpStatus::Enabled)
                {
                    sys.object_mut(next_port).rs_mut().unwrap().bp.status = cur_bp.status;
                    to_visit.push(next_v);
                }
            } else {
                // Fixed feeder: traversing an internal link relaxes the
                // rule, since the node bridges the two settings itself.
                let is_internal = {
                    let cur_dir = sys.object(cur_port).port_core().unwrap().dir;
                    let next_dir = sys.object(next_port).port_core().unwrap().dir;
                    cur_dir == Dir::Out && next_dir == Dir::In
                };
                if !is_internal
                    && next_bp.status == BpStatus::Disabled
                    && cur_bp.status == BpStatus::Enabled
                {
                    return Err(SynthError::general(format!(
                        "incompatible backpressure: {} provides but {} does not consume",
                        sys.hier_path(cur_port),
                        sys.hier_path(next_port)
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Incremental backpressure update across a fresh splice: propagate the
/// downstream decision through the two new ports.
fn splice_backpressure(
    sys: &mut System,
    orig_src: ObjectId,
    new_sink: ObjectId,
    new_src: ObjectId,
    orig_sink: ObjectId,
) {
    let mut cur_status = sys.object(orig_sink).rs().unwrap().bp.status;
    debug_assert!(cur_status != BpStatus::Unset);

    for port in [new_src, new_sink] {
        let bp = sys.object(port).rs().unwrap().bp;
        if bp.configurable {
            if matches!(bp.status, BpStatus::Disabled | BpStatus::Unset) {
                sys.object_mut(port).rs_mut().unwrap().bp.status = cur_status;
            } else {
                cur_status = BpStatus::Enabled;
            }
        } else if cur_status == BpStatus::Disabled && bp.status == BpStatus::Enabled {
            cur_status = BpStatus::Enabled;
        }
    }

    let src_bp = sys.object(orig_src).rs().unwrap().bp;
    debug_assert!(
        !(src_bp.status == BpStatus::Disabled && cur_status == BpStatus::Enabled),
        "splice introduced a backpressure mismatch"
    );
}

//
// Timing and latency
//

fn annotate_timing(sys: &mut System, dbs: &PrimDbSet) -> Result<()> {
    for node in sys
        .objects()
        .filter(|(id, o)| o.kind.is_node() && *id != sys.root())
        .map(|(id, _)| id)
        .collect::<Vec<_>>()
    {
        nodes::annotate_timing(sys, node, dbs)?;
    }
    Ok(())
}

/// Decompose pure-broadcast splits with heterogeneous fanout latencies
/// into a chain of splits whose inter-split links carry the latency
/// differences, saving registered width.
fn lat_systolic_transform(sys: &mut System, _fs: &FlowStateOuter) -> Result<()> {
    for orig_sp in collect_nodes(sys, |k| matches!(k, ObjectKind::Split(..))) {
        // Bin the fanout by realized latency, ascending.
        let mut lat_bins: BTreeMap<u32, Vec<(LinkId, LinkId)>> = BTreeMap::new();
        let n = split::n_outputs(sys, orig_sp);
        if n == 0 {
            continue;
        }

        let mut incomplete = false;
        for i in 0..n {
            let out_port = split::output(sys, orig_sp, i);
            let Some(phys) = sys
                .object(out_port)
                .endpoint(NetType::RsPhys, Dir::Out)
                .and_then(|ep| ep.link0())
            else {
                incomplete = true;
                break;
            };
            let Some(topo) = sys
                .relations
                .immediate_parents(phys)
                .into_iter()
                .find(|l| l.net == NetType::Topo)
            else {
                incomplete = true;
                break;
            };
            let lat = sys.link(phys).unwrap().latency();
            lat_bins.entry(lat).or_default().push((topo, phys));
        }
        if incomplete || lat_bins.len() < 2 {
            continue;
        }

        // Only pure broadcast for now: a constant mask means no converter
        // has to be rebuilt along the chain.
        let input = split::input(sys, orig_sp);
        if sys
            .object(input)
            .rs()
            .unwrap()
            .proto
            .get_const(&FieldId::new(FieldType::SplitMask))
            .is_none()
        {
            continue;
        }

        debug!(split = %sys.hier_path(orig_sp), "systolic split transform");

        let orig_name = sys.object(orig_sp).name.clone();
        let in_topo = sys
            .object(orig_sp)
            .endpoint(NetType::Topo, Dir::In)
            .and_then(|ep| ep.link0())
            .expect("split with no topo input");
        let in_phys = sys
            .object(input)
            .endpoint(NetType::RsPhys, Dir::In)
            .and_then(|ep| ep.link0())
            .expect("split with no phys input");
        let orig_phys_src = sys.link(in_phys).unwrap().src;
        let clock_driver = sys
            .clock_driver(split::clock_port(sys, orig_sp))
            .expect("split clock is undriven");

        let bins: Vec<(u32, Vec<(LinkId, LinkId)>)> = lat_bins.into_iter().collect();
        let n_bins = bins.len();
        let combine_last = bins[n_bins - 1].1.len() == 1;
        let n_chain = if combine_last { n_bins - 1 } else { n_bins };

        // Build the topo chain.
        let mut chain_splits = Vec::new();
        for k in 0..n_chain {
            let cur_lat = bins[k].0;
            let sp = split::create(sys, &format!("{orig_name}_systol{cur_lat}"))?;
            sys.connect(clock_driver, split::clock_port(sys, sp), NetType::Clock)?;

            if k == 0 {
                sys.reconnect_sink(in_topo, sp)?;
                sys.reconnect_sink(in_phys, split::input(sys, sp))?;
                // The head of the chain absorbs the smallest latency.
                let new_lat = sys.link(in_phys).unwrap().latency() + cur_lat;
                sys.link_mut(in_phys).unwrap().set_latency(new_lat);
            } else {
                let chain_topo = sys.connect(chain_splits[k - 1], sp, NetType::Topo)?;
                // Everything egressing at or beyond this split rides the
                // chain link.
                for (_, bin) in bins.iter().skip(k) {
                    for (t, _) in bin {
                        for log in sys.relations.parents(*t, NetType::RsLogical) {
                            sys.relations.add(log, chain_topo);
                        }
                    }
                }
            }
            chain_splits.push(sp);
        }

        // Attach egress topo links and set egress latencies.
        for (k, (cur_lat, bin)) in bins.iter().enumerate() {
            let host = chain_splits[k.min(n_chain - 1)];
            let egress_lat = if combine_last && k == n_bins - 1 {
                cur_lat - bins[n_bins - 2].0
            } else {
                0
            };
            for (topo, phys) in bin {
                sys.reconnect_src(*topo, host)?;
                sys.link_mut(*phys).unwrap().set_latency(egress_lat);
            }
        }

        // The physical link each egress topo was realized by.
        let egress_phys: BTreeMap<LinkId, LinkId> = bins
            .iter()
            .flat_map(|(_, bin)| bin.iter().copied())
            .collect();

        // Ports exist only now that topo degrees are final. Work from the
        // end of the chain so downstream protocol state is settled before
        // upstream carriers are computed.
        for k in (0..n_chain).rev() {
            let sp = chain_splits[k];
            split::create_ports(sys, sp)?;
            let n_out = split::n_outputs(sys, sp);
            let mask = if n_out >= 64 {
                u64::MAX
            } else {
                (1u64 << n_out) - 1
            };
            let sp_in = split::input(sys, sp);
            sys.object_mut(sp_in)
                .rs_mut()
                .unwrap()
                .proto
                .set_const(&FieldId::new(FieldType::SplitMask), BitsVal::from_u64(mask, n_out));
        }

        for k in (0..n_chain).rev() {
            let sp = chain_splits[k];
            let topo_outs: Vec<LinkId> = sys
                .object(sp)
                .endpoint(NetType::Topo, Dir::Out)
                .map(|ep| ep.links().to_vec())
                .unwrap_or_default();

            for (idx, topo_out) in topo_outs.iter().enumerate() {
                let out_port = split::output(sys, sp, idx as u32);
                let topo_sink = sys.link(*topo_out).unwrap().sink;

                let phys = if k + 1 < n_chain && topo_sink == chain_splits[k + 1] {
                    // Chain hop: a fresh phys link carrying the latency
                    // difference.
                    let next_in = split::input(sys, chain_splits[k + 1]);
                    let p = sys.connect(out_port, next_in, NetType::RsPhys)?;
                    let diff = bins[k + 1].0 - bins[k].0;
                    sys.link_mut(p).unwrap().set_latency(diff);
                    sys.relations.add(*topo_out, p);
                    p
                } else {
                    // Egress: re-home the phys link this topo was
                    // realized by.
                    let p = egress_phys[topo_out];
                    sys.reconnect_src(p, out_port)?;
                    p
                };

                let phys_sink = sys.link(phys).unwrap().sink;
                splice_carrier_protocol(sys, orig_phys_src, phys_sink, sp);
                splice_backpressure(sys, orig_phys_src, split::input(sys, sp), out_port, phys_sink);
            }
        }

        sys.remove_object(orig_sp);
    }
    Ok(())
}

/// Materialize nonzero link latencies into register chains or memory
/// delays, then zero the link.
fn realize_latencies(
    sys: &mut System,
    dom_id: u32,
    opts: &FlowOptions,
    dbs: &PrimDbSet,
) -> Result<()> {
    let links_to_process: Vec<LinkId> = sys
        .links_of(NetType::RsPhys)
        .into_iter()
        .filter(|l| sys.link(*l).unwrap().latency() > 0)
        .collect();

    let mut pipe_no = 0;
    for orig_link in links_to_process {
        let (orig_src, orig_sink) = {
            let l = sys.link(orig_link).unwrap();
            (l.src, l.sink)
        };
        let latency = sys.link(orig_link).unwrap().latency();

        let clock_driver = sys
            .clock_driver(sys.clock_port_of_rs(orig_src)?)
            .ok_or_else(|| {
                SynthError::synth(sys.hier_path(orig_src), "latency on an unclocked link")
            })?;

        let width = crate::core::flow::link_width(sys, orig_link);
        let bp = sys.object(orig_sink).rs().unwrap().bp.status == BpStatus::Enabled;

        let reg_cost = reg::estimate_area(dbs, width, bp)? * (latency as i64);
        let mem_cost = mdelay::estimate_area(dbs, width, latency, bp, &opts.arch)?;

        let use_mdelay = !opts.no_mdelay
            && latency > 1
            && mem_cost.mem_alm < reg_cost.reg / (opts.arch.regs_per_alm as i64);

        if use_mdelay {
            let md = mdelay::create(sys, &format!("pipe{dom_id}_{pipe_no}"))?;
            mdelay::set_delay(sys, md, latency);

            sys.splice(orig_link, mdelay::input(sys, md), mdelay::output(sys, md))?;
            sys.connect(clock_driver, mdelay::clock_port(sys, md), NetType::Clock)?;
            splice_carrier_protocol(sys, orig_src, orig_sink, md);
            splice_backpressure(
                sys,
                orig_src,
                mdelay::input(sys, md),
                mdelay::output(sys, md),
                orig_sink,
            );
        } else {
            let mut cur_link = orig_link;
            for i in 0..latency {
                let rg = reg::create(sys, &format!("pipe{dom_id}_{pipe_no}_{i}"))?;

                let (link_src, link_sink) = {
                    let l = sys.link(cur_link).unwrap();
                    (l.src, l.sink)
                };

                cur_link = sys.splice(cur_link, reg::input(sys, rg), reg::output(sys, rg))?;

                sys.connect(clock_driver, reg::clock_port(sys, rg), NetType::Clock)?;
                splice_carrier_protocol(sys, link_src, link_sink, rg);
                splice_backpressure(
                    sys,
                    link_src,
                    reg::input(sys, rg),
                    reg::output(sys, rg),
                    link_sink,
                );
            }
        }

        sys.link_mut(orig_link).unwrap().set_latency(0);
        pipe_no += 1;
    }
    Ok(())
}

//
// Resets and field defaults
//

/// Connect every dangling reset sink to a system reset source.
fn connect_resets(sys: &mut System) -> Result<()> {
    let mut sinks_needing = Vec::new();
    for (id, obj) in sys.objects() {
        if !matches!(obj.kind, ObjectKind::PortReset(_)) {
            continue;
        }
        if obj.parent == Some(sys.root()) {
            continue;
        }
        if obj.port_core().unwrap().dir != Dir::In {
            continue;
        }
        let connected = obj
            .endpoint(NetType::Reset, Dir::In)
            .map(|ep| ep.is_connected())
            .unwrap_or(false);
        if !connected {
            sinks_needing.push(id);
        }
    }

    if sinks_needing.is_empty() {
        return Ok(());
    }

    // Any system-boundary reset source will do.
    let reset_src = sys
        .object(sys.root())
        .children
        .values()
        .copied()
        .find(|c| {
            matches!(sys.object(*c).kind, ObjectKind::PortReset(_))
                && sys.object(*c).port_core().unwrap().dir == Dir::In
        })
        .ok_or_else(|| {
            SynthError::synth(sys.hier_path(sys.root()), "needs at least one reset port")
        })?;

    for sink in sinks_needing {
        sys.connect(reset_src, sink, NetType::Reset)?;
    }
    Ok(())
}

/// Whether a sink port consumes a field: at its own HDL boundary, or
/// into the carrier region of the node behind it.
fn port_consumes_field(sys: &System, sink: ObjectId, field: &FieldId) -> bool {
    if sys
        .object(sink)
        .rs()
        .unwrap()
        .proto
        .has_terminal_field(field)
    {
        return true;
    }
    crate::core::flow::carrier_of_port(sys, sink)
        .map(|c| c.has(field))
        .unwrap_or(false)
}

/// Sinks that expect an EOP nobody drives receive a constant 1:
/// single-beat packets.
fn default_eops(sys: &mut System) {
    let eop = FieldId::new(FieldType::Eop);
    for link in sys.links_of(NetType::RsPhys) {
        let (src, sink) = {
            let l = sys.link(link).unwrap();
            (l.src, l.sink)
        };
        if port_consumes_field(sys, sink, &eop)
            && sys.object(sink).rs().unwrap().proto.get_const(&eop).is_none()
            && !port_provides_field(sys, src, &eop)
        {
            sys.object_mut(sink)
                .rs_mut()
                .unwrap()
                .proto
                .set_const(&eop, BitsVal::from_u64(1, 1));
        }
    }
}

/// Sinks that expect a transmission id nobody drives: exactly one
/// transmission passes through the link, so its domain-rep address rides
/// as a constant.
fn default_xmis_ids(sys: &mut System, fs: &FlowStateOuter, domain_rep: &AddressRep) -> Result<()> {
    let xmis_field = FieldId::new(FieldType::XmisId);
    for link in sys.links_of(NetType::RsPhys) {
        let (src, sink) = {
            let l = sys.link(link).unwrap();
            (l.src, l.sink)
        };
        if !port_consumes_field(sys, sink, &xmis_field)
            || sys
                .object(sink)
                .rs()
                .unwrap()
                .proto
                .get_const(&xmis_field)
                .is_some()
            || port_provides_field(sys, src, &xmis_field)
        {
            continue;
        }

        let mut xmis = None;
        for log in sys.relations.parents(link, NetType::RsLogical) {
            let this = fs.transmission_for_link(log);
            match (xmis, this) {
                (None, Some(t)) => xmis = Some(t),
                (Some(prev), Some(t)) if prev != t => {
                    return Err(SynthError::synth(
                        sys.hier_path(sink),
                        "link carries several transmissions but no id field",
                    ));
                }
                _ => {}
            }
        }
        let Some(xmis) = xmis else {
            continue;
        };
        let addr = domain_rep.addr_for_xmis(xmis).ok_or_else(|| {
            SynthError::synth(sys.hier_path(sink), "transmission missing from domain rep")
        })?;

        let width = sys
            .object(sink)
            .rs()
            .unwrap()
            .proto
            .get_terminal_field(&xmis_field)
            .map(|f| f.width)
            .or_else(|| {
                crate::core::flow::carrier_of_port(sys, sink)
                    .and_then(|c| c.get_field(&xmis_field))
                    .map(|f| f.width)
            })
            .unwrap_or(1)
            .max(1);
        sys.object_mut(sink)
            .rs_mut()
            .unwrap()
            .proto
            .set_const(&xmis_field, BitsVal::from_u64(addr, width.min(64)));
    }
    Ok(())
}
