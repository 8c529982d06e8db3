// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Split node: one RS input fanned out to `n` RS outputs.
//!
//! The input carries a SPLITMASK field whose bit `i` routes the beat to
//! output `i`; multiple set bits broadcast. The output count is fixed by
//! `create_ports` from the number of incoming topo links.

use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{Dir, NetType, NodeCore, ObjectId, ObjectKind, SplitData, System};
use crate::core::primdb::{AreaMetrics, PrimDbSet};
use crate::core::protocol::{Field, FieldId, FieldType};

pub const MODNAME: &str = "weft_split";
pub const INPORT: &str = "in";
pub const CLOCKPORT: &str = "clock";
pub const RESETPORT: &str = "reset";

/// Largest fan-out before tree-ification decomposes a split.
pub const MAX_OUTPUTS: usize = 18;

pub fn create(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = NodeCore::new(MODNAME).with_carrier();
    {
        let hdl = &mut core.hdl;
        hdl.add_port("clk", 1, 1, Dir::In);
        hdl.add_port("reset", 1, 1, Dir::In);
        hdl.add_port("i_data", "WO", 1, Dir::In);
        hdl.add_port("i_flow", "WF", 1, Dir::In);
        hdl.add_port("i_valid", 1, 1, Dir::In);
        hdl.add_port("o_ready", 1, 1, Dir::Out);
        hdl.add_port("o_valid", "NO", 1, Dir::Out);
        hdl.add_port("o_data", "WO", 1, Dir::Out);
        hdl.add_port("i_ready", "NO", 1, Dir::In);
    }

    let node = sys.add_object(
        sys.root(),
        name,
        ObjectKind::Split(core, SplitData::default()),
    )?;

    super::add_clock_port(sys, node, CLOCKPORT, "clk")?;
    super::add_reset_port(sys, node, RESETPORT, "reset")?;

    let inport = super::add_rs_port(sys, node, INPORT, Dir::In, CLOCKPORT)?;
    {
        let obj = sys.object_mut(inport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("i_data", "WO"),
        );
        core.add_binding(
            SigRole::tagged(RoleKind::DataBundle, "flow_id"),
            HdlBinding::full("i_flow", "WF"),
        );
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("o_ready"));
        obj.rs_mut().unwrap().bp.make_configurable();
    }

    // Topo links attach to the node itself.
    sys.object_mut(node).make_connectable(NetType::Topo);

    Ok(node)
}

/// Create the output ports (one per incoming topo fan-out) and the
/// internal input→output links.
pub fn create_ports(sys: &mut System, node: ObjectId) -> Result<()> {
    let n = sys
        .object(node)
        .endpoint(NetType::Topo, Dir::Out)
        .map(|ep| ep.links().len())
        .unwrap_or(0) as u32;

    if let ObjectKind::Split(_, data) = &mut sys.object_mut(node).kind {
        if data.n_outputs == n {
            return Ok(());
        }
        data.n_outputs = n;
    }

    let inport = super::child(sys, node, INPORT);
    super::uncap_endpoint(sys, inport, NetType::RsPhys, Dir::Out);

    // The input now knows its mask width.
    sys.object_mut(inport).rs_mut().unwrap().proto.add_terminal_field(
        Field::new(FieldId::new(FieldType::SplitMask), n),
        SigRole::tagged(RoleKind::DataBundle, "flow_id"),
    );

    for i in 0..n {
        let name = format!("out{i}");
        let outport = super::add_rs_port(sys, node, &name, Dir::Out, CLOCKPORT)?;
        {
            let obj = sys.object_mut(outport);
            let core = obj.port_core_mut().unwrap();
            core.add_binding(
                SigRole::plain(RoleKind::DataCarrier),
                HdlBinding::full("o_data", "WO"),
            );
            core.add_binding(
                SigRole::plain(RoleKind::Valid),
                HdlBinding::bit("o_valid").with_lo_bit(i),
            );
            core.add_binding(
                SigRole::plain(RoleKind::Ready),
                HdlBinding::bit("i_ready").with_lo_bit(i),
            );
            obj.rs_mut().unwrap().bp.make_configurable();
        }
        sys.connect_internal(node, inport, outport, NetType::RsPhys)?;
    }

    Ok(())
}

pub fn n_outputs(sys: &System, node: ObjectId) -> u32 {
    match &sys.object(node).kind {
        ObjectKind::Split(_, data) => data.n_outputs,
        _ => 0,
    }
}

pub fn input(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, INPORT)
}

pub fn output(sys: &System, node: ObjectId, i: u32) -> ObjectId {
    super::child(sys, node, &format!("out{i}"))
}

pub fn clock_port(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, CLOCKPORT)
}

/// Resolve HDL parameters from the configured protocol state.
pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let n = n_outputs(sys, node);
    sys.set_int_param(node, "WO", width as i64);
    sys.set_int_param(node, "WF", n as i64);
    sys.set_int_param(node, "NO", n as i64);
}

pub fn annotate_timing(sys: &mut System, node: ObjectId, dbs: &PrimDbSet) -> Result<()> {
    let inport = input(sys, node);
    let n = n_outputs(sys, node);
    for i in 0..n {
        let outport = output(sys, node, i);
        super::annotate_timing_through(sys, dbs, MODNAME, inport, outport)?;
    }
    Ok(())
}

pub fn annotate_area(sys: &System, node: ObjectId, dbs: &PrimDbSet) -> Result<AreaMetrics> {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let bp = super::bp_col(sys, input(sys, node));
    let db = dbs
        .get(MODNAME)
        .ok_or_else(|| crate::core::error::SynthError::general("no split database"))?;
    let per_output = super::interpolate_width(db, width, &[bp])?;
    Ok(per_output * (n_outputs(sys, node).max(1) as i64))
}
