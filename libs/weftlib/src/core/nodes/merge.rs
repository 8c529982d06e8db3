// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Merge node: `n` RS inputs arbitrated onto one output.
//!
//! When every pair of inputs carries mutually exclusive traffic the
//! exclusive variant is used instead: a pure OR structure with no
//! arbiter.

use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{Dir, MergeData, NetType, NodeCore, ObjectId, ObjectKind, System};
use crate::core::primdb::{AreaMetrics, PrimDbSet};
use crate::core::protocol::{Field, FieldId, FieldType};

pub const MODNAME: &str = "weft_merge";
pub const MODNAME_EX: &str = "weft_merge_ex";
pub const OUTPORT: &str = "out";
pub const CLOCKPORT: &str = "clock";
pub const RESETPORT: &str = "reset";

/// Largest fan-in before tree-ification decomposes a merge.
pub const MAX_INPUTS: usize = 4;

pub fn create(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = NodeCore::new(MODNAME).with_carrier();
    {
        let hdl = &mut core.hdl;
        hdl.add_port("clk", 1, 1, Dir::In);
        hdl.add_port("reset", 1, 1, Dir::In);
        hdl.add_port("i_data", "WIDTH", "NI", Dir::In);
        hdl.add_port("i_valid", "NI", 1, Dir::In);
        hdl.add_port("i_eop", "NI", 1, Dir::In);
        hdl.add_port("o_ready", "NI", 1, Dir::Out);
        hdl.add_port("o_valid", 1, 1, Dir::Out);
        hdl.add_port("o_eop", 1, 1, Dir::Out);
        hdl.add_port("o_data", "WIDTH", 1, Dir::Out);
        hdl.add_port("i_ready", 1, 1, Dir::In);
    }

    let node = sys.add_object(
        sys.root(),
        name,
        ObjectKind::Merge(core, MergeData::default()),
    )?;

    super::add_clock_port(sys, node, CLOCKPORT, "clk")?;
    super::add_reset_port(sys, node, RESETPORT, "reset")?;

    let outport = super::add_rs_port(sys, node, OUTPORT, Dir::Out, CLOCKPORT)?;
    {
        let obj = sys.object_mut(outport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("o_data", "WIDTH"),
        );
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("o_valid"));
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("i_ready"));
        core.add_binding(SigRole::plain(RoleKind::Eop), HdlBinding::bit("o_eop"));
        obj.rs_mut().unwrap().bp.make_configurable();
        obj.rs_mut()
            .unwrap()
            .proto
            .add_terminal_field(Field::new(FieldId::new(FieldType::Eop), 1), SigRole::plain(RoleKind::Eop));
    }

    sys.object_mut(node).make_connectable(NetType::Topo);

    Ok(node)
}

/// Create the input ports (one per incoming topo link) and the internal
/// input→output links.
pub fn create_ports(sys: &mut System, node: ObjectId) -> Result<()> {
    let n = sys
        .object(node)
        .endpoint(NetType::Topo, Dir::In)
        .map(|ep| ep.links().len())
        .unwrap_or(0) as u32;

    if let ObjectKind::Merge(_, data) = &mut sys.object_mut(node).kind {
        if data.n_inputs == n {
            return Ok(());
        }
        data.n_inputs = n;
    }

    let outport = super::child(sys, node, OUTPORT);
    super::uncap_endpoint(sys, outport, NetType::RsPhys, Dir::In);

    for i in 0..n {
        let name = format!("in{i}");
        let inport = super::add_rs_port(sys, node, &name, Dir::In, CLOCKPORT)?;
        {
            let obj = sys.object_mut(inport);
            let core = obj.port_core_mut().unwrap();
            core.add_binding(
                SigRole::plain(RoleKind::DataCarrier),
                HdlBinding::full("i_data", "WIDTH").with_lo_slice(i),
            );
            core.add_binding(
                SigRole::plain(RoleKind::Valid),
                HdlBinding::bit("i_valid").with_lo_bit(i),
            );
            core.add_binding(
                SigRole::plain(RoleKind::Eop),
                HdlBinding::bit("i_eop").with_lo_bit(i),
            );
            core.add_binding(
                SigRole::plain(RoleKind::Ready),
                HdlBinding::bit("o_ready").with_lo_bit(i),
            );
            obj.rs_mut().unwrap().bp.make_configurable();
            obj.rs_mut().unwrap().proto.add_terminal_field(
                Field::new(FieldId::new(FieldType::Eop), 1),
                SigRole::plain(RoleKind::Eop),
            );
        }
        sys.connect_internal(node, inport, outport, NetType::RsPhys)?;
    }

    Ok(())
}

pub fn n_inputs(sys: &System, node: ObjectId) -> u32 {
    match &sys.object(node).kind {
        ObjectKind::Merge(_, data) => data.n_inputs,
        _ => 0,
    }
}

pub fn is_exclusive(sys: &System, node: ObjectId) -> bool {
    match &sys.object(node).kind {
        ObjectKind::Merge(_, data) => data.exclusive,
        _ => false,
    }
}

pub fn set_exclusive(sys: &mut System, node: ObjectId, exclusive: bool) {
    if let ObjectKind::Merge(core, data) = &mut sys.object_mut(node).kind {
        data.exclusive = exclusive;
        core.module_name = if exclusive { MODNAME_EX } else { MODNAME }.to_string();
    }
}

pub fn input(sys: &System, node: ObjectId, i: u32) -> ObjectId {
    super::child(sys, node, &format!("in{i}"))
}

pub fn output(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, OUTPORT)
}

pub fn clock_port(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, CLOCKPORT)
}

pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let n = n_inputs(sys, node);
    sys.set_int_param(node, "WIDTH", width as i64);
    sys.set_int_param(node, "NI", n as i64);
}

pub fn annotate_timing(sys: &mut System, node: ObjectId, dbs: &PrimDbSet) -> Result<()> {
    let module = if is_exclusive(sys, node) {
        MODNAME_EX
    } else {
        MODNAME
    };
    let outport = output(sys, node);
    let n = n_inputs(sys, node);
    for i in 0..n {
        let inport = input(sys, node, i);
        super::annotate_timing_through(sys, dbs, module, inport, outport)?;
    }
    Ok(())
}

pub fn annotate_area(sys: &System, node: ObjectId, dbs: &PrimDbSet) -> Result<AreaMetrics> {
    let module = if is_exclusive(sys, node) {
        MODNAME_EX
    } else {
        MODNAME
    };
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let bp = super::bp_col(sys, output(sys, node));
    let db = dbs
        .get(module)
        .ok_or_else(|| crate::core::error::SynthError::general("no merge database"))?;
    let per_input = super::interpolate_width(db, width, &[bp])?;
    Ok(per_input * (n_inputs(sys, node).max(1) as i64))
}
