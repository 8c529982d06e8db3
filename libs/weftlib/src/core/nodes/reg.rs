// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline register: a one-cycle stage spliced in to realize latency.

use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{Dir, NetType, NodeCore, ObjectId, ObjectKind, System};
use crate::core::primdb::{AreaMetrics, PrimDbSet};

pub const MODNAME: &str = "weft_pipe_stage";
pub const INPORT: &str = "in";
pub const OUTPORT: &str = "out";
pub const CLOCKPORT: &str = "clock";
pub const RESETPORT: &str = "reset";

pub fn create(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = NodeCore::new(MODNAME).with_carrier();
    {
        let hdl = &mut core.hdl;
        hdl.add_port("clk", 1, 1, Dir::In);
        hdl.add_port("reset", 1, 1, Dir::In);
        hdl.add_port("i_valid", 1, 1, Dir::In);
        hdl.add_port("o_valid", 1, 1, Dir::Out);
        hdl.add_port("i_ready", 1, 1, Dir::In);
        hdl.add_port("o_ready", 1, 1, Dir::Out);
        hdl.add_port("i_data", "WIDTH", 1, Dir::In);
        hdl.add_port("o_data", "WIDTH", 1, Dir::Out);
    }

    let node = sys.add_object(sys.root(), name, ObjectKind::Reg(core))?;

    super::add_clock_port(sys, node, CLOCKPORT, "clk")?;
    super::add_reset_port(sys, node, RESETPORT, "reset")?;

    let inport = super::add_rs_port(sys, node, INPORT, Dir::In, CLOCKPORT)?;
    {
        let obj = sys.object_mut(inport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("o_ready"));
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("i_data", "WIDTH"),
        );
        obj.rs_mut().unwrap().bp.make_configurable();
    }

    let outport = super::add_rs_port(sys, node, OUTPORT, Dir::Out, CLOCKPORT)?;
    {
        let obj = sys.object_mut(outport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("o_valid"));
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("i_ready"));
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("o_data", "WIDTH"),
        );
        obj.rs_mut().unwrap().bp.make_configurable();
    }

    let internal = sys.connect_internal(node, inport, outport, NetType::RsPhys)?;
    sys.link_mut(internal).unwrap().set_latency(1);

    Ok(node)
}

pub fn input(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, INPORT)
}

pub fn output(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, OUTPORT)
}

pub fn clock_port(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, CLOCKPORT)
}

pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    sys.set_int_param(node, "WIDTH", width as i64);
}

pub fn annotate_area(sys: &System, node: ObjectId, dbs: &PrimDbSet) -> Result<AreaMetrics> {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let bp = super::bp_col(sys, output(sys, node)) == 1;
    estimate_area(dbs, width, bp)
}

/// Area of one register stage at the given payload width.
pub fn estimate_area(dbs: &PrimDbSet, width: u32, bp: bool) -> Result<AreaMetrics> {
    let db = dbs
        .get(MODNAME)
        .ok_or_else(|| crate::core::error::SynthError::general("no pipe stage database"))?;
    super::interpolate_width(db, width, &[bp as u32])
}
