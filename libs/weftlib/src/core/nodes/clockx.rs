// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock-domain crossing: a dual-clock FIFO with an async reset.

use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{Dir, NetType, NodeCore, ObjectId, ObjectKind, System};
use crate::core::primdb::{AreaMetrics, PrimDbSet};

pub const MODNAME: &str = "weft_clockx";
pub const INDATA: &str = "in_data";
pub const OUTDATA: &str = "out_data";
pub const INCLOCK: &str = "in_clock";
pub const OUTCLOCK: &str = "out_clock";
pub const RESETPORT: &str = "reset";

/// Seed latency of the internal link. The input and output sit in
/// different clock domains, so no single cycle count is exact; this
/// value is what latency solving observes for paths through a crossing.
pub const CLOCKX_INTERNAL_LATENCY: u32 = 2;

pub fn create(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = NodeCore::new(MODNAME).with_carrier();
    {
        let hdl = &mut core.hdl;
        hdl.add_port("arst", 1, 1, Dir::In);
        hdl.add_port("wrclk", 1, 1, Dir::In);
        hdl.add_port("rdclk", 1, 1, Dir::In);
        hdl.add_port("i_data", "WIDTH", 1, Dir::In);
        hdl.add_port("i_valid", 1, 1, Dir::In);
        hdl.add_port("o_ready", 1, 1, Dir::Out);
        hdl.add_port("o_data", "WIDTH", 1, Dir::Out);
        hdl.add_port("o_valid", 1, 1, Dir::Out);
        hdl.add_port("i_ready", 1, 1, Dir::In);
    }

    let node = sys.add_object(sys.root(), name, ObjectKind::ClockX(core))?;

    super::add_clock_port(sys, node, INCLOCK, "wrclk")?;
    super::add_clock_port(sys, node, OUTCLOCK, "rdclk")?;
    super::add_reset_port(sys, node, RESETPORT, "arst")?;

    let inport = super::add_rs_port(sys, node, INDATA, Dir::In, INCLOCK)?;
    {
        let obj = sys.object_mut(inport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("i_data", "WIDTH"),
        );
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("o_ready"));
        // A dual-clock FIFO can always stall its writer.
        obj.rs_mut().unwrap().bp.force_enable();
    }

    let outport = super::add_rs_port(sys, node, OUTDATA, Dir::Out, OUTCLOCK)?;
    {
        let obj = sys.object_mut(outport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("o_valid"));
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("o_data", "WIDTH"),
        );
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("i_ready"));
        obj.rs_mut().unwrap().bp.make_configurable();
    }

    let internal = sys.connect_internal(node, inport, outport, NetType::RsPhys)?;
    sys.link_mut(internal)
        .unwrap()
        .set_latency(CLOCKX_INTERNAL_LATENCY);

    Ok(node)
}

pub fn indata(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, INDATA)
}

pub fn outdata(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, OUTDATA)
}

pub fn inclock(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, INCLOCK)
}

pub fn outclock(sys: &System, node: ObjectId) -> ObjectId {
    super::child(sys, node, OUTCLOCK)
}

pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    sys.set_int_param(node, "WIDTH", width as i64);
}

pub fn annotate_timing(sys: &mut System, node: ObjectId, dbs: &PrimDbSet) -> Result<()> {
    let inport = indata(sys, node);
    let outport = outdata(sys, node);
    super::annotate_timing_two_port(sys, dbs, MODNAME, inport, outport)
}

pub fn annotate_area(sys: &System, node: ObjectId, dbs: &PrimDbSet) -> Result<AreaMetrics> {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let bp = super::bp_col(sys, outdata(sys, node));
    let db = dbs
        .get(MODNAME)
        .ok_or_else(|| crate::core::error::SynthError::general("no clockx database"))?;
    super::interpolate_width(db, width, &[bp])
}
