// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Memory-based delay: realizes `k > 1` cycles of latency in LUTRAM
//! instead of a chain of registers.

use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{Dir, MDelayData, NetType, NodeCore, ObjectId, ObjectKind, System};
use crate::core::options::ArchParams;
use crate::core::primdb::{AreaMetrics, PrimDbSet};

pub const MODNAME: &str = "weft_mem_delay";
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

    let node = sys.add_object(
        sys.root(),
        name,
        ObjectKind::MDelay(core, MDelayData::default()),
    )?;

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

    sys.connect_internal(node, inport, outport, NetType::RsPhys)?;

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

/// Set the delay in cycles. Values of 1 belong to a plain register.
pub fn set_delay(sys: &mut System, node: ObjectId, delay: u32) {
    assert!(delay > 1, "one-cycle delays use a pipe stage");
    if let ObjectKind::MDelay(_, data) = &mut sys.object_mut(node).kind {
        data.delay = delay;
    }
    let inport = input(sys, node);
    let internal = sys
        .object(inport)
        .endpoint(NetType::RsPhys, Dir::Out)
        .and_then(|ep| ep.link0())
        .expect("mdelay internal link");
    sys.link_mut(internal).unwrap().set_latency(delay);
}

pub fn delay(sys: &System, node: ObjectId) -> u32 {
    match &sys.object(node).kind {
        ObjectKind::MDelay(_, data) => data.delay,
        _ => 0,
    }
}

pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let cycles = delay(sys, node);
    sys.set_int_param(node, "WIDTH", width as i64);
    sys.set_int_param(node, "CYCLES", cycles as i64);
}

pub fn annotate_area(
    sys: &System,
    node: ObjectId,
    dbs: &PrimDbSet,
    arch: &ArchParams,
) -> Result<AreaMetrics> {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let bp = super::bp_col(sys, output(sys, node)) == 1;
    estimate_area(dbs, width, delay(sys, node), bp, arch)
}

/// LUTRAM cost model: quantize width and cycles to the characterized
/// grid, stacking extra blocks beyond the native LUTRAM width.
pub fn estimate_area(
    dbs: &PrimDbSet,
    node_width: u32,
    cycles: u32,
    bp: bool,
    arch: &ArchParams,
) -> Result<AreaMetrics> {
    let db = dbs
        .get(MODNAME)
        .ok_or_else(|| crate::core::error::SynthError::general("no mem delay database"))?;

    // Characterized cycle counts are powers of two.
    let cycles = cycles.max(2).next_power_of_two().min(arch.lutram_depth);

    let mut width = node_width;
    let extra_blocks;
    if width <= arch.lutram_width {
        // Characterized widths: 0, 1, 2, 4, 8, 16, lutram_width.
        if width > 16 {
            width = arch.lutram_width;
        } else if width > 0 {
            width = width.next_power_of_two();
        }
        extra_blocks = 0;
    } else {
        extra_blocks = (width - 1) / arch.lutram_width - 1;
        width = arch.lutram_width + 1;
    }

    let row = db.get_row(&[width, cycles, bp as u32]).ok_or_else(|| {
        crate::core::error::SynthError::general(format!(
            "mem delay database row missing: width {width}, cycles {cycles}"
        ))
    })?;
    let mut metrics = *crate::core::primdb::PrimDb::get_area_metrics(row);
    metrics.mem_alm += (extra_blocks as i64) * 10;
    Ok(metrics)
}
