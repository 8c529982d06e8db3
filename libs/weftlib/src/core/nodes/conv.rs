// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Address converter: translates one address representation's field into
//! another's through a small lookup table.

use crate::core::address::AddressRep;
use crate::core::bits::BitsVal;
use crate::core::error::Result;
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{RoleKind, SigRole};
use crate::core::model::{ConvData, Dir, NetType, NodeCore, ObjectId, ObjectKind, System};
use crate::core::primdb::{AreaMetrics, PrimDbSet};
use crate::core::protocol::{Field, FieldId};

pub const MODNAME: &str = "weft_conv";
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
        hdl.add_port("i_in", "WIDTH_IN", 1, Dir::In);
        hdl.add_port("o_out", "WIDTH_OUT", 1, Dir::Out);
        hdl.add_port("i_data", "WIDTH_DATA", 1, Dir::In);
        hdl.add_port("o_data", "WIDTH_DATA", 1, Dir::Out);
    }

    let node = sys.add_object(sys.root(), name, ObjectKind::Conv(core, ConvData::default()))?;

    super::add_clock_port(sys, node, CLOCKPORT, "clk")?;
    super::add_reset_port(sys, node, RESETPORT, "reset")?;

    let inport = super::add_rs_port(sys, node, INPORT, Dir::In, CLOCKPORT)?;
    {
        let obj = sys.object_mut(inport);
        let core = obj.port_core_mut().unwrap();
        core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
        core.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("o_ready"));
        core.add_binding(
            SigRole::plain(RoleKind::Data),
            HdlBinding::full("i_in", "WIDTH_IN"),
        );
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("i_data", "WIDTH_DATA"),
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
            SigRole::plain(RoleKind::Data),
            HdlBinding::full("o_out", "WIDTH_OUT"),
        );
        core.add_binding(
            SigRole::plain(RoleKind::DataCarrier),
            HdlBinding::full("o_data", "WIDTH_DATA"),
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

/// Configure the conversion: iterate the input representation's address
/// bins and look up each bin's exemplar transmission in the output
/// representation. Attaches concretely-sized terminal fields to both RS
/// ports.
pub fn configure(
    sys: &mut System,
    node: ObjectId,
    in_rep: &AddressRep,
    in_field: FieldId,
    out_rep: &AddressRep,
    out_field: FieldId,
) {
    let mut table = Vec::new();
    for (from_addr, xmis) in in_rep.addr_bins() {
        let exemplar = xmis[0];
        if let Some(to_addr) = out_rep.addr_for_xmis(exemplar) {
            table.push((from_addr, to_addr));
        }
    }

    let in_width = in_rep.size_in_bits();
    let out_width = out_rep.size_in_bits();

    if let ObjectKind::Conv(_, data) = &mut sys.object_mut(node).kind {
        data.table = table;
        data.in_width = in_width;
        data.out_width = out_width;
    }

    let inport = input(sys, node);
    let outport = output(sys, node);
    sys.object_mut(inport)
        .rs_mut()
        .unwrap()
        .proto
        .add_terminal_field(Field::new(in_field, in_width), SigRole::plain(RoleKind::Data));
    sys.object_mut(outport)
        .rs_mut()
        .unwrap()
        .proto
        .add_terminal_field(Field::new(out_field, out_width), SigRole::plain(RoleKind::Data));
}

pub fn prepare_for_hdl(sys: &mut System, node: ObjectId) {
    let width = sys.object(node).carrier().map(|c| c.total_width()).unwrap_or(0);
    let (table, in_width, out_width) = match &sys.object(node).kind {
        ObjectKind::Conv(_, data) => (data.table.clone(), data.in_width, data.out_width),
        _ => return,
    };

    sys.set_int_param(node, "WIDTH_DATA", width as i64);
    sys.set_int_param(node, "WIDTH_IN", in_width as i64);
    sys.set_int_param(node, "WIDTH_OUT", out_width as i64);
    sys.set_int_param(node, "N_ENTRIES", table.len() as i64);

    let n = table.len() as u32;
    let mut in_vals = BitsVal::new_2d(in_width, n);
    let mut out_vals = BitsVal::new_2d(out_width, n);
    for (i, (from, to)) in table.iter().enumerate() {
        in_vals.set_val(i as u32, *from, in_width.min(64));
        out_vals.set_val(i as u32, *to, out_width.min(64));
    }
    sys.set_bits_param(node, "IN_VALS", in_vals);
    sys.set_bits_param(node, "OUT_VALS", out_vals);
}

pub fn annotate_timing(sys: &mut System, node: ObjectId, dbs: &PrimDbSet) -> Result<()> {
    let inport = input(sys, node);
    let outport = output(sys, node);
    super::annotate_timing_through(sys, dbs, MODNAME, inport, outport)
}

pub fn annotate_area(sys: &System, node: ObjectId) -> Result<AreaMetrics> {
    // The lookup table dominates: one LUT level per output bit.
    let out_width = match &sys.object(node).kind {
        ObjectKind::Conv(_, data) => data.out_width,
        _ => 0,
    };
    Ok(AreaMetrics {
        comb: out_width as i64,
        ..AreaMetrics::default()
    })
}
