// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Interconnect primitives.
//!
//! Each primitive reserves a fixed HDL module name, assembles its clock,
//! reset and RS ports with their role bindings, and owns internal
//! input→output links used for latency and carriage accounting. Area and
//! timing queries go through the primitive database.

use crate::core::error::{Result, SynthError};
use crate::core::model::hdl::HdlBinding;
use crate::core::model::port::{PortCore, RoleKind, RsPortData, SigRole};
use crate::core::model::{Dir, NetType, ObjectId, ObjectKind, System, UNLIMITED};
use crate::core::options::ArchParams;
use crate::core::primdb::{tnode, AreaMetrics, PrimDb, PrimDbSet};

pub mod clockx;
pub mod conv;
pub mod mdelay;
pub mod merge;
pub mod reg;
pub mod split;

pub(crate) fn add_clock_port(
    sys: &mut System,
    node: ObjectId,
    name: &str,
    signal: &str,
) -> Result<ObjectId> {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Clock), HdlBinding::bit(signal));
    let id = sys.add_object(node, name, ObjectKind::PortClock(core))?;
    sys.object_mut(id).make_connectable(NetType::Clock);
    Ok(id)
}

pub(crate) fn add_reset_port(
    sys: &mut System,
    node: ObjectId,
    name: &str,
    signal: &str,
) -> Result<ObjectId> {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Reset), HdlBinding::bit(signal));
    let id = sys.add_object(node, name, ObjectKind::PortReset(core))?;
    sys.object_mut(id).make_connectable(NetType::Reset);
    Ok(id)
}

pub(crate) fn add_rs_port(
    sys: &mut System,
    node: ObjectId,
    name: &str,
    dir: Dir,
    clock_port: &str,
) -> Result<ObjectId> {
    let id = sys.add_object(
        node,
        name,
        ObjectKind::PortRs(PortCore::new(dir), RsPortData::new(clock_port)),
    )?;
    sys.object_mut(id).make_connectable(NetType::RsPhys);
    Ok(id)
}

/// A named child port, for primitives with well-known port names.
pub(crate) fn child(sys: &System, node: ObjectId, name: &str) -> ObjectId {
    *sys.object(node)
        .children
        .get(name)
        .unwrap_or_else(|| panic!("primitive is missing its '{name}' port"))
}

/// Whether a port's decided backpressure is enabled, as a database
/// column value.
pub(crate) fn bp_col(sys: &System, port: ObjectId) -> u32 {
    use crate::core::model::port::BpStatus;
    match sys.object(port).rs().map(|r| r.bp.status) {
        Some(BpStatus::Enabled) => 1,
        _ => 0,
    }
}

fn db_for<'a>(dbs: &'a PrimDbSet, module: &str) -> Result<&'a PrimDb> {
    dbs.get(module)
        .ok_or_else(|| SynthError::general(format!("no primitive database for '{module}'")))
}

/// Linear interpolation between the width-1 and width-2 anchor rows, the
/// standard shape for width-proportional primitives.
pub(crate) fn interpolate_width(
    db: &PrimDb,
    width: u32,
    extra_cols: &[u32],
) -> Result<AreaMetrics> {
    let row_of = |w: u32| -> Result<&crate::core::primdb::PrimRow> {
        let mut cols = vec![w];
        cols.extend_from_slice(extra_cols);
        db.get_row(&cols)
            .ok_or_else(|| SynthError::general(format!("primitive database row missing: {cols:?}")))
    };

    if width == 0 {
        return Ok(*PrimDb::get_area_metrics(row_of(0)?));
    }
    let m1 = *PrimDb::get_area_metrics(row_of(1)?);
    let m2 = *PrimDb::get_area_metrics(row_of(2)?);
    Ok(m1 + (m2 - m1) * ((width as i64) - 1))
}

/// Annotate a combinational pass-through: the node's internal link gets
/// the full through-depth, ports stay at zero.
pub(crate) fn annotate_timing_through(
    sys: &mut System,
    dbs: &PrimDbSet,
    module: &str,
    in_port: ObjectId,
    out_port: ObjectId,
) -> Result<()> {
    let bp = bp_col(sys, out_port);
    let db = db_for(dbs, module)?;
    let row = db
        .get_row(&[1, bp])
        .ok_or_else(|| SynthError::general(format!("{module}: no timing row")))?;
    let t = PrimDb::get_tnodes(row);

    let mut depth = PrimDb::get_tnode_val(t, tnode::I_DATA, tnode::INT_SINK)
        .max(PrimDb::get_tnode_val(t, tnode::I_VALID, tnode::INT_SINK))
        + PrimDb::get_tnode_val(t, tnode::INT, tnode::O_DATA)
            .max(PrimDb::get_tnode_val(t, tnode::INT, tnode::O_VALID));
    if bp == 1 {
        depth = depth
            .max(PrimDb::get_tnode_val(t, tnode::I_READY, tnode::INT_SINK)
                + PrimDb::get_tnode_val(t, tnode::INT, tnode::O_READY));
    }

    let internal = sys
        .object(in_port)
        .endpoint(crate::core::model::NetType::RsPhys, Dir::Out)
        .and_then(|ep| {
            ep.links()
                .iter()
                .copied()
                .find(|l| sys.link(*l).map(|link| link.sink == out_port).unwrap_or(false))
        });
    if let Some(link) = internal {
        sys.link_mut(link).unwrap().set_logic_depth(depth);
    }
    Ok(())
}

/// Annotate a two-port primitive's logic depths from its database row.
pub(crate) fn annotate_timing_two_port(
    sys: &mut System,
    dbs: &PrimDbSet,
    module: &str,
    in_port: ObjectId,
    out_port: ObjectId,
) -> Result<()> {
    let bp = bp_col(sys, out_port);
    let db = db_for(dbs, module)?;
    let row = db
        .get_row(&[1, bp])
        .ok_or_else(|| SynthError::general(format!("{module}: no timing row")))?;
    let t = PrimDb::get_tnodes(row);

    let mut in_depth = PrimDb::get_tnode_val(t, tnode::I_DATA, tnode::INT_SINK)
        .max(PrimDb::get_tnode_val(t, tnode::I_VALID, tnode::INT_SINK));
    let mut out_depth = PrimDb::get_tnode_val(t, tnode::INT, tnode::O_DATA)
        .max(PrimDb::get_tnode_val(t, tnode::INT, tnode::O_VALID));
    if bp == 1 {
        in_depth = in_depth.max(PrimDb::get_tnode_val(t, tnode::I_READY, tnode::INT_SINK));
        out_depth = out_depth.max(PrimDb::get_tnode_val(t, tnode::INT, tnode::O_READY));
    }

    sys.object_mut(in_port).rs_mut().unwrap().logic_depth = in_depth;
    sys.object_mut(out_port).rs_mut().unwrap().logic_depth = out_depth;
    Ok(())
}

/// Dispatch timing annotation over a node's kind. User modules keep
/// whatever depths their ports were given at construction time.
pub fn annotate_timing(sys: &mut System, node: ObjectId, dbs: &PrimDbSet) -> Result<()> {
    match &sys.object(node).kind {
        ObjectKind::Split(..) => split::annotate_timing(sys, node, dbs),
        ObjectKind::Merge(..) => merge::annotate_timing(sys, node, dbs),
        ObjectKind::Conv(..) => conv::annotate_timing(sys, node, dbs),
        ObjectKind::ClockX(_) => clockx::annotate_timing(sys, node, dbs),
        // Regs and memory delays are inserted after constraint solving;
        // their depths never feed the reg graph.
        _ => Ok(()),
    }
}

/// Dispatch area annotation over a node's kind.
pub fn annotate_area(
    sys: &System,
    node: ObjectId,
    dbs: &PrimDbSet,
    arch: &ArchParams,
) -> Result<AreaMetrics> {
    match &sys.object(node).kind {
        ObjectKind::Split(..) => split::annotate_area(sys, node, dbs),
        ObjectKind::Merge(..) => merge::annotate_area(sys, node, dbs),
        ObjectKind::Conv(..) => conv::annotate_area(sys, node),
        ObjectKind::Reg(_) => reg::annotate_area(sys, node, dbs),
        ObjectKind::MDelay(..) => mdelay::annotate_area(sys, node, dbs, arch),
        ObjectKind::ClockX(_) => clockx::annotate_area(sys, node, dbs),
        _ => Ok(AreaMetrics::default()),
    }
}

/// Make the fan side of a primitive's internal endpoints unbounded.
pub(crate) fn uncap_endpoint(sys: &mut System, port: ObjectId, net: NetType, dir: Dir) {
    sys.object_mut(port).make_connectable(net);
    sys.object_mut(port).endpoint_mut(net, dir).unwrap().max_links = UNLIMITED;
}
