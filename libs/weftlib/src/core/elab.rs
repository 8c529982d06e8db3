// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! HDL elaboration.
//!
//! Walks the final physical graph and converts each link into bit-level
//! net assignments: clock, reset and conduit role bindings connect
//! whole; RS links get their ready/valid legality checks and tie-offs,
//! then one net per required field (or a constant tie), with a single
//! wide net for the opaque domain region when both ends are carriers.

use tracing::debug;

use crate::core::bits::BitsVal;
use crate::core::error::{Result, SynthError};
use crate::core::flow::{carrier_of_port, port_pair_width};
use crate::core::model::port::{BpStatus, RoleKind, RoleSense, SigRole};
use crate::core::model::{NetType, ObjectId, ObjectKind, ResolvedBinding, System};
use crate::core::nodes::{clockx, conv, mdelay, merge, reg, split};
use crate::core::primdb::PrimDbSet;
use crate::core::protocol::FieldSet;

/// Resolve a port's role binding against its owning node's parameters.
fn resolve_binding(sys: &System, port: ObjectId, role: &SigRole) -> Result<ResolvedBinding> {
    let node = sys.object(port).parent.expect("port with no parent");
    let rb = sys
        .object(port)
        .port_core()
        .and_then(|c| c.get_binding(role))
        .ok_or_else(|| {
            SynthError::synth(
                sys.hier_path(port),
                format!("missing role binding {:?}", role.kind),
            )
        })?;
    rb.binding.resolve(&|name| sys.param_value(node, name))
}

fn node_of(sys: &System, port: ObjectId) -> ObjectId {
    sys.object(port).parent.expect("port with no parent")
}

/// Set the HDL parameters every primitive derives from its final
/// protocol state.
fn prepare_nodes(sys: &mut System) -> Result<()> {
    let nodes: Vec<(ObjectId, &'static str)> = sys
        .objects()
        .filter_map(|(id, o)| match &o.kind {
            ObjectKind::Split(..) => Some((id, "split")),
            ObjectKind::Merge(..) => Some((id, "merge")),
            ObjectKind::Conv(..) => Some((id, "conv")),
            ObjectKind::Reg(_) => Some((id, "reg")),
            ObjectKind::MDelay(..) => Some((id, "mdelay")),
            ObjectKind::ClockX(_) => Some((id, "clockx")),
            _ => None,
        })
        .collect();

    for (id, kind) in nodes {
        match kind {
            "split" => split::prepare_for_hdl(sys, id),
            "merge" => merge::prepare_for_hdl(sys, id),
            "conv" => conv::prepare_for_hdl(sys, id),
            "reg" => reg::prepare_for_hdl(sys, id),
            "mdelay" => mdelay::prepare_for_hdl(sys, id),
            "clockx" => clockx::prepare_for_hdl(sys, id),
            _ => unreachable!(),
        }
    }
    sys.resolve_all_params()
}

/// Clock and reset links connect their single role binding end to end.
fn do_non_rs(sys: &mut System, net: NetType) -> Result<()> {
    for id in sys.links_of(net) {
        let (src, sink) = {
            let l = sys.link(id).unwrap();
            (l.src, l.sink)
        };

        let bindings = sys.object(src).port_core().unwrap().bindings.clone();
        for rb in bindings {
            let Some(_) = sys.object(sink).port_core().unwrap().get_binding(&rb.role) else {
                continue;
            };
            connect_roles(sys, src, sink, &rb.role)?;
        }
    }
    Ok(())
}

/// Conduit sub-links connect their sub-port bindings, honoring each
/// role's sense.
fn do_conduits(sys: &mut System) -> Result<()> {
    for id in sys.links_of(NetType::ConduitSub) {
        let (src, sink) = {
            let l = sys.link(id).unwrap();
            (l.src, l.sink)
        };
        let role = match &sys.object(src).kind {
            ObjectKind::PortConduitSub(_, role) => role.clone(),
            _ => continue,
        };
        let counterpart = match &sys.object(sink).kind {
            ObjectKind::PortConduitSub(_, role) => role.clone(),
            _ => {
                return Err(SynthError::synth(
                    sys.hier_path(sink),
                    "conduit sub-link does not end at a sub-port",
                ))
            }
        };
        if sys.object(sink).port_core().unwrap().get_binding(&counterpart).is_none() {
            return Err(SynthError::synth(
                sys.hier_path(sink),
                format!("required role binding {:?} is missing", counterpart.kind),
            ));
        }
        connect_roles_tagged(sys, src, &role, sink, &counterpart)?;
    }
    Ok(())
}

fn connect_roles(sys: &mut System, src: ObjectId, sink: ObjectId, role: &SigRole) -> Result<()> {
    connect_roles_tagged(sys, src, role, sink, role)
}

fn connect_roles_tagged(
    sys: &mut System,
    src: ObjectId,
    src_role: &SigRole,
    sink: ObjectId,
    sink_role: &SigRole,
) -> Result<()> {
    let src_rb = resolve_binding(sys, src, src_role)?;
    let sink_rb = resolve_binding(sys, sink, sink_role)?;
    let width = sink_rb.bits;

    let (from, from_rb, to, to_rb) = match src_role.kind.sense() {
        RoleSense::Rev | RoleSense::AbsIn => (sink, sink_rb, src, src_rb),
        _ => (src, src_rb, sink, sink_rb),
    };

    let from_node = node_of(sys, from);
    let to_node = node_of(sys, to);
    sys.hdl.connect(from_node, &from_rb, 0, to_node, &to_rb, 0, width);
    Ok(())
}

/// Valid/ready wiring with the backpressure legality rules.
fn do_rs_readyvalid(sys: &mut System) -> Result<()> {
    for id in sys.links_of(NetType::RsPhys) {
        let (src, sink) = {
            let l = sys.link(id).unwrap();
            (l.src, l.sink)
        };
        let src_node = node_of(sys, src);
        let sink_node = node_of(sys, sink);

        // Valid
        let src_valid = sys
            .object(src)
            .port_core()
            .unwrap()
            .get_binding_kind(RoleKind::Valid)
            .cloned();
        let sink_valid = sys
            .object(sink)
            .port_core()
            .unwrap()
            .get_binding_kind(RoleKind::Valid)
            .cloned();
        match (src_valid, sink_valid) {
            (Some(s), Some(t)) => {
                let s = s.binding.resolve(&|n| sys.param_value(src_node, n))?;
                let t = t.binding.resolve(&|n| sys.param_value(sink_node, n))?;
                sys.hdl.connect(src_node, &s, 0, sink_node, &t, 0, 1);
            }
            (None, Some(t)) => {
                let t = t.binding.resolve(&|n| sys.param_value(sink_node, n))?;
                sys.hdl.tie(sink_node, &t, 0, BitsVal::from_u64(1, 1));
            }
            (Some(_), None) => {
                return Err(SynthError::synth(
                    sys.hier_path(src),
                    format!(
                        "valid has no counterpart to connect to at {}",
                        sys.hier_path(sink)
                    ),
                ));
            }
            (None, None) => {}
        }

        // Ready
        let src_ready = sys
            .object(src)
            .port_core()
            .unwrap()
            .get_binding_kind(RoleKind::Ready)
            .cloned();
        let sink_ready = sys
            .object(sink)
            .port_core()
            .unwrap()
            .get_binding_kind(RoleKind::Ready)
            .cloned();
        let src_bp = sys.object(src).rs().unwrap().bp.status == BpStatus::Enabled;
        let sink_bp = sys.object(sink).rs().unwrap().bp.status == BpStatus::Enabled;

        if src_bp && src_ready.is_none() {
            return Err(SynthError::synth(
                sys.hier_path(src),
                "has backpressure but no ready signal",
            ));
        }
        if sink_bp && sink_ready.is_none() {
            return Err(SynthError::synth(
                sys.hier_path(sink),
                "has backpressure but no ready signal",
            ));
        }
        if sink_bp && !src_bp {
            return Err(SynthError::synth(
                sys.hier_path(src),
                format!(
                    "has no backpressure but its sink {} does",
                    sys.hier_path(sink)
                ),
            ));
        }

        if sink_bp {
            // Ready flows sink to source.
            let s = src_ready
                .unwrap()
                .binding
                .resolve(&|n| sys.param_value(src_node, n))?;
            let t = sink_ready
                .unwrap()
                .binding
                .resolve(&|n| sys.param_value(sink_node, n))?;
            sys.hdl.connect(sink_node, &t, 0, src_node, &s, 0, 1);
        } else if let Some(s) = src_ready {
            let s = s.binding.resolve(&|n| sys.param_value(src_node, n))?;
            sys.hdl.tie(src_node, &s, 0, BitsVal::from_u64(1, 1));
        }
    }
    Ok(())
}

/// Locate a field at a source port: among its terminals, or inside its
/// node's carrier region.
fn find_src_field(
    sys: &System,
    port: ObjectId,
    field: &crate::core::protocol::FieldId,
) -> Result<Option<(ResolvedBinding, u32)>> {
    let rs = sys.object(port).rs().unwrap();
    if rs.proto.has_terminal_field(field) {
        let role = rs.proto.binding(field)?.clone();
        return Ok(Some((resolve_binding(sys, port, &role)?, 0)));
    }
    if let Some(carrier) = carrier_of_port(sys, port) {
        if carrier.has(field) {
            let lsb = carrier.lsb(field).unwrap();
            let rb = resolve_binding(sys, port, &SigRole::plain(RoleKind::DataCarrier))?;
            return Ok(Some((rb, lsb)));
        }
    }
    Ok(None)
}

/// Per-field nets for every physical RS link.
fn do_rs_fields(sys: &mut System) -> Result<()> {
    enum Class {
        Terminal,
        Jection,
        Domain,
    }

    for id in sys.links_of(NetType::RsPhys) {
        let (src, sink) = {
            let l = sys.link(id).unwrap();
            (l.src, l.sink)
        };
        let src_node = node_of(sys, src);
        let sink_node = node_of(sys, sink);

        let src_carrier = carrier_of_port(sys, src).cloned();
        let sink_carrier = carrier_of_port(sys, sink).cloned();
        let opaque_domain = src_carrier.is_some() && sink_carrier.is_some();

        let mut connected_width = 0u32;

        if opaque_domain {
            // One wide net between the two domain regions.
            let src_c = src_carrier.as_ref().unwrap();
            let sink_c = sink_carrier.as_ref().unwrap();
            debug_assert_eq!(src_c.domain_width(), sink_c.domain_width());
            let width = src_c.domain_width();
            if width > 0 {
                let s = resolve_binding(sys, src, &SigRole::plain(RoleKind::DataCarrier))?;
                let t = resolve_binding(sys, sink, &SigRole::plain(RoleKind::DataCarrier))?;
                sys.hdl.connect(
                    src_node,
                    &s,
                    src_c.domain_lsb(),
                    sink_node,
                    &t,
                    sink_c.domain_lsb(),
                    width,
                );
                connected_width += width;
            }
        }

        for class in [Class::Terminal, Class::Jection, Class::Domain] {
            let in_carry = !matches!(class, Class::Terminal);
            if in_carry && sink_carrier.is_none() {
                continue;
            }
            if matches!(class, Class::Domain) && opaque_domain {
                continue;
            }

            let fields: FieldSet = match class {
                Class::Terminal => sys.object(sink).rs().unwrap().proto.terminal_fields().clone(),
                Class::Jection => sink_carrier.as_ref().unwrap().jection_fields().clone(),
                Class::Domain => sink_carrier.as_ref().unwrap().domain_fields(),
            };

            for field in fields.iter() {
                let (sink_rb, sink_lsb) = if in_carry {
                    let rb = resolve_binding(sys, sink, &SigRole::plain(RoleKind::DataCarrier))?;
                    let lsb = sink_carrier.as_ref().unwrap().lsb(&field.id).unwrap();
                    (rb, lsb)
                } else {
                    let role = sys
                        .object(sink)
                        .rs()
                        .unwrap()
                        .proto
                        .binding(&field.id)?
                        .clone();
                    (resolve_binding(sys, sink, &role)?, 0)
                };

                let const_val = sys
                    .object(sink)
                    .rs()
                    .unwrap()
                    .proto
                    .get_const(&field.id)
                    .cloned();
                if let Some(val) = const_val {
                    sys.hdl.tie(sink_node, &sink_rb, sink_lsb, val);
                    continue;
                }

                match find_src_field(sys, src, &field.id)? {
                    Some((src_rb, src_lsb)) => {
                        sys.hdl.connect(
                            src_node,
                            &src_rb,
                            src_lsb,
                            sink_node,
                            &sink_rb,
                            sink_lsb,
                            field.width,
                        );
                        connected_width += field.width;
                    }
                    None if !in_carry => {
                        return Err(SynthError::synth(
                            sys.hier_path(sink),
                            format!("requires field {:?} that cannot be supplied", field.id),
                        ));
                    }
                    None => {}
                }
            }
        }

        sys.hdl.rs_link_widths.insert(id, connected_width);

        debug_assert_eq!(
            connected_width,
            port_pair_width(sys, src, sink),
            "emitted nets disagree with the transmitted width"
        );
    }
    Ok(())
}

/// Elaborate a compiled system into net assignments.
pub fn elaborate(sys: &mut System, _dbs: &PrimDbSet) -> Result<()> {
    debug!(system = sys.name(), "elaborating HDL state");

    prepare_nodes(sys)?;

    do_non_rs(sys, NetType::Clock)?;
    do_non_rs(sys, NetType::Reset)?;
    do_conduits(sys)?;

    do_rs_readyvalid(sys)?;
    do_rs_fields(sys)?;

    Ok(())
}
