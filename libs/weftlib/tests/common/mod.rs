// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared builders for flow tests: minimal user modules with clocked RS
//! ports, the way a frontend would construct them.

#![allow(dead_code)]

use weftlib::core::expr::Expr;
use weftlib::core::model::{
    Dir, HdlBinding, NetType, NodeCore, ObjectId, ObjectKind, PortCore, RoleKind, RsPortData,
    SigRole, System,
};

pub fn add_clock_source(sys: &mut System, name: &str) -> ObjectId {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Clock), HdlBinding::bit(name));
    let root = sys.root();
    let id = sys.add_object(root, name, ObjectKind::PortClock(core)).unwrap();
    sys.object_mut(id).make_connectable(NetType::Clock);
    id
}

pub fn add_reset_source(sys: &mut System, name: &str) -> ObjectId {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Reset), HdlBinding::bit(name));
    let root = sys.root();
    let id = sys.add_object(root, name, ObjectKind::PortReset(core)).unwrap();
    sys.object_mut(id).make_connectable(NetType::Reset);
    id
}

fn add_module(sys: &mut System, name: &str, clock_src: ObjectId, width: u32) -> (ObjectId, ObjectId) {
    let root = sys.root();
    let m = sys
        .add_object(root, name, ObjectKind::Module(NodeCore::new(format!("user_{name}"))))
        .unwrap();
    sys.set_int_param(m, "W", width as i64);
    {
        let core = sys.object_mut(m).node_core_mut().unwrap();
        core.hdl.add_port("clk", 1, 1, Dir::In);
    }

    let mut clk_core = PortCore::new(Dir::In);
    clk_core.add_binding(SigRole::plain(RoleKind::Clock), HdlBinding::bit("clk"));
    let clk = sys.add_object(m, "clk", ObjectKind::PortClock(clk_core)).unwrap();
    sys.object_mut(clk).make_connectable(NetType::Clock);
    sys.connect(clock_src, clk, NetType::Clock).unwrap();

    (m, clk)
}

/// A module with one output RS port carrying `width` bits of tagged user
/// data plus a valid.
pub fn add_source(
    sys: &mut System,
    name: &str,
    clock_src: ObjectId,
    width: u32,
    tag: &str,
) -> ObjectId {
    let (m, _) = add_module(sys, name, clock_src, width);
    {
        let core = sys.object_mut(m).node_core_mut().unwrap();
        core.hdl.add_port("o_valid", 1, 1, Dir::Out);
        core.hdl.add_port("o_data", Expr::param("W"), 1, Dir::Out);
    }

    let mut pc = PortCore::new(Dir::Out);
    pc.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("o_valid"));
    pc.add_binding(
        SigRole::tagged(RoleKind::DataBundle, tag),
        HdlBinding::full("o_data", Expr::param("W")),
    );
    sys.add_object(m, "out", ObjectKind::PortRs(pc, RsPortData::new("clk")))
        .unwrap()
}

/// A source that also listens to backpressure.
pub fn add_source_with_ready(
    sys: &mut System,
    name: &str,
    clock_src: ObjectId,
    width: u32,
    tag: &str,
) -> ObjectId {
    let port = add_source(sys, name, clock_src, width, tag);
    let m = sys.object(port).parent.unwrap();
    {
        let core = sys.object_mut(m).node_core_mut().unwrap();
        core.hdl.add_port("i_ready", 1, 1, Dir::In);
    }
    sys.object_mut(port)
        .port_core_mut()
        .unwrap()
        .add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("i_ready"));
    port
}

/// A source whose port also drives a destination address.
pub fn add_addressed_source(
    sys: &mut System,
    name: &str,
    clock_src: ObjectId,
    width: u32,
    tag: &str,
    addr_bits: u32,
) -> ObjectId {
    let port = add_source(sys, name, clock_src, width, tag);
    let m = sys.object(port).parent.unwrap();
    {
        let core = sys.object_mut(m).node_core_mut().unwrap();
        core.hdl.add_port("o_addr", addr_bits, 1, Dir::Out);
    }
    sys.object_mut(port)
        .port_core_mut()
        .unwrap()
        .add_binding(
            SigRole::plain(RoleKind::Address),
            HdlBinding::full("o_addr", addr_bits),
        );
    port
}

/// A module with one input RS port consuming `width` bits of tagged user
/// data. `with_ready` adds a ready signal (backpressure-capable sink).
pub fn add_sink(
    sys: &mut System,
    name: &str,
    clock_src: ObjectId,
    width: u32,
    tag: &str,
    with_ready: bool,
) -> ObjectId {
    let (m, _) = add_module(sys, name, clock_src, width);
    {
        let core = sys.object_mut(m).node_core_mut().unwrap();
        core.hdl.add_port("i_valid", 1, 1, Dir::In);
        core.hdl.add_port("i_data", Expr::param("W"), 1, Dir::In);
        if with_ready {
            core.hdl.add_port("o_ready", 1, 1, Dir::Out);
        }
    }

    let mut pc = PortCore::new(Dir::In);
    pc.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
    pc.add_binding(
        SigRole::tagged(RoleKind::DataBundle, tag),
        HdlBinding::full("i_data", Expr::param("W")),
    );
    if with_ready {
        pc.add_binding(SigRole::plain(RoleKind::Ready), HdlBinding::bit("o_ready"));
    }
    sys.add_object(m, "in", ObjectKind::PortRs(pc, RsPortData::new("clk")))
        .unwrap()
}

pub fn nodes_matching(sys: &System, pred: fn(&ObjectKind) -> bool) -> Vec<ObjectId> {
    sys.objects()
        .filter(|(_, o)| pred(&o.kind))
        .map(|(id, _)| id)
        .collect()
}
