// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Smallest useful flow: one producer, one consumer, a register floor on
//! the connection, and a dump of the resulting netlist state.

use anyhow::Result;
use weftlib::core::expr::Expr;
use weftlib::core::model::{
    Dir, HdlBinding, NetType, NodeCore, ObjectId, ObjectKind, PortCore, RoleKind, RsPortData,
    SigRole, System, REGS_UNLIMITED,
};
use weftlib::core::options::FlowOptions;
use weftlib::core::{flow, primdb};

fn clock_source(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Clock), HdlBinding::bit(name));
    let id = sys.add_object(sys.root(), name, ObjectKind::PortClock(core))?;
    sys.object_mut(id).make_connectable(NetType::Clock);
    Ok(id)
}

fn reset_source(sys: &mut System, name: &str) -> Result<ObjectId> {
    let mut core = PortCore::new(Dir::In);
    core.add_binding(SigRole::plain(RoleKind::Reset), HdlBinding::bit(name));
    let id = sys.add_object(sys.root(), name, ObjectKind::PortReset(core))?;
    sys.object_mut(id).make_connectable(NetType::Reset);
    Ok(id)
}

fn module(sys: &mut System, name: &str, clk_src: ObjectId) -> Result<ObjectId> {
    let m = sys.add_object(sys.root(), name, ObjectKind::Module(NodeCore::new(name)))?;
    sys.set_int_param(m, "W", 8);
    sys.object_mut(m)
        .node_core_mut()
        .unwrap()
        .hdl
        .add_port("clk", 1, 1, Dir::In);

    let mut clk_core = PortCore::new(Dir::In);
    clk_core.add_binding(SigRole::plain(RoleKind::Clock), HdlBinding::bit("clk"));
    let clk = sys.add_object(m, "clk", ObjectKind::PortClock(clk_core))?;
    sys.object_mut(clk).make_connectable(NetType::Clock);
    sys.connect(clk_src, clk, NetType::Clock)?;
    Ok(m)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut sys = System::new("demo");
    let clk = clock_source(&mut sys, "clk")?;
    reset_source(&mut sys, "rst")?;

    // Producer with an 8-bit payload.
    let producer = module(&mut sys, "producer", clk)?;
    {
        let hdl = &mut sys.object_mut(producer).node_core_mut().unwrap().hdl;
        hdl.add_port("o_valid", 1, 1, Dir::Out);
        hdl.add_port("o_data", Expr::param("W"), 1, Dir::Out);
    }
    let mut out_core = PortCore::new(Dir::Out);
    out_core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("o_valid"));
    out_core.add_binding(
        SigRole::tagged(RoleKind::DataBundle, "payload"),
        HdlBinding::full("o_data", Expr::param("W")),
    );
    let src_port = sys.add_object(
        producer,
        "out",
        ObjectKind::PortRs(out_core, RsPortData::new("clk")),
    )?;

    // Consumer.
    let consumer = module(&mut sys, "consumer", clk)?;
    {
        let hdl = &mut sys.object_mut(consumer).node_core_mut().unwrap().hdl;
        hdl.add_port("i_valid", 1, 1, Dir::In);
        hdl.add_port("i_data", Expr::param("W"), 1, Dir::In);
    }
    let mut in_core = PortCore::new(Dir::In);
    in_core.add_binding(SigRole::plain(RoleKind::Valid), HdlBinding::bit("i_valid"));
    in_core.add_binding(
        SigRole::tagged(RoleKind::DataBundle, "payload"),
        HdlBinding::full("i_data", Expr::param("W")),
    );
    let sink_port = sys.add_object(
        consumer,
        "in",
        ObjectKind::PortRs(in_core, RsPortData::new("clk")),
    )?;

    // One stream, with a three-register floor on its connection.
    sys.create_rs_link(src_port, sink_port, 0, 0)?;
    let topo = sys.create_topo_link(src_port, sink_port)?;
    sys.set_topo_minmax(topo, 3, REGS_UNLIMITED);

    flow::compile(&mut sys, &FlowOptions::default(), primdb::builtin())?;

    println!("nets:");
    for net in &sys.hdl.nets {
        println!("  {net:?}");
    }
    println!(
        "physical links: {}, nodes: {}",
        sys.links_of(NetType::RsPhys).len(),
        sys.objects().filter(|(_, o)| o.kind.is_node()).count() - 1,
    );
    Ok(())
}
