// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The hierarchical design model.
//!
//! Everything in a design is an [`Object`] living in a per-[`System`]
//! arena: the system itself, module instances, interconnect primitives,
//! and ports. Objects own their children and endpoints; links live in
//! per-network containers on the system, tagged with the node that owns
//! them (the system root for ordinary links, a primitive node for its
//! internal input→output links).
//!
//! Ids are arena-local and never reused, which the snapshot/reintegrate
//! machinery relies on: a snapshot preserves ids, the inner flow mutates
//! the snapshot freely, and reintegration merges changes back by id.

use std::collections::BTreeMap;

use crate::core::address::{AddressVal, ADDR_ANY};
use crate::core::bits::BitsVal;
use crate::core::error::{Result, SynthError};
use crate::core::expr::Expr;
use crate::core::protocol::CarrierProtocol;

pub mod endpoint;
pub mod hdl;
pub mod link;
pub mod network;
pub mod port;
pub mod relations;

pub use endpoint::Endpoint;
pub use hdl::{HdlBinding, HdlPort, HdlState, NetAssignment, NetEnd, ResolvedBinding, SystemHdl};
pub use link::{Link, LinkId, LinkKind, LinksContainer, REGS_UNLIMITED};
pub use network::{Dir, NetType, UNLIMITED};
pub use port::{
    Backpressure, BpStatus, PortCore, RoleBinding, RoleKind, RsPortData, SigRole,
};
pub use relations::LinkRelations;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

/// A parameter on a node: already-resolved integer, symbolic expression,
/// or a constant bit array (converter tables).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Expr(Expr),
    Bits(BitsVal),
}

/// State common to node-like objects (systems, modules, primitives).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCore {
    /// HDL module name instantiated for this node.
    pub module_name: String,
    pub params: BTreeMap<String, ParamValue>,
    pub hdl: HdlState,
    /// Present on primitives that transport fields opaquely.
    pub carrier: Option<CarrierProtocol>,
}

impl NodeCore {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            params: BTreeMap::new(),
            hdl: HdlState::default(),
            carrier: None,
        }
    }

    pub fn with_carrier(mut self) -> Self {
        self.carrier = Some(CarrierProtocol::default());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitData {
    pub n_outputs: u32,
    pub unicast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeData {
    pub n_inputs: u32,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvData {
    pub table: Vec<(AddressVal, AddressVal)>,
    pub in_width: u32,
    pub out_width: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MDelayData {
    pub delay: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    System(NodeCore),
    Module(NodeCore),
    Split(NodeCore, SplitData),
    Merge(NodeCore, MergeData),
    Conv(NodeCore, ConvData),
    Reg(NodeCore),
    MDelay(NodeCore, MDelayData),
    ClockX(NodeCore),
    PortClock(PortCore),
    PortReset(PortCore),
    PortConduit(PortCore),
    PortConduitSub(PortCore, SigRole),
    PortRs(PortCore, RsPortData),
}

impl ObjectKind {
    pub fn is_node(&self) -> bool {
        matches!(
            self,
            ObjectKind::System(_)
                | ObjectKind::Module(_)
                | ObjectKind::Split(..)
                | ObjectKind::Merge(..)
                | ObjectKind::Conv(..)
                | ObjectKind::Reg(_)
                | ObjectKind::MDelay(..)
                | ObjectKind::ClockX(_)
        )
    }

    pub fn is_port(&self) -> bool {
        !self.is_node()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub name: String,
    pub parent: Option<ObjectId>,
    pub children: BTreeMap<String, ObjectId>,
    pub endpoints: Vec<Endpoint>,
    pub kind: ObjectKind,
}

impl Object {
    fn new(name: impl Into<String>, parent: Option<ObjectId>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            parent,
            children: BTreeMap::new(),
            endpoints: Vec::new(),
            kind,
        }
    }

    pub fn node_core(&self) -> Option<&NodeCore> {
        match &self.kind {
            ObjectKind::System(c)
            | ObjectKind::Module(c)
            | ObjectKind::Split(c, _)
            | ObjectKind::Merge(c, _)
            | ObjectKind::Conv(c, _)
            | ObjectKind::Reg(c)
            | ObjectKind::MDelay(c, _)
            | ObjectKind::ClockX(c) => Some(c),
            _ => None,
        }
    }

    pub fn node_core_mut(&mut self) -> Option<&mut NodeCore> {
        match &mut self.kind {
            ObjectKind::System(c)
            | ObjectKind::Module(c)
            | ObjectKind::Split(c, _)
            | ObjectKind::Merge(c, _)
            | ObjectKind::Conv(c, _)
            | ObjectKind::Reg(c)
            | ObjectKind::MDelay(c, _)
            | ObjectKind::ClockX(c) => Some(c),
            _ => None,
        }
    }

    pub fn port_core(&self) -> Option<&PortCore> {
        match &self.kind {
            ObjectKind::PortClock(c)
            | ObjectKind::PortReset(c)
            | ObjectKind::PortConduit(c)
            | ObjectKind::PortConduitSub(c, _)
            | ObjectKind::PortRs(c, _) => Some(c),
            _ => None,
        }
    }

    pub fn port_core_mut(&mut self) -> Option<&mut PortCore> {
        match &mut self.kind {
            ObjectKind::PortClock(c)
            | ObjectKind::PortReset(c)
            | ObjectKind::PortConduit(c)
            | ObjectKind::PortConduitSub(c, _)
            | ObjectKind::PortRs(c, _) => Some(c),
            _ => None,
        }
    }

    pub fn rs(&self) -> Option<&RsPortData> {
        match &self.kind {
            ObjectKind::PortRs(_, rs) => Some(rs),
            _ => None,
        }
    }

    pub fn rs_mut(&mut self) -> Option<&mut RsPortData> {
        match &mut self.kind {
            ObjectKind::PortRs(_, rs) => Some(rs),
            _ => None,
        }
    }

    /// The carrier protocol of the node *owning* this object is looked up
    /// through the system; this accessor is for node objects themselves.
    pub fn carrier(&self) -> Option<&CarrierProtocol> {
        self.node_core().and_then(|c| c.carrier.as_ref())
    }

    pub fn carrier_mut(&mut self) -> Option<&mut CarrierProtocol> {
        self.node_core_mut().and_then(|c| c.carrier.as_mut())
    }

    pub fn endpoint(&self, net: NetType, dir: Dir) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.net == net && e.dir == dir)
    }

    pub fn endpoint_mut(&mut self, net: NetType, dir: Dir) -> Option<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .find(|e| e.net == net && e.dir == dir)
    }

    /// Create both endpoints for a network if missing.
    pub fn make_connectable(&mut self, net: NetType) {
        for dir in [Dir::In, Dir::Out] {
            if self.endpoint(net, dir).is_none() {
                self.endpoints.push(Endpoint::new(net, dir));
            }
        }
    }
}

/// A user synchronization constraint: a signed sum of end-to-end chains
/// compared against a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConstraint {
    pub chains: Vec<ChainTerm>,
    pub op: ConstraintOp,
    pub rhs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTerm {
    pub sign: ChainSign,
    /// Logical links making up the chain, in order.
    pub links: Vec<LinkId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

/// Module names reserved for the interconnect primitives.
pub const RESERVED_MODULES: &[&str] = &[
    "weft_split",
    "weft_merge",
    "weft_merge_ex",
    "weft_conv",
    "weft_pipe_stage",
    "weft_mem_delay",
    "weft_clockx",
];

/// A compilable design: the arena of objects, the link containers, the
/// containment graph, and the user's synchronization constraints.
#[derive(Debug, Clone)]
pub struct System {
    name: String,
    objects: BTreeMap<ObjectId, Object>,
    next_object: u32,
    root: ObjectId,
    links: BTreeMap<NetType, LinksContainer>,
    pub relations: LinkRelations,
    pub sync_constraints: Vec<SyncConstraint>,
    /// User-declared temporally-exclusive logical link pairs.
    pub exclusive_pairs: Vec<(LinkId, LinkId)>,
    /// Per-system override of the flow-wide max logic depth.
    pub max_logic_depth: Option<u32>,
    pub hdl: SystemHdl,
    /// Ids captured when this system was created as a snapshot. Empty on
    /// ordinary systems.
    pub(crate) snapshot_seed_objects: Vec<ObjectId>,
    pub(crate) snapshot_seed_links: Vec<LinkId>,
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let root = ObjectId(0);
        let mut objects = BTreeMap::new();
        objects.insert(
            root,
            Object::new(name.clone(), None, ObjectKind::System(NodeCore::new(name.clone()))),
        );
        Self {
            name,
            objects,
            next_object: 1,
            root,
            links: BTreeMap::new(),
            relations: LinkRelations::new(),
            sync_constraints: Vec::new(),
            exclusive_pairs: Vec::new(),
            max_logic_depth: None,
            hdl: SystemHdl::default(),
            snapshot_seed_objects: Vec::new(),
            snapshot_seed_links: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[&id]
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        self.objects.get_mut(&id).expect("stale object id")
    }

    pub fn has_object(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects.iter().map(|(id, o)| (*id, o))
    }

    /// Dot-joined hierarchical path from the system root.
    pub fn hier_path(&self, id: ObjectId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let obj = &self.objects[&c];
            parts.push(obj.name.clone());
            cur = obj.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// Look up an object by path relative to the root (not including the
    /// system's own name).
    pub fn find(&self, path: &str) -> Option<ObjectId> {
        let mut cur = self.root;
        for part in path.split('.') {
            cur = *self.objects[&cur].children.get(part)?;
        }
        Some(cur)
    }

    //
    // Object construction
    //

    pub fn add_object(
        &mut self,
        parent: ObjectId,
        name: impl Into<String>,
        kind: ObjectKind,
    ) -> Result<ObjectId> {
        let name = name.into();
        if self.objects[&parent].children.contains_key(&name) {
            return Err(SynthError::synth(
                self.hier_path(parent),
                format!("already has a child named '{name}'"),
            ));
        }
        if let ObjectKind::Module(core) = &kind {
            if RESERVED_MODULES.contains(&core.module_name.as_str()) {
                return Err(SynthError::general(format!(
                    "module name '{}' is reserved",
                    core.module_name
                )));
            }
        }
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        self.objects
            .insert(id, Object::new(name.clone(), Some(parent), kind));
        self.objects.get_mut(&parent).unwrap().children.insert(name, id);
        Ok(id)
    }

    /// Remove an object, its children, and every link attached to any of
    /// them.
    pub fn remove_object(&mut self, id: ObjectId) {
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let cur = doomed[i];
            i += 1;
            doomed.extend(self.objects[&cur].children.values().copied());
        }

        // Disconnect all links touching doomed objects.
        let mut dead_links = Vec::new();
        for (net, container) in &self.links {
            for l in container.iter() {
                if doomed.contains(&l.src) || doomed.contains(&l.sink) || doomed.contains(&l.owner)
                {
                    dead_links.push(LinkId::new(*net, l.id.index));
                }
            }
        }
        for l in dead_links {
            self.disconnect(l);
        }

        if let Some(parent) = self.objects[&id].parent {
            let name = self.objects[&id].name.clone();
            self.objects.get_mut(&parent).unwrap().children.remove(&name);
        }
        for d in doomed {
            self.objects.remove(&d);
        }
    }

    //
    // Links
    //

    fn container(&mut self, net: NetType) -> &mut LinksContainer {
        self.links.entry(net).or_default()
    }

    fn default_kind(net: NetType) -> LinkKind {
        match net {
            NetType::RsLogical => LinkKind::RsLogical {
                src_addr: ADDR_ANY,
                sink_addr: ADDR_ANY,
                domain_id: None,
                flow_id: None,
            },
            NetType::RsPhys => LinkKind::RsPhys {
                latency: 0,
                logic_depth: 0,
            },
            NetType::Topo => LinkKind::Topo {
                min_regs: 0,
                max_regs: REGS_UNLIMITED,
            },
            _ => LinkKind::Plain,
        }
    }

    /// Connect two objects with a system-level link.
    pub fn connect(&mut self, src: ObjectId, sink: ObjectId, net: NetType) -> Result<LinkId> {
        self.connect_owned(self.root, src, sink, net)
    }

    /// Connect two ports of `owner` with a node-internal link.
    pub fn connect_internal(
        &mut self,
        owner: ObjectId,
        src: ObjectId,
        sink: ObjectId,
        net: NetType,
    ) -> Result<LinkId> {
        self.connect_owned(owner, src, sink, net)
    }

    fn connect_owned(
        &mut self,
        owner: ObjectId,
        src: ObjectId,
        sink: ObjectId,
        net: NetType,
    ) -> Result<LinkId> {
        for (id, dir) in [(src, Dir::Out), (sink, Dir::In)] {
            let path = self.hier_path(id);
            let obj = self.object_mut(id);
            if obj.endpoint(net, dir).is_none() {
                if Self::connectable(&obj.kind, net) {
                    obj.make_connectable(net);
                } else {
                    let role = if dir == Dir::Out { "source" } else { "sink" };
                    return Err(SynthError::synth(
                        path,
                        format!("not a {} {role}", net.name()),
                    ));
                }
            }
        }

        // Reserve the id first, then register it with both endpoints.
        let link = Link {
            id: LinkId::new(net, 0),
            owner,
            src,
            sink,
            kind: Self::default_kind(net),
        };
        let id = self.container(net).insert(net, link);

        let src_path = self.hier_path(src);
        if let Err(e) = self
            .object_mut(src)
            .endpoint_mut(net, Dir::Out)
            .unwrap()
            .add_link(id, &src_path)
        {
            self.container(net).remove(id);
            return Err(e);
        }
        let sink_path = self.hier_path(sink);
        if let Err(e) = self
            .object_mut(sink)
            .endpoint_mut(net, Dir::In)
            .unwrap()
            .add_link(id, &sink_path)
        {
            self.object_mut(src)
                .endpoint_mut(net, Dir::Out)
                .unwrap()
                .remove_link(id);
            self.container(net).remove(id);
            return Err(e);
        }

        Ok(id)
    }

    fn connectable(kind: &ObjectKind, net: NetType) -> bool {
        match net {
            NetType::Clock => matches!(kind, ObjectKind::PortClock(_)),
            NetType::Reset => matches!(kind, ObjectKind::PortReset(_)),
            NetType::Conduit => matches!(kind, ObjectKind::PortConduit(_)),
            NetType::ConduitSub => matches!(kind, ObjectKind::PortConduitSub(..)),
            NetType::RsLogical | NetType::RsPhys | NetType::RsSub => {
                matches!(kind, ObjectKind::PortRs(..))
            }
            NetType::Topo => matches!(
                kind,
                ObjectKind::PortRs(..)
                    | ObjectKind::Split(..)
                    | ObjectKind::Merge(..)
                    | ObjectKind::Reg(_)
            ),
        }
    }

    /// Create a logical RS link carrying user addresses, checking the
    /// endpoints' declared defaults for consistency.
    pub fn create_rs_link(
        &mut self,
        src: ObjectId,
        sink: ObjectId,
        src_addr: AddressVal,
        sink_addr: AddressVal,
    ) -> Result<LinkId> {
        for (field, a, b) in [
            (
                "default packet size",
                self.object(src).rs().and_then(|r| r.default_packet_size),
                self.object(sink).rs().and_then(|r| r.default_packet_size),
            ),
            (
                "importance",
                self.object(src).rs().and_then(|r| r.default_importance),
                self.object(sink).rs().and_then(|r| r.default_importance),
            ),
        ] {
            if let (Some(a), Some(b)) = (a, b) {
                if a != b {
                    return Err(SynthError::synth(
                        self.hier_path(src),
                        format!(
                            "conflicting {field} with {} ({a} vs {b})",
                            self.hier_path(sink)
                        ),
                    ));
                }
            }
        }

        let id = self.connect(src, sink, NetType::RsLogical)?;
        if let LinkKind::RsLogical {
            src_addr: sa,
            sink_addr: ka,
            ..
        } = &mut self.link_mut(id).unwrap().kind
        {
            *sa = src_addr;
            *ka = sink_addr;
        }
        Ok(id)
    }

    pub fn create_topo_link(&mut self, src: ObjectId, sink: ObjectId) -> Result<LinkId> {
        self.connect(src, sink, NetType::Topo)
    }

    pub fn set_topo_minmax(&mut self, id: LinkId, min: u32, max: u32) {
        if let Some(link) = self.link_mut(id) {
            if let LinkKind::Topo { min_regs, max_regs } = &mut link.kind {
                *min_regs = min;
                *max_regs = max;
            }
        }
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id.net).and_then(|c| c.get(id))
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id.net).and_then(|c| c.get_mut(id))
    }

    /// System-level (external) links of a network, in id order.
    pub fn links_of(&self, net: NetType) -> Vec<LinkId> {
        self.links
            .get(&net)
            .map(|c| {
                c.iter()
                    .filter(|l| l.owner == self.root)
                    .map(|l| l.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All links of a network including node-internal ones.
    pub fn all_links_of(&self, net: NetType) -> Vec<LinkId> {
        self.links
            .get(&net)
            .map(|c| c.iter().map(|l| l.id).collect())
            .unwrap_or_default()
    }

    pub fn is_internal_link(&self, id: LinkId) -> bool {
        self.link(id).map(|l| l.owner != self.root).unwrap_or(false)
    }

    /// Remove a link from its endpoints, its container, and the
    /// containment graph.
    pub fn disconnect(&mut self, id: LinkId) {
        let Some(link) = self.link(id).cloned() else {
            return;
        };
        for (obj, dir) in [(link.src, Dir::Out), (link.sink, Dir::In)] {
            if !self.has_object(obj) {
                continue;
            }
            if let Some(ep) = self.object_mut(obj).endpoint_mut(id.net, dir) {
                ep.remove_link(id);
            }
        }
        self.container(id.net).remove(id);
        self.relations.unregister_link(id);
    }

    /// Re-point a link's sink at a different object.
    pub fn reconnect_sink(&mut self, id: LinkId, new_sink: ObjectId) -> Result<()> {
        let link = self.link(id).cloned().expect("stale link id");
        if let Some(ep) = self.object_mut(link.sink).endpoint_mut(id.net, Dir::In) {
            ep.remove_link(id);
        }
        self.object_mut(new_sink).make_connectable(id.net);
        let path = self.hier_path(new_sink);
        self.object_mut(new_sink)
            .endpoint_mut(id.net, Dir::In)
            .unwrap()
            .add_link(id, &path)?;
        self.link_mut(id).unwrap().sink = new_sink;
        Ok(())
    }

    /// Re-point a link's source at a different object.
    pub fn reconnect_src(&mut self, id: LinkId, new_src: ObjectId) -> Result<()> {
        let link = self.link(id).cloned().expect("stale link id");
        if let Some(ep) = self.object_mut(link.src).endpoint_mut(id.net, Dir::Out) {
            ep.remove_link(id);
        }
        self.object_mut(new_src).make_connectable(id.net);
        let path = self.hier_path(new_src);
        self.object_mut(new_src)
            .endpoint_mut(id.net, Dir::Out)
            .unwrap()
            .add_link(id, &path)?;
        self.link_mut(id).unwrap().src = new_src;
        Ok(())
    }

    /// Splice a node into an existing connection:
    ///
    /// `src --orig--> sink` becomes
    /// `src --orig--> new_sink,  new_src --returned--> sink`.
    ///
    /// The new link inherits the original's containment parents.
    pub fn splice(
        &mut self,
        orig: LinkId,
        new_sink: ObjectId,
        new_src: ObjectId,
    ) -> Result<LinkId> {
        let orig_link = self.link(orig).cloned().expect("stale link id");
        let orig_sink = orig_link.sink;

        self.reconnect_sink(orig, new_sink)?;
        let new_link = self.connect(new_src, orig_sink, orig.net)?;

        for parent in self.relations.immediate_parents(orig) {
            self.relations.add(parent, new_link);
        }
        Ok(new_link)
    }

    //
    // Parameters
    //

    pub fn set_int_param(&mut self, node: ObjectId, name: impl Into<String>, value: i64) {
        if let Some(core) = self.object_mut(node).node_core_mut() {
            core.params.insert(name.into(), ParamValue::Int(value));
        }
    }

    pub fn set_expr_param(&mut self, node: ObjectId, name: impl Into<String>, value: Expr) {
        if let Some(core) = self.object_mut(node).node_core_mut() {
            core.params.insert(name.into(), ParamValue::Expr(value));
        }
    }

    pub fn set_bits_param(&mut self, node: ObjectId, name: impl Into<String>, value: BitsVal) {
        if let Some(core) = self.object_mut(node).node_core_mut() {
            core.params.insert(name.into(), ParamValue::Bits(value));
        }
    }

    /// Look up a parameter on a node, falling back to its ancestors,
    /// evaluating expression-valued parameters recursively.
    pub fn param_value(&self, node: ObjectId, name: &str) -> Option<i64> {
        let mut cur = Some(node);
        while let Some(c) = cur {
            let obj = &self.objects[&c];
            if let Some(core) = obj.node_core() {
                match core.params.get(name) {
                    Some(ParamValue::Int(v)) => return Some(*v),
                    Some(ParamValue::Expr(e)) => {
                        let resolver = |n: &str| {
                            if n == name {
                                return None; // self-reference guard
                            }
                            self.param_value(c, n)
                        };
                        return e.eval(&resolver).ok();
                    }
                    Some(ParamValue::Bits(_)) | None => {}
                }
            }
            cur = obj.parent;
        }
        None
    }

    /// Evaluate every expression-valued parameter on a node down to an
    /// integer. Idempotent.
    pub fn resolve_params(&mut self, node: ObjectId) -> Result<()> {
        let names: Vec<String> = match self.objects[&node].node_core() {
            Some(core) => core
                .params
                .iter()
                .filter(|(_, v)| matches!(v, ParamValue::Expr(_)))
                .map(|(k, _)| k.clone())
                .collect(),
            None => return Ok(()),
        };
        for name in names {
            let value = self.param_value(node, &name).ok_or_else(|| {
                SynthError::synth(
                    self.hier_path(node),
                    format!("could not resolve parameter '{name}'"),
                )
            })?;
            self.set_int_param(node, name, value);
        }
        Ok(())
    }

    /// Resolve parameters on every node in the system.
    pub fn resolve_all_params(&mut self) -> Result<()> {
        let nodes: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, o)| o.kind.is_node())
            .map(|(id, _)| *id)
            .collect();
        for n in nodes {
            self.resolve_params(n)?;
        }
        Ok(())
    }

    //
    // Port/clock helpers
    //

    /// A port's direction as seen from inside this system: boundary ports
    /// flip.
    pub fn effective_dir(&self, port: ObjectId) -> Dir {
        let obj = &self.objects[&port];
        let dir = obj.port_core().map(|c| c.dir).unwrap_or(Dir::Out);
        if obj.parent == Some(self.root) {
            dir.flipped()
        } else {
            dir
        }
    }

    /// The clock port an RS port is synchronous to.
    pub fn clock_port_of_rs(&self, port: ObjectId) -> Result<ObjectId> {
        let obj = &self.objects[&port];
        let rs = obj.rs().ok_or_else(|| {
            SynthError::synth(self.hier_path(port), "not an RS port")
        })?;
        let parent = obj.parent.expect("port with no parent");
        self.objects[&parent]
            .children
            .get(&rs.clock_port_name)
            .copied()
            .ok_or_else(|| {
                SynthError::synth(
                    self.hier_path(port),
                    format!("associated clock port '{}' not found", rs.clock_port_name),
                )
            })
    }

    /// Transitive driver of a clock sink: follow incoming clock links to
    /// the ultimate source.
    pub fn clock_driver(&self, clock_port: ObjectId) -> Option<ObjectId> {
        let mut cur = clock_port;
        let mut hops = 0;
        loop {
            let obj = &self.objects[&cur];
            let incoming = obj
                .endpoint(NetType::Clock, Dir::In)
                .and_then(|ep| ep.link0());
            match incoming {
                Some(l) => {
                    cur = self.link(l)?.src;
                    hops += 1;
                    if hops > self.objects.len() {
                        return None; // cycle guard
                    }
                }
                None => {
                    return if cur == clock_port { None } else { Some(cur) };
                }
            }
        }
    }

    //
    // Snapshot / reintegrate
    //

    /// Build an independent system containing the root, every top-level
    /// port, every object for which `keep_object` holds (plus ancestors
    /// and descendant ports), and every link accepted by `keep_link`
    /// whose two endpoint objects made it in.
    pub fn snapshot(
        &self,
        keep_object: &dyn Fn(ObjectId, &Object) -> bool,
        keep_link: &dyn Fn(&Link) -> bool,
    ) -> System {
        let mut included: Vec<ObjectId> = vec![self.root];

        // Top-level ports always come along (clock/reset sources, exports).
        for (_, child) in &self.objects[&self.root].children {
            if self.objects[child].kind.is_port() {
                self.include_with_descendants(*child, &mut included);
            }
        }

        for (id, obj) in self.objects() {
            if keep_object(id, obj) {
                // Ancestors first so parent chains stay intact, then the
                // whole subtree of the top-level node this object lives
                // in (a module's clock and reset ports travel with it).
                let mut top = id;
                let mut cur = Some(id);
                while let Some(c) = cur {
                    if !included.contains(&c) {
                        included.push(c);
                    }
                    if self.objects[&c].parent == Some(self.root) {
                        top = c;
                    }
                    cur = self.objects[&c].parent;
                }
                self.include_with_descendants(top, &mut included);
            }
        }

        let mut snap = System {
            name: self.name.clone(),
            objects: BTreeMap::new(),
            next_object: self.next_object,
            root: self.root,
            links: BTreeMap::new(),
            relations: LinkRelations::new(),
            sync_constraints: self.sync_constraints.clone(),
            exclusive_pairs: self.exclusive_pairs.clone(),
            max_logic_depth: self.max_logic_depth,
            hdl: SystemHdl::default(),
            snapshot_seed_objects: Vec::new(),
            snapshot_seed_links: Vec::new(),
        };

        for id in &included {
            let mut obj = self.objects[id].clone();
            // Drop references to excluded children and stale links; links
            // are re-registered below.
            obj.children.retain(|_, c| included.contains(c));
            for ep in &mut obj.endpoints {
                let keep: Vec<LinkId> = ep.links().to_vec();
                for l in keep {
                    ep.remove_link(l);
                }
            }
            snap.objects.insert(*id, obj);
        }

        // Copy qualifying links.
        let mut kept_links = Vec::new();
        for container in self.links.values() {
            for link in container.iter() {
                if !keep_link(link) {
                    continue;
                }
                if !included.contains(&link.src)
                    || !included.contains(&link.sink)
                    || !included.contains(&link.owner)
                {
                    continue;
                }
                snap.links
                    .entry(link.id.net)
                    .or_default()
                    .insert_with_id(link.clone());
                let _ = snap
                    .object_mut(link.src)
                    .endpoint_mut(link.id.net, Dir::Out)
                    .unwrap()
                    .add_link(link.id, "");
                let _ = snap
                    .object_mut(link.sink)
                    .endpoint_mut(link.id.net, Dir::In)
                    .unwrap()
                    .add_link(link.id, "");
                kept_links.push(link.id);
            }
        }

        // Keep id allocation aligned with the parent.
        for (net, container) in &self.links {
            snap.links
                .entry(*net)
                .or_default()
                .advance_next_index(container.next_index());
        }

        // Containment among kept links.
        for l in &kept_links {
            for child in self.relations.immediate_children(*l) {
                if kept_links.contains(&child) {
                    snap.relations.add(*l, child);
                }
            }
        }

        snap.snapshot_seed_objects = included;
        snap.snapshot_seed_links = kept_links;
        snap
    }

    fn include_with_descendants(&self, id: ObjectId, included: &mut Vec<ObjectId>) {
        if !included.contains(&id) {
            included.push(id);
        }
        for child in self.objects[&id].children.values() {
            self.include_with_descendants(*child, included);
        }
    }

    /// Merge a processed snapshot back. New objects and links move in,
    /// mutated ones replace their originals, and objects the snapshot
    /// deleted are deleted here too.
    pub fn reintegrate(&mut self, snap: System) {
        // Deletions first.
        for id in &snap.snapshot_seed_objects {
            if !snap.objects.contains_key(id) && self.objects.contains_key(id) {
                self.remove_object(*id);
            }
        }
        for id in &snap.snapshot_seed_links {
            if snap.link(*id).is_none() && self.link(*id).is_some() {
                self.disconnect(*id);
            }
        }

        // The authoritative endpoints of every surviving link: snapshot
        // state wins over parent state.
        let mut link_ends: BTreeMap<LinkId, (ObjectId, ObjectId)> = BTreeMap::new();
        for container in self.links.values() {
            for l in container.iter() {
                link_ends.insert(l.id, (l.src, l.sink));
            }
        }
        for container in snap.links.values() {
            for l in container.iter() {
                link_ends.insert(l.id, (l.src, l.sink));
            }
        }

        // Objects: replace or insert, merging children maps and link
        // registrations that exist only on the parent side (other
        // domains' connections to a shared object).
        for (id, snap_obj) in snap.objects {
            match self.objects.get_mut(&id) {
                Some(existing) => {
                    let mut merged = snap_obj;
                    for (name, child) in &existing.children {
                        merged.children.entry(name.clone()).or_insert(*child);
                    }
                    for ep in &existing.endpoints {
                        for l in ep.links() {
                            // Only restore registrations the final link
                            // state still justifies.
                            let valid = match (ep.dir, link_ends.get(l)) {
                                (Dir::Out, Some((src, _))) => *src == id,
                                (Dir::In, Some((_, sink))) => *sink == id,
                                _ => false,
                            };
                            if !valid {
                                continue;
                            }
                            match merged.endpoint_mut(ep.net, ep.dir) {
                                Some(m) => m.restore_link(*l),
                                None => {
                                    let mut fresh = Endpoint::new(ep.net, ep.dir);
                                    fresh.max_links = ep.max_links;
                                    fresh.restore_link(*l);
                                    merged.endpoints.push(fresh);
                                }
                            }
                        }
                    }
                    *existing = merged;
                }
                None => {
                    self.objects.insert(id, snap_obj);
                }
            }
        }
        self.next_object = self.next_object.max(snap.next_object);

        // Links: replace or insert.
        for (net, container) in snap.links {
            let own = self.links.entry(net).or_default();
            own.advance_next_index(container.next_index());
            for link in container.iter() {
                if own.get(link.id).is_some() {
                    *own.get_mut(link.id).unwrap() = link.clone();
                } else {
                    own.insert_with_id(link.clone());
                }
            }
        }

        self.relations.absorb(&snap.relations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys_with_two_ports() -> (System, ObjectId, ObjectId, ObjectId, ObjectId) {
        let mut sys = System::new("top");
        let ma = sys
            .add_object(sys.root(), "a", ObjectKind::Module(NodeCore::new("mod_a")))
            .unwrap();
        let mb = sys
            .add_object(sys.root(), "b", ObjectKind::Module(NodeCore::new("mod_b")))
            .unwrap();
        let pa = sys
            .add_object(
                ma,
                "out",
                ObjectKind::PortRs(PortCore::new(Dir::Out), RsPortData::new("clk")),
            )
            .unwrap();
        let pb = sys
            .add_object(
                mb,
                "in",
                ObjectKind::PortRs(PortCore::new(Dir::In), RsPortData::new("clk")),
            )
            .unwrap();
        (sys, ma, mb, pa, pb)
    }

    #[test]
    fn paths_and_lookup() {
        let (sys, _, _, pa, _) = sys_with_two_ports();
        assert_eq!(sys.hier_path(pa), "top.a.out");
        assert_eq!(sys.find("a.out"), Some(pa));
        assert_eq!(sys.find("a.nope"), None);
    }

    #[test]
    fn duplicate_child_names_rejected() {
        let mut sys = System::new("top");
        sys.add_object(sys.root(), "x", ObjectKind::Module(NodeCore::new("m")))
            .unwrap();
        assert!(sys
            .add_object(sys.root(), "x", ObjectKind::Module(NodeCore::new("m")))
            .is_err());
    }

    #[test]
    fn reserved_module_names_rejected() {
        let mut sys = System::new("top");
        assert!(sys
            .add_object(
                sys.root(),
                "sp",
                ObjectKind::Module(NodeCore::new("weft_split"))
            )
            .is_err());
    }

    #[test]
    fn connect_sets_endpoints_and_kind() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        let l = sys.create_rs_link(pa, pb, 0, ADDR_ANY).unwrap();
        let link = sys.link(l).unwrap();
        assert_eq!(link.src, pa);
        assert_eq!(link.sink, pb);
        assert!(matches!(link.kind, LinkKind::RsLogical { src_addr: 0, .. }));
        assert_eq!(
            sys.object(pa)
                .endpoint(NetType::RsLogical, Dir::Out)
                .unwrap()
                .link0(),
            Some(l)
        );
    }

    #[test]
    fn conflicting_defaults_error() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        sys.object_mut(pa).rs_mut().unwrap().default_packet_size = Some(4);
        sys.object_mut(pb).rs_mut().unwrap().default_packet_size = Some(8);
        assert!(sys.create_rs_link(pa, pb, 0, 0).is_err());
    }

    #[test]
    fn phys_link_caps() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        sys.connect(pa, pb, NetType::RsPhys).unwrap();
        let err = sys.connect(pa, pb, NetType::RsPhys);
        assert!(err.is_err());
    }

    #[test]
    fn splice_rewires_and_inherits_parents() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        let topo = sys.create_topo_link(pa, pb).unwrap();
        let phys = sys.connect(pa, pb, NetType::RsPhys).unwrap();
        sys.relations.add(topo, phys);

        // Splice a reg-like node with two RS ports in between.
        let reg = sys
            .add_object(sys.root(), "r", ObjectKind::Reg(NodeCore::new("weft_pipe_stage")))
            .unwrap();
        let rin = sys
            .add_object(
                reg,
                "in",
                ObjectKind::PortRs(PortCore::new(Dir::In), RsPortData::new("clock")),
            )
            .unwrap();
        let rout = sys
            .add_object(
                reg,
                "out",
                ObjectKind::PortRs(PortCore::new(Dir::Out), RsPortData::new("clock")),
            )
            .unwrap();

        let new_link = sys.splice(phys, rin, rout).unwrap();
        assert_eq!(sys.link(phys).unwrap().sink, rin);
        assert_eq!(sys.link(new_link).unwrap().src, rout);
        assert_eq!(sys.link(new_link).unwrap().sink, pb);
        assert_eq!(sys.relations.parents(new_link, NetType::Topo), vec![topo]);
    }

    #[test]
    fn param_resolution_is_idempotent() {
        let mut sys = System::new("top");
        let m = sys
            .add_object(sys.root(), "m", ObjectKind::Module(NodeCore::new("m")))
            .unwrap();
        sys.set_int_param(sys.root(), "W", 8);
        sys.set_expr_param(m, "WIDTH", Expr::add(Expr::param("W"), Expr::lit(1)));

        sys.resolve_params(m).unwrap();
        let first = sys.object(m).node_core().unwrap().params.clone();
        sys.resolve_params(m).unwrap();
        let second = sys.object(m).node_core().unwrap().params.clone();
        assert_eq!(first, second);
        assert_eq!(sys.param_value(m, "WIDTH"), Some(9));
    }

    #[test]
    fn effective_dir_flips_at_boundary() {
        let mut sys = System::new("top");
        let export = sys
            .add_object(
                sys.root(),
                "out",
                ObjectKind::PortRs(PortCore::new(Dir::Out), RsPortData::new("clk")),
            )
            .unwrap();
        assert_eq!(sys.effective_dir(export), Dir::In);
    }

    #[test]
    fn remove_object_cleans_links() {
        let (mut sys, ma, _, pa, pb) = sys_with_two_ports();
        let l = sys.create_rs_link(pa, pb, 0, 0).unwrap();
        sys.remove_object(ma);
        assert!(sys.link(l).is_none());
        assert!(!sys.has_object(pa));
        assert!(sys
            .object(pb)
            .endpoint(NetType::RsLogical, Dir::In)
            .map(|ep| !ep.is_connected())
            .unwrap_or(true));
    }

    #[test]
    fn snapshot_reintegrate_round_trip() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        let l = sys.create_rs_link(pa, pb, 0, 0).unwrap();

        let before_objects: Vec<ObjectId> = sys.objects().map(|(id, _)| id).collect();
        let snap = sys.snapshot(&|_, _| true, &|_| true);
        sys.reintegrate(snap);

        let after_objects: Vec<ObjectId> = sys.objects().map(|(id, _)| id).collect();
        assert_eq!(before_objects, after_objects);
        assert!(sys.link(l).is_some());
        assert_eq!(sys.link(l).unwrap().src, pa);
    }

    #[test]
    fn reintegrate_moves_new_objects_back() {
        let (mut sys, _, _, pa, pb) = sys_with_two_ports();
        sys.create_rs_link(pa, pb, 0, 0).unwrap();

        let mut snap = sys.snapshot(&|_, _| true, &|_| true);
        let added = snap
            .add_object(snap.root(), "new_node", ObjectKind::Reg(NodeCore::new("weft_pipe_stage")))
            .unwrap();

        sys.reintegrate(snap);
        assert!(sys.has_object(added));
        assert_eq!(sys.find("new_node"), Some(added));
    }
}
