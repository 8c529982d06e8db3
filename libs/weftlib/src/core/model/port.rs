// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Ports, signal roles and role bindings.

use crate::core::model::hdl::HdlBinding;
use crate::core::model::network::Dir;
use crate::core::protocol::PortProtocol;

/// Signal roles recognized on ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoleKind {
    // Clock / reset ports
    Clock,
    Reset,
    // Conduit ports; Fwd/Rev follow/oppose the port's direction, the
    // rest are absolute.
    Fwd,
    Rev,
    In,
    Out,
    InOut,
    // RS ports
    Valid,
    Ready,
    Data,
    DataBundle,
    Eop,
    Address,
    /// Internal carrier region used by interconnect primitives.
    DataCarrier,
}

/// How a role's signal flows relative to the link direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSense {
    /// Same direction as the link (src drives sink).
    Fwd,
    /// Against the link (sink drives src), e.g. ready.
    Rev,
    /// Absolute input/output regardless of link sense.
    AbsIn,
    AbsOut,
    AbsInOut,
}

impl RoleKind {
    pub fn sense(&self) -> RoleSense {
        match self {
            RoleKind::Ready | RoleKind::Rev => RoleSense::Rev,
            RoleKind::In => RoleSense::AbsIn,
            RoleKind::Out => RoleSense::AbsOut,
            RoleKind::InOut => RoleSense::AbsInOut,
            _ => RoleSense::Fwd,
        }
    }

    /// Whether a role binding of this kind requires a tag.
    pub fn requires_tag(&self) -> bool {
        matches!(
            self,
            RoleKind::Fwd | RoleKind::Rev | RoleKind::In | RoleKind::Out | RoleKind::InOut
                | RoleKind::DataBundle
        )
    }
}

/// A (role kind, optional tag) pair identifying one signal of a port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SigRole {
    pub kind: RoleKind,
    pub tag: Option<String>,
}

impl SigRole {
    pub fn plain(kind: RoleKind) -> Self {
        Self { kind, tag: None }
    }

    pub fn tagged(kind: RoleKind, tag: impl Into<String>) -> Self {
        Self {
            kind,
            tag: Some(tag.into()),
        }
    }
}

/// Maps one signal role of a port to a slice of an HDL port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub role: SigRole,
    pub binding: HdlBinding,
}

/// Backpressure capability and decision for an RS port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpStatus {
    Unset,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpressure {
    pub configurable: bool,
    pub status: BpStatus,
}

impl Default for Backpressure {
    fn default() -> Self {
        Self {
            configurable: false,
            status: BpStatus::Disabled,
        }
    }
}

impl Backpressure {
    /// The flow may pick this port's backpressure.
    pub fn make_configurable(&mut self) {
        self.configurable = true;
        self.status = BpStatus::Unset;
    }

    /// Fixed-on backpressure (e.g. a FIFO input that can always stall).
    pub fn force_enable(&mut self) {
        self.configurable = false;
        self.status = BpStatus::Enabled;
    }
}

/// State common to all port variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCore {
    pub dir: Dir,
    pub bindings: Vec<RoleBinding>,
}

impl PortCore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(&mut self, role: SigRole, binding: HdlBinding) {
        self.bindings.push(RoleBinding { role, binding });
    }

    pub fn get_binding(&self, role: &SigRole) -> Option<&RoleBinding> {
        self.bindings.iter().find(|b| b.role == *role)
    }

    pub fn get_binding_kind(&self, kind: RoleKind) -> Option<&RoleBinding> {
        self.bindings.iter().find(|b| b.role.kind == kind)
    }
}

/// RS-port-specific state.
#[derive(Debug, Clone, PartialEq)]
pub struct RsPortData {
    /// Name of the sibling clock port this port is synchronous to.
    pub clock_port_name: String,
    pub domain_id: Option<u32>,
    pub proto: PortProtocol,
    pub bp: Backpressure,
    /// Worst-case LUT depth between this port and the nearest register
    /// inside the owning module. Annotated from the primitive database.
    pub logic_depth: u32,
    /// Optional user defaults checked for consistency at link time.
    pub default_packet_size: Option<u32>,
    pub default_importance: Option<u32>,
}

impl RsPortData {
    pub fn new(clock_port_name: impl Into<String>) -> Self {
        Self {
            clock_port_name: clock_port_name.into(),
            domain_id: None,
            proto: PortProtocol::default(),
            bp: Backpressure::default(),
            logic_depth: 0,
            default_packet_size: None,
            default_importance: None,
        }
    }
}
