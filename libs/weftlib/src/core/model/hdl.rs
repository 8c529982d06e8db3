// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! HDL-facing state.
//!
//! Each node exposes named HDL ports whose widths and depths are integer
//! parameter expressions. Role bindings reference slices of those ports.
//! Elaboration turns links into `NetAssignment`s, the bit-level
//! connections between port slices (or constant tie-offs) an HDL writer
//! consumes.

use std::collections::BTreeMap;

use crate::core::bits::BitsVal;
use crate::core::error::{Result, SynthError};
use crate::core::expr::{Expr, NameResolver};
use crate::core::model::network::Dir;
use crate::core::model::ObjectId;

/// A named HDL port on a module, `depth` slices of `width` bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlPort {
    pub name: String,
    pub width: Expr,
    pub depth: Expr,
    pub dir: Dir,
}

/// The set of HDL ports belonging to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdlState {
    ports: BTreeMap<String, HdlPort>,
}

impl HdlState {
    pub fn add_port(
        &mut self,
        name: impl Into<String>,
        width: impl Into<Expr>,
        depth: impl Into<Expr>,
        dir: Dir,
    ) {
        let name = name.into();
        self.ports.insert(
            name.clone(),
            HdlPort {
                name,
                width: width.into(),
                depth: depth.into(),
                dir,
            },
        );
    }

    pub fn get_port(&self, name: &str) -> Option<&HdlPort> {
        self.ports.get(name)
    }

    pub fn ports(&self) -> impl Iterator<Item = &HdlPort> {
        self.ports.values()
    }
}

/// A reference into a named HDL port, parameterized by a two-dimensional
/// slice: (low bit, bit width, low slice, slice count). All four are
/// expressions resolved at elaboration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlBinding {
    pub port: String,
    pub lo_bit: Expr,
    pub bits: Expr,
    pub lo_slice: Expr,
    pub slices: Expr,
}

impl HdlBinding {
    /// Bind the whole 1-bit port.
    pub fn bit(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            lo_bit: Expr::lit(0),
            bits: Expr::lit(1),
            lo_slice: Expr::lit(0),
            slices: Expr::lit(1),
        }
    }

    /// Bind the full width of a port.
    pub fn full(port: impl Into<String>, width: impl Into<Expr>) -> Self {
        Self {
            port: port.into(),
            lo_bit: Expr::lit(0),
            bits: width.into(),
            lo_slice: Expr::lit(0),
            slices: Expr::lit(1),
        }
    }

    pub fn with_lo_bit(mut self, lo: impl Into<Expr>) -> Self {
        self.lo_bit = lo.into();
        self
    }

    pub fn with_lo_slice(mut self, lo: impl Into<Expr>) -> Self {
        self.lo_slice = lo.into();
        self
    }

    pub fn resolve(&self, resolver: &NameResolver) -> Result<ResolvedBinding> {
        let check = |v: i64, what: &str| -> Result<u32> {
            u32::try_from(v).map_err(|_| {
                SynthError::general(format!("binding {what} of '{}' is negative", self.port))
            })
        };
        Ok(ResolvedBinding {
            port: self.port.clone(),
            lo_bit: check(self.lo_bit.eval(resolver)?, "lo_bit")?,
            bits: check(self.bits.eval(resolver)?, "bits")?,
            lo_slice: check(self.lo_slice.eval(resolver)?, "lo_slice")?,
            slices: check(self.slices.eval(resolver)?, "slices")?,
        })
    }
}

/// An `HdlBinding` with its expressions evaluated to integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub port: String,
    pub lo_bit: u32,
    pub bits: u32,
    pub lo_slice: u32,
    pub slices: u32,
}

/// One side of a net assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEnd {
    Port {
        node: ObjectId,
        port: String,
        lo_bit: u32,
        lo_slice: u32,
    },
    Const(BitsVal),
}

/// A bit-level connection emitted by elaboration.
#[derive(Debug, Clone, PartialEq)]
pub struct NetAssignment {
    pub src: NetEnd,
    pub dst: NetEnd,
    pub width: u32,
    pub slices: u32,
}

/// The per-system collection of elaborated nets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemHdl {
    pub nets: Vec<NetAssignment>,
    /// Connected (non-constant) field width emitted per physical RS
    /// link; agrees with the protocol width rule by construction.
    pub rs_link_widths: std::collections::BTreeMap<super::LinkId, u32>,
}

impl SystemHdl {
    pub fn connect(
        &mut self,
        src_node: ObjectId,
        src: &ResolvedBinding,
        src_extra_lsb: u32,
        dst_node: ObjectId,
        dst: &ResolvedBinding,
        dst_extra_lsb: u32,
        width: u32,
    ) {
        self.nets.push(NetAssignment {
            src: NetEnd::Port {
                node: src_node,
                port: src.port.clone(),
                lo_bit: src.lo_bit + src_extra_lsb,
                lo_slice: src.lo_slice,
            },
            dst: NetEnd::Port {
                node: dst_node,
                port: dst.port.clone(),
                lo_bit: dst.lo_bit + dst_extra_lsb,
                lo_slice: dst.lo_slice,
            },
            width,
            slices: 1,
        });
    }

    pub fn tie(
        &mut self,
        dst_node: ObjectId,
        dst: &ResolvedBinding,
        dst_extra_lsb: u32,
        value: BitsVal,
    ) {
        let width = value.width();
        self.nets.push(NetAssignment {
            src: NetEnd::Const(value),
            dst: NetEnd::Port {
                node: dst_node,
                port: dst.port.clone(),
                lo_bit: dst.lo_bit + dst_extra_lsb,
                lo_slice: dst.lo_slice,
            },
            width,
            slices: 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_resolution() {
        let b = HdlBinding::full("i_data", "WIDTH").with_lo_slice(Expr::lit(2));
        let resolver = |name: &str| (name == "WIDTH").then_some(9);
        let r = b.resolve(&resolver).unwrap();
        assert_eq!(r.bits, 9);
        assert_eq!(r.lo_slice, 2);
        assert_eq!(r.lo_bit, 0);
    }

    #[test]
    fn unresolved_parameter_is_an_error() {
        let b = HdlBinding::full("i_data", "WIDTH");
        assert!(b.resolve(&|_| None).is_err());
    }
}
