// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Core of the interconnect synthesis library.

pub mod address;
pub mod bits;
pub mod elab;
pub mod error;
pub mod expr;
pub mod flow;
pub mod graph;
pub mod latency;
pub mod model;
pub mod nodes;
pub mod options;
pub mod primdb;
pub mod protocol;

pub mod prelude {
    //! Common imports for building and compiling systems.

    pub use crate::core::address::{AddressVal, ADDR_ANY};
    pub use crate::core::error::{Result, SynthError};
    pub use crate::core::expr::Expr;
    pub use crate::core::flow::compile;
    pub use crate::core::model::{
        ChainSign, ChainTerm, ConstraintOp, Dir, HdlBinding, LinkId, NetType, NodeCore, ObjectId,
        ObjectKind, PortCore, RoleKind, RsPortData, SigRole, SyncConstraint, System,
    };
    pub use crate::core::options::FlowOptions;
    pub use crate::core::primdb;
}
