// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Integer parameter expressions.
//!
//! HDL port widths and binding offsets are expressions over a module's
//! integer parameters. They stay symbolic until HDL elaboration, when a
//! resolver closure supplies concrete values (node parameters first,
//! falling back to the enclosing system's parameters).

use std::fmt;

use crate::core::error::{Result, SynthError};

/// A name-lookup callback used while evaluating expressions.
pub type NameResolver<'a> = dyn Fn(&str) -> Option<i64> + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// An integer expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Lit(i64),
    Param(String),
    Op(ExprOp, Box<Expr>, Box<Expr>),
    /// Ceiling log2, as used for address widths.
    Clog2(Box<Expr>),
}

impl Expr {
    pub fn lit(v: i64) -> Self {
        Expr::Lit(v)
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::Op(ExprOp::Add, Box::new(lhs), Box::new(rhs))
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::Op(ExprOp::Sub, Box::new(lhs), Box::new(rhs))
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::Op(ExprOp::Mul, Box::new(lhs), Box::new(rhs))
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Expr::Op(ExprOp::Div, Box::new(lhs), Box::new(rhs))
    }

    pub fn clog2(inner: Expr) -> Self {
        Expr::Clog2(Box::new(inner))
    }

    /// True when the expression contains no parameter references.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Lit(_) => true,
            Expr::Param(_) => false,
            Expr::Op(_, l, r) => l.is_constant() && r.is_constant(),
            Expr::Clog2(e) => e.is_constant(),
        }
    }

    /// Evaluate with the given resolver.
    pub fn eval(&self, resolver: &NameResolver) -> Result<i64> {
        match self {
            Expr::Lit(v) => Ok(*v),
            Expr::Param(name) => resolver(name)
                .ok_or_else(|| SynthError::general(format!("unresolved parameter '{name}'"))),
            Expr::Op(op, l, r) => {
                let l = l.eval(resolver)?;
                let r = r.eval(resolver)?;
                Ok(match op {
                    ExprOp::Add => l + r,
                    ExprOp::Sub => l - r,
                    ExprOp::Mul => l * r,
                    ExprOp::Div => {
                        if r == 0 {
                            return Err(SynthError::general(format!(
                                "division by zero evaluating '{self}'"
                            )));
                        }
                        l / r
                    }
                })
            }
            Expr::Clog2(e) => {
                let v = e.eval(resolver)?;
                Ok(clog2(v.max(0) as u64) as i64)
            }
        }
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Lit(v)
    }
}

impl From<u32> for Expr {
    fn from(v: u32) -> Self {
        Expr::Lit(v as i64)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Lit(v as i64)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::Param(name.to_string())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "{v}"),
            Expr::Param(name) => write!(f, "{name}"),
            Expr::Op(op, l, r) => {
                let c = match op {
                    ExprOp::Add => '+',
                    ExprOp::Sub => '-',
                    ExprOp::Mul => '*',
                    ExprOp::Div => '/',
                };
                write!(f, "({l}{c}{r})")
            }
            Expr::Clog2(e) => write!(f, "$clog2({e})"),
        }
    }
}

/// Bits needed to represent values in `[0, v]`: `ceil(log2(v + 1))`.
pub fn clog2(v: u64) -> u32 {
    match v {
        0 => 0,
        _ => 64 - v.leading_zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_literals_and_ops() {
        let e = Expr::add(Expr::mul(Expr::lit(3), Expr::lit(4)), Expr::lit(2));
        assert_eq!(e.eval(&|_| None).unwrap(), 14);
        assert!(e.is_constant());
    }

    #[test]
    fn eval_params() {
        let e = Expr::sub(Expr::param("WIDTH"), Expr::lit(1));
        assert!(!e.is_constant());
        let r = |name: &str| (name == "WIDTH").then_some(8);
        assert_eq!(e.eval(&r).unwrap(), 7);
        assert!(e.eval(&|_| None).is_err());
    }

    #[test]
    fn clog2_values() {
        assert_eq!(clog2(0), 0);
        assert_eq!(clog2(1), 1);
        assert_eq!(clog2(7), 3);
        assert_eq!(clog2(8), 4);
        assert_eq!(clog2(12), 4);
    }

    #[test]
    fn display_round_trip_shape() {
        let e = Expr::div(Expr::param("W"), Expr::lit(2));
        assert_eq!(e.to_string(), "(W/2)");
        assert_eq!(Expr::clog2(Expr::lit(13)).to_string(), "$clog2(13)");
    }
}
