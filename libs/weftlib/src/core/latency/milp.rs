// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Row-oriented MILP model.
//!
//! The formulation is plain data so it can be built and inspected
//! without a solver present; `solve` hands it to CBC when the
//! `coin_cbc` feature is enabled.

use crate::core::error::Result;
#[cfg(not(feature = "coin_cbc"))]
use crate::core::error::SynthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Integer, bounded below by zero.
    Integer,
    /// Binary 0/1.
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Le,
    Eq,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilpRow {
    pub terms: Vec<(VarId, f64)>,
    pub op: RowOp,
    pub rhs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjDirection {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilpProblem {
    vars: Vec<VarKind>,
    rows: Vec<MilpRow>,
    objective: Vec<(VarId, f64)>,
    direction: ObjDirection,
}

impl Default for MilpProblem {
    fn default() -> Self {
        Self {
            vars: Vec::new(),
            rows: Vec::new(),
            objective: Vec::new(),
            direction: ObjDirection::Minimize,
        }
    }
}

impl MilpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, kind: VarKind) -> VarId {
        self.vars.push(kind);
        VarId(self.vars.len() - 1)
    }

    pub fn add_row(&mut self, terms: Vec<(VarId, f64)>, op: RowOp, rhs: f64) {
        self.rows.push(MilpRow { terms, op, rhs });
    }

    pub fn set_objective(&mut self, terms: Vec<(VarId, f64)>, direction: ObjDirection) {
        self.objective = terms;
        self.direction = direction;
    }

    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[MilpRow] {
        &self.rows
    }

    pub fn objective(&self) -> &[(VarId, f64)] {
        &self.objective
    }

    /// Solve and return one value per variable.
    pub fn solve(&self) -> Result<Vec<f64>> {
        self.solve_impl()
    }

    #[cfg(feature = "coin_cbc")]
    fn solve_impl(&self) -> Result<Vec<f64>> {
        use crate::core::error::SynthError;
        use coin_cbc::{Model, Sense};

        let mut model = Model::default();
        model.set_parameter("logLevel", "0");

        let cols: Vec<coin_cbc::Col> = self
            .vars
            .iter()
            .map(|kind| match kind {
                VarKind::Integer => {
                    let c = model.add_integer();
                    model.set_col_lower(c, 0.0);
                    c
                }
                VarKind::Binary => model.add_binary(),
            })
            .collect();

        for row in &self.rows {
            let r = model.add_row();
            match row.op {
                RowOp::Le => model.set_row_upper(r, row.rhs),
                RowOp::Ge => model.set_row_lower(r, row.rhs),
                RowOp::Eq => {
                    model.set_row_lower(r, row.rhs);
                    model.set_row_upper(r, row.rhs);
                }
            }
            for (var, coef) in &row.terms {
                model.set_weight(r, cols[var.0], *coef);
            }
        }

        model.set_obj_sense(match self.direction {
            ObjDirection::Minimize => Sense::Minimize,
            ObjDirection::Maximize => Sense::Maximize,
        });
        for (var, coef) in &self.objective {
            model.set_obj_coeff(cols[var.0], *coef);
        }

        let solution = model.solve();
        if !solution.raw().is_proven_optimal() {
            return Err(SynthError::SolverFailure(
                "no optimal solution found".to_string(),
            ));
        }

        Ok(cols.iter().map(|c| solution.col(*c)).collect())
    }

    #[cfg(not(feature = "coin_cbc"))]
    fn solve_impl(&self) -> Result<Vec<f64>> {
        Err(SynthError::NoSolverBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulation_is_inspectable() {
        let mut p = MilpProblem::new();
        let x = p.add_var(VarKind::Integer);
        let y = p.add_var(VarKind::Binary);
        p.add_row(vec![(x, 1.0), (y, -1.0)], RowOp::Ge, 0.0);
        p.set_objective(vec![(x, 9.0)], ObjDirection::Minimize);

        assert_eq!(p.n_vars(), 2);
        assert_eq!(p.n_rows(), 1);
        assert_eq!(p.rows()[0].op, RowOp::Ge);
    }

    #[cfg(feature = "coin_cbc")]
    #[test]
    fn solves_a_small_program() {
        // minimize 3x + 2y  s.t.  x + y >= 4, x - y = 0, integers
        let mut p = MilpProblem::new();
        let x = p.add_var(VarKind::Integer);
        let y = p.add_var(VarKind::Integer);
        p.add_row(vec![(x, 1.0), (y, 1.0)], RowOp::Ge, 4.0);
        p.add_row(vec![(x, 1.0), (y, -1.0)], RowOp::Eq, 0.0);
        p.set_objective(vec![(x, 3.0), (y, 2.0)], ObjDirection::Minimize);

        let sol = p.solve().unwrap();
        assert_eq!(sol[0].round() as i64, 2);
        assert_eq!(sol[1].round() as i64, 2);
    }
}
