// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The latency solver.
//!
//! Builds a mixed-integer linear program whose integer variables are the
//! latencies of physical links and whose binary variables mark links
//! that must hold at least one register. Rows come from user
//! synchronization constraints, topo-link register bounds, and the
//! max-logic-depth cover over the register graph. The objective
//! minimizes registered bits.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::error::Result;
use crate::core::flow::link_width;
use crate::core::model::{ChainSign, ConstraintOp, Dir, LinkId, NetType, System, REGS_UNLIMITED};
use crate::core::options::FlowOptions;

pub mod milp;
pub mod reggraph;

use milp::{MilpProblem, ObjDirection, RowOp, VarId, VarKind};

#[derive(Debug, Default)]
struct SolverState {
    milp: MilpProblem,
    lat_vars: BTreeMap<LinkId, VarId>,
    lat_order: Vec<LinkId>,
    reg_vars: BTreeMap<LinkId, VarId>,
}

impl SolverState {
    fn lat_var(&mut self, link: LinkId) -> VarId {
        if let Some(v) = self.lat_vars.get(&link) {
            return *v;
        }
        let v = self.milp.add_var(VarKind::Integer);
        self.lat_vars.insert(link, v);
        self.lat_order.push(link);
        v
    }

    /// A reg variable comes tied to its link's latency variable with the
    /// auxiliary row `lat - reg >= 0`.
    fn reg_var(&mut self, link: LinkId) -> VarId {
        if let Some(v) = self.reg_vars.get(&link) {
            return *v;
        }
        let lat = self.lat_var(link);
        let reg = self.milp.add_var(VarKind::Binary);
        self.reg_vars.insert(link, reg);
        self.milp
            .add_row(vec![(lat, 1.0), (reg, -1.0)], RowOp::Ge, 0.0);
        reg
    }
}

/// Decompose signed chain terms of end-to-end links (logical or topo)
/// into latency-variable terms over their external physical links, plus
/// a constant from the fixed-latency internal links joining them. A
/// physical link shared by a `+` and a `-` chain cancels out.
fn process_e2e_links(
    sys: &System,
    st: &mut SolverState,
    chain_terms: &[(ChainSign, Vec<LinkId>)],
) -> (Vec<(VarId, f64)>, i64) {
    let mut coefs: BTreeMap<LinkId, i64> = BTreeMap::new();
    for (sign, e2e_links) in chain_terms {
        // Each chain counts a physical link once, however many of its
        // logical links ride it.
        let mut chain_phys: Vec<LinkId> = Vec::new();
        for e2e in e2e_links {
            for phys in sys.relations.children(*e2e, NetType::RsPhys) {
                if sys.link(phys).is_some() && !chain_phys.contains(&phys) {
                    chain_phys.push(phys);
                }
            }
        }
        let delta = match sign {
            ChainSign::Plus => 1,
            ChainSign::Minus => -1,
        };
        for phys in chain_phys {
            *coefs.entry(phys).or_insert(0) += delta;
        }
    }

    let mut terms = Vec::new();
    for (link, coef) in &coefs {
        if *coef == 0 {
            continue;
        }
        let var = st.lat_var(*link);
        terms.push((var, *coef as f64));
    }

    // Internal links bridging two members of the bag contribute their
    // fixed latency to the constant side, weighted like the link that
    // feeds them.
    let mut constant = 0i64;
    for (link, coef) in &coefs {
        if *coef == 0 {
            continue;
        }
        let ext_sink = sys.link(*link).unwrap().sink;
        let internal: Vec<LinkId> = sys
            .object(ext_sink)
            .endpoint(NetType::RsPhys, Dir::Out)
            .map(|ep| ep.links().to_vec())
            .unwrap_or_default();
        for int_link in internal {
            let int_sink = sys.link(int_link).unwrap().sink;
            let Some(other_phys) = sys
                .object(int_sink)
                .endpoint(NetType::RsPhys, Dir::Out)
                .and_then(|ep| ep.link0())
            else {
                continue;
            };
            if coefs.get(&other_phys).copied().unwrap_or(0) != 0 {
                constant += coef * sys.link(int_link).unwrap().latency() as i64;
            }
        }
    }

    (terms, constant)
}

fn process_sync_constraints(sys: &System, st: &mut SolverState) {
    for constraint in sys.sync_constraints.clone() {
        let mut chain_terms = Vec::new();
        let mut ignore = false;

        for chain in &constraint.chains {
            // Constraints naming links outside this domain are silently
            // dropped.
            if chain.links.iter().any(|l| sys.link(*l).is_none()) {
                ignore = true;
                break;
            }
            chain_terms.push((chain.sign, chain.links.clone()));
        }
        if ignore {
            continue;
        }

        let (terms, constant) = process_e2e_links(sys, st, &chain_terms);
        let mut rhs = constraint.rhs - constant;
        let op = match constraint.op {
            ConstraintOp::Lt => {
                rhs -= 1;
                RowOp::Le
            }
            ConstraintOp::Le => RowOp::Le,
            ConstraintOp::Eq => RowOp::Eq,
            ConstraintOp::Gt => {
                rhs += 1;
                RowOp::Ge
            }
            ConstraintOp::Ge => RowOp::Ge,
        };
        st.milp.add_row(terms, op, rhs as f64);
    }
}

fn process_topo_constraints(sys: &System, st: &mut SolverState) {
    for topo_link in sys.links_of(NetType::Topo) {
        let (min_regs, max_regs) =
            match &sys.link(topo_link).unwrap().kind {
                crate::core::model::LinkKind::Topo { min_regs, max_regs } => (*min_regs, *max_regs),
                _ => continue,
            };
        if min_regs == 0 && max_regs == REGS_UNLIMITED {
            continue;
        }

        let (terms, _) = process_e2e_links(sys, st, &[(ChainSign::Plus, vec![topo_link])]);

        if min_regs > 0 {
            st.milp.add_row(terms.clone(), RowOp::Ge, min_regs as f64);
        }
        if max_regs != REGS_UNLIMITED {
            st.milp.add_row(terms, RowOp::Le, max_regs as f64);
        }
    }
}

/// Construct the program for one domain, solve it, and write the latency
/// results onto the physical links.
pub fn solve_latency_constraints(sys: &mut System, dom_id: u32, opts: &FlowOptions) -> Result<()> {
    let max_depth = sys.max_logic_depth.unwrap_or(opts.max_logic_depth);
    let mut st = SolverState::default();

    process_sync_constraints(sys, &mut st);
    process_topo_constraints(sys, &mut st);

    let (mut rg, forced) = reggraph::build(sys, max_depth);
    for link in forced {
        let var = st.lat_var(link);
        st.milp.add_row(vec![(var, 1.0)], RowOp::Ge, 1.0);
    }

    reggraph::postprocess(&mut rg);
    if opts.dump_reggraph {
        let dot = rg.graph.to_dot(
            "reggraph",
            &|v| {
                rg.v_to_link
                    .get(&v)
                    .map(|l| format!("{:?}", l))
                    .unwrap_or_else(|| format!("term{}", v.0))
            },
            &|e| rg.weights.get(&e).copied().unwrap_or(0).to_string(),
        );
        std::fs::write(format!("{}_reggraph_{}.dot", sys.name(), dom_id), dot)?;
    }

    for cover in reggraph::cover_sets(&rg, max_depth) {
        let terms: Vec<(VarId, f64)> = cover.iter().map(|l| (st.reg_var(*l), 1.0)).collect();
        st.milp.add_row(terms, RowOp::Ge, 1.0);
    }

    if st.milp.n_rows() == 0 || st.milp.n_vars() == 0 {
        return Ok(());
    }

    // Objective: minimize registered bits. The +1 keeps zero-width links
    // from going free.
    let objective: Vec<(VarId, f64)> = st
        .lat_order
        .iter()
        .map(|link| {
            let width = link_width(sys, *link);
            (st.lat_vars[link], (width + 1) as f64)
        })
        .collect();
    st.milp.set_objective(objective, ObjDirection::Minimize);

    debug!(
        domain = dom_id,
        vars = st.milp.n_vars(),
        rows = st.milp.n_rows(),
        "solving latency constraints"
    );

    let values = st.milp.solve()?;
    for (link, var) in &st.lat_vars {
        let latency = values[var.0].round().max(0.0) as u32;
        sys.link_mut(*link).unwrap().set_latency(latency);
    }
    Ok(())
}

/// Evaluate a synchronization constraint against a system's current
/// state: per chain, the sum of its external physical link latencies
/// plus the fixed latencies of internal links bridging them. Used by
/// tests and diagnostics; returns `None` when a named link is absent.
pub fn evaluate_constraint(
    sys: &System,
    constraint: &crate::core::model::SyncConstraint,
) -> Option<i64> {
    let mut total = 0i64;
    for chain in &constraint.chains {
        let mut ext: Vec<LinkId> = Vec::new();
        for link in &chain.links {
            sys.link(*link)?;
            for phys in sys.relations.children(*link, NetType::RsPhys) {
                if sys.link(phys).is_some() && !ext.contains(&phys) {
                    ext.push(phys);
                }
            }
        }

        let mut chain_total = 0i64;
        for phys in &ext {
            chain_total += sys.link(*phys).unwrap().latency() as i64;

            let ext_sink = sys.link(*phys).unwrap().sink;
            let internal: Vec<LinkId> = sys
                .object(ext_sink)
                .endpoint(NetType::RsPhys, Dir::Out)
                .map(|ep| ep.links().to_vec())
                .unwrap_or_default();
            for int_link in internal {
                let int_sink = sys.link(int_link).unwrap().sink;
                let Some(other) = sys
                    .object(int_sink)
                    .endpoint(NetType::RsPhys, Dir::Out)
                    .and_then(|ep| ep.link0())
                else {
                    continue;
                };
                if ext.contains(&other) {
                    chain_total += sys.link(int_link).unwrap().latency() as i64;
                }
            }
        }

        total += match chain.sign {
            ChainSign::Plus => chain_total,
            ChainSign::Minus => -chain_total,
        };
    }
    Some(total)
}
