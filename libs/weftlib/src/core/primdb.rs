// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Primitive database.
//!
//! Area and timing numbers for the interconnect primitives come from
//! tables indexed by categorical columns (width, cycles, backpressure).
//! Each row holds an area metric and a matrix of LUT depths between
//! timing nodes (source terminal × sink terminal). Interpolation between
//! rows is linear in the distinguishing column and done by the caller.
//!
//! A built-in database seeds plausible numbers for every reserved
//! primitive so a flow can run without external table files.

use std::collections::BTreeMap;
use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

/// Area of one primitive configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaMetrics {
    pub lut: i64,
    pub comb: i64,
    pub reg: i64,
    pub mem_alm: i64,
    pub dist_ram: i64,
}

impl Add for AreaMetrics {
    type Output = AreaMetrics;
    fn add(self, o: AreaMetrics) -> AreaMetrics {
        AreaMetrics {
            lut: self.lut + o.lut,
            comb: self.comb + o.comb,
            reg: self.reg + o.reg,
            mem_alm: self.mem_alm + o.mem_alm,
            dist_ram: self.dist_ram + o.dist_ram,
        }
    }
}

impl Sub for AreaMetrics {
    type Output = AreaMetrics;
    fn sub(self, o: AreaMetrics) -> AreaMetrics {
        AreaMetrics {
            lut: self.lut - o.lut,
            comb: self.comb - o.comb,
            reg: self.reg - o.reg,
            mem_alm: self.mem_alm - o.mem_alm,
            dist_ram: self.dist_ram - o.dist_ram,
        }
    }
}

impl Mul<i64> for AreaMetrics {
    type Output = AreaMetrics;
    fn mul(self, k: i64) -> AreaMetrics {
        AreaMetrics {
            lut: self.lut * k,
            comb: self.comb * k,
            reg: self.reg * k,
            mem_alm: self.mem_alm * k,
            dist_ram: self.dist_ram * k,
        }
    }
}

/// LUT-depth matrix between source and sink timing nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TnodeTable {
    n_sinks: usize,
    vals: Vec<u32>,
}

impl TnodeTable {
    pub fn new(n_srcs: usize, n_sinks: usize) -> Self {
        Self {
            n_sinks,
            vals: vec![0; n_srcs * n_sinks],
        }
    }

    pub fn set(&mut self, src: usize, sink: usize, val: u32) -> &mut Self {
        self.vals[src * self.n_sinks + sink] = val;
        self
    }

    pub fn get(&self, src: usize, sink: usize) -> u32 {
        self.vals[src * self.n_sinks + sink]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimRow {
    pub area: AreaMetrics,
    pub tnodes: TnodeTable,
}

/// One primitive's table, keyed by its categorical column values.
#[derive(Debug, Clone, Default)]
pub struct PrimDb {
    rows: BTreeMap<Vec<u32>, PrimRow>,
}

impl PrimDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_row(&mut self, cols: Vec<u32>, row: PrimRow) {
        self.rows.insert(cols, row);
    }

    pub fn get_row(&self, cols: &[u32]) -> Option<&PrimRow> {
        self.rows.get(cols)
    }

    pub fn get_area_metrics(row: &PrimRow) -> &AreaMetrics {
        &row.area
    }

    pub fn get_tnodes(row: &PrimRow) -> &TnodeTable {
        &row.tnodes
    }

    pub fn get_tnode_val(tnodes: &TnodeTable, src: usize, sink: usize) -> u32 {
        tnodes.get(src, sink)
    }
}

/// Timing-node indices shared by the point-to-point primitives.
pub mod tnode {
    pub const I_VALID: usize = 0;
    pub const I_READY: usize = 1;
    pub const I_DATA: usize = 2;
    pub const INT: usize = 3;

    pub const O_VALID: usize = 0;
    pub const O_READY: usize = 1;
    pub const O_DATA: usize = 2;
    pub const INT_SINK: usize = 3;

    pub const N_SRC: usize = 4;
    pub const N_SINK: usize = 4;
}

/// Databases for every reserved primitive, keyed by module name.
#[derive(Debug, Clone, Default)]
pub struct PrimDbSet {
    dbs: BTreeMap<String, PrimDb>,
}

impl PrimDbSet {
    pub fn insert(&mut self, module: impl Into<String>, db: PrimDb) {
        self.dbs.insert(module.into(), db);
    }

    pub fn get(&self, module: &str) -> Option<&PrimDb> {
        self.dbs.get(module)
    }
}

fn symmetric_row(area: AreaMetrics, in_depth: u32, out_depth: u32) -> PrimRow {
    let mut t = TnodeTable::new(tnode::N_SRC, tnode::N_SINK);
    for src in [tnode::I_VALID, tnode::I_READY, tnode::I_DATA] {
        t.set(src, tnode::INT_SINK, in_depth);
    }
    for sink in [tnode::O_VALID, tnode::O_READY, tnode::O_DATA] {
        t.set(tnode::INT, sink, out_depth);
    }
    PrimRow { area, tnodes: t }
}

/// The built-in tables. Numbers are seed values in the same shape real
/// characterization data takes: anchors at widths 0/1/2 for linear
/// interpolation, power-of-two cycle counts for the memory delay.
pub fn builtin() -> &'static PrimDbSet {
    static SET: OnceLock<PrimDbSet> = OnceLock::new();
    SET.get_or_init(|| {
        let mut set = PrimDbSet::default();

        // weft_pipe_stage: cols [width, bp]
        let mut reg = PrimDb::new();
        for bp in 0..=1u32 {
            for width in 0..=2u32 {
                let area = AreaMetrics {
                    lut: (bp * 2) as i64,
                    comb: (width + bp) as i64,
                    reg: (width + 2) as i64,
                    mem_alm: 0,
                    dist_ram: 0,
                };
                reg.insert_row(vec![width, bp], symmetric_row(area, 0, if bp == 1 { 1 } else { 0 }));
            }
        }
        set.insert("weft_pipe_stage", reg);

        // weft_mem_delay: cols [width, cycles, bp]
        let mut mdelay = PrimDb::new();
        for bp in 0..=1u32 {
            for cycles in [2u32, 4, 8, 16, 32] {
                for width in [0u32, 1, 2, 4, 8, 16, 20, 21] {
                    let blocks = if width == 0 { 0 } else { 1 + width / 21 };
                    // Address counters and handshake dominate below the
                    // LUTRAM block granularity.
                    let area = AreaMetrics {
                        lut: (4 + bp * 2) as i64,
                        comb: 4,
                        reg: 6,
                        mem_alm: (20 + blocks * 10) as i64,
                        dist_ram: (width * cycles) as i64,
                    };
                    mdelay.insert_row(vec![width, cycles, bp], symmetric_row(area, 1, 1));
                }
            }
        }
        set.insert("weft_mem_delay", mdelay);

        // weft_clockx: cols [width, bp]
        let mut clockx = PrimDb::new();
        for bp in 0..=1u32 {
            for width in 0..=2u32 {
                let area = AreaMetrics {
                    lut: (12 + width * 2) as i64,
                    comb: 8,
                    reg: (20 + width * 2) as i64,
                    mem_alm: 4,
                    dist_ram: 0,
                };
                clockx.insert_row(vec![width, bp], symmetric_row(area, 1, 2));
            }
        }
        set.insert("weft_clockx", clockx);

        // weft_split / weft_merge / weft_merge_ex / weft_conv:
        // cols [width, bp]; small combinational depths.
        for (module, in_depth, out_depth, comb) in [
            ("weft_split", 1, 1, 2),
            ("weft_merge", 2, 2, 4),
            ("weft_merge_ex", 1, 1, 2),
            ("weft_conv", 0, 1, 2),
        ] {
            let mut db = PrimDb::new();
            for bp in 0..=1u32 {
                for width in 0..=2u32 {
                    let area = AreaMetrics {
                        lut: (comb + width) as i64,
                        comb: (comb + width) as i64,
                        reg: 2,
                        mem_alm: 0,
                        dist_ram: 0,
                    };
                    db.insert_row(vec![width, bp], symmetric_row(area, in_depth, out_depth));
                }
            }
            set.insert(module, db);
        }

        set
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_rows_for_all_primitives() {
        let set = builtin();
        for module in crate::core::model::RESERVED_MODULES {
            assert!(set.get(module).is_some(), "missing db for {module}");
        }
    }

    #[test]
    fn row_lookup_and_tnodes() {
        let db = builtin().get("weft_clockx").unwrap();
        let row = db.get_row(&[1, 1]).unwrap();
        let t = PrimDb::get_tnodes(row);
        assert_eq!(PrimDb::get_tnode_val(t, tnode::I_DATA, tnode::INT_SINK), 1);
        assert_eq!(PrimDb::get_tnode_val(t, tnode::INT, tnode::O_DATA), 2);
    }

    #[test]
    fn metrics_arithmetic() {
        let a = AreaMetrics {
            lut: 1,
            comb: 2,
            reg: 3,
            mem_alm: 4,
            dist_ram: 5,
        };
        let b = a + a;
        assert_eq!(b.reg, 6);
        assert_eq!((b - a), a);
        assert_eq!((a * 3).dist_ram, 15);
    }
}
