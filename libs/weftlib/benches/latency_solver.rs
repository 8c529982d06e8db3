// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Constraint-generation benchmarks: snake enumeration over synthetic
//! register graphs of growing depth and fanout.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use weftlib::core::latency::reggraph::{cover_sets, RegGraph};
use weftlib::core::model::{LinkId, NetType};

/// `width` parallel chains of `depth` stages, unit logic depth between
/// stages, re-converging into a shared tail.
fn ladder(depth: usize, width: usize) -> RegGraph {
    let mut rg = RegGraph::default();
    let mut link_no = 0u32;
    let mut new_link_vert = |rg: &mut RegGraph| {
        let v = rg.graph.new_vert();
        let link = LinkId::new(NetType::RsPhys, link_no);
        link_no += 1;
        rg.v_to_link.insert(v, link);
        rg.link_to_v.insert(link, v);
        v
    };

    let tail = new_link_vert(&mut rg);
    for _ in 0..width {
        let mut prev = None;
        for _ in 0..depth {
            let v = new_link_vert(&mut rg);
            if let Some(p) = prev {
                let e = rg.graph.new_edge(p, v);
                rg.weights.insert(e, 1);
            }
            prev = Some(v);
        }
        let e = rg.graph.new_edge(prev.unwrap(), tail);
        rg.weights.insert(e, 1);
    }
    rg
}

fn bench_cover_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("reg_graph_cover");
    for depth in [64usize, 256, 1024] {
        let rg = ladder(depth, 3);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &rg, |b, rg| {
            b.iter(|| cover_sets(rg, 4));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cover_sets);
criterion_main!(benches);
