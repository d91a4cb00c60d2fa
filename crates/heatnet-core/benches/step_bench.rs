//! Criterion benchmarks for the heat core.
//!
//! Two benchmark groups:
//! - `build`: packing a full 16x32 reactor into a `PackedNetwork`
//! - `step`: one heat step over the same reactor, scratch space reused

use criterion::{Criterion, criterion_group, criterion_main};
use heatnet_core::layout::LayoutSnapshot;
use heatnet_core::network::{NetworkBuilder, NetworkLimits, PackedNetwork};
use heatnet_core::part::PartTable;
use heatnet_core::step::StepScratch;
use heatnet_core::test_utils::*;

/// A dense 16x32 reactor built from a repeating 4x4 tile.
fn build_reactor(parts: &PartTable) -> LayoutSnapshot {
    let tile = ["VXCX", "IFXO", "CX>X", "XPWV"];
    let rows: Vec<String> = (0..16)
        .map(|r| tile[r % 4].repeat(8))
        .collect();
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    layout_from_map(parts, &refs)
}

fn limits() -> NetworkLimits {
    NetworkLimits {
        max_inlets: 256,
        max_valves: 256,
        max_valve_neighbors: 1024,
        max_exchangers: 512,
        max_outlets: 256,
    }
}

fn bench_build(c: &mut Criterion) {
    let parts = standard_parts();
    let layout = build_reactor(&parts);
    let heat: Vec<f64> = (0..layout.dims.buffer_len()).map(|i| (i % 50) as f64 * 10.0).collect();
    let mut builder = NetworkBuilder::new();
    let mut net = PackedNetwork::new(limits());

    c.bench_function("build/16x32", |b| {
        b.iter(|| builder.build(&layout, &parts, &heat, &mut net));
    });
}

fn bench_step(c: &mut Criterion) {
    let parts = standard_parts();
    let layout = build_reactor(&parts);
    let start: Vec<f64> = (0..layout.dims.buffer_len()).map(|i| (i % 50) as f64 * 10.0).collect();
    let mut caps = Vec::new();
    layout.fill_capacity(&parts, &mut caps, layout.dims.buffer_len());
    let (net, _) = PackedNetwork::build(&layout, &parts, &start, limits());
    let mut scratch = StepScratch::new();
    let mut heat = start.clone();

    c.bench_function("step/16x32", |b| {
        b.iter(|| {
            heat.copy_from_slice(&start);
            scratch.step(&mut heat, &caps, &net, 1000.0, 1.0, None)
        });
    });
}

criterion_group!(benches, bench_build, bench_step);
criterion_main!(benches);
