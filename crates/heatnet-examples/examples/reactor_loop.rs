//! Reactor loop example: a mixed reactor driven through the orchestrator.
//!
//! Builds a layout with fuel, coolant, exchangers, vents, valves, an inlet
//! and outlets, then requests batches the way a game loop would, one per
//! frame, polling for results in between.
//!
//! Run with: `RUST_LOG=debug cargo run -p heatnet-examples --example reactor_loop`
//!
//! Pass a directory containing `config.{ron,toml,json}` to load the runtime
//! configuration from disk instead of using the worker defaults.

use std::path::PathBuf;
use std::time::Duration;

use heatnet_core::id::CellCoord;
use heatnet_core::test_utils::{layout_from_map, standard_parts};
use heatnet_data::load_config;
use heatnet_runtime::config::RuntimeConfig;
use heatnet_runtime::orchestrator::{Orchestrator, TickEvent};

const FRAMES: u32 = 40;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn main() {
    init_logging();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(dir) => load_config(&dir).unwrap_or_else(|e| panic!("loading config: {e}")),
        None => RuntimeConfig::worker(),
    };
    let parts = standard_parts();

    // --- Layout ---
    // F fuel, C coolant, X exchanger, V vent, I inlet, O outlet, W wide
    // outlet, > overflow valve, ^ top-up valve, P plating.
    let layout = layout_from_map(
        &parts,
        &[
            "VXCFCXV",
            "XCFCFCX",
            "C>CXC^C",
            "IXOWXIP",
        ],
    );

    let mut orch = Orchestrator::new(parts, config).unwrap_or_else(|e| panic!("bad config: {e}"));
    orch.reactor_mut().current_heat = 250.0;
    orch.reactor_mut().stirling_multiplier = 0.1;
    tracing::info!(execution = ?orch.execution(), dims = ?orch.dims(), "reactor ready");

    // --- Game loop ---
    // Every third frame asks for a double batch, as a game catching up would.
    for frame in 0..FRAMES {
        let ticks = if frame % 3 == 0 { 2 } else { 1 };
        orch.request_tick(layout.clone(), 1.0, ticks);
        std::thread::sleep(Duration::from_millis(5));
        report(frame, orch.poll());
    }
    report(FRAMES, orch.wait());

    // --- Segments ---
    let vented = orch.vent_segments(&layout, 1.0);
    let stats = orch.segments(&layout).stats();
    println!(
        "segments: {} (vent {:.1}, inlet {:.1}, outlet {:.1}), vented {vented:.2}",
        stats.segment_count, stats.total_vent, stats.total_inlet, stats.total_outlet
    );

    let hottest = (0..orch.dims().rows)
        .flat_map(|r| (0..orch.dims().cols).map(move |c| CellCoord::new(r, c)))
        .filter_map(|coord| orch.cell_heat(coord).map(|h| (coord, h)))
        .fold(None, |best: Option<(CellCoord, f64)>, (coord, h)| match best {
            Some((_, b)) if b >= h => best,
            _ => Some((coord, h)),
        });
    if let Some((coord, heat)) = hottest {
        println!("hottest cell: ({}, {}) at {heat:.2}", coord.row, coord.col);
    }
    println!(
        "reactor: heat {:.2}, power {:.2}",
        orch.reactor().current_heat,
        orch.reactor().current_power
    );
}

fn report(frame: u32, events: Vec<TickEvent>) {
    for event in events {
        match event {
            TickEvent::Applied(summary) => println!(
                "frame {frame:>2}: #{:<3} {} tick(s), reactor heat {:>8.2}, power {:>6.2}, inlets {:>6.2}, overloaded {}",
                summary.id.0,
                summary.ticks_run,
                summary.reactor_heat,
                summary.reactor_power,
                summary.heat_from_inlets,
                summary.explosion_indices.len()
            ),
            TickEvent::Failed { id, error } => println!("frame {frame:>2}: #{} failed: {error}", id.0),
        }
    }
}
