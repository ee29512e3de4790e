#![allow(dead_code)]

//! Shared utilities for benchmarks.
//!
//! Common constants and data generators used by the benchmark suite:
//! benchmark sizing parameters and a deterministic point-cloud generator.

use criterion::Criterion;
use ikd_tree::geometry::Point3D;
use tracing::info;

pub const BENCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
pub const BENCH_NUM_POINTS: i32 = 2000;
pub const BENCH_KNN_SIZE: usize = 10;
pub const BENCH_ALPHA_DELETE: f64 = 0.5;
pub const BENCH_ALPHA_BALANCE: f64 = 0.7;

pub fn generate_data() -> Vec<Point3D> {
    info!("Generating 3D data with {} points", BENCH_NUM_POINTS);
    let data: Vec<Point3D> = (0..BENCH_NUM_POINTS)
        .map(|i| Point3D::new(i as f64, (i * 7 % 997) as f64, (i * 13 % 991) as f64))
        .collect();
    info!("Finished generating 3D data ({} points)", data.len());
    data
}

pub fn configure_criterion() -> Criterion {
    Criterion::default().measurement_time(BENCH_TIMEOUT)
}
