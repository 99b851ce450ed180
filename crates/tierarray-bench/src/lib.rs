//! Benchmark profiles for tierarray.
//!
//! - [`SIZES`]: element counts from one cache line to a few megabytes.
//! - [`emulated`]: a shared emulated accelerator for device and pinned
//!   benchmarks.
//! - [`ramp`]: deterministic `f32` input data.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use tierarray_core::SharedAccelerator;
use tierarray_region::EmulatedAccelerator;

/// Element counts benchmarked for every operation.
pub const SIZES: [usize; 4] = [16, 1_024, 65_536, 1_048_576];

/// An emulated accelerator with `devices` devices.
pub fn emulated(devices: u32) -> SharedAccelerator {
    Arc::new(EmulatedAccelerator::new(devices))
}

/// `len` values `0.0, 0.5, 1.0, …`.
pub fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32 * 0.5).collect()
}
