//! Reusable region fixtures.

use std::sync::Arc;

use tierarray_core::{DeviceId, Element, RegionError};
use tierarray_region::{ArrayRegion, Device, Pinned, Standard, TeardownPolicy};

use crate::CountingAccelerator;

/// Ascending sequence `0, 1, 2, …` of length `len`, as `u32`.
pub fn ascending(len: usize) -> Vec<u32> {
    (0..len as u32).collect()
}

/// Standard-tier region holding `values`.
pub fn standard_from<T: Element>(values: &[T]) -> Result<ArrayRegion<T, Standard>, RegionError> {
    ArrayRegion::from_slice(values, values.len(), Standard::default())
}

/// Pinned policy on `acc` that only logs teardown failures, so fault
/// injection tests do not abort the test binary.
pub fn pinned_logging(acc: &Arc<CountingAccelerator>) -> Pinned {
    Pinned::new(acc.clone()).with_teardown(TeardownPolicy::Log)
}

/// Device policy on `acc` that only logs teardown failures.
pub fn device_logging(acc: &Arc<CountingAccelerator>, device: u32) -> Device {
    Device::new(DeviceId(device), acc.clone()).with_teardown(TeardownPolicy::Log)
}
