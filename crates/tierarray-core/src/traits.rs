//! The accelerator seam.
//!
//! Every operation that touches device memory or the DMA subsystem goes
//! through an [`Accelerator`]. Regions hold a [`SharedAccelerator`] handle
//! and pass it explicitly instead of relying on hidden process state.

use std::sync::Arc;

use crate::error::DriverError;
use crate::id::{DeviceId, DevicePtr};

/// Driver interface for an accelerator runtime.
///
/// Mirrors the small subset of a GPU runtime API that tiered arrays need:
/// per-thread device selection, device allocation, synchronous copies, and
/// host memory registration for DMA.
///
/// Device selection is per calling thread. Allocation and copies act on the
/// device currently selected for the calling thread.
pub trait Accelerator: Send + Sync {
    /// Human-readable backend name, used in diagnostics.
    fn name(&self) -> &str;

    /// Number of devices visible to this process.
    fn device_count(&self) -> u32;

    /// Select `device` for subsequent calls from the current thread.
    fn set_device(&self, device: DeviceId) -> Result<(), DriverError>;

    /// The device selected for the current thread.
    fn current_device(&self) -> Result<DeviceId, DriverError>;

    /// Allocate `bytes` on the current device.
    ///
    /// The returned address is aligned to at least
    /// [`Alignment::DEVICE`](crate::Alignment::DEVICE).
    fn alloc(&self, bytes: usize) -> Result<DevicePtr, DriverError>;

    /// Release an allocation returned by [`alloc`](Accelerator::alloc).
    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError>;

    /// Copy host bytes into device memory starting at `dst`.
    fn copy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<(), DriverError>;

    /// Copy device memory starting at `src` into host bytes.
    fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), DriverError>;

    /// Copy `bytes` between two device addresses.
    fn copy_dtod(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<(), DriverError>;

    /// Page-lock and register `bytes` of host memory at `addr` for DMA.
    fn host_register(&self, addr: *mut u8, bytes: usize) -> Result<(), DriverError>;

    /// Undo a [`host_register`](Accelerator::host_register) for `addr`.
    fn host_unregister(&self, addr: *mut u8) -> Result<(), DriverError>;
}

/// Shared handle to an accelerator backend.
pub type SharedAccelerator = Arc<dyn Accelerator>;
