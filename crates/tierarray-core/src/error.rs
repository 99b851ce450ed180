//! Error types for tier allocation, accelerator calls and region operations.
//!
//! The taxonomy separates fatal construction/teardown failures from the
//! recoverable assignment failures a caller can act on:
//!
//! | Variant | Severity | Raised by |
//! |---------|----------|-----------|
//! | [`RegionError::Allocation`] | fatal | host or device allocation, device validation and the initial upload |
//! | [`RegionError::Capacity`] | recoverable | assigning a larger region into a smaller one |
//! | [`RegionError::DeviceMismatch`] | recoverable | assigning across devices |
//! | [`RegionError::Setup`] | fatal | pinned registration at construction |
//! | [`RegionError::Teardown`] | fatal | deregistration or free at destruction |
//! | [`RegionError::Device`] | fatal | device selection or transfer on a constructed region |

use std::error::Error;
use std::fmt;

use crate::id::DeviceId;
use crate::tier::Tier;

/// Errors reported by an [`Accelerator`](crate::Accelerator) implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The device id is outside `0..device_count`.
    #[error("invalid device {device}: node has {device_count} device(s)")]
    InvalidDevice {
        /// The rejected device.
        device: DeviceId,
        /// Number of devices the accelerator exposes.
        device_count: u32,
    },
    /// The device cannot satisfy an allocation.
    #[error("device {device} out of memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Device that ran out of memory.
        device: DeviceId,
        /// Size of the failed request.
        bytes: usize,
    },
    /// The address does not start a live device allocation.
    #[error("invalid device pointer {addr:#x}")]
    InvalidPointer {
        /// The rejected address.
        addr: u64,
    },
    /// The address range is empty or not fully inside one allocation.
    #[error("invalid range of {bytes} bytes at {addr:#x}")]
    InvalidRange {
        /// Start of the range.
        addr: u64,
        /// Length of the range in bytes.
        bytes: usize,
    },
    /// The host range overlaps an existing DMA registration.
    #[error("host memory at {addr:#x} is already registered")]
    AlreadyRegistered {
        /// Start of the rejected range.
        addr: u64,
    },
    /// No DMA registration starts at this address.
    #[error("host memory at {addr:#x} is not registered")]
    NotRegistered {
        /// The rejected address.
        addr: u64,
    },
    /// Any other driver failure.
    #[error("{call} failed: {reason}")]
    Failed {
        /// Name of the failing driver call.
        call: &'static str,
        /// Driver-supplied description.
        reason: String,
    },
}

/// Errors raised while obtaining memory for a region.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Regions always hold at least one byte.
    #[error("cannot allocate a zero-length region")]
    ZeroLength,
    /// `len * size_of::<T>()` does not fit in `usize`.
    #[error("{len} elements of {elem_size} bytes overflow the address space")]
    LayoutOverflow {
        /// Requested element count.
        len: usize,
        /// Size of one element in bytes.
        elem_size: usize,
    },
    /// The size rounded up to the alignment exceeds `isize::MAX`.
    #[error("invalid layout: {bytes} bytes aligned to {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        bytes: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The alignment is not a non-zero power of two.
    #[error("alignment {align} is not a power of two")]
    InvalidAlignment {
        /// The rejected alignment.
        align: usize,
    },
    /// The host allocator returned null.
    #[error("host out of memory allocating {bytes} bytes aligned to {align}")]
    OutOfMemory {
        /// Requested size in bytes.
        bytes: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// High-bandwidth memory was required but the node has none.
    #[error("no high-bandwidth memory node available")]
    HighBandwidthUnavailable,
    /// The kernel refused to place the pages on the high-bandwidth nodes.
    #[error("could not bind {bytes} bytes to high-bandwidth memory (os error {errno})")]
    Binding {
        /// Size of the block in bytes.
        bytes: usize,
        /// The `errno` reported by `mbind`.
        errno: i32,
    },
    /// The accelerator could not allocate device memory.
    #[error("device allocation failed: {0}")]
    Driver(#[source] DriverError),
}

/// Errors from constructing, assigning, accessing or tearing down a region.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// Memory could not be obtained; no region was created.
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocError),
    /// The assignment target is smaller than the source.
    #[error(
        "cannot assign from a larger region into a smaller one: \
         target holds {capacity} elements, source has {required}"
    )]
    Capacity {
        /// Element count of the target region.
        capacity: usize,
        /// Element count of the source region.
        required: usize,
    },
    /// Two device contexts or device regions refer to different devices.
    #[error("device mismatch: target is bound to device {target}, source to device {other}")]
    DeviceMismatch {
        /// Device of the assignment target.
        target: DeviceId,
        /// Device of the assignment source.
        other: DeviceId,
    },
    /// Pinned registration failed during construction.
    #[error("pinned registration failed: {0}")]
    Setup(#[source] DriverError),
    /// Deregistration or deallocation failed during teardown.
    #[error("teardown failed: {0}")]
    Teardown(#[source] DriverError),
    /// Device selection or a transfer failed.
    #[error("accelerator call failed: {0}")]
    Device(#[source] DriverError),
}

impl RegionError {
    /// Whether the error leaves no safe way to continue with the region.
    ///
    /// Capacity and device-mismatch failures leave both operands untouched
    /// and are recoverable; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RegionError::Capacity { .. } | RegionError::DeviceMismatch { .. }
        )
    }
}

/// Errors detected while validating tier configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A tier alignment is not a non-zero power of two.
    #[error("{tier} alignment {align} is not a power of two")]
    InvalidAlignment {
        /// The tier whose alignment is invalid.
        tier: Tier,
        /// The configured alignment.
        align: usize,
    },
}

/// A failed move-assignment, handing the untouched source back.
///
/// Moving a region consumes it, so when the assignment is refused the
/// caller receives the source region along with the reason.
pub struct Rejected<R> {
    /// Why the assignment was refused.
    pub error: RegionError,
    /// The source region, unchanged.
    pub region: R,
}

impl<R> Rejected<R> {
    /// Recover the source region.
    pub fn into_inner(self) -> R {
        self.region
    }
}

impl<R> fmt::Debug for Rejected<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<R> fmt::Display for Rejected<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "move-assignment rejected: {}", self.error)
    }
}

impl<R> Error for Rejected<R> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}
