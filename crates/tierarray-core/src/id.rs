//! Strongly-typed device identifiers and opaque device addresses.

use std::fmt;

/// Identifies an accelerator within the node.
///
/// Device ids are dense, starting at zero, and bounded by
/// [`Accelerator::device_count`](crate::Accelerator::device_count).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Address of a byte in accelerator memory.
///
/// Device addresses are never dereferenced on the host. They only travel
/// back into [`Accelerator`](crate::Accelerator) calls or out to kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The raw address value.
    pub fn addr(self) -> u64 {
        self.0
    }

    /// The address `bytes` past this one.
    ///
    /// Wraps on overflow; the accelerator rejects out-of-range addresses.
    pub fn byte_add(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes as u64))
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
