//! Memory tiers and alignment contracts.

use std::fmt;

use crate::error::AllocError;

/// A category of memory with its own allocation primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Ordinary host DRAM, aligned for SIMD access.
    Standard,
    /// High-bandwidth host memory (on-package HBM / MCDRAM).
    HighBandwidth,
    /// Host memory page-locked and registered for DMA transfer.
    Pinned,
    /// Memory resident on an accelerator; not host-addressable.
    Device,
}

impl Tier {
    /// Whether elements in this tier can be dereferenced from the host.
    pub fn is_host_accessible(self) -> bool {
        !matches!(self, Tier::Device)
    }

    /// Short lowercase name used in logs and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::HighBandwidth => "high-bandwidth",
            Tier::Pinned => "pinned",
            Tier::Device => "device",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A power-of-two byte alignment.
///
/// The alignment a region actually uses is the larger of this value and the
/// natural alignment of its element type (see [`Alignment::for_type`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alignment(usize);

impl Alignment {
    /// Cache-line alignment, wide enough for AVX-512 loads.
    pub const DEFAULT: Alignment = Alignment(64);

    /// Alignment guaranteed by accelerator allocations.
    pub const DEVICE: Alignment = Alignment(256);

    /// Validate and wrap a byte alignment.
    ///
    /// Returns [`AllocError::InvalidAlignment`] unless `bytes` is a non-zero
    /// power of two.
    pub fn new(bytes: usize) -> Result<Self, AllocError> {
        if bytes.is_power_of_two() {
            Ok(Self(bytes))
        } else {
            Err(AllocError::InvalidAlignment { align: bytes })
        }
    }

    /// The alignment in bytes.
    pub fn get(self) -> usize {
        self.0
    }

    /// The effective alignment for a buffer of `T`.
    pub fn for_type<T>(self) -> usize {
        self.0.max(std::mem::align_of::<T>())
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}
