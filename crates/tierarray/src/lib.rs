//! tierarray: owned arrays in a chosen memory tier.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the tierarray sub-crates. For most users, adding `tierarray` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tierarray::prelude::*;
//!
//! let accelerator: SharedAccelerator = Arc::new(EmulatedAccelerator::new(1));
//! let config = TierConfig::default();
//!
//! // Stage data in pinned host memory, then push it to device 0.
//! let staged = ArrayRegion::<f32, _>::from_slice(&[1.0, 2.0, 3.0], 3, config.pinned(accelerator.clone())?)?;
//! let mut on_device = FixedArray::<f32, 4, _>::new(config.device(DeviceId(0), accelerator))?;
//! on_device.copy_assign(&staged)?;
//! assert_eq!(on_device.to_vec()?, vec![1.0, 2.0, 3.0, 0.0]);
//!
//! // Assigning a larger region into a smaller one is refused.
//! let big = ArrayRegion::<f32, _>::new(8, config.standard()?)?;
//! assert!(matches!(on_device.copy_assign(&big), Err(RegionError::Capacity { .. })));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tierarray-core` | Tiers, alignment, ids, errors, the `Accelerator` trait |
//! | [`region`] | `tierarray-region` | Policies, regions, fixed arrays, device contexts, emulator |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and errors (`tierarray-core`).
///
/// Contains [`types::Tier`], [`types::Alignment`], the error taxonomy and
/// the [`types::Accelerator`] trait implemented by accelerator backends.
pub use tierarray_core as types;

/// Regions and tier policies (`tierarray-region`).
///
/// [`region::ArrayRegion`] and [`region::FixedArray`] over the
/// [`region::Standard`], [`region::HighBandwidth`], [`region::Pinned`] and
/// [`region::Device`] policies.
pub use tierarray_region as region;

/// Common imports for typical tierarray usage.
///
/// ```rust
/// use tierarray::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use tierarray_core::{
        Accelerator, Alignment, DeviceId, DevicePtr, Element, SharedAccelerator, Tier,
    };

    // Errors
    pub use tierarray_core::{AllocError, ConfigError, DriverError, RegionError, Rejected};

    // Regions and policies
    pub use tierarray_region::{
        adapt, ArrayRegion, Device, DeviceContext, EmulatedAccelerator, FixedArray, HbwPolicy,
        HighBandwidth, Pinned, Standard, TeardownPolicy, TierConfig, TierPolicy,
    };
}
