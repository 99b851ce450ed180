//! Tier-aware owned array regions.
//!
//! An [`ArrayRegion`] is a fixed-length, owned buffer of plain-old-data
//! elements placed in one memory tier: ordinary DRAM, high-bandwidth
//! memory, DMA-registered (pinned) host memory, or accelerator device
//! memory. The tier is a type parameter, so a device buffer can never be
//! dereferenced on the host by accident, and assignment between any two
//! tiers picks the right transfer primitive.
//!
//! # Architecture
//!
//! ```text
//! FixedArray<T, N, P> (compile-time length)
//! └── ArrayRegion<T, P>
//!     ├── P: TierPolicy ──► Standard | HighBandwidth | Pinned | Device
//!     └── P::Buffer: TierBuffer
//!         ├── HostAllocation (aligned, zeroed; the only unsafe code)
//!         ├── PinnedBuffer
//!         │   ├── PinnedRegistration (unregistered first)
//!         │   └── HostAllocation
//!         └── DeviceAllocation
//!             └── DeviceContext ──► DeviceScope (selects, then restores)
//! ```
//!
//! Device and pinned tiers talk to the accelerator through the
//! [`Accelerator`](tierarray_core::Accelerator) trait. [`EmulatedAccelerator`]
//! provides host-backed devices for nodes without one.
//!
//! # Failure model
//!
//! Construction either fully succeeds or publishes nothing. Assignment
//! failures leave both operands unchanged. Teardown failures during drop
//! are logged and then handled by the configured [`TeardownPolicy`];
//! [`ArrayRegion::close`] returns them to the caller instead.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod config;
pub mod device;
pub mod emulated;
pub mod fixed;
pub mod hbw;
pub mod pinned;
pub mod policy;
pub mod raw;
pub mod region;
pub mod resize;

// Public re-exports for the primary API surface.
pub use config::{HbwPolicy, TeardownPolicy, TierConfig};
pub use device::{DeviceAllocation, DeviceContext, DeviceScope};
pub use emulated::EmulatedAccelerator;
pub use fixed::FixedArray;
pub use hbw::NodeMask;
pub use pinned::{PinnedBuffer, PinnedRegistration, RegistrationState};
pub use policy::{Device, HighBandwidth, HostBuffer, Pinned, Standard, TierBuffer, TierPolicy};
pub use raw::HostAllocation;
pub use region::ArrayRegion;
pub use resize::{adapt, adapt_into};
