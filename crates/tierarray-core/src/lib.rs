//! Core types and traits for tierarray.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary shared by the rest of the workspace: memory tiers, alignment,
//! device identifiers, the element constraint, the error taxonomy, and the
//! [`Accelerator`] trait that every device or DMA operation goes through.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod element;
pub mod error;
pub mod id;
pub mod tier;
pub mod traits;

pub use element::Element;
pub use error::{AllocError, ConfigError, DriverError, RegionError, Rejected};
pub use id::{DeviceId, DevicePtr};
pub use tier::{Alignment, Tier};
pub use traits::{Accelerator, SharedAccelerator};
