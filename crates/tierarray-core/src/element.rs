//! The element constraint for array regions.

use bytemuck::Pod;

/// Element types that may live in any memory tier.
///
/// Regions move elements between address spaces as raw bytes, so `T` must be
/// trivially copyable with no padding and no invalid bit patterns
/// ([`Pod`]). `Default` supplies the value used to pad short source
/// sequences. Implemented automatically for every qualifying type.
pub trait Element: Pod + Default + Send + Sync {}

impl<T: Pod + Default + Send + Sync> Element for T {}
