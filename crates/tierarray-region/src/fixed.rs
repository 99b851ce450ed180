//! Compile-time sized regions.

use std::fmt;
use std::ops::{Deref, Index, IndexMut};
use std::slice::SliceIndex;

use tierarray_core::{Element, RegionError};

use crate::policy::{HostBuffer, TierPolicy};
use crate::region::ArrayRegion;

/// An [`ArrayRegion`] whose length is the constant `N`.
///
/// Read-only region operations are reachable through `Deref`. Mutation goes
/// through the forwarding methods below, which write in place, so the inner
/// region is never replaced and its length is always `N`.
///
/// ```
/// use tierarray_region::{FixedArray, Standard};
///
/// let a = FixedArray::<u32, 8, _>::new(Standard::default()).unwrap();
/// assert_eq!(a.len(), 8);
/// assert_eq!(FixedArray::<u32, 8, Standard>::SIZE, 8);
/// ```
pub struct FixedArray<T: Element, const N: usize, P: TierPolicy> {
    region: ArrayRegion<T, P>,
}

impl<T: Element, const N: usize, P: TierPolicy> FixedArray<T, N, P> {
    /// The number of elements.
    pub const SIZE: usize = N;

    /// `N` default-valued elements.
    pub fn new(policy: P) -> Result<Self, RegionError> {
        ArrayRegion::new(N, policy).map(|region| Self { region })
    }

    /// `N` copies of `value`.
    pub fn filled(value: T, policy: P) -> Result<Self, RegionError> {
        ArrayRegion::filled(N, value, policy).map(|region| Self { region })
    }

    /// `N` elements from `source`, truncated or padded with `T::default()`.
    pub fn from_slice(source: &[T], policy: P) -> Result<Self, RegionError> {
        ArrayRegion::from_slice(source, N, policy).map(|region| Self { region })
    }

    /// Copy a smaller-or-equal fixed array into the prefix.
    ///
    /// `M <= N` is enforced at compile time, so only device mismatch or a
    /// driver failure can make this fail.
    pub fn copy_from_fixed<const M: usize, Q: TierPolicy>(
        &mut self,
        other: &FixedArray<T, M, Q>,
    ) -> Result<(), RegionError> {
        const { assert!(M <= N, "source array is larger than the target") };
        self.region.copy_assign(&other.region)
    }

    /// Store `value` at `index`. See [`ArrayRegion::write`].
    pub fn write(&mut self, index: usize, value: T) -> Result<(), RegionError> {
        self.region.write(index, value)
    }

    /// Copy `source` into the prefix. See [`ArrayRegion::upload`].
    pub fn upload(&mut self, source: &[T]) -> Result<(), RegionError> {
        self.region.upload(source)
    }

    /// Copy a region of any tier into the prefix. See
    /// [`ArrayRegion::copy_assign`].
    pub fn copy_assign<Q: TierPolicy>(
        &mut self,
        other: &ArrayRegion<T, Q>,
    ) -> Result<(), RegionError> {
        self.region.copy_assign(other)
    }

    /// Mutable address of the first element.
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.region.as_mut_ptr()
    }

    /// The elements as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T]
    where
        P::Buffer: HostBuffer,
    {
        &mut self.region
    }

    /// Independent copy in a fresh buffer.
    pub fn try_clone(&self) -> Result<Self, RegionError> {
        self.region.try_clone().map(|region| Self { region })
    }

    /// The underlying region.
    pub fn as_region(&self) -> &ArrayRegion<T, P> {
        &self.region
    }

    /// Unwrap into the region.
    pub fn into_inner(self) -> ArrayRegion<T, P> {
        self.region
    }
}

impl<T: Element, const N: usize, P: TierPolicy> Deref for FixedArray<T, N, P> {
    type Target = ArrayRegion<T, P>;

    fn deref(&self) -> &ArrayRegion<T, P> {
        &self.region
    }
}

impl<T: Element, const N: usize, P: TierPolicy, I: SliceIndex<[T]>> Index<I>
    for FixedArray<T, N, P>
where
    P::Buffer: HostBuffer,
{
    type Output = I::Output;

    fn index(&self, index: I) -> &I::Output {
        &self.region[..][index]
    }
}

impl<T: Element, const N: usize, P: TierPolicy, I: SliceIndex<[T]>> IndexMut<I>
    for FixedArray<T, N, P>
where
    P::Buffer: HostBuffer,
{
    fn index_mut(&mut self, index: I) -> &mut I::Output {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Element, const N: usize, P: TierPolicy> fmt::Debug for FixedArray<T, N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedArray")
            .field("size", &N)
            .field("region", &self.region)
            .finish()
    }
}
