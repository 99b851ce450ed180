//! The tier-aware array region.
//!
//! [`ArrayRegion<T, P>`] owns a contiguous buffer of `len` elements of `T`
//! allocated by the tier policy `P`. The length is fixed at construction.
//! Assignment copies into the prefix of the destination with whatever
//! transfer primitive the two tiers require:
//!
//! | destination \ source | host tier | device tier |
//! |----------------------|-----------|-------------|
//! | host tier | memcpy | device → host |
//! | device tier | host → device | device → device (same device only) |
//!
//! Host tiers dereference to `[T]`; device regions are reached through
//! [`read`](ArrayRegion::read), [`write`](ArrayRegion::write),
//! [`to_vec`](ArrayRegion::to_vec) and [`upload`](ArrayRegion::upload).

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};

use tierarray_core::{AllocError, DeviceId, Element, RegionError, Rejected, Tier};

use crate::device::{during_construction, DeviceContext};
use crate::policy::{Endpoint, EndpointMut, HostBuffer, TierBuffer, TierPolicy};
use crate::resize::adapt_into;

/// An owned, fixed-length array of `T` in the memory tier chosen by `P`.
///
/// # Example
///
/// ```
/// use tierarray_region::{ArrayRegion, Standard};
///
/// let mut small = ArrayRegion::<f32, _>::from_slice(&[1.0, 2.0, 3.0], 3, Standard::default()).unwrap();
/// let mut large = ArrayRegion::<f32, _>::filled(5, 9.0, Standard::default()).unwrap();
/// large.copy_assign(&small).unwrap();
/// assert_eq!(&large[..], &[1.0, 2.0, 3.0, 9.0, 9.0]);
/// assert!(small.copy_assign(&large).is_err());
/// small[0] = 4.0;
/// assert_eq!(small[0], 4.0);
/// ```
pub struct ArrayRegion<T: Element, P: TierPolicy> {
    buffer: P::Buffer,
    len: usize,
    policy: P,
    _marker: PhantomData<T>,
}

impl<T: Element, P: TierPolicy> ArrayRegion<T, P> {
    // ── Construction ───────────────────────────────────────────────

    /// Region of `len` default-valued elements.
    pub fn new(len: usize, policy: P) -> Result<Self, RegionError> {
        Self::filled(len, T::default(), policy)
    }

    /// Region of `len` copies of `value`.
    pub fn filled(len: usize, value: T, policy: P) -> Result<Self, RegionError> {
        let mut region = Self::allocate(len, policy)?;
        region.initialize(|elems| elems.fill(value))?;
        Ok(region)
    }

    /// Region of `len` elements taken from `source`, truncated or padded
    /// with `T::default()`.
    pub fn from_slice(source: &[T], len: usize, policy: P) -> Result<Self, RegionError> {
        let mut region = Self::allocate(len, policy)?;
        region.initialize(|elems| adapt_into(source, elems))?;
        Ok(region)
    }

    fn allocate(len: usize, policy: P) -> Result<Self, RegionError> {
        let elem_size = size_of::<T>();
        if len == 0 || elem_size == 0 {
            return Err(AllocError::ZeroLength.into());
        }
        let bytes = len
            .checked_mul(elem_size)
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or(AllocError::LayoutOverflow { len, elem_size })?;
        let align = policy.alignment().for_type::<T>();
        let buffer = policy.allocate(bytes, align)?;
        tracing::debug!(tier = %P::TIER, len, bytes, align, "region allocated");
        Ok(Self {
            buffer,
            len,
            policy,
            _marker: PhantomData,
        })
    }

    fn initialize(&mut self, fill: impl FnOnce(&mut [T])) -> Result<(), RegionError> {
        match self.buffer.endpoint_mut() {
            EndpointMut::Host(bytes) => {
                fill(bytemuck::cast_slice_mut(bytes));
                Ok(())
            }
            EndpointMut::Device { ptr, context } => {
                let mut staged = vec![T::default(); self.len];
                fill(&mut staged);
                let _scope = context.enter().map_err(during_construction)?;
                context
                    .accelerator()
                    .copy_htod(ptr, bytemuck::cast_slice(&staged))
                    .map_err(AllocError::Driver)?;
                Ok(())
            }
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Number of elements. Never changes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: empty regions are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The memory tier.
    pub fn tier(&self) -> Tier {
        P::TIER
    }

    /// The allocation policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Effective alignment of the buffer in bytes.
    pub fn alignment(&self) -> usize {
        self.policy.alignment().for_type::<T>()
    }

    /// Size of the buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    /// Start of the buffer.
    ///
    /// For device regions this is a device address, meaningful only to the
    /// accelerator.
    pub fn as_ptr(&self) -> *const T {
        self.buffer.as_ptr().cast()
    }

    /// Mutable start of the buffer.
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.buffer.as_mut_ptr().cast()
    }

    /// Pointer to element `offset`; `offset == len` yields the one-past-end
    /// pointer.
    ///
    /// # Panics
    ///
    /// Panics if `offset > len`.
    pub fn ptr_at(&self, offset: usize) -> *const T {
        assert!(
            offset <= self.len,
            "offset {offset} out of range for region of length {}",
            self.len
        );
        self.as_ptr().wrapping_add(offset)
    }

    /// The device the buffer lives on, for device regions.
    pub fn device(&self) -> Option<DeviceId> {
        self.buffer.context().map(DeviceContext::device)
    }

    // ── Element access ─────────────────────────────────────────────

    /// Read element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn read(&self, index: usize) -> Result<T, RegionError> {
        self.check_index(index);
        match self.buffer.endpoint() {
            Endpoint::Host(bytes) => Ok(bytemuck::cast_slice::<u8, T>(bytes)[index]),
            Endpoint::Device { ptr, context } => {
                let mut value = T::default();
                let _scope = context.enter()?;
                context
                    .accelerator()
                    .copy_dtoh(
                        bytemuck::bytes_of_mut(&mut value),
                        ptr.byte_add(index * size_of::<T>()),
                    )
                    .map_err(RegionError::Device)?;
                Ok(value)
            }
        }
    }

    /// Write `value` to element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn write(&mut self, index: usize, value: T) -> Result<(), RegionError> {
        self.check_index(index);
        match self.buffer.endpoint_mut() {
            EndpointMut::Host(bytes) => {
                bytemuck::cast_slice_mut::<u8, T>(bytes)[index] = value;
                Ok(())
            }
            EndpointMut::Device { ptr, context } => {
                let _scope = context.enter()?;
                context
                    .accelerator()
                    .copy_htod(
                        ptr.byte_add(index * size_of::<T>()),
                        bytemuck::bytes_of(&value),
                    )
                    .map_err(RegionError::Device)
            }
        }
    }

    /// Copy the whole region into a host vector.
    pub fn to_vec(&self) -> Result<Vec<T>, RegionError> {
        match self.buffer.endpoint() {
            Endpoint::Host(bytes) => Ok(bytemuck::cast_slice::<u8, T>(bytes).to_vec()),
            Endpoint::Device { ptr, context } => {
                let mut out = vec![T::default(); self.len];
                let _scope = context.enter()?;
                context
                    .accelerator()
                    .copy_dtoh(bytemuck::cast_slice_mut(&mut out), ptr)
                    .map_err(RegionError::Device)?;
                Ok(out)
            }
        }
    }

    /// Copy `source` into the prefix of the region.
    ///
    /// Fails with [`RegionError::Capacity`] and writes nothing if `source`
    /// is longer than the region.
    pub fn upload(&mut self, source: &[T]) -> Result<(), RegionError> {
        if source.len() > self.len {
            return Err(RegionError::Capacity {
                capacity: self.len,
                required: source.len(),
            });
        }
        if source.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(source);
        transfer(self.buffer.endpoint_mut(), Endpoint::Host(bytes), bytes.len())
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.len,
            "index {index} out of range for region of length {}",
            self.len
        );
    }

    // ── Assignment ─────────────────────────────────────────────────

    /// Copy every element of `other` into the prefix of `self`.
    ///
    /// `other` may live in any tier. Elements past `other.len()` are left
    /// untouched. Fails without writing anything when `self` is shorter
    /// than `other` ([`RegionError::Capacity`]) or when both regions are
    /// device-resident on different devices
    /// ([`RegionError::DeviceMismatch`], checked first).
    pub fn copy_assign<Q: TierPolicy>(
        &mut self,
        other: &ArrayRegion<T, Q>,
    ) -> Result<(), RegionError> {
        self.check_assignable(other.len, other.buffer.context())?;
        let bytes = other.size_bytes();
        transfer(self.buffer.endpoint_mut(), other.buffer.endpoint(), bytes)?;
        tracing::debug!(
            from = %Q::TIER,
            to = %P::TIER,
            len = other.len,
            bytes,
            "region assigned"
        );
        Ok(())
    }

    /// Move `other` into `self`.
    ///
    /// Follows the rules of [`copy_assign`](Self::copy_assign). When both
    /// regions have the same length and alignment, `self` takes over
    /// `other`'s buffer and its old buffer is released; otherwise the
    /// elements are copied and `other` is released. On failure `other` is
    /// handed back unchanged inside [`Rejected`].
    pub fn move_assign(&mut self, other: Self) -> Result<(), Rejected<Self>> {
        if let Err(error) = self.check_assignable(other.len, other.buffer.context()) {
            return Err(Rejected {
                error,
                region: other,
            });
        }
        if other.len == self.len && other.alignment() == self.alignment() {
            drop(std::mem::replace(self, other));
            return Ok(());
        }
        match self.copy_assign(&other) {
            Ok(()) => Ok(()),
            Err(error) => Err(Rejected {
                error,
                region: other,
            }),
        }
    }

    fn check_assignable(
        &self,
        required: usize,
        source: Option<&DeviceContext>,
    ) -> Result<(), RegionError> {
        if let (Some(target), Some(source)) = (self.buffer.context(), source) {
            if !target.same_device(source) {
                return Err(RegionError::DeviceMismatch {
                    target: target.device(),
                    other: source.device(),
                });
            }
        }
        if self.len < required {
            return Err(RegionError::Capacity {
                capacity: self.len,
                required,
            });
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Independent copy in a fresh buffer of the same tier and device.
    ///
    /// Pinned copies are registered separately; device copies re-select the
    /// device.
    pub fn try_clone(&self) -> Result<Self, RegionError> {
        let mut copy = Self::allocate(self.len, self.policy.clone())?;
        copy.copy_assign(self)?;
        Ok(copy)
    }

    /// Release the region, returning teardown failures instead of applying
    /// the configured [`TeardownPolicy`](crate::TeardownPolicy).
    pub fn close(self) -> Result<(), RegionError> {
        let Self { buffer, len, .. } = self;
        tracing::debug!(tier = %P::TIER, len, "region closed");
        buffer.close()
    }
}

/// Move `bytes` bytes from `src` to the start of `dst`.
///
/// The destination's device is selected first; a device-to-host copy
/// selects the source device.
fn transfer(dst: EndpointMut<'_>, src: Endpoint<'_>, bytes: usize) -> Result<(), RegionError> {
    match (dst, src) {
        (EndpointMut::Host(dst), Endpoint::Host(src)) => {
            dst[..bytes].copy_from_slice(&src[..bytes]);
            Ok(())
        }
        (EndpointMut::Device { ptr, context }, Endpoint::Host(src)) => {
            let _scope = context.enter()?;
            context
                .accelerator()
                .copy_htod(ptr, &src[..bytes])
                .map_err(RegionError::Device)
        }
        (EndpointMut::Host(dst), Endpoint::Device { ptr, context }) => {
            let _scope = context.enter()?;
            context
                .accelerator()
                .copy_dtoh(&mut dst[..bytes], ptr)
                .map_err(RegionError::Device)
        }
        (EndpointMut::Device { ptr, context }, Endpoint::Device { ptr: src, .. }) => {
            let _scope = context.enter()?;
            context
                .accelerator()
                .copy_dtod(ptr, src, bytes)
                .map_err(RegionError::Device)
        }
    }
}

impl<T: Element, P: TierPolicy> Deref for ArrayRegion<T, P>
where
    P::Buffer: HostBuffer,
{
    type Target = [T];

    fn deref(&self) -> &[T] {
        bytemuck::cast_slice(self.buffer.bytes())
    }
}

impl<T: Element, P: TierPolicy> DerefMut for ArrayRegion<T, P>
where
    P::Buffer: HostBuffer,
{
    fn deref_mut(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.buffer.bytes_mut())
    }
}

impl<T: Element, P: TierPolicy> fmt::Debug for ArrayRegion<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRegion")
            .field("tier", &P::TIER)
            .field("len", &self.len)
            .field("align", &self.alignment())
            .field("device", &self.device())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedAccelerator;
    use crate::policy::{Device, HighBandwidth, Pinned, Standard};
    use crate::{HbwPolicy, NodeMask};
    use std::sync::Arc;
    use tierarray_core::Alignment;

    fn emulator(devices: u32) -> Arc<EmulatedAccelerator> {
        Arc::new(EmulatedAccelerator::new(devices))
    }

    #[test]
    fn new_is_default_filled() {
        let r = ArrayRegion::<u32, _>::new(7, Standard::default()).unwrap();
        assert_eq!(r.len(), 7);
        assert!(r.iter().all(|&x| x == 0));
        assert_eq!(r.tier(), Tier::Standard);
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = ArrayRegion::<u8, _>::new(0, Standard::default()).unwrap_err();
        assert_eq!(err, RegionError::Allocation(AllocError::ZeroLength));
    }

    #[test]
    fn huge_length_overflows_layout() {
        let err = ArrayRegion::<u64, _>::new(usize::MAX / 4, Standard::default()).unwrap_err();
        assert_eq!(
            err,
            RegionError::Allocation(AllocError::LayoutOverflow {
                len: usize::MAX / 4,
                elem_size: 8
            })
        );
    }

    #[test]
    fn buffer_respects_alignment() {
        let policy = Standard::new(Alignment::new(512).unwrap());
        let r = ArrayRegion::<u8, _>::new(3, policy).unwrap();
        assert_eq!(r.as_ptr() as usize % 512, 0);
        assert_eq!(r.alignment(), 512);
    }

    #[test]
    fn from_slice_pads_and_truncates() {
        let padded = ArrayRegion::<i32, _>::from_slice(&[1, 2, 3], 5, Standard::default()).unwrap();
        assert_eq!(&padded[..], &[1, 2, 3, 0, 0]);
        let cut = ArrayRegion::<i32, _>::from_slice(&[1, 2, 3, 4, 5], 2, Standard::default()).unwrap();
        assert_eq!(&cut[..], &[1, 2]);
    }

    #[test]
    fn ptr_at_walks_elements() {
        let r = ArrayRegion::<u64, _>::new(4, Standard::default()).unwrap();
        assert_eq!(r.ptr_at(2) as usize - r.as_ptr() as usize, 16);
        assert_eq!(r.ptr_at(4) as usize - r.as_ptr() as usize, 32);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn ptr_at_past_end_panics() {
        let r = ArrayRegion::<u64, _>::new(4, Standard::default()).unwrap();
        let _ = r.ptr_at(5);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn read_past_end_panics() {
        let r = ArrayRegion::<u8, _>::new(2, Standard::default()).unwrap();
        let _ = r.read(2);
    }

    #[test]
    fn copy_assign_fills_prefix_only() {
        let src = ArrayRegion::<u16, _>::from_slice(&[1, 2, 3], 3, Standard::default()).unwrap();
        let mut dst = ArrayRegion::<u16, _>::filled(5, 7, Standard::default()).unwrap();
        dst.copy_assign(&src).unwrap();
        assert_eq!(&dst[..], &[1, 2, 3, 7, 7]);
    }

    #[test]
    fn copy_assign_into_smaller_is_refused() {
        let src = ArrayRegion::<u16, _>::filled(5, 1, Standard::default()).unwrap();
        let mut dst = ArrayRegion::<u16, _>::filled(3, 9, Standard::default()).unwrap();
        let err = dst.copy_assign(&src).unwrap_err();
        assert_eq!(
            err,
            RegionError::Capacity {
                capacity: 3,
                required: 5
            }
        );
        assert_eq!(&dst[..], &[9, 9, 9]);
    }

    #[test]
    fn host_and_device_round_trip() {
        let acc = emulator(1);
        let host = ArrayRegion::<f32, _>::from_slice(&[1.5, 2.5], 2, Standard::default()).unwrap();
        let mut dev = ArrayRegion::<f32, _>::new(4, Device::new(DeviceId(0), acc.clone())).unwrap();
        dev.copy_assign(&host).unwrap();
        assert_eq!(dev.to_vec().unwrap(), vec![1.5, 2.5, 0.0, 0.0]);

        let mut back = ArrayRegion::<f32, _>::filled(4, -1.0, Standard::default()).unwrap();
        back.copy_assign(&dev).unwrap();
        assert_eq!(&back[..], &[1.5, 2.5, 0.0, 0.0]);
    }

    #[test]
    fn device_to_device_on_same_device() {
        let acc = emulator(2);
        let policy = Device::new(DeviceId(1), acc.clone());
        let src = ArrayRegion::<u32, _>::from_slice(&[4, 5, 6], 3, policy.clone()).unwrap();
        let mut dst = ArrayRegion::<u32, _>::filled(4, 1, policy).unwrap();
        dst.copy_assign(&src).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![4, 5, 6, 1]);
        assert_eq!(dst.device(), Some(DeviceId(1)));
    }

    #[test]
    fn device_mismatch_is_checked_before_capacity() {
        let acc = emulator(2);
        let big = ArrayRegion::<u32, _>::filled(8, 3, Device::new(DeviceId(0), acc.clone())).unwrap();
        let mut small = ArrayRegion::<u32, _>::filled(2, 4, Device::new(DeviceId(1), acc.clone())).unwrap();
        let err = small.copy_assign(&big).unwrap_err();
        assert_eq!(
            err,
            RegionError::DeviceMismatch {
                target: DeviceId(1),
                other: DeviceId(0)
            }
        );
        assert_eq!(small.to_vec().unwrap(), vec![4, 4]);
    }

    #[test]
    fn device_operations_restore_the_selected_device() {
        use tierarray_core::Accelerator;
        let acc = emulator(3);
        acc.set_device(DeviceId(2)).unwrap();
        let mut r = ArrayRegion::<u8, _>::new(4, Device::new(DeviceId(0), acc.clone())).unwrap();
        r.write(1, 42).unwrap();
        assert_eq!(r.read(1).unwrap(), 42);
        assert_eq!(acc.current_device().unwrap(), DeviceId(2));
    }

    #[test]
    fn read_write_round_trip_every_tier() {
        let acc = emulator(1);
        let hbw = HighBandwidth::new(Alignment::DEFAULT, HbwPolicy::Preferred, NodeMask::default());

        let mut standard = ArrayRegion::<i64, _>::new(3, Standard::default()).unwrap();
        let mut high = ArrayRegion::<i64, _>::new(3, hbw).unwrap();
        let mut pinned = ArrayRegion::<i64, _>::new(3, Pinned::new(acc.clone())).unwrap();
        let mut device = ArrayRegion::<i64, _>::new(3, Device::new(DeviceId(0), acc.clone())).unwrap();

        standard.write(2, -7).unwrap();
        high.write(2, -7).unwrap();
        pinned.write(2, -7).unwrap();
        device.write(2, -7).unwrap();

        assert_eq!(standard.read(2).unwrap(), -7);
        assert_eq!(high.read(2).unwrap(), -7);
        assert_eq!(pinned.read(2).unwrap(), -7);
        assert_eq!(device.read(2).unwrap(), -7);
    }

    #[test]
    fn upload_longer_than_region_is_refused() {
        let acc = emulator(1);
        let mut dev = ArrayRegion::<u8, _>::filled(2, 5, Device::new(DeviceId(0), acc)).unwrap();
        assert_eq!(
            dev.upload(&[1, 2, 3]),
            Err(RegionError::Capacity {
                capacity: 2,
                required: 3
            })
        );
        dev.upload(&[8]).unwrap();
        assert_eq!(dev.to_vec().unwrap(), vec![8, 5]);
    }

    #[test]
    fn try_clone_is_independent() {
        let acc = emulator(1);
        let original = ArrayRegion::<u8, _>::from_slice(&[1, 2], 2, Pinned::new(acc.clone())).unwrap();
        let mut copy = original.try_clone().unwrap();
        copy[0] = 9;
        assert_eq!(&original[..], &[1, 2]);
        assert_eq!(acc.live_registrations(), 2);
        assert_ne!(original.as_ptr(), copy.as_ptr());
    }

    #[test]
    fn move_assign_equal_length_takes_over_buffer() {
        let mut dst = ArrayRegion::<u8, _>::filled(4, 1, Standard::default()).unwrap();
        let src = ArrayRegion::<u8, _>::filled(4, 2, Standard::default()).unwrap();
        let src_ptr = src.as_ptr();
        dst.move_assign(src).unwrap();
        assert_eq!(dst.as_ptr(), src_ptr);
        assert_eq!(&dst[..], &[2; 4]);
    }

    #[test]
    fn move_assign_shorter_copies_prefix() {
        let mut dst = ArrayRegion::<u8, _>::filled(4, 1, Standard::default()).unwrap();
        let src = ArrayRegion::<u8, _>::filled(2, 2, Standard::default()).unwrap();
        dst.move_assign(src).unwrap();
        assert_eq!(&dst[..], &[2, 2, 1, 1]);
    }

    #[test]
    fn move_assign_failure_returns_source() {
        let mut dst = ArrayRegion::<u8, _>::filled(2, 1, Standard::default()).unwrap();
        let src = ArrayRegion::<u8, _>::filled(4, 2, Standard::default()).unwrap();
        let rejected = dst.move_assign(src).unwrap_err();
        assert!(matches!(rejected.error, RegionError::Capacity { .. }));
        assert_eq!(&rejected.into_inner()[..], &[2; 4]);
        assert_eq!(&dst[..], &[1, 1]);
    }

    #[test]
    fn close_releases_device_memory() {
        let acc = emulator(1);
        let r = ArrayRegion::<u32, _>::new(16, Device::new(DeviceId(0), acc.clone())).unwrap();
        assert_eq!(acc.live_bytes(), 64);
        r.close().unwrap();
        assert_eq!(acc.live_allocations(), 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn assignment_writes_prefix_and_keeps_tail(
                dst_len in 1usize..48,
                src in prop::collection::vec(any::<u32>(), 1..48),
                fill in any::<u32>(),
            ) {
                let source = ArrayRegion::<u32, _>::from_slice(&src, src.len(), Standard::default()).unwrap();
                let mut target = ArrayRegion::<u32, _>::filled(dst_len, fill, Standard::default()).unwrap();
                let result = target.copy_assign(&source);
                if src.len() <= dst_len {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(&target[..src.len()], &src[..]);
                    prop_assert!(target[src.len()..].iter().all(|&x| x == fill));
                } else {
                    prop_assert!(result.is_err());
                    prop_assert!(target.iter().all(|&x| x == fill));
                }
            }
        }
    }
}
