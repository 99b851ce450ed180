//! Device contexts and device-resident allocations.
//!
//! A [`DeviceContext`] binds a device id to an accelerator handle. It is the
//! explicit replacement for the runtime's hidden "current device" state:
//! every device-affecting operation enters a [`DeviceScope`] that selects the
//! context's device and restores the thread's previous device when the scope
//! ends.
//!
//! ```text
//! DeviceAllocation (owned by a Device-tier region)
//! ├── DeviceContext { device, accelerator }
//! │     └── enter() ──► DeviceScope (selects device, restores on drop)
//! └── DevicePtr ──► accelerator.free() on drop
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tierarray_core::{AllocError, DeviceId, DevicePtr, DriverError, RegionError, SharedAccelerator};

use crate::config::TeardownPolicy;

/// Report a device failure raised while a region is being built as an
/// allocation failure.
pub(crate) fn during_construction(error: RegionError) -> RegionError {
    match error {
        RegionError::Device(inner) => AllocError::Driver(inner).into(),
        other => other,
    }
}

// ── DeviceContext ──────────────────────────────────────────────────

/// The accelerator a device-tier region is bound to.
///
/// There is no default context: a device id must always be supplied.
/// Constructing or cloning a context performs a device selection, which
/// validates the id against the accelerator.
pub struct DeviceContext {
    device: DeviceId,
    accelerator: SharedAccelerator,
}

impl DeviceContext {
    /// Bind `device` on `accelerator`, selecting it once to validate it.
    pub fn new(device: DeviceId, accelerator: SharedAccelerator) -> Result<Self, RegionError> {
        let count = accelerator.device_count();
        if device.0 >= count {
            return Err(RegionError::Device(DriverError::InvalidDevice {
                device,
                device_count: count,
            }));
        }
        let context = Self {
            device,
            accelerator,
        };
        drop(context.enter()?);
        Ok(context)
    }

    /// The bound device.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// The accelerator handle.
    pub fn accelerator(&self) -> &SharedAccelerator {
        &self.accelerator
    }

    /// Whether `other` refers to the same device on the same accelerator.
    pub fn same_device(&self, other: &DeviceContext) -> bool {
        self.device == other.device
            && std::ptr::addr_eq(Arc::as_ptr(&self.accelerator), Arc::as_ptr(&other.accelerator))
    }

    /// Select this device for the current thread until the scope is dropped.
    ///
    /// Scopes nest: while a scope is the most recently entered one on this
    /// thread, the accelerator's current device is this context's device.
    pub fn enter(&self) -> Result<DeviceScope<'_>, RegionError> {
        let previous = self
            .accelerator
            .current_device()
            .map_err(RegionError::Device)?;
        if previous != self.device {
            self.accelerator
                .set_device(self.device)
                .map_err(RegionError::Device)?;
        }
        Ok(DeviceScope {
            context: self,
            previous,
            _not_send: PhantomData,
        })
    }

    /// Select this device for the current thread without restoring it later.
    ///
    /// Leaves the selection in place, as the accelerator runtime does when a
    /// device is set directly.
    pub fn select(&self) -> Result<(), RegionError> {
        self.accelerator
            .set_device(self.device)
            .map_err(RegionError::Device)
    }

    /// Copy the context, re-validating the device on the way.
    pub fn try_clone(&self) -> Result<Self, RegionError> {
        Self::new(self.device, Arc::clone(&self.accelerator))
    }

    /// Assign from another context.
    ///
    /// Contexts never change device: assigning from a context bound to a
    /// different device fails with [`RegionError::DeviceMismatch`]. Assigning
    /// from the same device just re-selects it.
    pub fn assign_from(&mut self, other: &DeviceContext) -> Result<(), RegionError> {
        if !self.same_device(other) {
            return Err(RegionError::DeviceMismatch {
                target: self.device,
                other: other.device,
            });
        }
        self.enter().map(drop)
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device)
            .field("accelerator", &self.accelerator.name())
            .finish()
    }
}

// ── DeviceScope ────────────────────────────────────────────────────

/// Guard returned by [`DeviceContext::enter`].
///
/// Restores the device that was current on entry when dropped. Not `Send`:
/// device selection is per thread, so a scope must end on the thread that
/// entered it.
#[must_use = "the device is only selected while the scope is alive"]
pub struct DeviceScope<'a> {
    context: &'a DeviceContext,
    previous: DeviceId,
    _not_send: PhantomData<*const ()>,
}

impl DeviceScope<'_> {
    /// The device selected by this scope.
    pub fn device(&self) -> DeviceId {
        self.context.device
    }

    /// The device that will be restored on drop.
    pub fn previous(&self) -> DeviceId {
        self.previous
    }
}

impl Drop for DeviceScope<'_> {
    fn drop(&mut self) {
        if self.previous == self.context.device {
            return;
        }
        if let Err(error) = self.context.accelerator.set_device(self.previous) {
            tracing::warn!(
                device = %self.previous,
                error = %error,
                "failed to restore previously selected device"
            );
        }
    }
}

// ── DeviceAllocation ───────────────────────────────────────────────

/// An owned allocation in device memory.
///
/// Freed on the owning device when dropped. The context is a sub-object, so
/// it lives exactly as long as the allocation.
pub struct DeviceAllocation {
    ptr: DevicePtr,
    bytes: usize,
    context: DeviceContext,
    teardown: TeardownPolicy,
}

impl DeviceAllocation {
    /// Allocate `bytes` on the context's device.
    ///
    /// The contents are unspecified until written.
    pub fn new(
        context: DeviceContext,
        bytes: usize,
        teardown: TeardownPolicy,
    ) -> Result<Self, RegionError> {
        if bytes == 0 {
            return Err(AllocError::ZeroLength.into());
        }
        let ptr = {
            let _scope = context.enter().map_err(during_construction)?;
            context
                .accelerator
                .alloc(bytes)
                .map_err(AllocError::Driver)?
        };
        tracing::debug!(device = %context.device, bytes, ptr = %ptr, "device memory allocated");
        Ok(Self {
            ptr,
            bytes,
            context,
            teardown,
        })
    }

    /// Device address of the first byte.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Always `false`; empty allocations are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// The owning context.
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Free the allocation, reporting failures instead of applying the
    /// teardown policy.
    pub fn close(mut self) -> Result<(), RegionError> {
        let result = self.release();
        self.bytes = 0;
        result
    }

    fn release(&self) -> Result<(), RegionError> {
        let _scope = self.context.enter().map_err(|e| match e {
            RegionError::Device(inner) => RegionError::Teardown(inner),
            other => other,
        })?;
        self.context
            .accelerator
            .free(self.ptr)
            .map_err(RegionError::Teardown)?;
        tracing::debug!(device = %self.context.device, bytes = self.bytes, ptr = %self.ptr, "device memory freed");
        Ok(())
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        // `close` zeroes the length once the allocation is released.
        if self.bytes == 0 {
            return;
        }
        if let Err(error) = self.release() {
            self.teardown.handle("device allocation", &error);
        }
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .field("device", &self.context.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedAccelerator;
    use tierarray_core::Accelerator;

    fn accelerator(devices: u32) -> Arc<EmulatedAccelerator> {
        Arc::new(EmulatedAccelerator::new(devices))
    }

    #[test]
    fn construction_failures_become_allocation_errors() {
        let invalid = DriverError::InvalidDevice {
            device: DeviceId(3),
            device_count: 1,
        };
        assert_eq!(
            during_construction(RegionError::Device(invalid.clone())),
            RegionError::Allocation(AllocError::Driver(invalid))
        );
        let capacity = RegionError::Capacity {
            capacity: 1,
            required: 2,
        };
        assert_eq!(during_construction(capacity.clone()), capacity);
    }

    #[test]
    fn new_rejects_unknown_device() {
        let acc = accelerator(2);
        let err = DeviceContext::new(DeviceId(2), acc).unwrap_err();
        assert_eq!(
            err,
            RegionError::Device(DriverError::InvalidDevice {
                device: DeviceId(2),
                device_count: 2
            })
        );
    }

    #[test]
    fn scope_selects_and_restores() {
        let acc = accelerator(3);
        let ctx = DeviceContext::new(DeviceId(2), acc.clone()).unwrap();
        assert_eq!(acc.current_device().unwrap(), DeviceId(0));
        {
            let scope = ctx.enter().unwrap();
            assert_eq!(scope.device(), DeviceId(2));
            assert_eq!(scope.previous(), DeviceId(0));
            assert_eq!(acc.current_device().unwrap(), DeviceId(2));
        }
        assert_eq!(acc.current_device().unwrap(), DeviceId(0));
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let acc = accelerator(3);
        let one = DeviceContext::new(DeviceId(1), acc.clone()).unwrap();
        let two = DeviceContext::new(DeviceId(2), acc.clone()).unwrap();
        let outer = one.enter().unwrap();
        {
            let _inner = two.enter().unwrap();
            assert_eq!(acc.current_device().unwrap(), DeviceId(2));
        }
        assert_eq!(acc.current_device().unwrap(), DeviceId(1));
        drop(outer);
        assert_eq!(acc.current_device().unwrap(), DeviceId(0));
    }

    #[test]
    fn select_leaves_device_current() {
        let acc = accelerator(2);
        let ctx = DeviceContext::new(DeviceId(1), acc.clone()).unwrap();
        ctx.select().unwrap();
        assert_eq!(acc.current_device().unwrap(), DeviceId(1));
    }

    #[test]
    fn assign_between_different_devices_fails() {
        let acc = accelerator(2);
        let mut a = DeviceContext::new(DeviceId(0), acc.clone()).unwrap();
        let b = DeviceContext::new(DeviceId(1), acc).unwrap();
        assert_eq!(
            a.assign_from(&b),
            Err(RegionError::DeviceMismatch {
                target: DeviceId(0),
                other: DeviceId(1)
            })
        );
        assert_eq!(a.device(), DeviceId(0));
    }

    #[test]
    fn assign_between_same_device_succeeds() {
        let acc = accelerator(2);
        let mut a = DeviceContext::new(DeviceId(1), acc.clone()).unwrap();
        let b = a.try_clone().unwrap();
        assert!(a.assign_from(&b).is_ok());
        assert_eq!(b.device(), DeviceId(1));
    }

    #[test]
    fn same_id_on_different_accelerators_is_a_mismatch() {
        let a = DeviceContext::new(DeviceId(0), accelerator(1)).unwrap();
        let b = DeviceContext::new(DeviceId(0), accelerator(1)).unwrap();
        assert!(!a.same_device(&b));
    }

    #[test]
    fn allocation_is_freed_on_drop() {
        let acc = accelerator(2);
        let ctx = DeviceContext::new(DeviceId(1), acc.clone()).unwrap();
        let alloc = DeviceAllocation::new(ctx, 256, TeardownPolicy::Panic).unwrap();
        assert_eq!(acc.live_allocations(), 1);
        assert_eq!(acc.device_of(alloc.ptr()), Some(DeviceId(1)));
        drop(alloc);
        assert_eq!(acc.live_allocations(), 0);
        assert_eq!(acc.current_device().unwrap(), DeviceId(0));
    }

    #[test]
    fn close_reports_success_and_skips_drop() {
        let acc = accelerator(1);
        let ctx = DeviceContext::new(DeviceId(0), acc.clone()).unwrap();
        let alloc = DeviceAllocation::new(ctx, 64, TeardownPolicy::Panic).unwrap();
        assert!(alloc.close().is_ok());
        assert_eq!(acc.live_allocations(), 0);
    }

    #[test]
    fn zero_byte_allocation_is_rejected() {
        let acc = accelerator(1);
        let ctx = DeviceContext::new(DeviceId(0), acc).unwrap();
        assert_eq!(
            DeviceAllocation::new(ctx, 0, TeardownPolicy::Panic).unwrap_err(),
            RegionError::Allocation(tierarray_core::AllocError::ZeroLength)
        );
    }
}
