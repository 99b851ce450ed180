//! Test utilities for tierarray development.
//!
//! Provides [`CountingAccelerator`], an [`Accelerator`] that forwards to an
//! [`EmulatedAccelerator`] while counting every driver call and optionally
//! injecting failures, plus a few [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tierarray_core::{Accelerator, DeviceId, DevicePtr, DriverError};
use tierarray_region::EmulatedAccelerator;

/// A driver call that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Alloc,
    Free,
    Register,
    Unregister,
    Copy,
    SetDevice,
}

impl Fault {
    const ALL: [Fault; 6] = [
        Fault::Alloc,
        Fault::Free,
        Fault::Register,
        Fault::Unregister,
        Fault::Copy,
        Fault::SetDevice,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn call(self) -> &'static str {
        match self {
            Fault::Alloc => "alloc",
            Fault::Free => "free",
            Fault::Register => "host_register",
            Fault::Unregister => "host_unregister",
            Fault::Copy => "copy",
            Fault::SetDevice => "set_device",
        }
    }
}

/// Snapshot of the calls a [`CountingAccelerator`] has seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub set_device: usize,
    pub alloc: usize,
    pub free: usize,
    pub register: usize,
    pub unregister: usize,
    pub htod: usize,
    pub dtoh: usize,
    pub dtod: usize,
}

impl CallCounts {
    /// Total number of device-memory transfers.
    pub fn transfers(&self) -> usize {
        self.htod + self.dtoh + self.dtod
    }
}

#[derive(Default)]
struct Counters {
    set_device: AtomicUsize,
    alloc: AtomicUsize,
    free: AtomicUsize,
    register: AtomicUsize,
    unregister: AtomicUsize,
    htod: AtomicUsize,
    dtoh: AtomicUsize,
    dtod: AtomicUsize,
}

/// Counting, fault-injecting wrapper around [`EmulatedAccelerator`].
///
/// Counters record attempted calls, including ones that fail. An armed
/// fault stays armed until [`clear_fault`](Self::clear_fault).
pub struct CountingAccelerator {
    inner: EmulatedAccelerator,
    counters: Counters,
    faults: [AtomicBool; Fault::ALL.len()],
}

impl CountingAccelerator {
    pub fn new(device_count: u32) -> Self {
        Self::wrap(EmulatedAccelerator::new(device_count))
    }

    /// Wrap a preconfigured emulator.
    pub fn wrap(inner: EmulatedAccelerator) -> Self {
        Self {
            inner,
            counters: Counters::default(),
            faults: Default::default(),
        }
    }

    /// Convenience constructor returning an `Arc`, ready to hand to
    /// policies.
    pub fn shared(device_count: u32) -> Arc<Self> {
        Arc::new(Self::new(device_count))
    }

    /// Make every subsequent `fault` call fail.
    pub fn fail(&self, fault: Fault) {
        self.faults[fault.index()].store(true, Ordering::SeqCst);
    }

    /// Stop failing `fault` calls.
    pub fn clear_fault(&self, fault: Fault) {
        self.faults[fault.index()].store(false, Ordering::SeqCst);
    }

    pub fn counts(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            set_device: c.set_device.load(Ordering::SeqCst),
            alloc: c.alloc.load(Ordering::SeqCst),
            free: c.free.load(Ordering::SeqCst),
            register: c.register.load(Ordering::SeqCst),
            unregister: c.unregister.load(Ordering::SeqCst),
            htod: c.htod.load(Ordering::SeqCst),
            dtoh: c.dtoh.load(Ordering::SeqCst),
            dtod: c.dtod.load(Ordering::SeqCst),
        }
    }

    /// The wrapped emulator, for its live-resource statistics.
    pub fn emulator(&self) -> &EmulatedAccelerator {
        &self.inner
    }

    fn check(&self, fault: Fault) -> Result<(), DriverError> {
        if self.faults[fault.index()].load(Ordering::SeqCst) {
            return Err(DriverError::Failed {
                call: fault.call(),
                reason: "injected fault".into(),
            });
        }
        Ok(())
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl Accelerator for CountingAccelerator {
    fn name(&self) -> &str {
        "counting"
    }

    fn device_count(&self) -> u32 {
        self.inner.device_count()
    }

    fn set_device(&self, device: DeviceId) -> Result<(), DriverError> {
        bump(&self.counters.set_device);
        self.check(Fault::SetDevice)?;
        self.inner.set_device(device)
    }

    fn current_device(&self) -> Result<DeviceId, DriverError> {
        self.inner.current_device()
    }

    fn alloc(&self, bytes: usize) -> Result<DevicePtr, DriverError> {
        bump(&self.counters.alloc);
        self.check(Fault::Alloc)?;
        self.inner.alloc(bytes)
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError> {
        bump(&self.counters.free);
        self.check(Fault::Free)?;
        self.inner.free(ptr)
    }

    fn copy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<(), DriverError> {
        bump(&self.counters.htod);
        self.check(Fault::Copy)?;
        self.inner.copy_htod(dst, src)
    }

    fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), DriverError> {
        bump(&self.counters.dtoh);
        self.check(Fault::Copy)?;
        self.inner.copy_dtoh(dst, src)
    }

    fn copy_dtod(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<(), DriverError> {
        bump(&self.counters.dtod);
        self.check(Fault::Copy)?;
        self.inner.copy_dtod(dst, src, bytes)
    }

    fn host_register(&self, addr: *mut u8, bytes: usize) -> Result<(), DriverError> {
        bump(&self.counters.register);
        self.check(Fault::Register)?;
        self.inner.host_register(addr, bytes)
    }

    fn host_unregister(&self, addr: *mut u8) -> Result<(), DriverError> {
        bump(&self.counters.unregister);
        self.check(Fault::Unregister)?;
        self.inner.host_unregister(addr)
    }
}
