//! Host-backed accelerator emulation.
//!
//! [`EmulatedAccelerator`] implements [`Accelerator`] on ordinary host
//! memory. It lets device- and pinned-tier regions run on nodes without an
//! accelerator, and it keeps the bookkeeping a real driver would. Device
//! selection is per thread, and allocations and DMA registrations live in
//! tables that reject overlapping registrations.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tierarray_core::{Accelerator, Alignment, DeviceId, DevicePtr, DriverError};

use crate::raw::HostAllocation;

static NEXT_EMULATOR: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Device selected on this thread, per emulator. Absent means device 0,
    /// so a thread only holds entries while it is off device 0 and the
    /// entries go away with the thread.
    static SELECTED: RefCell<IndexMap<u64, DeviceId>> = RefCell::new(IndexMap::new());
}

/// One emulated device allocation.
struct DeviceBlock {
    device: DeviceId,
    memory: HostAllocation,
}

#[derive(Default)]
struct EmulatorState {
    /// Live allocations keyed by base address.
    allocations: IndexMap<u64, DeviceBlock>,
    /// Registered host ranges: base address → length in bytes.
    registrations: IndexMap<u64, usize>,
}

impl EmulatorState {
    /// Map a device range to (allocation base, offset within allocation).
    fn resolve(&self, ptr: DevicePtr, bytes: usize) -> Result<(u64, usize), DriverError> {
        let invalid = DriverError::InvalidRange {
            addr: ptr.addr(),
            bytes,
        };
        if bytes == 0 {
            return Err(invalid);
        }
        let addr = ptr.addr();
        let end = addr.checked_add(bytes as u64).ok_or(invalid.clone())?;
        self.allocations
            .iter()
            .find(|(&base, block)| base <= addr && end <= base + block.memory.len() as u64)
            .map(|(&base, _)| (base, (addr - base) as usize))
            .ok_or(invalid)
    }

    fn used_on(&self, device: DeviceId) -> usize {
        self.allocations
            .values()
            .filter(|b| b.device == device)
            .map(|b| b.memory.len())
            .sum()
    }

    fn block_mut(&mut self, base: u64) -> Result<&mut DeviceBlock, DriverError> {
        self.allocations
            .get_mut(&base)
            .ok_or(DriverError::InvalidPointer { addr: base })
    }

    fn block(&self, base: u64) -> Result<&DeviceBlock, DriverError> {
        self.allocations
            .get(&base)
            .ok_or(DriverError::InvalidPointer { addr: base })
    }
}

/// An [`Accelerator`] whose devices live in host memory.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tierarray_core::{Accelerator, DeviceId};
/// use tierarray_region::EmulatedAccelerator;
///
/// let acc = Arc::new(EmulatedAccelerator::new(2));
/// acc.set_device(DeviceId(1)).unwrap();
/// let ptr = acc.alloc(64).unwrap();
/// acc.copy_htod(ptr, &[7u8; 64]).unwrap();
/// let mut back = [0u8; 64];
/// acc.copy_dtoh(&mut back, ptr).unwrap();
/// assert_eq!(back, [7u8; 64]);
/// acc.free(ptr).unwrap();
/// ```
pub struct EmulatedAccelerator {
    id: u64,
    device_count: u32,
    memory_per_device: Option<usize>,
    state: Mutex<EmulatorState>,
}

impl EmulatedAccelerator {
    /// Create an emulator exposing `device_count` devices of unlimited size.
    pub fn new(device_count: u32) -> Self {
        Self {
            id: NEXT_EMULATOR.fetch_add(1, Ordering::Relaxed),
            device_count,
            memory_per_device: None,
            state: Mutex::new(EmulatorState::default()),
        }
    }

    /// Cap the memory of each device at `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_per_device = Some(bytes);
        self
    }

    /// Number of live device allocations across all devices.
    pub fn live_allocations(&self) -> usize {
        self.state().allocations.len()
    }

    /// Total bytes held by live device allocations.
    pub fn live_bytes(&self) -> usize {
        self.state()
            .allocations
            .values()
            .map(|b| b.memory.len())
            .sum()
    }

    /// Number of live host registrations.
    pub fn live_registrations(&self) -> usize {
        self.state().registrations.len()
    }

    /// Whether a registration starts at `addr`.
    pub fn is_registered(&self, addr: *const u8) -> bool {
        self.state().registrations.contains_key(&(addr as u64))
    }

    /// The device that owns the allocation containing `ptr`.
    pub fn device_of(&self, ptr: DevicePtr) -> Option<DeviceId> {
        let state = self.state();
        let (base, _) = state.resolve(ptr, 1).ok()?;
        state.allocations.get(&base).map(|b| b.device)
    }

    fn current(&self) -> DeviceId {
        SELECTED.with(|selected| {
            selected
                .borrow()
                .get(&self.id)
                .copied()
                .unwrap_or(DeviceId(0))
        })
    }

    fn state(&self) -> MutexGuard<'_, EmulatorState> {
        // Tables are only touched by single inserts, removes and copies.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Accelerator for EmulatedAccelerator {
    fn name(&self) -> &str {
        "emulated"
    }

    fn device_count(&self) -> u32 {
        self.device_count
    }

    fn set_device(&self, device: DeviceId) -> Result<(), DriverError> {
        if device.0 >= self.device_count {
            return Err(DriverError::InvalidDevice {
                device,
                device_count: self.device_count,
            });
        }
        SELECTED.with(|selected| {
            let mut selected = selected.borrow_mut();
            if device == DeviceId(0) {
                selected.swap_remove(&self.id);
            } else {
                selected.insert(self.id, device);
            }
        });
        Ok(())
    }

    fn current_device(&self) -> Result<DeviceId, DriverError> {
        Ok(self.current())
    }

    fn alloc(&self, bytes: usize) -> Result<DevicePtr, DriverError> {
        let device = self.current();
        let mut state = self.state();
        if bytes == 0 {
            return Err(DriverError::InvalidRange { addr: 0, bytes });
        }
        if let Some(limit) = self.memory_per_device {
            if state.used_on(device).saturating_add(bytes) > limit {
                return Err(DriverError::OutOfMemory { device, bytes });
            }
        }
        let memory = HostAllocation::zeroed(bytes, Alignment::DEVICE.get())
            .map_err(|_| DriverError::OutOfMemory { device, bytes })?;
        let base = memory.as_ptr() as u64;
        state
            .allocations
            .insert(base, DeviceBlock { device, memory });
        Ok(DevicePtr(base))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError> {
        self.state()
            .allocations
            .swap_remove(&ptr.addr())
            .map(drop)
            .ok_or(DriverError::InvalidPointer { addr: ptr.addr() })
    }

    fn copy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let (base, offset) = state.resolve(dst, src.len())?;
        let block = state.block_mut(base)?;
        block.memory.bytes_mut()[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), DriverError> {
        let state = self.state();
        let (base, offset) = state.resolve(src, dst.len())?;
        let block = state.block(base)?;
        dst.copy_from_slice(&block.memory.bytes()[offset..offset + dst.len()]);
        Ok(())
    }

    fn copy_dtod(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<(), DriverError> {
        let mut state = self.state();
        let (src_base, src_off) = state.resolve(src, bytes)?;
        let (dst_base, dst_off) = state.resolve(dst, bytes)?;
        if src_base == dst_base {
            state
                .block_mut(dst_base)?
                .memory
                .bytes_mut()
                .copy_within(src_off..src_off + bytes, dst_off);
        } else {
            let staged = state.block(src_base)?.memory.bytes()[src_off..src_off + bytes].to_vec();
            state.block_mut(dst_base)?.memory.bytes_mut()[dst_off..dst_off + bytes]
                .copy_from_slice(&staged);
        }
        Ok(())
    }

    fn host_register(&self, addr: *mut u8, bytes: usize) -> Result<(), DriverError> {
        let start = addr as u64;
        if bytes == 0 || addr.is_null() {
            return Err(DriverError::InvalidRange { addr: start, bytes });
        }
        let end = start.saturating_add(bytes as u64);
        let mut state = self.state();
        let overlaps = state
            .registrations
            .iter()
            .any(|(&base, &len)| base < end && start < base + len as u64);
        if overlaps {
            return Err(DriverError::AlreadyRegistered { addr: start });
        }
        state.registrations.insert(start, bytes);
        Ok(())
    }

    fn host_unregister(&self, addr: *mut u8) -> Result<(), DriverError> {
        let start = addr as u64;
        self.state()
            .registrations
            .swap_remove(&start)
            .map(drop)
            .ok_or(DriverError::NotRegistered { addr: start })
    }
}

impl Drop for EmulatedAccelerator {
    fn drop(&mut self) {
        let _ = SELECTED.try_with(|selected| selected.borrow_mut().swap_remove(&self.id));
    }
}

impl std::fmt::Debug for EmulatedAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedAccelerator")
            .field("device_count", &self.device_count)
            .field("memory_per_device", &self.memory_per_device)
            .field("live_allocations", &self.live_allocations())
            .field("live_registrations", &self.live_registrations())
            .finish()
    }
}
