//! Aligned host allocations.
//!
//! This is the only module in the crate that contains `unsafe` code. Every
//! other module reaches host memory through [`HostAllocation`]'s safe byte
//! views, and the NUMA page placement used by the high-bandwidth tier goes
//! through [`HostAllocation::bind`].

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use tierarray_core::AllocError;

use crate::config::HbwPolicy;
use crate::hbw::NodeMask;

// From <linux/mempolicy.h>.
const MPOL_PREFERRED: libc::c_int = 1;
const MPOL_BIND: libc::c_int = 2;
const MPOL_MF_MOVE: libc::c_uint = 1 << 1;

/// The `mbind` mode implementing `policy`.
fn mempolicy_mode(policy: HbwPolicy) -> libc::c_int {
    match policy {
        HbwPolicy::Preferred => MPOL_PREFERRED,
        HbwPolicy::Bind => MPOL_BIND,
    }
}

/// The system page size in bytes.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: `sysconf` has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if let Ok(size) = usize::try_from(size) {
            if size.is_power_of_two() {
                return size;
            }
        }
    }
    4096
}

/// An owned, zero-initialised, aligned block of host memory.
///
/// Released with the global allocator when dropped. The block is never
/// resized, so its address is stable for its whole lifetime.
pub struct HostAllocation {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HostAllocation {
    /// Allocate `bytes` of zeroed memory aligned to `align`.
    ///
    /// Fails with [`AllocError::ZeroLength`] for empty requests,
    /// [`AllocError::InvalidLayout`] when `align` is not a power of two or
    /// the rounded size overflows, and [`AllocError::OutOfMemory`] when the
    /// allocator returns null.
    pub fn zeroed(bytes: usize, align: usize) -> Result<Self, AllocError> {
        if bytes == 0 {
            return Err(AllocError::ZeroLength);
        }
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|_| AllocError::InvalidLayout { bytes, align })?;
        // SAFETY: `layout` has a non-zero size, checked above.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory { bytes, align })?;
        Ok(Self { ptr, layout })
    }

    /// Start of the block.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable start of the block.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always `false`; empty allocations are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment of the block in bytes.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// The block as bytes.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr` is a live allocation of `layout.size()` bytes that
        // was zero-initialised, and `&self` prevents concurrent mutation.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// The block as mutable bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and `&mut self` guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Place the block's pages on the NUMA nodes in `nodes`.
    ///
    /// [`HbwPolicy::Preferred`] maps to `MPOL_PREFERRED`, [`HbwPolicy::Bind`]
    /// to `MPOL_BIND`. Pages already faulted in are migrated. The block must
    /// start on a page boundary; allocate it with at least [`page_size`]
    /// alignment.
    #[cfg(target_os = "linux")]
    pub fn bind(&mut self, policy: HbwPolicy, nodes: &NodeMask) -> Result<(), AllocError> {
        let bytes = self.layout.size();
        if nodes.is_empty() {
            return Err(AllocError::HighBandwidthUnavailable);
        }
        // SAFETY: the range is exactly this allocation, which `&mut self`
        // owns exclusively, and `nodes.words()` holds `max_node() - 1` bits
        // and outlives the call. `mbind` only changes page placement.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                self.ptr.as_ptr().cast::<libc::c_void>(),
                bytes as libc::c_ulong,
                mempolicy_mode(policy),
                nodes.words().as_ptr(),
                nodes.max_node(),
                MPOL_MF_MOVE,
            )
        };
        if rc != 0 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or_default();
            return Err(AllocError::Binding { bytes, errno });
        }
        Ok(())
    }

    /// NUMA placement is only implemented on Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn bind(&mut self, policy: HbwPolicy, nodes: &NodeMask) -> Result<(), AllocError> {
        let _ = (mempolicy_mode(policy), nodes);
        Err(AllocError::HighBandwidthUnavailable)
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with this exact
        // layout and is released exactly once.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: `HostAllocation` uniquely owns its block, like `Box<[u8]>`.
unsafe impl Send for HostAllocation {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for HostAllocation {}

impl std::fmt::Debug for HostAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAllocation")
            .field("addr", &self.ptr)
            .field("len", &self.len())
            .field("align", &self.align())
            .finish()
    }
}
