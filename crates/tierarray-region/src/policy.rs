//! Tier allocation policies.
//!
//! A [`TierPolicy`] is the strategy an [`ArrayRegion`](crate::ArrayRegion)
//! is parameterized by. It knows its [`Tier`], its default alignment, and
//! how to produce an owned buffer of a given byte size. The buffer it
//! returns implements [`TierBuffer`], which is everything the region needs
//! to move bytes in and out of it and to tear it down.
//!
//! | Policy | Buffer | Host-addressable |
//! |--------|--------|------------------|
//! | [`Standard`] | [`HostAllocation`] | yes |
//! | [`HighBandwidth`] | [`HostAllocation`] | yes |
//! | [`Pinned`] | [`PinnedBuffer`] | yes |
//! | [`Device`] | [`DeviceAllocation`] | no |

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tierarray_core::{
    AllocError, Alignment, DeviceId, DevicePtr, RegionError, SharedAccelerator, Tier,
};

use crate::config::{HbwPolicy, TeardownPolicy};
use crate::device::{during_construction, DeviceAllocation, DeviceContext};
use crate::hbw::{self, NodeMask};
use crate::pinned::PinnedBuffer;
use crate::raw::{self, HostAllocation};

// ── Traits ─────────────────────────────────────────────────────────

/// Strategy for allocating the buffer behind a region.
pub trait TierPolicy: Clone {
    /// The tier this policy allocates from.
    const TIER: Tier;

    /// Owned buffer type produced by [`allocate`](TierPolicy::allocate).
    type Buffer: TierBuffer;

    /// Default alignment for buffers of this policy.
    fn alignment(&self) -> Alignment;

    /// Allocate `bytes` bytes aligned to at least `align`.
    ///
    /// `bytes` is non-zero and `align` a power of two; the region checks
    /// both before calling. Nothing is published on failure.
    fn allocate(&self, bytes: usize, align: usize) -> Result<Self::Buffer, RegionError>;
}

/// Where the bytes of a buffer live, for reading.
pub enum Endpoint<'a> {
    /// Host-addressable bytes.
    Host(&'a [u8]),
    /// Bytes in the memory of `context`'s device.
    Device {
        /// Start of the buffer.
        ptr: DevicePtr,
        /// The owning device.
        context: &'a DeviceContext,
    },
}

/// Where the bytes of a buffer live, for writing.
pub enum EndpointMut<'a> {
    /// Host-addressable bytes.
    Host(&'a mut [u8]),
    /// Bytes in the memory of `context`'s device.
    Device {
        /// Start of the buffer.
        ptr: DevicePtr,
        /// The owning device.
        context: &'a DeviceContext,
    },
}

/// An owned buffer produced by a [`TierPolicy`].
pub trait TierBuffer {
    /// Size of the buffer in bytes.
    fn len_bytes(&self) -> usize;

    /// Address of the first byte. For device buffers this is a device
    /// address and must not be dereferenced on the host.
    fn as_ptr(&self) -> *const u8;

    /// Mutable address of the first byte.
    fn as_mut_ptr(&mut self) -> *mut u8;

    /// Source view for transfers.
    fn endpoint(&self) -> Endpoint<'_>;

    /// Destination view for transfers.
    fn endpoint_mut(&mut self) -> EndpointMut<'_>;

    /// The device context, for device-resident buffers.
    fn context(&self) -> Option<&DeviceContext> {
        None
    }

    /// Release the buffer, returning teardown failures to the caller.
    fn close(self) -> Result<(), RegionError>;
}

/// A buffer whose bytes are directly addressable from the host.
pub trait HostBuffer: TierBuffer {
    /// The buffer's bytes.
    fn bytes(&self) -> &[u8];

    /// The buffer's bytes, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl TierBuffer for HostAllocation {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn as_ptr(&self) -> *const u8 {
        HostAllocation::as_ptr(self)
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        HostAllocation::as_mut_ptr(self)
    }

    fn endpoint(&self) -> Endpoint<'_> {
        Endpoint::Host(HostAllocation::bytes(self))
    }

    fn endpoint_mut(&mut self) -> EndpointMut<'_> {
        EndpointMut::Host(HostAllocation::bytes_mut(self))
    }

    fn close(self) -> Result<(), RegionError> {
        drop(self);
        Ok(())
    }
}

impl HostBuffer for HostAllocation {
    fn bytes(&self) -> &[u8] {
        HostAllocation::bytes(self)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        HostAllocation::bytes_mut(self)
    }
}

impl TierBuffer for DeviceAllocation {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr().addr() as *const u8
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr().addr() as *mut u8
    }

    fn endpoint(&self) -> Endpoint<'_> {
        Endpoint::Device {
            ptr: self.ptr(),
            context: DeviceAllocation::context(self),
        }
    }

    fn endpoint_mut(&mut self) -> EndpointMut<'_> {
        EndpointMut::Device {
            ptr: self.ptr(),
            context: DeviceAllocation::context(self),
        }
    }

    fn context(&self) -> Option<&DeviceContext> {
        Some(DeviceAllocation::context(self))
    }

    fn close(self) -> Result<(), RegionError> {
        DeviceAllocation::close(self)
    }
}

// ── Standard ───────────────────────────────────────────────────────

/// Ordinary host DRAM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Standard {
    align: Alignment,
}

impl Standard {
    /// Standard policy with the given default alignment.
    pub fn new(align: Alignment) -> Self {
        Self { align }
    }
}

impl TierPolicy for Standard {
    const TIER: Tier = Tier::Standard;
    type Buffer = HostAllocation;

    fn alignment(&self) -> Alignment {
        self.align
    }

    fn allocate(&self, bytes: usize, align: usize) -> Result<HostAllocation, RegionError> {
        Ok(HostAllocation::zeroed(bytes, align)?)
    }
}

// ── HighBandwidth ──────────────────────────────────────────────────

static HBW_FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

/// High-bandwidth host memory.
///
/// Pages are bound to the memory-only NUMA nodes found at construction,
/// with `MPOL_PREFERRED` or `MPOL_BIND` according to the [`HbwPolicy`].
/// When the node has no HBM, [`HbwPolicy::Preferred`] falls back to
/// standard DRAM with a one-time warning and [`HbwPolicy::Bind`] fails with
/// [`AllocError::HighBandwidthUnavailable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HighBandwidth {
    align: Alignment,
    policy: HbwPolicy,
    nodes: NodeMask,
}

impl HighBandwidth {
    /// Policy binding to an explicit set of nodes. An empty mask means the
    /// node has no high-bandwidth memory.
    pub fn new(align: Alignment, policy: HbwPolicy, nodes: NodeMask) -> Self {
        Self {
            align,
            policy,
            nodes,
        }
    }

    /// Policy binding to the high-bandwidth nodes of the running node.
    pub fn detect(align: Alignment, policy: HbwPolicy) -> Self {
        Self::new(align, policy, hbw::high_bandwidth_mask())
    }

    /// Whether high-bandwidth memory was found.
    pub fn is_available(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// The nodes pages are bound to.
    pub fn nodes(&self) -> &NodeMask {
        &self.nodes
    }

    /// The fallback behaviour.
    pub fn hbw_policy(&self) -> HbwPolicy {
        self.policy
    }
}

impl Default for HighBandwidth {
    fn default() -> Self {
        Self::detect(Alignment::DEFAULT, HbwPolicy::default())
    }
}

impl TierPolicy for HighBandwidth {
    const TIER: Tier = Tier::HighBandwidth;
    type Buffer = HostAllocation;

    fn alignment(&self) -> Alignment {
        self.align
    }

    fn allocate(&self, bytes: usize, align: usize) -> Result<HostAllocation, RegionError> {
        if self.nodes.is_empty() {
            return match self.policy {
                HbwPolicy::Bind => Err(AllocError::HighBandwidthUnavailable.into()),
                HbwPolicy::Preferred => {
                    if !HBW_FALLBACK_WARNED.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            tier = %Tier::HighBandwidth,
                            "no high-bandwidth memory on this node, falling back to standard DRAM"
                        );
                    }
                    Ok(HostAllocation::zeroed(bytes, align)?)
                }
            };
        }
        // mbind works on whole pages.
        let mut host = HostAllocation::zeroed(bytes, align.max(raw::page_size()))?;
        host.bind(self.policy, &self.nodes)?;
        tracing::debug!(
            bytes,
            nodes = ?self.nodes.nodes(),
            policy = ?self.policy,
            "bound high-bandwidth allocation"
        );
        Ok(host)
    }
}

// ── Pinned ─────────────────────────────────────────────────────────

/// Host memory registered with the accelerator for DMA.
#[derive(Clone)]
pub struct Pinned {
    align: Alignment,
    accelerator: SharedAccelerator,
    teardown: TeardownPolicy,
}

impl Pinned {
    /// Pinned policy registering through `accelerator`.
    pub fn new(accelerator: SharedAccelerator) -> Self {
        Self {
            align: Alignment::DEFAULT,
            accelerator,
            teardown: TeardownPolicy::default(),
        }
    }

    /// Override the default alignment.
    pub fn with_alignment(mut self, align: Alignment) -> Self {
        self.align = align;
        self
    }

    /// Override the teardown policy.
    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    /// The accelerator buffers are registered with.
    pub fn accelerator(&self) -> &SharedAccelerator {
        &self.accelerator
    }
}

impl TierPolicy for Pinned {
    const TIER: Tier = Tier::Pinned;
    type Buffer = PinnedBuffer;

    fn alignment(&self) -> Alignment {
        self.align
    }

    fn allocate(&self, bytes: usize, align: usize) -> Result<PinnedBuffer, RegionError> {
        let host = HostAllocation::zeroed(bytes, align)?;
        PinnedBuffer::new(host, Arc::clone(&self.accelerator), self.teardown)
    }
}

impl fmt::Debug for Pinned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("align", &self.align)
            .field("accelerator", &self.accelerator.name())
            .field("teardown", &self.teardown)
            .finish()
    }
}

// ── Device ─────────────────────────────────────────────────────────

/// Memory on one accelerator device.
///
/// Each allocation gets its own [`DeviceContext`], so the device is
/// validated on every region construction.
#[derive(Clone)]
pub struct Device {
    device: DeviceId,
    accelerator: SharedAccelerator,
    teardown: TeardownPolicy,
}

impl Device {
    /// Policy allocating on `device`.
    pub fn new(device: DeviceId, accelerator: SharedAccelerator) -> Self {
        Self {
            device,
            accelerator,
            teardown: TeardownPolicy::default(),
        }
    }

    /// Override the teardown policy.
    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    /// The target device.
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl TierPolicy for Device {
    const TIER: Tier = Tier::Device;
    type Buffer = DeviceAllocation;

    fn alignment(&self) -> Alignment {
        Alignment::DEVICE
    }

    fn allocate(&self, bytes: usize, _align: usize) -> Result<DeviceAllocation, RegionError> {
        let context = DeviceContext::new(self.device, Arc::clone(&self.accelerator))
            .map_err(during_construction)?;
        DeviceAllocation::new(context, bytes, self.teardown)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device", &self.device)
            .field("accelerator", &self.accelerator.name())
            .field("teardown", &self.teardown)
            .finish()
    }
}
