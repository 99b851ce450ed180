//! Pinned (page-locked, DMA-registered) host buffers.
//!
//! Registration is a sub-object of the buffer: [`PinnedBuffer`] declares its
//! [`PinnedRegistration`] before its host allocation, so the range is always
//! unregistered strictly before the memory is released.

use std::fmt;

use tierarray_core::{RegionError, SharedAccelerator};

use crate::config::TeardownPolicy;
use crate::policy::{Endpoint, EndpointMut, HostBuffer, TierBuffer};
use crate::raw::HostAllocation;

/// Whether a host range is currently registered with the accelerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    /// Not registered, either never or already released.
    Unregistered,
    /// Registered and eligible for DMA.
    Registered,
}

// ── PinnedRegistration ─────────────────────────────────────────────

/// One registration of a host range with an accelerator.
///
/// Exactly one `host_register` is paired with exactly one
/// `host_unregister`, issued by [`close`](Self::close) or on drop.
pub struct PinnedRegistration {
    // Kept as an integer: the address is only a key for the accelerator.
    addr: usize,
    bytes: usize,
    accelerator: SharedAccelerator,
    teardown: TeardownPolicy,
    state: RegistrationState,
}

impl PinnedRegistration {
    /// Register `bytes` bytes at `addr`.
    ///
    /// A driver failure is reported as [`RegionError::Setup`].
    pub fn register(
        addr: *mut u8,
        bytes: usize,
        accelerator: SharedAccelerator,
        teardown: TeardownPolicy,
    ) -> Result<Self, RegionError> {
        accelerator
            .host_register(addr, bytes)
            .map_err(RegionError::Setup)?;
        tracing::debug!(addr = ?addr, bytes, accelerator = accelerator.name(), "host range registered");
        Ok(Self {
            addr: addr as usize,
            bytes,
            accelerator,
            teardown,
            state: RegistrationState::Registered,
        })
    }

    /// Current registration state.
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Length of the registered range in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether the registered range is empty. Never true for live
    /// registrations.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Unregister now, returning a failure as [`RegionError::Teardown`].
    pub fn close(mut self) -> Result<(), RegionError> {
        self.unregister()
    }

    fn unregister(&mut self) -> Result<(), RegionError> {
        if self.state == RegistrationState::Unregistered {
            return Ok(());
        }
        self.state = RegistrationState::Unregistered;
        self.accelerator
            .host_unregister(self.addr as *mut u8)
            .map_err(RegionError::Teardown)?;
        tracing::debug!(addr = %format_args!("{:#x}", self.addr), bytes = self.bytes, "host range unregistered");
        Ok(())
    }
}

impl Drop for PinnedRegistration {
    fn drop(&mut self) {
        if let Err(error) = self.unregister() {
            self.teardown.handle("pinned registration", &error);
        }
    }
}

impl fmt::Debug for PinnedRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedRegistration")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("bytes", &self.bytes)
            .field("state", &self.state)
            .finish()
    }
}

// ── PinnedBuffer ───────────────────────────────────────────────────

/// An aligned host allocation registered for DMA.
#[derive(Debug)]
pub struct PinnedBuffer {
    // Field order is drop order: unregister, then deallocate.
    registration: PinnedRegistration,
    host: HostAllocation,
}

impl PinnedBuffer {
    /// Register `host` with `accelerator`.
    ///
    /// On failure the host allocation is released and nothing stays
    /// registered.
    pub fn new(
        mut host: HostAllocation,
        accelerator: SharedAccelerator,
        teardown: TeardownPolicy,
    ) -> Result<Self, RegionError> {
        let registration =
            PinnedRegistration::register(host.as_mut_ptr(), host.len(), accelerator, teardown)?;
        Ok(Self { registration, host })
    }

    /// The registration sub-object.
    pub fn registration(&self) -> &PinnedRegistration {
        &self.registration
    }
}

impl TierBuffer for PinnedBuffer {
    fn len_bytes(&self) -> usize {
        self.host.len()
    }

    fn as_ptr(&self) -> *const u8 {
        self.host.as_ptr()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.host.as_mut_ptr()
    }

    fn endpoint(&self) -> Endpoint<'_> {
        Endpoint::Host(self.host.bytes())
    }

    fn endpoint_mut(&mut self) -> EndpointMut<'_> {
        EndpointMut::Host(self.host.bytes_mut())
    }

    fn close(self) -> Result<(), RegionError> {
        let Self { registration, host } = self;
        let result = registration.close();
        drop(host);
        result
    }
}

impl HostBuffer for PinnedBuffer {
    fn bytes(&self) -> &[u8] {
        self.host.bytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.host.bytes_mut()
    }
}
