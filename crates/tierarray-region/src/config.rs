//! Tier configuration parameters.

use tierarray_core::{Alignment, ConfigError, DeviceId, SharedAccelerator, Tier};

use crate::policy::{Device, HighBandwidth, Pinned, Standard};

/// What to do when the high-bandwidth tier is requested on a node without
/// high-bandwidth memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HbwPolicy {
    /// Fall back to standard DRAM and log a warning.
    #[default]
    Preferred,
    /// Fail the allocation with
    /// [`AllocError::HighBandwidthUnavailable`](tierarray_core::AllocError::HighBandwidthUnavailable).
    Bind,
}

/// What to do when deregistration or deallocation fails while a region is
/// being dropped.
///
/// No caller frame remains to recover at that point, so the failure is
/// always logged at error level first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// Abort the process.
    #[default]
    Abort,
    /// Panic, unless the thread is already panicking.
    Panic,
    /// Log and carry on.
    Log,
}

impl TeardownPolicy {
    /// Apply the policy to a teardown failure of `resource`.
    pub(crate) fn handle(self, resource: &'static str, error: &dyn std::error::Error) {
        tracing::error!(resource, error = %error, policy = ?self, "teardown failed");
        match self {
            TeardownPolicy::Abort => std::process::abort(),
            TeardownPolicy::Panic => {
                if !std::thread::panicking() {
                    panic!("tierarray: {resource} teardown failed: {error}");
                }
            }
            TeardownPolicy::Log => {}
        }
    }
}

/// Configuration for the tier allocation policies.
///
/// Validated by [`TierConfig::validate`]; the policy constructors call it
/// for you.
#[derive(Clone, Debug)]
pub struct TierConfig {
    /// Byte alignment of standard-tier buffers. Default: 64.
    pub standard_alignment: usize,
    /// Byte alignment of high-bandwidth-tier buffers. Default: 64.
    pub high_bandwidth_alignment: usize,
    /// Byte alignment of pinned-tier buffers. Default: 64.
    pub pinned_alignment: usize,
    /// Behaviour of the high-bandwidth tier on nodes without HBM.
    pub hbw_policy: HbwPolicy,
    /// Behaviour on teardown failures of pinned and device buffers.
    pub teardown: TeardownPolicy,
}

impl TierConfig {
    /// Default alignment for every host tier.
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Check that every alignment is a non-zero power of two.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tier, align) in [
            (Tier::Standard, self.standard_alignment),
            (Tier::HighBandwidth, self.high_bandwidth_alignment),
            (Tier::Pinned, self.pinned_alignment),
        ] {
            alignment(tier, align)?;
        }
        Ok(())
    }

    /// Standard-tier policy with the configured alignment.
    pub fn standard(&self) -> Result<Standard, ConfigError> {
        Ok(Standard::new(alignment(
            Tier::Standard,
            self.standard_alignment,
        )?))
    }

    /// High-bandwidth policy, probing the node for HBM.
    pub fn high_bandwidth(&self) -> Result<HighBandwidth, ConfigError> {
        let align = alignment(Tier::HighBandwidth, self.high_bandwidth_alignment)?;
        Ok(HighBandwidth::detect(align, self.hbw_policy))
    }

    /// Pinned-tier policy registering through `accelerator`.
    pub fn pinned(&self, accelerator: SharedAccelerator) -> Result<Pinned, ConfigError> {
        let align = alignment(Tier::Pinned, self.pinned_alignment)?;
        Ok(Pinned::new(accelerator)
            .with_alignment(align)
            .with_teardown(self.teardown))
    }

    /// Device-tier policy for `device` on `accelerator`.
    pub fn device(&self, device: DeviceId, accelerator: SharedAccelerator) -> Device {
        Device::new(device, accelerator).with_teardown(self.teardown)
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            standard_alignment: Self::DEFAULT_ALIGNMENT,
            high_bandwidth_alignment: Self::DEFAULT_ALIGNMENT,
            pinned_alignment: Self::DEFAULT_ALIGNMENT,
            hbw_policy: HbwPolicy::default(),
            teardown: TeardownPolicy::default(),
        }
    }
}

fn alignment(tier: Tier, align: usize) -> Result<Alignment, ConfigError> {
    Alignment::new(align).map_err(|_| ConfigError::InvalidAlignment { tier, align })
}
