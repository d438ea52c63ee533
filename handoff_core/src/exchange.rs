//! Producer/consumer contract between two memory domains
//!
//! The producer wraps a Buffer with [`produce_capsule`] and hands the capsule
//! across by handle. The consumer states where it can use memory with an
//! [`Accept`] and takes the Buffer with [`consume_capsule`]. Crossing devices
//! is never implicit: a mismatch is an error and the capsule stays intact
//! for a consumer that can accept it, or for an explicit
//! [`Buffer::copy_to`](crate::Buffer::copy_to).

use crate::capsule::{Capsule, ExportOptions};
use crate::config::{CapsuleFormat, HandoffConfig};
use crate::error::{HandoffError, HandoffResult};
use crate::memory::Buffer;
use handoff_types::Device;
use std::fmt;

/// Devices a consumer can take memory on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Accept {
    Any,
    /// Exactly this device
    Device(Device),
    /// Any memory the host can dereference (CPU, pinned, managed)
    HostAccessible,
}

impl Accept {
    pub fn permits(&self, device: Device) -> bool {
        match self {
            Accept::Any => true,
            Accept::Device(expected) => *expected == device,
            Accept::HostAccessible => device.is_host_accessible(),
        }
    }

    pub(crate) fn check(&self, device: Device) -> HandoffResult<()> {
        if self.permits(device) {
            Ok(())
        } else {
            Err(HandoffError::DeviceMismatch {
                expected: self.to_string(),
                actual: device,
            })
        }
    }
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accept::Any => write!(f, "any device"),
            Accept::Device(device) => write!(f, "{}", device),
            Accept::HostAccessible => write!(f, "host-accessible memory"),
        }
    }
}

/// Wrap `buffer` for hand-off using the configured export options
pub fn produce_capsule(buffer: Buffer, config: &HandoffConfig) -> Capsule {
    Capsule::wrap_with(buffer, ExportOptions::from(config))
}

/// Take the Buffer out of `capsule`, exactly once
pub fn consume_capsule(capsule: &Capsule, accept: Accept) -> HandoffResult<Buffer> {
    capsule.consume_as(accept)
}

/// Capsule format for a consumer announcing `max_version` to `__dlpack__`
///
/// Consumers that announce nothing, or a major version below 1, only
/// understand legacy capsules.
pub fn negotiate_format(max_version: Option<(u32, u32)>, config: &HandoffConfig) -> CapsuleFormat {
    match max_version {
        Some((major, _)) if major >= 1 => config.capsule_format,
        _ => CapsuleFormat::Legacy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::CapsuleState;
    use handoff_types::{DType, DeviceKind};

    #[test]
    fn test_accept_permits() {
        let pinned = Device::new(DeviceKind::CudaHost, 0);
        assert!(Accept::Any.permits(Device::cuda(3)));
        assert!(Accept::HostAccessible.permits(pinned));
        assert!(!Accept::HostAccessible.permits(Device::cuda(0)));
        assert!(Accept::Device(Device::cuda(1)).permits(Device::cuda(1)));
        assert!(!Accept::Device(Device::cuda(1)).permits(Device::cuda(0)));
    }

    #[test]
    fn test_produce_uses_config() {
        let config = HandoffConfig {
            capsule_format: CapsuleFormat::Legacy,
            read_only_exports: true,
            ..HandoffConfig::default()
        };
        let capsule = produce_capsule(Buffer::from_vec(vec![1.0f32]), &config);
        assert_eq!(capsule.inspect().format, CapsuleFormat::Legacy);
        assert!(capsule.inspect().read_only);
    }

    #[test]
    fn test_consume_mismatch_reports_both_sides() {
        let capsule = produce_capsule(Buffer::from_vec(vec![0u8]), &HandoffConfig::default());
        let err = consume_capsule(&capsule, Accept::Device(Device::cuda(2))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Device mismatch: consumer accepts cuda:2, tensor lives on cpu"
        );
        assert_eq!(capsule.state(), CapsuleState::Unconsumed);

        let buffer = consume_capsule(&capsule, Accept::Device(Device::CPU)).unwrap();
        assert_eq!(buffer.dtype(), DType::U8);
    }

    #[test]
    fn test_negotiate_format() {
        let config = HandoffConfig::default();
        assert_eq!(negotiate_format(None, &config), CapsuleFormat::Legacy);
        assert_eq!(negotiate_format(Some((0, 8)), &config), CapsuleFormat::Legacy);
        assert_eq!(negotiate_format(Some((1, 0)), &config), CapsuleFormat::Versioned);

        let legacy = HandoffConfig {
            capsule_format: CapsuleFormat::Legacy,
            ..HandoffConfig::default()
        };
        assert_eq!(negotiate_format(Some((1, 1)), &legacy), CapsuleFormat::Legacy);
    }
}
