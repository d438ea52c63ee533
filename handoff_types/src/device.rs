//! Device tags for buffer placement
//!
//! A [`Device`] names the memory domain a buffer lives in: host memory or a
//! specific accelerator. Kinds carry their DLPack `DLDeviceType` code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory domain kind, discriminants are the DLPack device type codes
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu = 1,
    Cuda = 2,
    /// Pinned host memory from cudaMallocHost
    CudaHost = 3,
    OpenCl = 4,
    Vulkan = 7,
    Metal = 8,
    Rocm = 10,
    /// Pinned host memory from hipMallocHost
    RocmHost = 11,
    /// Unified memory from cudaMallocManaged
    CudaManaged = 13,
    OneApi = 14,
    WebGpu = 15,
}

impl DeviceKind {
    /// Look up a kind by its DLPack device type code
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DeviceKind::Cpu),
            2 => Some(DeviceKind::Cuda),
            3 => Some(DeviceKind::CudaHost),
            4 => Some(DeviceKind::OpenCl),
            7 => Some(DeviceKind::Vulkan),
            8 => Some(DeviceKind::Metal),
            10 => Some(DeviceKind::Rocm),
            11 => Some(DeviceKind::RocmHost),
            13 => Some(DeviceKind::CudaManaged),
            14 => Some(DeviceKind::OneApi),
            15 => Some(DeviceKind::WebGpu),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(&self) -> i32 {
        *self as i32
    }

    /// Name used in `Display` and `parse`
    pub const fn name(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::CudaHost => "cuda_host",
            DeviceKind::OpenCl => "opencl",
            DeviceKind::Vulkan => "vulkan",
            DeviceKind::Metal => "metal",
            DeviceKind::Rocm => "rocm",
            DeviceKind::RocmHost => "rocm_host",
            DeviceKind::CudaManaged => "cuda_managed",
            DeviceKind::OneApi => "oneapi",
            DeviceKind::WebGpu => "webgpu",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(DeviceKind::Cpu),
            "cuda" | "gpu" => Some(DeviceKind::Cuda),
            "cuda_host" => Some(DeviceKind::CudaHost),
            "opencl" => Some(DeviceKind::OpenCl),
            "vulkan" => Some(DeviceKind::Vulkan),
            "metal" | "mps" => Some(DeviceKind::Metal),
            "rocm" | "hip" => Some(DeviceKind::Rocm),
            "rocm_host" => Some(DeviceKind::RocmHost),
            "cuda_managed" => Some(DeviceKind::CudaManaged),
            "oneapi" => Some(DeviceKind::OneApi),
            "webgpu" => Some(DeviceKind::WebGpu),
            _ => None,
        }
    }
}

/// Device a buffer resides on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    /// Accelerator index, always 0 for host kinds
    pub index: u32,
}

impl Default for Device {
    fn default() -> Self {
        Self::CPU
    }
}

impl Device {
    /// Host memory
    pub const CPU: Device = Device {
        kind: DeviceKind::Cpu,
        index: 0,
    };

    #[inline]
    pub const fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }

    #[inline]
    pub const fn cpu() -> Self {
        Self::CPU
    }

    #[inline]
    pub const fn cuda(index: u32) -> Self {
        Self::new(DeviceKind::Cuda, index)
    }

    #[inline]
    pub const fn is_cpu(&self) -> bool {
        matches!(self.kind, DeviceKind::Cpu)
    }

    /// Whether the CPU can dereference pointers into this domain
    #[inline]
    pub const fn is_host_accessible(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Cpu | DeviceKind::CudaHost | DeviceKind::RocmHost | DeviceKind::CudaManaged
        )
    }

    /// Parse "cpu", "cuda", "cuda:1", "metal:0", ...
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let (name, index) = match s.split_once(':') {
            Some((name, idx)) => (name, idx.parse::<u32>().ok()?),
            None => (s.as_str(), 0),
        };
        let kind = DeviceKind::from_name(name)?;
        Some(Self::new(kind, index))
    }

    /// DLPack `(device_type, device_id)` pair
    #[inline]
    pub const fn to_dlpack(&self) -> (i32, i32) {
        (self.kind.code(), self.index as i32)
    }

    /// Create from a DLPack `(device_type, device_id)` pair
    pub const fn from_dlpack(device_type: i32, device_id: i32) -> Option<Self> {
        if device_id < 0 {
            return None;
        }
        match DeviceKind::from_code(device_type) {
            Some(kind) => Some(Self::new(kind, device_id as u32)),
            None => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cpu() {
            f.write_str("cpu")
        } else {
            write!(f, "{}:{}", self.kind.name(), self.index)
        }
    }
}

// Serialized as the display string ("cpu", "cuda:0", ...)
impl Serialize for Device {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Device::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid device: {}", s)))
    }
}
