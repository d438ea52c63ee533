//! Shared test utilities for handoff_core integration tests

#![allow(dead_code)]

use handoff_core::dlpack::ffi::{
    DLDataType, DLDevice, DLManagedTensor, DLManagedTensorVersioned, DLPackVersion, DLTensor,
};
use handoff_core::{
    Allocator, Device, DeviceKind, HandoffConfig, HandoffResult, HostBackend, MemoryBackend,
    TrackingBackend,
};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a test logger once per process (`RUST_LOG=debug` to see output)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Allocator over a tracking host backend
pub fn tracked_allocator() -> (Arc<TrackingBackend>, Allocator) {
    let tracking = Arc::new(TrackingBackend::host());
    let allocator = Allocator::new(tracking.clone(), &HandoffConfig::default());
    (tracking, allocator)
}

/// Pretends to be accelerator memory by tagging host allocations `cuda:N`
///
/// Nothing in these tests dereferences accelerator buffers, so host memory
/// stands in for device memory.
#[derive(Debug, Default)]
pub struct FakeAccelerator {
    host: HostBackend,
}

impl MemoryBackend for FakeAccelerator {
    fn name(&self) -> &'static str {
        "fake-cuda"
    }

    fn supports(&self, device: Device) -> bool {
        device.kind == DeviceKind::Cuda
    }

    fn allocate(&self, size: usize, align: usize, _device: Device) -> HandoffResult<NonNull<u8>> {
        self.host.allocate(size, align, Device::CPU)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, _device: Device) {
        self.host.deallocate(ptr, size, align, Device::CPU)
    }
}

pub fn accelerator_allocator() -> Allocator {
    Allocator::new(Arc::new(FakeAccelerator::default()), &HandoffConfig::default())
}

/// A tensor owned by a pretend foreign runtime
///
/// The data, shape and strides live in the context box; the deleter frees
/// them and counts how often it ran.
pub struct ForeignContext {
    pub data: Vec<f32>,
    pub shape: Vec<i64>,
    pub strides: Option<Vec<i64>>,
    pub deleted: Arc<AtomicUsize>,
}

unsafe extern "C" fn foreign_legacy_deleter(managed: *mut DLManagedTensor) {
    let managed = Box::from_raw(managed);
    let ctx = Box::from_raw(managed.manager_ctx as *mut ForeignContext);
    ctx.deleted.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn foreign_versioned_deleter(managed: *mut DLManagedTensorVersioned) {
    let managed = Box::from_raw(managed);
    let ctx = Box::from_raw(managed.manager_ctx as *mut ForeignContext);
    ctx.deleted.fetch_add(1, Ordering::SeqCst);
}

fn foreign_dl_tensor(ctx: &mut ForeignContext, device: DLDevice) -> DLTensor {
    DLTensor {
        data: ctx.data.as_mut_ptr() as *mut c_void,
        device,
        ndim: ctx.shape.len() as i32,
        dtype: DLDataType::new(2, 32, 1),
        shape: ctx.shape.as_mut_ptr(),
        strides: ctx
            .strides
            .as_mut()
            .map_or(std::ptr::null_mut(), |s| s.as_mut_ptr()),
        byte_offset: 0,
    }
}

const HOST: DLDevice = DLDevice {
    device_type: 1,
    device_id: 0,
};

/// Legacy float32 tensor with a counting deleter
pub fn foreign_legacy(
    data: Vec<f32>,
    shape: Vec<i64>,
    strides: Option<Vec<i64>>,
    deleted: &Arc<AtomicUsize>,
) -> *mut DLManagedTensor {
    let mut ctx = Box::new(ForeignContext {
        data,
        shape,
        strides,
        deleted: Arc::clone(deleted),
    });
    let dl_tensor = foreign_dl_tensor(&mut ctx, HOST);
    Box::into_raw(Box::new(DLManagedTensor {
        dl_tensor,
        manager_ctx: Box::into_raw(ctx) as *mut c_void,
        deleter: Some(foreign_legacy_deleter),
    }))
}

/// Versioned float32 tensor with a counting deleter
pub fn foreign_versioned(
    data: Vec<f32>,
    shape: Vec<i64>,
    version: DLPackVersion,
    flags: u64,
    deleted: &Arc<AtomicUsize>,
) -> *mut DLManagedTensorVersioned {
    let mut ctx = Box::new(ForeignContext {
        data,
        shape,
        strides: None,
        deleted: Arc::clone(deleted),
    });
    let dl_tensor = foreign_dl_tensor(&mut ctx, HOST);
    Box::into_raw(Box::new(DLManagedTensorVersioned {
        version,
        manager_ctx: Box::into_raw(ctx) as *mut c_void,
        deleter: Some(foreign_versioned_deleter),
        flags,
        dl_tensor,
    }))
}
