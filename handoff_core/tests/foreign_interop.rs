//! Tests for tensors crossing in from, and out to, other DLPack runtimes

mod common;

use common::{foreign_legacy, foreign_versioned, init_logging, tracked_allocator};
use handoff_core::dlpack::ffi::{DLPackVersion, DLPACK_FLAG_BITMASK_READ_ONLY};
use handoff_core::{Accept, Capsule, CapsuleFormat, CapsuleState, DType, Device, HandoffError, RawTensor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_foreign_legacy_deleted_once_after_consume() {
    init_logging();
    let deleted = Arc::new(AtomicUsize::new(0));
    let managed = foreign_legacy(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2], None, &deleted);

    let capsule = unsafe { Capsule::from_raw_legacy(managed) }.unwrap();
    assert!(!capsule.is_native());
    assert_eq!(capsule.inspect().shape(), &[2, 2]);
    assert_eq!(capsule.inspect().dtype, DType::F32);
    assert_eq!(capsule.inspect().format, CapsuleFormat::Legacy);

    let buffer = capsule.consume().unwrap();
    let row = buffer.view(&[2], &[1], 8).unwrap();
    drop(buffer);
    drop(capsule);
    assert_eq!(deleted.load(Ordering::SeqCst), 0);

    assert_eq!(row.as_slice::<f32>().unwrap(), &[3.0, 4.0]);
    drop(row);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_foreign_unconsumed_deleted_on_drop() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let managed = foreign_legacy(vec![0.0; 3], vec![3], None, &deleted);
    let capsule = unsafe { Capsule::from_raw_legacy(managed) }.unwrap();
    drop(capsule);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_foreign_strided_import() {
    let deleted = Arc::new(AtomicUsize::new(0));
    // 2x3 stored column-major
    let data = vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
    let managed = foreign_legacy(data, vec![2, 3], Some(vec![1, 2]), &deleted);

    let capsule = unsafe { Capsule::from_raw_legacy(managed) }.unwrap();
    assert_eq!(capsule.inspect().strides(), &[1, 2]);
    assert!(matches!(
        capsule.with_bytes(|b| b.len()),
        Err(HandoffError::Shape(_))
    ));

    let buffer = capsule.consume().unwrap();
    assert_eq!(
        buffer.to_vec::<f32>().unwrap(),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
}

#[test]
fn test_versioned_read_only_import() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let managed = foreign_versioned(
        vec![1.0, 2.0],
        vec![2],
        DLPackVersion { major: 1, minor: 0 },
        DLPACK_FLAG_BITMASK_READ_ONLY,
        &deleted,
    );
    let capsule = unsafe { Capsule::from_raw_versioned(managed) }.unwrap();
    assert!(capsule.inspect().read_only);

    let mut buffer = capsule.consume_as(Accept::HostAccessible).unwrap();
    assert!(buffer.is_read_only());
    assert_eq!(buffer.as_slice::<f32>().unwrap(), &[1.0, 2.0]);
    assert!(buffer.as_mut_slice::<f32>().is_err());
    drop(buffer);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsupported_version_leaves_ownership_with_caller() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let managed = foreign_versioned(
        vec![0.0],
        vec![1],
        DLPackVersion { major: 2, minor: 0 },
        0,
        &deleted,
    );
    let err = unsafe { Capsule::from_raw_versioned(managed) }.unwrap_err();
    assert!(matches!(
        err,
        HandoffError::UnsupportedVersion { major: 2, minor: 0 }
    ));
    assert_eq!(deleted.load(Ordering::SeqCst), 0);

    // still ours to release
    let raw = RawTensor::from_ptr(managed as *mut _, CapsuleFormat::Versioned).unwrap();
    unsafe { raw.delete() };
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_null_managed_pointer() {
    let err = unsafe { Capsule::from_raw_legacy(std::ptr::null_mut()) }.unwrap_err();
    assert!(matches!(err, HandoffError::InvalidTensor(_)));
}

#[test]
fn test_export_to_foreign_consumer() {
    init_logging();
    let (tracking, allocator) = tracked_allocator();
    let mut buffer = allocator.allocate(DType::F64, &[2, 2], Device::CPU).unwrap();
    buffer
        .as_mut_slice::<f64>()
        .unwrap()
        .copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

    let capsule = Capsule::wrap(buffer);
    let raw = capsule.take_raw().unwrap();
    assert_eq!(capsule.state(), CapsuleState::Consumed);
    drop(capsule);
    assert_eq!(tracking.stats().deallocations, 0);

    // what a consumer in another runtime would do
    let RawTensor::Versioned(managed) = raw else {
        panic!("default export is versioned");
    };
    unsafe {
        let managed = managed.as_ptr();
        assert_eq!((*managed).version, DLPackVersion { major: 1, minor: 1 });
        let tensor = &(*managed).dl_tensor;
        assert_eq!(tensor.ndim, 2);
        let values = std::slice::from_raw_parts(
            (tensor.data as *const u8).add(tensor.byte_offset as usize) as *const f64,
            4,
        );
        assert_eq!(values, &[1.0, 2.0, 3.0, 4.0]);
        ((*managed).deleter.unwrap())(managed);
    }
    assert_eq!(tracking.stats().deallocations, 1);
}

#[test]
fn test_legacy_export_reimported() {
    let (tracking, allocator) = tracked_allocator();
    let buffer = allocator.allocate(DType::U32, &[5], Device::CPU).unwrap();
    let capsule = Capsule::wrap_with(
        buffer,
        handoff_core::ExportOptions {
            format: CapsuleFormat::Legacy,
            read_only: false,
        },
    );
    let raw = capsule.into_raw().unwrap();
    assert_eq!(raw.format(), CapsuleFormat::Legacy);

    let capsule = unsafe { raw.into_capsule() }.unwrap();
    assert_eq!(capsule.inspect().shape(), &[5]);
    drop(capsule);
    assert_eq!(tracking.stats().deallocations, 1);
}
