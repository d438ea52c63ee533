//! Acceptance tests for capsule ownership transfer
//! Round trips, exactly-once release and concurrent consumers

mod common;

use common::{accelerator_allocator, init_logging, tracked_allocator};
use handoff_core::{
    consume_capsule, produce_capsule, Accept, Buffer, Capsule, CapsuleState, DType, Device,
    HandoffConfig, HandoffError,
};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_round_trip_preserves_shape_and_dtype() {
    init_logging();
    let (_, allocator) = tracked_allocator();
    let shapes: [&[usize]; 5] = [&[], &[0], &[10], &[2, 3], &[4, 1, 5]];

    for dtype in DType::ALL {
        for shape in shapes {
            let buffer = allocator.allocate(dtype, shape, Device::CPU).unwrap();
            let capsule = Capsule::wrap(buffer);
            let buffer = capsule.consume().unwrap();
            assert_eq!(buffer.shape(), shape, "{} {:?}", dtype, shape);
            assert_eq!(buffer.dtype(), dtype);
            assert_eq!(buffer.device(), Device::CPU);
        }
    }
}

#[test]
fn test_double_consume_frees_once() {
    init_logging();
    let (tracking, allocator) = tracked_allocator();
    let capsule = Capsule::wrap(allocator.allocate(DType::F32, &[128], Device::CPU).unwrap());

    let buffer = capsule.consume().unwrap();
    assert!(matches!(capsule.consume(), Err(HandoffError::AlreadyConsumed)));

    drop(buffer);
    drop(capsule);
    let stats = tracking.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.live_bytes, 0);
}

#[test]
fn test_unconsumed_capsule_frees_on_drop() {
    let (tracking, allocator) = tracked_allocator();
    {
        let _capsule =
            Capsule::wrap(allocator.allocate(DType::U8, &[4096], Device::CPU).unwrap());
        assert_eq!(tracking.stats().live_bytes, 4096);
    }
    assert_eq!(tracking.stats().deallocations, 1);
    assert_eq!(tracking.stats().live_bytes, 0);
}

#[test]
fn test_capsule_freed_on_error_path() {
    fn fails_after_wrap(allocator: &handoff_core::Allocator) -> Result<(), HandoffError> {
        let capsule = Capsule::wrap(allocator.allocate(DType::I16, &[8], Device::CPU)?);
        capsule.consume_as(Accept::Device(Device::cuda(0)))?;
        unreachable!("consume_as must reject the host capsule")
    }

    let (tracking, allocator) = tracked_allocator();
    assert!(fails_after_wrap(&allocator).is_err());
    assert_eq!(tracking.stats().live_allocations(), 0);
}

#[test]
fn test_concurrent_consume_has_one_winner() {
    init_logging();
    for n in [1usize, 2, 8, 32] {
        let (tracking, allocator) = tracked_allocator();
        let capsule = Arc::new(Capsule::wrap(
            allocator.allocate(DType::I64, &[64], Device::CPU).unwrap(),
        ));
        let barrier = Arc::new(Barrier::new(n));

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let capsule = Arc::clone(&capsule);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    capsule.consume()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(HandoffError::AlreadyConsumed)))
            .count();
        assert_eq!(winners, 1, "n = {}", n);
        assert_eq!(losers, n - 1, "n = {}", n);

        drop(results);
        drop(capsule);
        assert_eq!(tracking.stats().deallocations, 1, "n = {}", n);
    }
}

#[test]
fn test_int64_scenario() {
    let mut buffer = Buffer::allocate(DType::I64, &[10], Device::CPU).unwrap();
    buffer
        .as_mut_slice::<i64>()
        .unwrap()
        .iter_mut()
        .enumerate()
        .for_each(|(i, v)| *v = i as i64);

    let capsule = Capsule::wrap(buffer);
    assert_eq!(capsule.inspect().shape(), &[10]);
    assert_eq!(capsule.inspect().dtype, DType::I64);
    assert_eq!(capsule.inspect().device, Device::CPU);

    let buffer = capsule.consume().unwrap();
    assert_eq!(buffer.as_slice::<i64>().unwrap()[9], 9);

    // metadata survives consumption, the memory does not
    assert_eq!(capsule.inspect().shape(), &[10]);
    assert_eq!(capsule.state(), CapsuleState::Consumed);
    assert!(matches!(
        capsule.with_slice(|s: &[i64]| s[0]),
        Err(HandoffError::AlreadyConsumed)
    ));
}

#[test]
fn test_views_travel_through_capsules() {
    let buffer = Buffer::from_vec((0..12i32).collect::<Vec<_>>())
        .reshape(&[3, 4])
        .unwrap();
    // second column, bottom to top
    let column = buffer.view(&[3], &[-4], (8 + 1) * 4).unwrap();
    drop(buffer);

    let capsule = Capsule::wrap(column);
    assert_eq!(capsule.inspect().strides(), &[-4]);
    let column = capsule.consume().unwrap();
    assert_eq!(column.to_vec::<i32>().unwrap(), vec![9, 5, 1]);
}

#[test]
fn test_device_mismatch_is_never_coerced() {
    init_logging();
    let allocator = accelerator_allocator();
    let buffer = allocator.allocate(DType::F16, &[32], Device::cuda(0)).unwrap();
    let capsule = produce_capsule(buffer, &HandoffConfig::default());
    assert_eq!(capsule.device_for_exchange(), (2, 0));

    for accept in [Accept::HostAccessible, Accept::Device(Device::CPU), Accept::Device(Device::cuda(1))] {
        let err = consume_capsule(&capsule, accept).unwrap_err();
        assert!(matches!(
            err,
            HandoffError::DeviceMismatch { actual, .. } if actual == Device::cuda(0)
        ));
        assert_eq!(capsule.state(), CapsuleState::Unconsumed);
    }

    let buffer = consume_capsule(&capsule, Accept::Device(Device::cuda(0))).unwrap();
    assert_eq!(buffer.device(), Device::cuda(0));
    assert!(buffer.as_bytes().is_err());
}
