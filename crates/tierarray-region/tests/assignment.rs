//! Cross-tier assignment rules.

use proptest::prelude::*;
use tierarray_core::{DeviceId, RegionError};
use tierarray_region::{ArrayRegion, HbwPolicy, HighBandwidth, NodeMask, Standard};
use tierarray_test_utils::fixtures::{ascending, device_logging, pinned_logging, standard_from};
use tierarray_test_utils::CountingAccelerator;

#[test]
fn three_into_five_keeps_the_tail() {
    let acc = CountingAccelerator::shared(1);
    let src = standard_from(&[1u32, 2, 3]).unwrap();
    let mut dst = ArrayRegion::<u32, _>::filled(5, 9, device_logging(&acc, 0)).unwrap();
    dst.copy_assign(&src).unwrap();
    assert_eq!(dst.to_vec().unwrap(), vec![1, 2, 3, 9, 9]);
}

#[test]
fn five_into_three_fails_without_transfer() {
    let acc = CountingAccelerator::shared(1);
    let src = standard_from(&[1u32, 2, 3, 4, 5]).unwrap();
    let mut dst = ArrayRegion::<u32, _>::filled(3, 9, device_logging(&acc, 0)).unwrap();
    let before = acc.counts().transfers();
    let err = dst.copy_assign(&src).unwrap_err();
    assert_eq!(
        err,
        RegionError::Capacity {
            capacity: 3,
            required: 5
        }
    );
    assert!(!err.is_fatal());
    assert_eq!(acc.counts().transfers(), before);
    assert_eq!(dst.to_vec().unwrap(), vec![9, 9, 9]);
}

#[test]
fn different_devices_mismatch_before_any_transfer() {
    let acc = CountingAccelerator::shared(2);
    let src = ArrayRegion::<u32, _>::filled(4, 1, device_logging(&acc, 0)).unwrap();
    let mut dst = ArrayRegion::<u32, _>::filled(4, 2, device_logging(&acc, 1)).unwrap();
    let before = acc.counts();
    let err = dst.copy_assign(&src).unwrap_err();
    assert_eq!(
        err,
        RegionError::DeviceMismatch {
            target: DeviceId(1),
            other: DeviceId(0)
        }
    );
    let after = acc.counts();
    assert_eq!(after.transfers(), before.transfers());
    assert_eq!(after.set_device, before.set_device);
}

#[test]
fn device_move_across_devices_is_rejected_and_returned() {
    let acc = CountingAccelerator::shared(2);
    let src = ArrayRegion::<u8, _>::filled(4, 7, device_logging(&acc, 0)).unwrap();
    let mut dst = ArrayRegion::<u8, _>::new(4, device_logging(&acc, 1)).unwrap();
    let rejected = dst.move_assign(src).unwrap_err();
    assert!(matches!(rejected.error, RegionError::DeviceMismatch { .. }));
    let src = rejected.into_inner();
    assert_eq!(src.device(), Some(DeviceId(0)));
    assert_eq!(src.to_vec().unwrap(), vec![7; 4]);
}

#[test]
fn device_move_same_length_takes_over_without_transfer() {
    let acc = CountingAccelerator::shared(1);
    let src = ArrayRegion::<u8, _>::filled(4, 7, device_logging(&acc, 0)).unwrap();
    let mut dst = ArrayRegion::<u8, _>::new(4, device_logging(&acc, 0)).unwrap();
    let before = acc.counts();
    dst.move_assign(src).unwrap();
    let after = acc.counts();
    assert_eq!(after.transfers(), before.transfers());
    assert_eq!(after.free, before.free + 1);
    assert_eq!(acc.emulator().live_allocations(), 1);
}

#[test]
fn every_tier_pair_transfers() {
    let acc = CountingAccelerator::shared(1);
    let values = ascending(6);
    let hbw = HighBandwidth::new(Default::default(), HbwPolicy::Preferred, NodeMask::default());

    let standard = standard_from(&values).unwrap();
    let mut high = ArrayRegion::<u32, _>::new(6, hbw).unwrap();
    let mut pinned = ArrayRegion::<u32, _>::new(6, pinned_logging(&acc)).unwrap();
    let mut device = ArrayRegion::<u32, _>::new(6, device_logging(&acc, 0)).unwrap();
    let mut device2 = ArrayRegion::<u32, _>::new(6, device_logging(&acc, 0)).unwrap();
    let mut back = ArrayRegion::<u32, _>::new(6, Standard::default()).unwrap();

    high.copy_assign(&standard).unwrap();
    pinned.copy_assign(&high).unwrap();
    device.copy_assign(&pinned).unwrap();
    device2.copy_assign(&device).unwrap();
    back.copy_assign(&device2).unwrap();

    assert_eq!(&back[..], &values[..]);
    let counts = acc.counts();
    assert_eq!((counts.htod, counts.dtod, counts.dtoh), (3, 1, 1));
}

proptest! {
    #[test]
    fn device_prefix_and_tail(
        dst_len in 1usize..32,
        src in prop::collection::vec(any::<i16>(), 1..32),
        fill in any::<i16>(),
    ) {
        let acc = CountingAccelerator::shared(1);
        let source = standard_from(&src).unwrap();
        let mut target = ArrayRegion::<i16, _>::filled(dst_len, fill, device_logging(&acc, 0)).unwrap();
        let result = target.copy_assign(&source);
        let contents = target.to_vec().unwrap();
        if src.len() <= dst_len {
            prop_assert!(result.is_ok());
            prop_assert_eq!(&contents[..src.len()], &src[..]);
            prop_assert!(contents[src.len()..].iter().all(|&x| x == fill));
        } else {
            let capacity_error = matches!(result, Err(RegionError::Capacity { .. }));
            prop_assert!(capacity_error);
            prop_assert!(contents.iter().all(|&x| x == fill));
        }
    }
}
