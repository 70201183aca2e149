// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_actor_miner::{
    power_for_sectors, ExpirationQueue, ExpirationSet, PowerPair, QuantSpec, SectorOnChainInfo,
    NO_QUANTIZATION,
};
use fil_bitfield::BitField;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::StoragePower;
use num_traits::Zero;

mod util;
use util::*;

const TEST_AMT_BITWIDTH: u32 = 3;

fn on_time_sectors() -> BitField {
    make_bitfield(&[5, 8, 9])
}
fn early_sectors() -> BitField {
    make_bitfield(&[2, 3])
}
fn on_time_pledge() -> TokenAmount {
    TokenAmount::from_atto(1_000)
}
fn active_power() -> PowerPair {
    PowerPair { raw: StoragePower::from(1 << 13), qa: StoragePower::from(1 << 14) }
}
fn faulty_power() -> PowerPair {
    PowerPair { raw: StoragePower::from(1 << 11), qa: StoragePower::from(1 << 12) }
}
fn default_set() -> ExpirationSet {
    let mut set = ExpirationSet::empty();
    set.add(&on_time_sectors(), &early_sectors(), &on_time_pledge(), &active_power(), &faulty_power())
        .unwrap();
    set
}
fn power_pair(factor: u64, shift: u64) -> PowerPair {
    PowerPair {
        raw: StoragePower::from(factor * (1 << shift)),
        qa: StoragePower::from(factor * (1 << (shift + 1))),
    }
}

#[test]
fn adds_sectors_and_power_to_empty_set() {
    let set = default_set();

    assert_eq!(set.on_time_sectors, on_time_sectors());
    assert_eq!(set.early_sectors, early_sectors());
    assert_eq!(set.on_time_pledge, on_time_pledge());
    assert_eq!(set.active_power, active_power());
    assert_eq!(set.faulty_power, faulty_power());

    assert_eq!(set.len(), 5);
}

#[test]
fn adds_sectors_and_power_to_non_empty_set() {
    let mut set = default_set();

    set.add(
        &make_bitfield(&[6, 7, 11]),
        &make_bitfield(&[1, 4]),
        &TokenAmount::from_atto(300),
        &power_pair(3, 13),
        &power_pair(3, 11),
    )
    .unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 6, 7, 8, 9, 11]));
    assert_eq!(set.early_sectors, make_bitfield(&[1, 2, 3, 4]));
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1300));
    assert_eq!(set.active_power, power_pair(1, 15));
    assert_eq!(set.faulty_power, power_pair(1, 13));
}

#[test]
fn removes_sectors_and_power_set() {
    let mut set = default_set();

    set.remove(
        &make_bitfield(&[9]),
        &make_bitfield(&[2]),
        &TokenAmount::from_atto(800),
        &power_pair(3, 11),
        &power_pair(3, 9),
    )
    .unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 8]));
    assert_eq!(set.early_sectors, make_bitfield(&[3]));
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(200));
    assert_eq!(set.active_power, power_pair(1, 11));
    assert_eq!(set.faulty_power, power_pair(1, 9));
}

#[test]
fn remove_fails_when_pledge_underflows() {
    let mut set = default_set();

    let err = set
        .remove(
            &make_bitfield(&[9]),
            &make_bitfield(&[2]),
            &TokenAmount::from_atto(1200),
            &power_pair(3, 11),
            &power_pair(3, 9),
        )
        .err()
        .unwrap();
    assert!(err.to_string().contains("pledge underflow"));
}

#[test]
fn remove_fails_to_remove_sectors_it_does_not_contain() {
    let mut set = default_set();

    // remove unknown active sector 12
    let err = set
        .remove(
            &make_bitfield(&[12]),
            &make_bitfield(&[]),
            &TokenAmount::zero(),
            &power_pair(3, 11),
            &power_pair(3, 9),
        )
        .err()
        .unwrap();
    assert!(err.to_string().contains("not contained"));

    // remove sector 8, which is on-time in the set, as an early sector
    let err = set
        .remove(
            &make_bitfield(&[0]),
            &make_bitfield(&[8]),
            &TokenAmount::zero(),
            &power_pair(3, 11),
            &power_pair(3, 9),
        )
        .err()
        .unwrap();
    assert!(err.to_string().contains("not contained"));
}

#[test]
fn remove_fails_when_active_or_fault_qa_power_underflows() {
    let mut set = default_set();

    // active removed power > active power
    let err = set
        .remove(
            &make_bitfield(&[9]),
            &make_bitfield(&[2]),
            &TokenAmount::from_atto(200),
            &power_pair(3, 12),
            &power_pair(3, 9),
        )
        .err()
        .unwrap();
    assert!(err.to_string().contains("power underflow"));

    let mut set = default_set();

    // faulty removed power > faulty power
    let err = set
        .remove(
            &make_bitfield(&[9]),
            &make_bitfield(&[2]),
            &TokenAmount::from_atto(200),
            &power_pair(3, 11),
            &power_pair(3, 10),
        )
        .err()
        .unwrap();
    assert!(err.to_string().contains("power underflow"));
}

#[test]
fn set_is_empty_when_all_sectors_removed() {
    let mut set = ExpirationSet::empty();

    assert!(set.is_empty());
    assert_eq!(set.len(), 0);

    set.add(&on_time_sectors(), &early_sectors(), &on_time_pledge(), &active_power(), &faulty_power())
        .unwrap();

    assert!(!set.is_empty());

    set.remove(&on_time_sectors(), &early_sectors(), &on_time_pledge(), &active_power(), &faulty_power())
        .unwrap();

    assert!(set.is_empty());
    assert_eq!(set.len(), 0);
}

fn sectors() -> [SectorOnChainInfo; 6] {
    [
        test_sector(2, 1, 50, 60, 1000),
        test_sector(3, 2, 51, 61, 1001),
        test_sector(7, 3, 52, 62, 1002),
        test_sector(8, 4, 53, 63, 1003),
        test_sector(11, 5, 54, 64, 1004),
        test_sector(13, 6, 55, 65, 1005),
    ]
}

fn empty_expiration_queue_with_quantizing(
    store: &MemoryBlockstore,
    quant: QuantSpec,
) -> ExpirationQueue<'_, MemoryBlockstore> {
    let empty_array = Amt::<(), _>::new_with_bit_width(store, TEST_AMT_BITWIDTH).flush().unwrap();
    ExpirationQueue::new(store, &empty_array, quant).unwrap()
}

fn empty_expiration_queue(store: &MemoryBlockstore) -> ExpirationQueue<'_, MemoryBlockstore> {
    empty_expiration_queue_with_quantizing(store, NO_QUANTIZATION)
}

#[test]
fn added_sectors_can_be_popped_off_queue() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue(&store);

    let (sec_nums, power, pledge) = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    assert_eq!(sec_nums, make_bitfield(&[1, 2, 3, 4, 5, 6]));
    assert_eq!(power, power_for_sectors(SECTOR_SIZE, &sectors()));
    assert_eq!(pledge, TokenAmount::from_atto(6015));

    // default test quantizing of 1 means every sector is in its own expiration set
    assert_eq!(sectors().len(), queue.amt.count() as usize);

    // pop off sectors up to and including epoch 7
    let set = queue.pop_until(7).unwrap();

    // only 3 sectors remain
    assert_eq!(queue.amt.count(), 3);

    assert_eq!(set.on_time_sectors, make_bitfield(&[1, 2, 3]));
    assert!(set.early_sectors.is_empty());

    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(3003));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[0..3]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // pop off sector 4 at epoch 8
    let set = queue.pop_until(9).unwrap();

    assert_eq!(queue.amt.count(), 2);

    assert_eq!(set.on_time_sectors, make_bitfield(&[4]));
    assert!(set.early_sectors.is_empty());

    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1003));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[3..4]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // pop off rest up to and including epoch 20
    let set = queue.pop_until(20).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 6]));
    assert!(set.early_sectors.is_empty());

    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2009));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[4..6]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // queue is now empty
    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn quantizes_added_sectors_by_expiration() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 5, offset: 3 });

    let (sec_nums, _power, _pledge) = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    assert_eq!(sec_nums, make_bitfield(&[1, 2, 3, 4, 5, 6]));

    // quantizing spec means sectors are grouped into 3 sets expiring at 3, 8 and 13
    assert_eq!(queue.amt.count(), 3);

    // set popped before first quantized expiration should be empty
    let set = queue.pop_until(2).unwrap();
    assert!(set.on_time_sectors.is_empty());
    assert_eq!(queue.amt.count(), 3);

    // first 2 sectors will be in first set popped off at quantization offset (3)
    let set = queue.pop_until(3).unwrap();
    assert_eq!(set.on_time_sectors, make_bitfield(&[1, 2]));
    assert_eq!(queue.amt.count(), 2);

    // no sectors will be popped off in quantization interval
    let set = queue.pop_until(7).unwrap();
    assert!(set.on_time_sectors.is_empty());
    assert_eq!(queue.amt.count(), 2);

    // next 2 sectors will be in first set popped off after quantization interval (8)
    let set = queue.pop_until(8).unwrap();
    assert_eq!(set.on_time_sectors, make_bitfield(&[3, 4]));
    assert_eq!(queue.amt.count(), 1);

    // no sectors will be popped off in quantization interval
    let set = queue.pop_until(12).unwrap();
    assert!(set.on_time_sectors.is_empty());
    assert_eq!(queue.amt.count(), 1);

    // rest of sectors will be in last set
    let set = queue.pop_until(13).unwrap();
    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 6]));
    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn reschedules_sectors_as_faults() {
    let store = MemoryBlockstore::default();

    // Create 3 expiration sets with 2 sectors apiece
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });
    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();

    // Fault middle sectors to expire at epoch 6.
    // This faults one sector from the first set, all of the second set and one from the third.
    // Faulting at epoch 6 means the first 3 will expire on time, but sector 5 will be early and
    // moved to the second set.
    let to_fault = &sectors()[1..5];
    let power_delta = queue.reschedule_as_faults(6, to_fault, SECTOR_SIZE).unwrap();
    assert_eq!(power_delta, power_for_sectors(SECTOR_SIZE, to_fault));

    let _ = queue.amt.flush().unwrap();

    // expect first set to contain first two sectors but with the seconds power moved to faulty power
    require_no_expiration_groups_before(5, &mut queue);
    let set = queue.pop_until(5).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[1, 2]));
    assert!(set.early_sectors.is_empty());

    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2001));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[0..1]));
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[1..2]));

    // expect the second set to have all faulty power and now contain the 5th sector as an early sector
    require_no_expiration_groups_before(9, &mut queue);
    let set = queue.pop_until(9).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[3, 4]));
    assert_eq!(set.early_sectors, make_bitfield(&[5]));

    // pledge is kept from original 2 sectors. Pledge from new early sector is NOT added.
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2005));

    assert_eq!(set.active_power, PowerPair::zero());
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[2..5]));

    // expect last set to only contain non faulty sector
    require_no_expiration_groups_before(13, &mut queue);
    let set = queue.pop_until(13).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[6]));
    assert!(set.early_sectors.is_empty());

    // Pledge from sector moved from this set is dropped
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1005));

    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[5..6]));
    assert_eq!(set.faulty_power, PowerPair::zero());
}

#[test]
fn reschedules_all_sectors_as_faults() {
    let store = MemoryBlockstore::default();

    // Create 3 expiration sets with 2 sectors apiece
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });
    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();

    // Fault all sectors
    // This converts the first 2 sets to faults and adds the 3rd set as early sectors to the second set
    queue.reschedule_all_as_faults(6).unwrap();

    let _ = queue.amt.flush().unwrap();

    // expect first set to contain first two sectors but with all power moved to faulty power
    require_no_expiration_groups_before(5, &mut queue);
    let set = queue.pop_until(5).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[1, 2])); // sectors are unmoved
    assert!(set.early_sectors.is_empty());

    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2001)); // pledge is same

    // active power is converted to faulty power
    assert_eq!(set.active_power, PowerPair::zero());
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[0..2]));

    // expect the second set to have all faulty power and now contain the 5th and 6th sectors as early sectors
    require_no_expiration_groups_before(9, &mut queue);
    let set = queue.pop_until(9).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[3, 4]));
    assert_eq!(set.early_sectors, make_bitfield(&[5, 6]));

    // pledge is kept from original 2 sectors. Pledge from new early sectors is NOT added.
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2005));

    // fault power is all power for sectors previously in the second and third sets
    assert_eq!(set.active_power, PowerPair::zero());
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[2..6]));

    // the third set was rescheduled and deleted
    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn reschedule_recover_restores_all_sector_stats() {
    let store = MemoryBlockstore::default();

    // Create 3 expiration sets with 2 sectors apiece
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });
    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();

    // Fault middle sectors to expire at epoch 6 to put sectors in a state
    // described in "reschedules sectors as faults"
    let faults = sectors()[1..5].to_vec();
    let _ = queue.reschedule_as_faults(6, &faults, SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();

    // mark faulted sectors as recovered
    let recovered = queue.reschedule_recovered(faults.clone(), SECTOR_SIZE).unwrap();
    assert_eq!(recovered, power_for_sectors(SECTOR_SIZE, &faults));

    // expect first set to contain first two sectors with active power
    require_no_expiration_groups_before(5, &mut queue);
    let set = queue.pop_until(5).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[1, 2]));
    assert!(set.early_sectors.is_empty());

    // pledge from both sectors
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2001));

    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[0..2]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // expect second set to lose early sector 5 and have active power just from 3 and 4
    require_no_expiration_groups_before(9, &mut queue);
    let set = queue.pop_until(9).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[3, 4]));
    assert!(set.early_sectors.is_empty());

    // pledge is kept from original 2 sectors
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2005));

    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[2..4]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // expect sector 5 to be returned to the last set
    require_no_expiration_groups_before(13, &mut queue);
    let set = queue.pop_until(13).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 6]));
    assert!(set.early_sectors.is_empty());

    // Pledge from sector 5 is restored
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2009));

    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[4..6]));
    assert_eq!(set.faulty_power, PowerPair::zero());
}

#[test]
fn replaces_sectors_with_new_sectors() {
    let store = MemoryBlockstore::default();

    // Create expiration 3 sets
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });

    // add sectors to each set
    let sectors = sectors();
    let _ = queue
        .add_active_sectors(
            &[sectors[0].clone(), sectors[1].clone(), sectors[3].clone(), sectors[5].clone()],
            SECTOR_SIZE,
        )
        .unwrap();
    let _ = queue.amt.flush().unwrap();

    // remove all from first set, replace second set, and append to third
    let to_remove = [sectors[0].clone(), sectors[1].clone(), sectors[3].clone()];
    let to_add = [sectors[2].clone(), sectors[4].clone()];
    let (removed, added, power_delta, pledge_delta) =
        queue.replace_sectors(&to_remove, &to_add, SECTOR_SIZE).unwrap();
    assert_eq!(removed, make_bitfield(&[1, 2, 4]));
    assert_eq!(added, make_bitfield(&[3, 5]));
    let added_power = power_for_sectors(SECTOR_SIZE, &to_add);
    assert_eq!(power_delta, &added_power - &power_for_sectors(SECTOR_SIZE, &to_remove));
    assert_eq!(TokenAmount::from_atto(1002 + 1004 - 1000 - 1001 - 1003), pledge_delta);

    // first set is gone
    require_no_expiration_groups_before(9, &mut queue);

    // second set is replaced
    let set = queue.pop_until(9).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[3]));
    assert!(set.early_sectors.is_empty());

    // pledge and power are only from sector 3
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1002));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors[2..3]));
    assert_eq!(set.faulty_power, PowerPair::zero());

    // last set appends sector 5
    require_no_expiration_groups_before(13, &mut queue);
    let set = queue.pop_until(13).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[5, 6]));
    assert!(set.early_sectors.is_empty());

    // pledge and power are the sum of old and new sectors
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(2009));
    assert_eq!(set.active_power, power_for_sectors(SECTOR_SIZE, &sectors[4..6]));
    assert_eq!(set.faulty_power, PowerPair::zero());
}

#[test]
fn removes_sectors() {
    let store = MemoryBlockstore::default();

    // add all sectors into 3 sets
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });
    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();
    assert_eq!(queue.amt.count(), 3);

    // put queue in a state where some sectors are early and some are faulty
    let _ = queue.reschedule_as_faults(6, &sectors()[1..], SECTOR_SIZE).unwrap();
    let _ = queue.amt.flush().unwrap();

    // remove an active sector from the first set, an on-time faulty sector and
    // early faulty sectors from the second set
    let to_remove = [
        sectors()[0].clone(),
        sectors()[3].clone(),
        sectors()[4].clone(),
        sectors()[5].clone(),
    ];

    let faults = make_bitfield(&[4, 5, 6]);

    // label the last as recovering
    let recovering = make_bitfield(&[6]);
    let (removed, recovering_power) =
        queue.remove_sectors(&to_remove, &faults, &recovering, SECTOR_SIZE).unwrap();

    // assert all return values are correct
    assert_eq!(removed.on_time_sectors, make_bitfield(&[1, 4]));
    assert_eq!(removed.early_sectors, make_bitfield(&[5, 6]));
    assert_eq!(removed.on_time_pledge, TokenAmount::from_atto(1000 + 1003)); // only on-time
    assert_eq!(removed.active_power, power_for_sectors(SECTOR_SIZE, &sectors()[0..1]));
    assert_eq!(removed.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[3..6]));
    assert_eq!(recovering_power, power_for_sectors(SECTOR_SIZE, &sectors()[5..6]));

    // assert queue state is as expected

    // only faulty sector 2 is found in first set
    require_no_expiration_groups_before(5, &mut queue);
    let set = queue.pop_until(5).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[2]));
    assert!(set.early_sectors.is_empty());
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1001));
    assert_eq!(set.active_power, PowerPair::zero());
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[1..2]));

    // only faulty on-time sector 3 is found in second set
    require_no_expiration_groups_before(9, &mut queue);
    let set = queue.pop_until(9).unwrap();

    assert_eq!(set.on_time_sectors, make_bitfield(&[3]));
    assert!(set.early_sectors.is_empty());
    assert_eq!(set.on_time_pledge, TokenAmount::from_atto(1002));
    assert_eq!(set.active_power, PowerPair::zero());
    assert_eq!(set.faulty_power, power_for_sectors(SECTOR_SIZE, &sectors()[2..3]));

    // no further sets remain
    require_no_expiration_groups_before(20, &mut queue);
}

#[test]
fn adding_no_sectors_leaves_the_queue_empty() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });

    let _ = queue.add_active_sectors(&[] as &[SectorOnChainInfo], SECTOR_SIZE).unwrap();
    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn rescheduling_no_expirations_as_faults_leaves_the_queue_unchanged() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });

    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();

    // all sectors already expire before epoch 15, nothing should change.
    let length = queue.amt.count();
    let _ = queue.reschedule_as_faults(15, &sectors(), SECTOR_SIZE).unwrap();
    assert_eq!(queue.amt.count(), length);
}

#[test]
fn rescheduling_all_expirations_as_faults_leaves_the_queue_unchanged() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });

    let _ = queue.add_active_sectors(&sectors(), SECTOR_SIZE).unwrap();

    // all sectors already expire before epoch 15, nothing should change.
    let length = queue.amt.count();
    queue.reschedule_all_as_faults(15).unwrap();
    assert_eq!(queue.amt.count(), length);
}

#[test]
fn rescheduling_no_sectors_as_recovered_leaves_the_queue_empty() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_expiration_queue_with_quantizing(&store, QuantSpec { unit: 4, offset: 1 });

    let _ = queue.reschedule_recovered(Vec::new(), SECTOR_SIZE).unwrap();
    assert!(queue.amt.count().is_zero());
}
