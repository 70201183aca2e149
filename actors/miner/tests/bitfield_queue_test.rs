// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use fil_actor_miner::{BitFieldQueue, QuantSpec, NO_QUANTIZATION};
use fil_bitfield::BitField;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_shared::clock::ChainEpoch;

mod util;
use util::*;

const TEST_AMT_BITWIDTH: u32 = 3;

fn empty_bitfield_queue_with_quantizing(
    store: &MemoryBlockstore,
    quant: QuantSpec,
) -> BitFieldQueue<'_, MemoryBlockstore> {
    let cid = Amt::<(), _>::new_with_bit_width(store, TEST_AMT_BITWIDTH).flush().unwrap();
    BitFieldQueue::new(store, &cid, quant).unwrap()
}

fn empty_bitfield_queue(store: &MemoryBlockstore) -> BitFieldQueue<'_, MemoryBlockstore> {
    empty_bitfield_queue_with_quantizing(store, NO_QUANTIZATION)
}

fn collect_queue(queue: &BitFieldQueue<'_, MemoryBlockstore>) -> BTreeMap<ChainEpoch, Vec<u64>> {
    let mut collected = BTreeMap::new();
    queue
        .amt
        .for_each(|epoch, bitfield| {
            collected.insert(epoch as ChainEpoch, bitfield.iter().collect());
            Ok(())
        })
        .unwrap();
    collected
}

#[test]
fn adds_values_to_empty_queue() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_bitfield_queue(&store);

    let values = [1, 2, 3, 4];
    let epoch: ChainEpoch = 42;

    queue.add_to_queue_values(epoch, values).unwrap();

    assert_eq!(collect_queue(&queue), BTreeMap::from([(42, vec![1, 2, 3, 4])]));
}

#[test]
fn adds_bitfield_to_queue_entry_with_values() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_bitfield_queue(&store);

    let epoch: ChainEpoch = 42;

    queue.add_to_queue_values(epoch, [1, 3]).unwrap();
    queue.add_to_queue(epoch, &make_bitfield(&[2, 8])).unwrap();

    // Values are merged into a single entry.
    assert_eq!(collect_queue(&queue), BTreeMap::from([(42, vec![1, 2, 3, 8])]));
}

#[test]
fn adding_no_values_has_no_effect() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_bitfield_queue(&store);

    queue.add_to_queue(13, &BitField::new()).unwrap();
    queue.add_to_queue_values(13, []).unwrap();

    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn quantizes_added_epochs() {
    let store = MemoryBlockstore::default();
    let mut queue =
        empty_bitfield_queue_with_quantizing(&store, QuantSpec { unit: 5, offset: 3 });

    for epoch in [0, 2, 3, 4, 7, 8, 9] {
        queue.add_to_queue_values(epoch, [epoch as u64]).unwrap();
    }

    // The queue is keyed by quantized epochs 3, 8 and 13.
    assert_eq!(
        collect_queue(&queue),
        BTreeMap::from([(3, vec![0, 2, 3]), (8, vec![4, 7, 8]), (13, vec![9])])
    );
}

#[test]
fn adds_many_values_at_once() {
    let store = MemoryBlockstore::default();
    let mut queue =
        empty_bitfield_queue_with_quantizing(&store, QuantSpec { unit: 5, offset: 3 });

    queue
        .add_many_to_queue_values([(0, 0), (2, 2), (4, 4), (4, 5), (9, 9), (2, 2)])
        .unwrap();

    assert_eq!(collect_queue(&queue), BTreeMap::from([(3, vec![0, 2]), (8, vec![4, 5]), (13, vec![9])]));
}

#[test]
fn pops_until_returns_merged_values_and_deletes_entries() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_bitfield_queue(&store);

    queue.add_to_queue_values(3, [1, 2]).unwrap();
    queue.add_to_queue_values(7, [3, 4]).unwrap();
    queue.add_to_queue_values(9, [5]).unwrap();

    // Popping at an epoch before the first entry pops nothing.
    let (popped, modified) = queue.pop_until(2).unwrap();
    assert!(popped.is_empty());
    assert!(!modified);
    assert_eq!(queue.amt.count(), 3);

    let (popped, modified) = queue.pop_until(7).unwrap();
    assert!(modified);
    assert_bitfield_equals(&popped, &[1, 2, 3, 4]);
    assert_eq!(collect_queue(&queue), BTreeMap::from([(9, vec![5])]));

    let (popped, modified) = queue.pop_until(20).unwrap();
    assert!(modified);
    assert_bitfield_equals(&popped, &[5]);
    assert_eq!(queue.amt.count(), 0);
}

#[test]
fn cut_removes_values_and_compacts_the_rest() {
    let store = MemoryBlockstore::default();
    let mut queue = empty_bitfield_queue(&store);

    queue.add_to_queue_values(3, [0, 1, 2]).unwrap();
    queue.add_to_queue_values(7, [1, 2, 3]).unwrap();
    queue.add_to_queue_values(9, [1]).unwrap();

    queue.cut(&make_bitfield(&[1])).unwrap();

    // Index 1 is dropped everywhere and higher indices shift down.
    // The entry at 9 becomes empty and is removed.
    assert_eq!(collect_queue(&queue), BTreeMap::from([(3, vec![0, 1]), (7, vec![1, 2])]));
}
