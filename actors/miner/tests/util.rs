// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

#![allow(dead_code)]

use fil_actor_miner::testing::{check_deadline_state_invariants, sectors_as_map, DeadlineStateSummary};
use fil_actor_miner::{Deadline, ExpirationQueue, QuantSpec, SectorOnChainInfo, Sectors};
use fil_actors_runtime::{DealWeight, MessageAccumulator};
use fil_bitfield::BitField;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{SectorNumber, SectorSize};

pub const SECTOR_SIZE: SectorSize = SectorSize::_32GiB;
pub const QUANT_SPEC: QuantSpec = QuantSpec { unit: 4, offset: 1 };

const SECTORS_AMT_BITWIDTH: u32 = 5;

pub fn test_sector(
    expiration: ChainEpoch,
    sector_number: SectorNumber,
    weight: u64,
    vweight: u64,
    pledge: u64,
) -> SectorOnChainInfo {
    SectorOnChainInfo {
        expiration,
        sector_number,
        deal_weight: DealWeight::from(weight),
        verified_deal_weight: DealWeight::from(vweight),
        initial_pledge: TokenAmount::from_atto(pledge),
        ..Default::default()
    }
}

pub fn make_bitfield(sector_numbers: &[u64]) -> BitField {
    BitField::try_from_bits(sector_numbers.iter().copied()).unwrap()
}

pub fn bitfield_from_slice(sector_numbers: &[u64]) -> BitField {
    make_bitfield(sector_numbers)
}

#[track_caller]
pub fn assert_bitfield_equals(bf: &BitField, bits: &[u64]) {
    let collected: Vec<u64> = bf.iter().collect();
    assert_eq!(collected, bits);
}

/// Creates a sector array backed by the given store, populated with the infos.
pub fn sectors_arr<'a>(
    store: &'a MemoryBlockstore,
    sectors_info: Vec<SectorOnChainInfo>,
) -> Sectors<'a, MemoryBlockstore> {
    let empty_array =
        Amt::<(), _>::new_with_bit_width(store, SECTORS_AMT_BITWIDTH).flush().unwrap();
    let mut sectors = Sectors::load(store, &empty_array).unwrap();
    sectors.store(sectors_info).unwrap();
    sectors
}

pub fn select_sectors(sectors: &[SectorOnChainInfo], field: &BitField) -> Vec<SectorOnChainInfo> {
    sectors.iter().filter(|s| field.get(s.sector_number)).cloned().collect()
}

pub fn require_no_expiration_groups_before(
    epoch: ChainEpoch,
    queue: &mut ExpirationQueue<'_, MemoryBlockstore>,
) {
    queue.amt.flush().unwrap();

    let set = queue.pop_until(epoch - 1).unwrap();
    assert!(set.is_empty());
}

/// Checks that a deadline's state matches the expected partition layout and
/// status bitfields, and that all of its internal invariants hold.
#[allow(clippy::too_many_arguments)]
#[track_caller]
pub fn assert_deadline_state(
    store: &MemoryBlockstore,
    deadline: &Deadline,
    sectors: &[SectorOnChainInfo],
    faults: &BitField,
    recovering: &BitField,
    terminations: &BitField,
    unproven: &BitField,
    posts: &BitField,
    partition_sectors: &[BitField],
) -> DeadlineStateSummary {
    let partitions = deadline.partitions_amt(store).unwrap();
    assert_eq!(partition_sectors.len() as u64, partitions.count());

    for (index, expected_sectors) in partition_sectors.iter().enumerate() {
        let partition = partitions.get(index as u64).unwrap().unwrap();
        assert_eq!(expected_sectors, &partition.sectors);
        assert_eq!(faults & &partition.sectors, partition.faults);
        assert_eq!(recovering & &partition.sectors, partition.recoveries);
        assert_eq!(terminations & &partition.sectors, partition.terminated);
        assert_eq!(unproven & &partition.sectors, partition.unproven);
    }

    assert_eq!(posts, &deadline.post_submissions);

    let all_sectors = BitField::union(partition_sectors.iter());
    assert_eq!(deadline.total_sectors, all_sectors.len());
    assert_eq!(deadline.live_sectors, all_sectors.len() - terminations.len());

    let acc = MessageAccumulator::default();
    let summary = check_deadline_state_invariants(
        deadline,
        store,
        QUANT_SPEC,
        SECTOR_SIZE,
        &sectors_as_map(sectors),
        &acc,
    );
    acc.assert_empty();

    summary
}
