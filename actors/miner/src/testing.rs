// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Checkers verifying the internal consistency of deadline and partition
//! state, for use in tests and state audits.

use std::collections::BTreeMap;

use fil_actors_runtime::MessageAccumulator;
use fil_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::{SectorNumber, SectorSize};

use crate::{
    power_for_sectors, BitFieldQueue, Deadline, ExpirationQueue, Partition, PowerPair, QuantSpec,
    SectorOnChainInfo, NO_QUANTIZATION,
};

pub type SectorsMap = BTreeMap<SectorNumber, SectorOnChainInfo>;

pub fn sectors_as_map(sectors: &[SectorOnChainInfo]) -> SectorsMap {
    sectors.iter().map(|sector| (sector.sector_number, sector.clone())).collect()
}

fn select_sectors_map(sectors: &SectorsMap, include: &BitField, acc: &MessageAccumulator) -> Vec<SectorOnChainInfo> {
    let mut selected = Vec::new();
    for sector_number in include.iter() {
        match sectors.get(&sector_number) {
            Some(sector) => selected.push(sector.clone()),
            None => acc.add(format!("no info for sector {}", sector_number)),
        }
    }
    selected
}

pub struct PartitionStateSummary {
    pub all_sectors: BitField,
    pub live_sectors: BitField,
    pub faulty_sectors: BitField,
    pub recovering_sectors: BitField,
    pub unproven_sectors: BitField,
    pub terminated_sectors: BitField,
    pub live_power: PowerPair,
    pub active_power: PowerPair,
    pub faulty_power: PowerPair,
    pub recovering_power: PowerPair,
    /// Epochs at which the partition schedules some expiration.
    pub expiration_epochs: Vec<ChainEpoch>,
    pub early_termination_count: u64,
}

impl PartitionStateSummary {
    pub fn check_partition_state_invariants<BS: Blockstore>(
        partition: &Partition,
        store: &BS,
        quant: QuantSpec,
        sector_size: SectorSize,
        sectors_map: &SectorsMap,
        acc: &MessageAccumulator,
    ) -> Self {
        let live = partition.live_sectors();
        let active = partition.active_sectors();

        // Live contains all terminated, faults, unproven relationships.
        acc.require(
            partition.sectors.contains_all(&partition.terminated),
            "terminated sectors are not a subset of sectors",
        );
        acc.require(
            partition.sectors.contains_all(&partition.faults),
            "faulty sectors are not a subset of sectors",
        );
        acc.require(
            !partition.terminated.contains_any(&partition.faults),
            "terminated sectors are faulty",
        );
        acc.require(
            partition.faults.contains_all(&partition.recoveries),
            "recovering sectors are not faulty",
        );
        acc.require(
            !partition.unproven.contains_any(&partition.faults),
            "unproven sectors are faulty",
        );
        acc.require(
            !partition.unproven.contains_any(&partition.terminated),
            "unproven sectors are terminated",
        );

        // Validate power against the sector infos.
        let live_sectors = select_sectors_map(sectors_map, &live, acc);
        let live_power = power_for_sectors(sector_size, &live_sectors);
        acc.require(
            partition.live_power == live_power,
            format!("live power was {:?}, expected {:?}", partition.live_power, live_power),
        );

        let faulty_sectors = select_sectors_map(sectors_map, &partition.faults, acc);
        let faulty_power = power_for_sectors(sector_size, &faulty_sectors);
        acc.require(
            partition.faulty_power == faulty_power,
            format!("faulty power was {:?}, expected {:?}", partition.faulty_power, faulty_power),
        );

        let recovering_sectors = select_sectors_map(sectors_map, &partition.recoveries, acc);
        let recovering_power = power_for_sectors(sector_size, &recovering_sectors);
        acc.require(
            partition.recovering_power == recovering_power,
            format!(
                "recovering power was {:?}, expected {:?}",
                partition.recovering_power, recovering_power
            ),
        );

        let unproven_sectors = select_sectors_map(sectors_map, &partition.unproven, acc);
        let unproven_power = power_for_sectors(sector_size, &unproven_sectors);
        acc.require(
            partition.unproven_power == unproven_power,
            format!(
                "unproven power was {:?}, expected {:?}",
                partition.unproven_power, unproven_power
            ),
        );

        let active_power = &(&live_power - &faulty_power) - &unproven_power;
        acc.require(
            partition.active_power() == active_power,
            format!("active power was {:?}, expected {:?}", partition.active_power(), active_power),
        );

        // Validate the expiration queue: every live sector appears in exactly one
        // expiration set, on-time sectors at their quantized declared expiration.
        let mut expiration_epochs = Vec::new();
        match ExpirationQueue::new(store, &partition.expirations_epochs, quant) {
            Ok(queue) => {
                let mut seen = BitField::new();
                let ret = queue.amt.for_each(|epoch, set| {
                    let epoch = epoch as ChainEpoch;
                    acc.require(
                        epoch == quant.quantize_up(epoch),
                        format!("expiration queue key {} is not quantized", epoch),
                    );
                    expiration_epochs.push(epoch);

                    for sector_number in set.on_time_sectors.iter() {
                        if let Some(sector) = sectors_map.get(&sector_number) {
                            acc.require(
                                epoch == quant.quantize_up(sector.expiration),
                                format!(
                                    "sector {} expiring on-time at {} rather than its target {}",
                                    sector_number, epoch, sector.expiration
                                ),
                            );
                        }
                    }

                    // Early sectors are faulty, always.
                    acc.require(
                        partition.faults.contains_all(&set.early_sectors),
                        format!("early sectors at {} are not all faulty", epoch),
                    );

                    let members = &set.on_time_sectors | &set.early_sectors;
                    acc.require(
                        !seen.contains_any(&members),
                        format!("expiration set at {} contains already-seen sectors", epoch),
                    );
                    seen |= &members;

                    acc.require_no_error(set.validate_state(), "invalid expiration set");
                    Ok(())
                });
                acc.require_no_error(ret, "error iterating expiration queue");

                acc.require(
                    seen == live,
                    format!("expiration queue membership {:?} does not match live sectors {:?}", seen, live),
                );
            }
            Err(e) => acc.add(format!("error loading expiration queue: {}", e)),
        };

        // Validate the early termination queue: all entries are terminated.
        let mut early_termination_count = 0;
        match BitFieldQueue::new(store, &partition.early_terminated, NO_QUANTIZATION) {
            Ok(queue) => {
                let ret = queue.amt.for_each(|_epoch, bf| {
                    acc.require(
                        partition.terminated.contains_all(bf),
                        "early terminations are not all terminated",
                    );
                    early_termination_count += bf.len();
                    Ok(())
                });
                acc.require_no_error(ret, "error iterating early termination queue");
            }
            Err(e) => acc.add(format!("error loading early termination queue: {}", e)),
        };

        Self {
            all_sectors: partition.sectors.clone(),
            live_sectors: live,
            faulty_sectors: partition.faults.clone(),
            recovering_sectors: partition.recoveries.clone(),
            unproven_sectors: partition.unproven.clone(),
            terminated_sectors: partition.terminated.clone(),
            live_power: partition.live_power.clone(),
            active_power,
            faulty_power: partition.faulty_power.clone(),
            recovering_power: partition.recovering_power.clone(),
            expiration_epochs,
            early_termination_count,
        }
    }
}

#[derive(Default)]
pub struct DeadlineStateSummary {
    pub all_sectors: BitField,
    pub live_sectors: BitField,
    pub faulty_sectors: BitField,
    pub recovering_sectors: BitField,
    pub unproven_sectors: BitField,
    pub terminated_sectors: BitField,
    pub live_power: PowerPair,
    pub active_power: PowerPair,
    pub faulty_power: PowerPair,
}

pub fn check_deadline_state_invariants<BS: Blockstore>(
    deadline: &Deadline,
    store: &BS,
    quant: QuantSpec,
    sector_size: SectorSize,
    sectors: &SectorsMap,
    acc: &MessageAccumulator,
) -> DeadlineStateSummary {
    // Check partitions.
    let mut all_sectors = Vec::<BitField>::new();
    let mut all_live_sectors = Vec::<BitField>::new();
    let mut all_faulty_sectors = Vec::<BitField>::new();
    let mut all_recovering_sectors = Vec::<BitField>::new();
    let mut all_unproven_sectors = Vec::<BitField>::new();
    let mut all_terminated_sectors = Vec::<BitField>::new();
    let mut all_live_power = PowerPair::zero();
    let mut all_active_power = PowerPair::zero();
    let mut all_faulty_power = PowerPair::zero();

    let mut partition_count = 0;

    // Partitions must be sequential, and the deadline's queue must include
    // every epoch the partitions schedule something at.
    let mut expected_deadline_exp_queue = BTreeMap::<ChainEpoch, Vec<u64>>::new();
    let mut partitions_with_early_terminations = Vec::<u64>::new();

    match deadline.partitions_amt(store) {
        Ok(partitions) => {
            let ret = partitions.for_each(|index, partition| {
                acc.require(index == partition_count, format!("non-sequential partitions, expected index {}, found {}", partition_count, index));
                partition_count += 1;

                let acc = acc.with_prefix(format!("partition {}: ", index));
                let summary = PartitionStateSummary::check_partition_state_invariants(
                    partition,
                    store,
                    quant,
                    sector_size,
                    sectors,
                    &acc,
                );

                if summary.early_termination_count > 0 {
                    partitions_with_early_terminations.push(index);
                }
                for epoch in &summary.expiration_epochs {
                    expected_deadline_exp_queue.entry(*epoch).or_default().push(index);
                }

                all_sectors.push(summary.all_sectors);
                all_live_sectors.push(summary.live_sectors);
                all_faulty_sectors.push(summary.faulty_sectors);
                all_recovering_sectors.push(summary.recovering_sectors);
                all_unproven_sectors.push(summary.unproven_sectors);
                all_terminated_sectors.push(summary.terminated_sectors);
                all_live_power += &summary.live_power;
                all_active_power += &summary.active_power;
                all_faulty_power += &summary.faulty_power;

                Ok(())
            });
            acc.require_no_error(ret, "error iterating partitions");
        }
        Err(e) => acc.add(format!("error loading partitions: {}", e)),
    };

    let all_sectors = BitField::union(all_sectors.iter());
    let live_sectors = BitField::union(all_live_sectors.iter());
    let faulty_sectors = BitField::union(all_faulty_sectors.iter());
    let recovering_sectors = BitField::union(all_recovering_sectors.iter());
    let unproven_sectors = BitField::union(all_unproven_sectors.iter());
    let terminated_sectors = BitField::union(all_terminated_sectors.iter());

    // Validate the deadline expiration queue is a superset of the partition queues.
    match BitFieldQueue::new(store, &deadline.expirations_epochs, quant) {
        Ok(queue) => {
            let mut deadline_exp_queue = BTreeMap::<ChainEpoch, BitField>::new();
            let ret = queue.amt.for_each(|epoch, bf| {
                deadline_exp_queue.insert(epoch as ChainEpoch, bf.clone());
                Ok(())
            });
            acc.require_no_error(ret, "error iterating expiration queue");

            for (epoch, partitions) in &expected_deadline_exp_queue {
                match deadline_exp_queue.get(epoch) {
                    Some(bf) => {
                        for partition in partitions {
                            acc.require(
                                bf.get(*partition),
                                format!(
                                    "expected partition {} to be present in deadline expiration queue at epoch {}",
                                    partition, epoch
                                ),
                            );
                        }
                    }
                    None => acc.add(format!(
                        "expected partitions {:?} to be present in deadline expiration queue at epoch {}",
                        partitions, epoch
                    )),
                }
            }
        }
        Err(e) => acc.add(format!("error loading deadline expiration queue: {}", e)),
    };

    // Validate sector counts.
    acc.require(
        deadline.total_sectors == all_sectors.len(),
        format!("deadline total sectors {} does not match partitions {}", deadline.total_sectors, all_sectors.len()),
    );
    acc.require(
        deadline.live_sectors == live_sectors.len(),
        format!("deadline live sectors {} does not match partitions {}", deadline.live_sectors, live_sectors.len()),
    );

    // Validate memoized faulty power.
    acc.require(
        deadline.faulty_power == all_faulty_power,
        format!("deadline faulty power {:?} does not match partitions {:?}", deadline.faulty_power, all_faulty_power),
    );

    // Validate the early terminations bitfield tracks exactly the partitions
    // with a non-empty early-terminated queue.
    let expected_early_terminations =
        BitField::try_from_bits(partitions_with_early_terminations.iter().copied())
            .expect("partition indices out of range");
    acc.require(
        deadline.early_terminations == expected_early_terminations,
        format!(
            "deadline early terminations {:?} do not match expected {:?}",
            deadline.early_terminations, expected_early_terminations
        ),
    );

    DeadlineStateSummary {
        all_sectors,
        live_sectors,
        faulty_sectors,
        recovering_sectors,
        unproven_sectors,
        terminated_sectors,
        live_power: all_live_power,
        active_power: all_active_power,
        faulty_power: all_faulty_power,
    }
}
