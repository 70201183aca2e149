// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use anyhow::anyhow;
use fil_bitfield::BitField;

/// Maps partition indices to sector bitfields, walked in index order.
#[derive(Default)]
pub struct PartitionSectorMap(BTreeMap<u64, BitField>);

impl PartitionSectorMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records the given sectors at the given partition.
    pub fn add_values(&mut self, partition_idx: u64, sector_numbers: Vec<u64>) -> anyhow::Result<()> {
        self.add(partition_idx, BitField::try_from_bits(sector_numbers)?);
        Ok(())
    }

    /// Records the given sector bitfield at the given partition index, merging
    /// it with any existing bitfield for that partition.
    pub fn add(&mut self, partition_idx: u64, sector_numbers: BitField) {
        match self.0.get_mut(&partition_idx) {
            Some(old_sector_numbers) => {
                *old_sector_numbers |= &sector_numbers;
            }
            None => {
                self.0.insert(partition_idx, sector_numbers);
            }
        }
    }

    /// Counts the number of partitions & sectors within the map, failing on
    /// overflow.
    pub fn count(&self) -> anyhow::Result<(/* partitions */ u64, /* sectors */ u64)> {
        let sectors = self.0.values().try_fold(0_u64, |sectors, bf| {
            sectors
                .checked_add(bf.len())
                .ok_or_else(|| anyhow!("integer overflow when counting sectors"))
        })?;
        Ok((self.0.len() as u64, sectors))
    }

    /// Returns the partition indices in the map, ascending.
    pub fn partitions(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.keys().copied()
    }

    /// Walks the partitions in the map, in order of increasing index.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &BitField)> + '_ {
        self.0.iter().map(|(&i, x)| (i, x))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_bitfields_per_partition() {
        let mut map = PartitionSectorMap::new();
        map.add_values(1, vec![1, 2]).unwrap();
        map.add_values(1, vec![3]).unwrap();
        map.add_values(0, vec![7]).unwrap();

        let entries: Vec<_> = map.iter().map(|(i, bf)| (i, bf.len())).collect();
        assert_eq!(entries, vec![(0, 1), (1, 3)]);
        assert_eq!(map.count().unwrap(), (2, 4));
    }
}
