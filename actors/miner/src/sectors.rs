// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::anyhow;
use cid::Cid;
use fil_actors_runtime::{actor_error, ActorDowncast, ActorError, Array};
use fil_bitfield::BitField;
use fvm_ipld_amt::Error as AmtError;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::error::ExitCode;
use fvm_shared::sector::{SectorNumber, MAX_SECTOR_NUMBER};

use crate::SectorOnChainInfo;

use super::policy::ADDRESSED_SECTORS_MAX;

/// Wrapper for the on-chain sector-info array, keyed by sector number.
pub struct Sectors<'db, BS> {
    pub amt: Array<'db, SectorOnChainInfo, BS>,
}

impl<'db, BS: Blockstore> Sectors<'db, BS> {
    pub fn load(store: &'db BS, root: &Cid) -> Result<Self, AmtError> {
        Ok(Self { amt: Array::load(root, store)? })
    }

    /// Loads the infos for every sector number set in the bitfield.
    pub fn load_sector(&self, sector_numbers: &BitField) -> Result<Vec<SectorOnChainInfo>, ActorError> {
        let mut sector_infos = Vec::with_capacity(sector_numbers.len() as usize);
        for sector_number in sector_numbers.bounded_iter(ADDRESSED_SECTORS_MAX).map_err(
            |e| actor_error!(illegal_argument; "failed to expand sector numbers: {}", e),
        )? {
            let sector_on_chain = self
                .amt
                .get(sector_number)
                .map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_STATE,
                        format!("failed to load sector {}", sector_number),
                    )
                })?
                .cloned()
                .ok_or_else(|| actor_error!(not_found; "sector not found: {}", sector_number))?;
            sector_infos.push(sector_on_chain);
        }
        Ok(sector_infos)
    }

    /// Stores the given sector infos, keyed by sector number.
    pub fn store(&mut self, infos: Vec<SectorOnChainInfo>) -> anyhow::Result<()> {
        for info in infos {
            let sector_number = info.sector_number;

            if sector_number > MAX_SECTOR_NUMBER {
                return Err(anyhow!("sector number {} out of range", sector_number));
            }

            self.amt.set(sector_number, info).map_err(|e| {
                e.downcast_wrap(format!("failed to store sector {}", sector_number))
            })?;
        }

        Ok(())
    }
}
