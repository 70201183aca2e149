// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use fil_actors_runtime::DealWeight;
use fil_bitfield::BitField;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::bigint::bigint_ser;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{SectorNumber, StoragePower};
use num_traits::Zero;

/// Information stored on-chain for a proven sector.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    /// Epoch during which the sector proof was accepted
    pub activation: ChainEpoch,
    /// Epoch during which the sector expires
    pub expiration: ChainEpoch,
    /// Integral of active deals over sector lifetime
    #[serde(with = "bigint_ser")]
    pub deal_weight: DealWeight,
    /// Integral of active verified deals over sector lifetime
    #[serde(with = "bigint_ser")]
    pub verified_deal_weight: DealWeight,
    /// Pledge collected to commit this sector
    pub initial_pledge: TokenAmount,
}

/// Addresses a partition within a PoSt submission, with the sectors skipped
/// (declared faulty) in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PoStPartition {
    /// Partitions are numbered per-deadline, from zero.
    pub index: u64,
    /// Sectors skipped while proving that weren't already declared faulty.
    pub skipped: BitField,
}

/// Value type for storing and changing (raw, quality-adjusted) power over
/// sectors. The two components form an additive group and may be negative
/// while describing a delta.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PowerPair {
    #[serde(with = "bigint_ser")]
    pub raw: StoragePower,
    #[serde(with = "bigint_ser")]
    pub qa: StoragePower,
}

impl PowerPair {
    pub fn new(raw: StoragePower, qa: StoragePower) -> Self {
        Self { raw, qa }
    }

    pub fn zero() -> Self {
        Default::default()
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero() && self.qa.is_zero()
    }
}

impl Add for &PowerPair {
    type Output = PowerPair;

    fn add(self, rhs: Self) -> PowerPair {
        PowerPair { raw: &self.raw + &rhs.raw, qa: &self.qa + &rhs.qa }
    }
}

impl Add for PowerPair {
    type Output = PowerPair;

    fn add(self, rhs: Self) -> PowerPair {
        &self + &rhs
    }
}

impl AddAssign<&Self> for PowerPair {
    fn add_assign(&mut self, rhs: &Self) {
        self.raw += &rhs.raw;
        self.qa += &rhs.qa;
    }
}

impl Sub for &PowerPair {
    type Output = PowerPair;

    fn sub(self, rhs: Self) -> PowerPair {
        PowerPair { raw: &self.raw - &rhs.raw, qa: &self.qa - &rhs.qa }
    }
}

impl Sub for PowerPair {
    type Output = PowerPair;

    fn sub(self, rhs: Self) -> PowerPair {
        &self - &rhs
    }
}

impl SubAssign<&Self> for PowerPair {
    fn sub_assign(&mut self, rhs: &Self) {
        self.raw -= &rhs.raw;
        self.qa -= &rhs.qa;
    }
}

impl Neg for PowerPair {
    type Output = PowerPair;

    fn neg(self) -> Self::Output {
        PowerPair { raw: -self.raw, qa: -self.qa }
    }
}

impl Neg for &PowerPair {
    type Output = PowerPair;

    fn neg(self) -> Self::Output {
        -self.clone()
    }
}
