// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The storage miner's deadline/partition bookkeeping engine.
//!
//! Sectors are assigned into fixed-capacity partitions, which are grouped
//! under deadlines (one proving window each). Partitions track faults,
//! recoveries and terminations, and schedule every live sector in a
//! quantized expiration queue. Deadlines maintain the per-window aggregate
//! views: a superset expiration queue of partition indices, PoSt
//! submissions, pending early terminations, and memoized power and sector
//! counts.

pub use bitfield_queue::*;
pub use deadline_state::*;
pub use expiration_queue::*;
pub use partition_state::*;
pub use policy::*;
pub use quantize::*;
pub use sector_map::*;
pub use sectors::*;
pub use termination::*;
pub use types::*;

mod bitfield_queue;
mod deadline_state;
mod expiration_queue;
mod partition_state;
mod policy;
mod quantize;
mod sector_map;
mod sectors;
mod termination;
pub mod testing;
mod types;
