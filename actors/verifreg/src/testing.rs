// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::{Address, Protocol};
use fvm_shared::bigint::bigint_ser::BigIntDe;
use fvm_shared::HAMT_BIT_WIDTH;
use num_traits::Signed;

use fil_actors_runtime::{make_map_with_root_and_bitwidth, MessageAccumulator};

use crate::{DataCap, State, MIN_VERIFIED_DEAL_SIZE};

pub struct StateSummary {
    pub verifiers: BTreeMap<Address, DataCap>,
    pub clients: BTreeMap<Address, DataCap>,
}

/// Checks internal invariants of the verified registry state.
pub fn check_state_invariants<BS: Blockstore>(
    state: &State,
    store: &BS,
) -> (StateSummary, MessageAccumulator) {
    let acc = MessageAccumulator::default();

    acc.require(state.root_key.protocol() == Protocol::ID, "root key must be an ID address");

    // Check verifiers.
    let mut all_verifiers = BTreeMap::new();
    match make_map_with_root_and_bitwidth::<_, BigIntDe>(&state.verifiers, store, HAMT_BIT_WIDTH) {
        Ok(verifiers) => {
            let ret = verifiers.for_each(|key, cap| {
                let verifier = Address::from_bytes(key)?;
                acc.require(
                    verifier.protocol() == Protocol::ID,
                    format!("verifier {} is not an ID address", verifier),
                );
                acc.require(
                    !cap.0.is_negative(),
                    format!("verifier {} has negative allowance", verifier),
                );
                all_verifiers.insert(verifier, cap.0.clone());
                Ok(())
            });
            acc.require_no_error(ret, "error iterating verifiers");
        }
        Err(e) => acc.add(format!("error loading verifiers: {e}")),
    };

    // Check clients.
    let mut all_clients = BTreeMap::new();
    match make_map_with_root_and_bitwidth::<_, BigIntDe>(
        &state.verified_clients,
        store,
        HAMT_BIT_WIDTH,
    ) {
        Ok(clients) => {
            let ret = clients.for_each(|key, cap| {
                let client = Address::from_bytes(key)?;
                acc.require(
                    cap.0 >= *MIN_VERIFIED_DEAL_SIZE,
                    format!("client {} has cap {} below minimum deal size", client, cap.0),
                );
                all_clients.insert(client, cap.0.clone());
                Ok(())
            });
            acc.require_no_error(ret, "error iterating verified clients");
        }
        Err(e) => acc.add(format!("error loading verified clients: {e}")),
    };

    // An address cannot simultaneously be a verifier and a client.
    for client in all_clients.keys() {
        acc.require(
            !all_verifiers.contains_key(client),
            format!("{} is both a verifier and a verified client", client),
        );
    }

    (StateSummary { verifiers: all_verifiers, clients: all_clients }, acc)
}
