// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::multihash::Multihash;
use cid::Cid;
use fvm_shared::IPLD_RAW;
use lazy_static::lazy_static;

lazy_static! {
    pub static ref SYSTEM_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/system");
    pub static ref INIT_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/init");
    pub static ref CRON_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/cron");
    pub static ref ACCOUNT_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/account");
    pub static ref POWER_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/storagepower");
    pub static ref MINER_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/storageminer");
    pub static ref MARKET_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/storagemarket");
    pub static ref PAYCH_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/paymentchannel");
    pub static ref MULTISIG_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/multisig");
    pub static ref REWARD_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/reward");
    pub static ref VERIFREG_ACTOR_CODE_ID: Cid = make_builtin(b"fil/1/verifiedregistry");

    /// Set of actor code types that can represent external signing parties.
    pub static ref CALLER_TYPES_SIGNABLE: [Cid; 2] =
        [*ACCOUNT_ACTOR_CODE_ID, *MULTISIG_ACTOR_CODE_ID];

    static ref BUILTIN_ACTORS: [(Cid, &'static str); 11] = [
        (*SYSTEM_ACTOR_CODE_ID, "fil/1/system"),
        (*INIT_ACTOR_CODE_ID, "fil/1/init"),
        (*CRON_ACTOR_CODE_ID, "fil/1/cron"),
        (*ACCOUNT_ACTOR_CODE_ID, "fil/1/account"),
        (*POWER_ACTOR_CODE_ID, "fil/1/storagepower"),
        (*MINER_ACTOR_CODE_ID, "fil/1/storageminer"),
        (*MARKET_ACTOR_CODE_ID, "fil/1/storagemarket"),
        (*PAYCH_ACTOR_CODE_ID, "fil/1/paymentchannel"),
        (*MULTISIG_ACTOR_CODE_ID, "fil/1/multisig"),
        (*REWARD_ACTOR_CODE_ID, "fil/1/reward"),
        (*VERIFREG_ACTOR_CODE_ID, "fil/1/verifiedregistry"),
    ];
}

/// An identity CID of the raw actor name bytes. Stable across networks and
/// computed once at first use.
fn make_builtin(bz: &[u8]) -> Cid {
    Cid::new_v1(IPLD_RAW, Multihash::wrap(0, bz).expect("name too long"))
}

/// Returns true if the code belongs to a builtin actor.
pub fn is_builtin_actor(code: &Cid) -> bool {
    BUILTIN_ACTORS.iter().any(|(c, _)| c == code)
}

/// Returns the canonical name for a builtin actor code, if any.
pub fn actor_name_by_code(code: &Cid) -> Option<&'static str> {
    BUILTIN_ACTORS.iter().find(|(c, _)| c == code).map(|(_, name)| *name)
}

/// Tests whether a code CID represents an actor that can be an external
/// principal: i.e. an account or multisig.
pub fn is_principal(code: &Cid) -> bool {
    CALLER_TYPES_SIGNABLE.iter().any(|c| c == code)
}
