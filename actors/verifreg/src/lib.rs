// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::{MethodNum, METHOD_CONSTRUCTOR};
use log::info;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive, Zero};

use fil_actors_runtime::cbor::deserialize_params;
use fil_actors_runtime::runtime::{ActorCode, Runtime};
use fil_actors_runtime::{
    actor_error, ActorContext, ActorError, AsActorError, STORAGE_MARKET_ACTOR_ADDR,
    SYSTEM_ACTOR_ADDR,
};
use fvm_shared::error::ExitCode;

pub use self::state::State;
pub use self::types::*;

mod state;
pub mod testing;
mod types;

/// Registry actor methods available
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    AddVerifier = 2,
    RemoveVerifier = 3,
    AddVerifiedClient = 4,
    UseBytes = 5,
    RestoreBytes = 6,
}

pub struct Actor;

impl Actor {
    /// Constructor for Registry Actor
    pub fn constructor<BS, RT>(rt: &mut RT, root_key: Address) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        rt.validate_immediate_caller_is(std::iter::once(&SYSTEM_ACTOR_ADDR))?;

        // root should be an ID address
        let id_addr = rt
            .resolve_address(&root_key)
            .context_code(ExitCode::USR_ILLEGAL_ARGUMENT, "root should be an ID address")?;

        let st = State::new(rt.store(), id_addr).context("failed to create verifreg state")?;

        rt.create(&st)?;
        Ok(())
    }

    pub fn add_verifier<BS, RT>(rt: &mut RT, params: AddVerifierParams) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        if params.allowance < *MIN_VERIFIED_DEAL_SIZE {
            return Err(actor_error!(
                illegal_argument,
                "allowance {} below MinVerifiedDealSize for add verifier {}",
                params.allowance,
                params.address
            ));
        }

        let st: State = rt.state()?;
        rt.validate_immediate_caller_is(std::iter::once(&st.root_key))?;

        rt.transaction(|st: &mut State, rt| {
            // A verified client cannot become a verifier.
            let client_cap = st.get_verified_client_cap(rt.store(), &params.address)?;
            if client_cap.is_some() {
                return Err(actor_error!(
                    illegal_argument,
                    "verified client {} cannot become a verifier",
                    params.address
                ));
            }

            st.put_verifier(rt.store(), &params.address, &params.allowance)
                .context("failed to add verifier")
        })
    }

    pub fn remove_verifier<BS, RT>(rt: &mut RT, verifier_addr: Address) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        let st: State = rt.state()?;
        rt.validate_immediate_caller_is(std::iter::once(&st.root_key))?;

        rt.transaction(|st: &mut State, rt| {
            st.remove_verifier(rt.store(), &verifier_addr).context("failed to remove verifier")
        })
    }

    pub fn add_verified_client<BS, RT>(
        rt: &mut RT,
        params: AddVerifiedClientParams,
    ) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        if params.allowance < *MIN_VERIFIED_DEAL_SIZE {
            return Err(actor_error!(
                illegal_argument,
                "allowance {} below MinVerifiedDealSize for add verified client {}",
                params.allowance,
                params.address
            ));
        }

        rt.validate_immediate_caller_accept_any()?;

        rt.transaction(|st: &mut State, rt| {
            // Validate caller is one of the verifiers.
            let verifier = rt.message().caller();
            let verifier_cap = st
                .get_verifier_cap(rt.store(), &verifier)?
                .ok_or_else(|| actor_error!(not_found, "no such verifier {}", verifier))?;

            // Disallow existing verifiers as clients.
            if st.get_verifier_cap(rt.store(), &params.address)?.is_some() {
                return Err(actor_error!(
                    illegal_argument,
                    "verifier {} cannot be added as a verified client",
                    params.address
                ));
            }

            // Compute new verifier allowance.
            if verifier_cap < params.allowance {
                return Err(actor_error!(
                    illegal_argument,
                    "add more DataCap {} for verified client than allocated {}",
                    params.allowance,
                    verifier_cap
                ));
            }

            // Reduce verifier's allowance. The verifier entry persists even at
            // zero allowance; only the root key may remove it.
            let new_verifier_cap = &verifier_cap - &params.allowance;
            st.put_verifier(rt.store(), &verifier, &new_verifier_cap)
                .context("failed to update verifier allowance")?;

            // This is a one-time, upfront allocation. If a client needs more
            // cap the verifier must use a fresh client address.
            if st.get_verified_client_cap(rt.store(), &params.address)?.is_some() {
                return Err(actor_error!(
                    illegal_argument,
                    "verified client already exists: {}",
                    params.address
                ));
            }

            st.put_verified_client(rt.store(), &params.address, &params.allowance)
                .context("failed to add verified client")
        })
    }

    /// Called by StorageMarketActor during PublishStorageDeals.
    /// Do not allow partially verified deals (DealSize must be greater than equal to MinVerifiedDealSize).
    pub fn use_bytes<BS, RT>(rt: &mut RT, params: UseBytesParams) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        rt.validate_immediate_caller_is(std::iter::once(&STORAGE_MARKET_ACTOR_ADDR))?;

        if params.deal_size < *MIN_VERIFIED_DEAL_SIZE {
            return Err(actor_error!(
                illegal_argument,
                "verified deal size {} is below minimum {}",
                params.deal_size,
                *MIN_VERIFIED_DEAL_SIZE
            ));
        }

        rt.transaction(|st: &mut State, rt| {
            let client_cap =
                st.get_verified_client_cap(rt.store(), &params.address)?.ok_or_else(|| {
                    actor_error!(illegal_argument, "no such verified client {}", params.address)
                })?;

            if params.deal_size > client_cap {
                return Err(actor_error!(
                    illegal_argument,
                    "deal size {} exceeds allowable cap {} for verified client {}",
                    params.deal_size,
                    client_cap,
                    params.address
                ));
            }

            let new_client_cap = &client_cap - &params.deal_size;
            if new_client_cap < *MIN_VERIFIED_DEAL_SIZE {
                // Delete entry if remaining DataCap is less than MinVerifiedDealSize.
                // Will be restored later if the deal did not get activated with a ProvenSector.
                info!(
                    "removing verified client {} with cap {} below minimum",
                    params.address, new_client_cap
                );
                st.delete_verified_client(rt.store(), &params.address)
                    .context("failed to delete verified client")
            } else {
                st.put_verified_client(rt.store(), &params.address, &new_client_cap)
                    .context("failed to update verified client allowance")
            }
        })
    }

    /// Called by HandleInitTimeoutDeals from StorageMarketActor when a VerifiedDeal fails to init.
    /// Restore allowable cap for the client, creating a new entry if the client has been deleted.
    pub fn restore_bytes<BS, RT>(rt: &mut RT, params: RestoreBytesParams) -> Result<(), ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        rt.validate_immediate_caller_is(std::iter::once(&STORAGE_MARKET_ACTOR_ADDR))?;

        if params.deal_size < *MIN_VERIFIED_DEAL_SIZE {
            return Err(actor_error!(
                illegal_argument,
                "below minimum VerifiedDealSize requested in RestoreBytes: {}",
                params.deal_size
            ));
        }

        rt.transaction(|st: &mut State, rt| {
            let client_cap =
                st.get_verified_client_cap(rt.store(), &params.address)?.unwrap_or_else(Zero::zero);

            let new_client_cap = &client_cap + &params.deal_size;
            st.put_verified_client(rt.store(), &params.address, &new_client_cap)
                .context("failed to restore verified client allowance")
        })
    }
}

impl ActorCode for Actor {
    fn invoke_method<BS, RT>(
        rt: &mut RT,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, ActorError>
    where
        BS: Blockstore,
        RT: Runtime<BS>,
    {
        match FromPrimitive::from_u64(method) {
            Some(Method::Constructor) => {
                Self::constructor(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::AddVerifier) => {
                Self::add_verifier(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::RemoveVerifier) => {
                Self::remove_verifier(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::AddVerifiedClient) => {
                Self::add_verified_client(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::UseBytes) => {
                Self::use_bytes(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::RestoreBytes) => {
                Self::restore_bytes(rt, deserialize_params(params)?)?;
                Ok(RawBytes::default())
            }
            None => Err(actor_error!(unhandled_message, "invalid method: {}", method)),
        }
    }
}
