// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A recording `Runtime` for actor unit tests.
//!
//! Tests declare the interactions they expect (caller validations), invoke an
//! actor method through [`MockRuntime::call`], then assert the expectations
//! were consumed with [`MockRuntime::verify`]. A method failure rolls the
//! state root back, mirroring the host's all-or-nothing commit.

use std::collections::HashMap;

use cid::multihash::Code;
use cid::Cid;
use fvm_ipld_blockstore::{Blockstore, MemoryBlockstore};
use fvm_ipld_encoding::{CborStore, RawBytes};
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::MethodNum;
use num_traits::Zero;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::runtime::{ActorCode, MessageInfo, Runtime};
use crate::{actor_error, ActorError, SYSTEM_ACTOR_ADDR};

/// Outstanding interaction expectations, consumed in order of declaration.
#[derive(Default, Debug)]
pub struct Expectations {
    pub expect_validate_caller_any: bool,
    pub expect_validate_caller_addr: Option<Vec<Address>>,
    pub expect_validate_caller_type: Option<Vec<Cid>>,
}

impl Expectations {
    fn reset(&mut self) {
        *self = Default::default();
    }

    fn verify(&self) {
        assert!(!self.expect_validate_caller_any, "expected validate caller any not received");
        assert!(
            self.expect_validate_caller_addr.is_none(),
            "expected validate caller address {:?} not received",
            self.expect_validate_caller_addr
        );
        assert!(
            self.expect_validate_caller_type.is_none(),
            "expected validate caller type {:?} not received",
            self.expect_validate_caller_type
        );
    }
}

pub struct MockRuntime {
    pub epoch: ChainEpoch,
    pub receiver: Address,
    pub caller: Address,
    pub caller_type: Cid,
    pub value_received: TokenAmount,
    pub actor_code_cids: HashMap<Address, Cid>,
    pub state: Option<Cid>,
    pub store: MemoryBlockstore,

    pub expectations: Expectations,
    pub in_call: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            epoch: 0,
            receiver: Address::new_id(0),
            caller: SYSTEM_ACTOR_ADDR,
            caller_type: Cid::default(),
            value_received: TokenAmount::zero(),
            actor_code_cids: Default::default(),
            state: None,
            store: MemoryBlockstore::default(),
            expectations: Default::default(),
            in_call: false,
        }
    }
}

impl MockRuntime {
    pub fn new(receiver: Address) -> Self {
        Self { receiver, ..Default::default() }
    }

    pub fn store(&self) -> &MemoryBlockstore {
        &self.store
    }

    pub fn set_caller(&mut self, code_id: Cid, address: Address) {
        assert!(address.protocol() == Protocol::ID, "caller must be an ID address");
        self.caller = address;
        self.caller_type = code_id;
        self.actor_code_cids.insert(address, code_id);
    }

    pub fn expect_validate_caller_any(&mut self) {
        self.expectations.expect_validate_caller_any = true;
    }

    pub fn expect_validate_caller_addr(&mut self, addrs: Vec<Address>) {
        assert!(!addrs.is_empty(), "addrs must be non-empty");
        self.expectations.expect_validate_caller_addr = Some(addrs);
    }

    pub fn expect_validate_caller_type(&mut self, types: Vec<Cid>) {
        assert!(!types.is_empty(), "types must be non-empty");
        self.expectations.expect_validate_caller_type = Some(types);
    }

    /// Asserts that all expected interactions took place, and resets.
    pub fn verify(&mut self) {
        self.expectations.verify();
        self.expectations.reset();
    }

    pub fn reset(&mut self) {
        self.expectations.reset();
    }

    /// Reads the actor's committed state object.
    pub fn get_state<T: DeserializeOwned>(&self) -> T {
        let root = self.state.expect("state not constructed");
        self.store.get_cbor(&root).unwrap().expect("state not found")
    }

    /// Invokes an actor method, rolling back state on error like the host.
    pub fn call<A: ActorCode>(
        &mut self,
        method_num: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, ActorError> {
        assert!(!self.in_call, "mock runtime does not support reentrant calls");
        self.in_call = true;
        let prev_state = self.state;
        let res = A::invoke_method(self, method_num, params);
        if res.is_err() {
            self.state = prev_state;
        }
        self.in_call = false;
        res
    }
}

impl MessageInfo for MockRuntime {
    fn caller(&self) -> Address {
        self.caller
    }

    fn receiver(&self) -> Address {
        self.receiver
    }

    fn value_received(&self) -> TokenAmount {
        self.value_received.clone()
    }
}

impl Runtime<MemoryBlockstore> for MockRuntime {
    fn message(&self) -> &dyn MessageInfo {
        self
    }

    fn curr_epoch(&self) -> ChainEpoch {
        self.epoch
    }

    fn validate_immediate_caller_accept_any(&mut self) -> Result<(), ActorError> {
        assert!(
            self.expectations.expect_validate_caller_any,
            "unexpected validate-caller-any"
        );
        self.expectations.expect_validate_caller_any = false;
        Ok(())
    }

    fn validate_immediate_caller_is<'a, I>(&mut self, addresses: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Address>,
    {
        let addrs: Vec<Address> = addresses.into_iter().cloned().collect();

        let expected = self
            .expectations
            .expect_validate_caller_addr
            .take()
            .expect("unexpected validate caller addrs");
        assert_eq!(
            addrs, expected,
            "unexpected validate caller addrs {:?}, expected {:?}",
            addrs, expected
        );

        if addrs.contains(&self.caller) {
            Ok(())
        } else {
            Err(actor_error!(forbidden; "caller address {} forbidden", self.caller))
        }
    }

    fn validate_immediate_caller_type<'a, I>(&mut self, types: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Cid>,
    {
        let types: Vec<Cid> = types.into_iter().cloned().collect();

        let expected = self
            .expectations
            .expect_validate_caller_type
            .take()
            .expect("unexpected validate caller types");
        assert_eq!(
            types, expected,
            "unexpected validate caller types {:?}, expected {:?}",
            types, expected
        );

        if types.contains(&self.caller_type) {
            Ok(())
        } else {
            Err(actor_error!(forbidden; "caller type {} forbidden", self.caller_type))
        }
    }

    fn resolve_address(&self, address: &Address) -> Option<Address> {
        if address.protocol() == Protocol::ID {
            return Some(*address);
        }
        None
    }

    fn get_actor_code_cid(&self, addr: &Address) -> Option<Cid> {
        self.actor_code_cids.get(addr).copied()
    }

    fn create<T: Serialize>(&mut self, obj: &T) -> Result<(), ActorError> {
        if self.state.is_some() {
            return Err(actor_error!(illegal_state; "state already constructed"));
        }
        self.state = Some(
            self.store
                .put_cbor(obj, Code::Blake2b256)
                .map_err(|e| actor_error!(illegal_state; "failed to create state: {}", e))?,
        );
        Ok(())
    }

    fn state<T: DeserializeOwned>(&self) -> Result<T, ActorError> {
        let root =
            self.state.ok_or_else(|| actor_error!(illegal_state; "state not constructed"))?;
        self.store
            .get_cbor(&root)
            .map_err(|e| actor_error!(illegal_state; "failed to read state: {}", e))?
            .ok_or_else(|| actor_error!(illegal_state; "state root not found"))
    }

    fn transaction<S, RT, F>(&mut self, f: F) -> Result<RT, ActorError>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S, &mut Self) -> Result<RT, ActorError>,
    {
        let mut state: S = self.state()?;
        let result = f(&mut state, self)?;
        self.state = Some(
            self.store
                .put_cbor(&state, Code::Blake2b256)
                .map_err(|e| actor_error!(illegal_state; "failed to commit state: {}", e))?,
        );
        Ok(result)
    }

    fn store(&self) -> &MemoryBlockstore {
        &self.store
    }
}

/// Requires that a call result failed with the given exit code.
pub fn expect_abort<T: std::fmt::Debug>(exit_code: ExitCode, res: Result<T, ActorError>) {
    let err = res.expect_err(&format!("expected abort with code {}", exit_code));
    assert_eq!(
        err.exit_code(),
        exit_code,
        "expected abort with code {}, got {}: {}",
        exit_code,
        err.exit_code(),
        err.msg()
    );
}

/// Requires that a call result failed with the given exit code and a message
/// containing the given substring.
pub fn expect_abort_contains_message<T: std::fmt::Debug>(
    exit_code: ExitCode,
    message: &str,
    res: Result<T, ActorError>,
) {
    let err = res.expect_err(&format!("expected abort with code {}", exit_code));
    assert_eq!(err.exit_code(), exit_code, "wrong exit code, message was: {}", err.msg());
    assert!(
        err.msg().contains(message),
        "expected message '{}' to contain '{}'",
        err.msg(),
        message
    );
}
