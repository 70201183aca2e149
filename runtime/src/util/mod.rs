// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::downcast::ActorDowncast;
pub use self::message_accumulator::MessageAccumulator;

pub mod cbor;
mod downcast;
mod message_accumulator;
