// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # SDP payment structs
//!
//! These structs are the messages exchanged between the sidecars of the
//! streaming-data marketplace: per-unit [`Receipt`]s and the cumulative
//! [`ReceiptAggregateVoucher`] that is redeemed on-chain.
//!

use alloy::{dyn_abi::Eip712Domain, primitives::Address, sol_types::eip712_domain};
use sdp_eip712_message::Eip712SignedMessage;

mod rav;
mod receipt;

pub use rav::{AggregationError, ReceiptAggregateVoucher, SignedRav};
pub use receipt::{Receipt, SignedReceipt};

/// The EIP712 domain separator builder for the SDP payment fabric.
///
/// The `(chain_id, verifying_contract)` pair namespaces every signature:
/// two signatures produced under different domains never collide.
///
/// The domain separator is defined as:
/// - `name`: "SDP"
/// - `version`: "1"
/// - `chain_id`: The chain ID of the chain where the verifier is deployed.
/// - `verifying_contract`: The address of the contract that is verifying the signature.
pub fn sdp_eip712_domain(chain_id: u64, verifying_contract_address: Address) -> Eip712Domain {
    eip712_domain! {
        name: "SDP",
        version: "1",
        chain_id: chain_id,
        verifying_contract: verifying_contract_address,
    }
}

/// Extension that exposes the monetary value and timestamp of a payment message.
pub trait WithValueAndTimestamp {
    fn value(&self) -> u128;
    fn timestamp_ns(&self) -> u64;
}

impl<T> WithValueAndTimestamp for Eip712SignedMessage<T>
where
    T: alloy::sol_types::SolStruct + WithValueAndTimestamp,
{
    fn value(&self) -> u128 {
        self.message.value()
    }

    fn timestamp_ns(&self) -> u64 {
        self.message.timestamp_ns()
    }
}
