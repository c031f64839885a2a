// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use alloy::primitives::{Address, FixedBytes};
use sdp_eip712_message::Eip712Error;
use sdp_vouchers::AggregationError;

/// Errors raised by the aggregation validation pipeline.
///
/// Each gate has its own kind so a caller can tell a malleability replay
/// from a signer problem from a tuple disagreement.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// Two receipts in the batch carry the same signature under low-S
    /// normalization
    #[error("Duplicate receipt signature: {0}")]
    DuplicateSignature(String),

    /// A receipt signer is not in the accepted signers set
    #[error("Recovered receipt signer not accepted: {address}")]
    InvalidSigner { address: Address },

    /// The previous RAV signer is not in the accepted signers set
    #[error("Recovered previous RAV signer not accepted: {address}")]
    RavSignerMismatch { address: Address },

    /// A receipt timestamp is not strictly greater than the previous RAV timestamp
    #[error(
        "Receipt timestamp {receipt_ts} is not greater than previous RAV timestamp {rav_ts}"
    )]
    InvalidTimestamp { rav_ts: u64, receipt_ts: u64 },

    /// A collection id in the batch disagrees with the batch tuple
    #[error("Collection id {received:#x} does not match {expected:#x}")]
    CollectionMismatch {
        expected: FixedBytes<32>,
        received: FixedBytes<32>,
    },

    /// A payer address in the batch disagrees with the batch tuple
    #[error("Payer {received} does not match {expected}")]
    PayerMismatch { expected: Address, received: Address },

    /// A service provider address in the batch disagrees with the batch tuple
    #[error("Service provider {received} does not match {expected}")]
    ServiceProviderMismatch { expected: Address, received: Address },

    /// A data service address in the batch disagrees with the batch tuple
    #[error("Data service {received} does not match {expected}")]
    DataServiceMismatch { expected: Address, received: Address },

    /// The batch was empty or the aggregate overflowed
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// Signing or recovery failed in the cryptographic stack
    #[error(transparent)]
    Signature(#[from] Eip712Error),
}
