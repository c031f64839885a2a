// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! On-chain adapter capabilities.
//!
//! The session machines never execute transactions themselves; everything
//! on-chain goes through these traits. A production deployment implements
//! them over its RPC client, tests use [`memory::InMemoryChainContext`].

use alloy::primitives::Address;
use async_trait::async_trait;
use sdp_vouchers::SignedRav;

pub mod memory;

/// Read-only view of the prepaid escrow.
#[async_trait]
pub trait EscrowQuery: Send + Sync {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from
    /// the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    /// Retrieves the escrow balance held for the `(payer, collector,
    /// receiver)` triple. The returned balance is advisory: it may reflect an
    /// older blockchain height than a concurrent query.
    async fn escrow_balance(
        &self,
        payer: Address,
        collector: Address,
        receiver: Address,
    ) -> Result<u128, Self::AdapterError>;
}

/// Submission of a final RAV for on-chain redemption.
#[async_trait]
pub trait RavCollector: Send + Sync {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from
    /// the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    /// Submits `rav` for collection, diverting `data_service_cut_ppm` parts
    /// per million of its value to the data service. Returns the tokens
    /// collected for `receiver`.
    async fn collect(
        &self,
        rav: &SignedRav,
        data_service_cut_ppm: u32,
        receiver: Address,
    ) -> Result<u128, Self::AdapterError>;
}
