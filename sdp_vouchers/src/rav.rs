// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Receipt Aggregate Voucher

use std::cmp;

use alloy::{
    primitives::{Address, Bytes, FixedBytes},
    sol,
};
use sdp_eip712_message::Eip712SignedMessage;
use serde::{Deserialize, Serialize};

use crate::{Receipt, WithValueAndTimestamp};

/// EIP712 signed message for ReceiptAggregateVoucher
pub type SignedRav = Eip712SignedMessage<ReceiptAggregateVoucher>;

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// Error when trying to aggregate receipts and the result overflows
    #[error("Aggregating receipt results in overflow")]
    AggregateOverflow,

    /// Error when no receipts are found for a RAV request
    #[error("Failed to produce rav request, no valid receipts")]
    NoReceipts,
}

sol! {
    /// Holds information needed for promise of payment signed with ECDSA
    ///
    /// We use camelCase for field names to match the Ethereum ABI encoding
    #[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
    struct ReceiptAggregateVoucher {
        /// Unique collection id this RAV belongs to
        bytes32 collectionId;
        // The address of the payer the RAV was issued by
        address payer;
        // The address of the service provider the RAV was issued to
        address serviceProvider;
        // The address of the data service the RAV was issued to
        address dataService;
        // The RAV timestamp, indicating the latest receipt in the RAV
        uint64 timestampNs;
        // Total amount owed to the service provider since the beginning of the
        // payer-service provider relationship, including all debt that is already paid for.
        uint128 valueAggregate;
        // Arbitrary metadata to extend functionality if a data service requires it
        bytes metadata;
    }
}

impl ReceiptAggregateVoucher {
    /// Returns a voucher carrying `value_aggregate` at `timestamp_ns` for the
    /// given tuple, with empty metadata.
    pub fn new(
        collection_id: FixedBytes<32>,
        payer: Address,
        service_provider: Address,
        data_service: Address,
        timestamp_ns: u64,
        value_aggregate: u128,
    ) -> Self {
        Self {
            collectionId: collection_id,
            payer,
            serviceProvider: service_provider,
            dataService: data_service,
            timestampNs: timestamp_ns,
            valueAggregate: value_aggregate,
            metadata: Bytes::new(),
        }
    }

    /// Aggregates a batch of validated receipts with optional validated previous RAV,
    /// returning a new RAV if all provided items are valid or an error if not.
    ///
    /// The timestamp of the result is the maximum of the inputs and the metadata
    /// is always empty: receipt metadata is not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::AggregateOverflow`] if any receipt value causes
    /// the aggregate value to exceed `u128::MAX`
    pub fn aggregate_receipts(
        collection_id: FixedBytes<32>,
        payer: Address,
        service_provider: Address,
        data_service: Address,
        receipts: &[Eip712SignedMessage<Receipt>],
        previous_rav: Option<Eip712SignedMessage<Self>>,
    ) -> Result<Self, AggregationError> {
        // If there is a previous RAV initialize values from it, otherwise use default values
        let mut timestamp_max = 0u64;
        let mut value_aggregate = 0u128;

        if let Some(prev_rav) = previous_rav {
            timestamp_max = prev_rav.message.timestampNs;
            value_aggregate = prev_rav.message.valueAggregate;
        }

        for receipt in receipts {
            value_aggregate = value_aggregate
                .checked_add(receipt.message.value)
                .ok_or(AggregationError::AggregateOverflow)?;

            timestamp_max = cmp::max(timestamp_max, receipt.message.timestamp_ns)
        }

        Ok(Self::new(
            collection_id,
            payer,
            service_provider,
            data_service,
            timestamp_max,
            value_aggregate,
        ))
    }
}

impl WithValueAndTimestamp for ReceiptAggregateVoucher {
    fn value(&self) -> u128 {
        self.valueAggregate
    }

    fn timestamp_ns(&self) -> u64 {
        self.timestampNs
    }
}
