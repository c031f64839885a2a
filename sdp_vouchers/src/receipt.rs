// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Receipt

use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use alloy::{
    primitives::{Address, FixedBytes},
    sol,
};
use rand::{rng, Rng};
use sdp_eip712_message::Eip712SignedMessage;
use serde::{Deserialize, Serialize};

use crate::WithValueAndTimestamp;

/// A signed receipt message
pub type SignedReceipt = Eip712SignedMessage<Receipt>;

sol! {
    /// Holds information needed for promise of payment signed with ECDSA
    #[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
    struct Receipt {
        /// Unique collection id this receipt belongs to
        bytes32 collection_id;

        // The address of the payer the receipt was issued by
        address payer;
        // The address of the data service the receipt was issued to
        address data_service;
        // The address of the service provider the receipt was issued to
        address service_provider;

        /// Unix Epoch timestamp in nanoseconds (Truncated to 64-bits)
        uint64 timestamp_ns;
        /// Random value used to avoid collisions from multiple receipts with one timestamp
        uint64 nonce;
        /// Value for the delivered unit of service (truncate to lower bits)
        uint128 value;
    }
}

fn get_current_timestamp_u64_ns() -> Result<u64, SystemTimeError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos() as u64)
}

impl Receipt {
    /// Returns a receipt with provided values
    pub fn new(
        collection_id: FixedBytes<32>,
        payer: Address,
        data_service: Address,
        service_provider: Address,
        value: u128,
    ) -> Result<Self, SystemTimeError> {
        let timestamp_ns = get_current_timestamp_u64_ns()?;
        let nonce = rng().random::<u64>();
        Ok(Self {
            collection_id,
            payer,
            data_service,
            service_provider,
            timestamp_ns,
            nonce,
            value,
        })
    }
}

impl WithValueAndTimestamp for Receipt {
    fn value(&self) -> u128 {
        self.value
    }

    fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }
}
