// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session state shared by the consumer and provider machines.

use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

use alloy::primitives::{hex, Address, FixedBytes};
use log::warn;
use rand::{rng, Rng};
use sdp_vouchers::{ReceiptAggregateVoucher, SignedRav};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Opaque identifier of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub(crate) fn fresh() -> Self {
        let bytes = rng().random::<[u8; 16]>();
        Self(hex::encode(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The tuple every receipt and voucher of a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTuple {
    pub collection_id: FixedBytes<32>,
    pub payer: Address,
    pub service_provider: Address,
    pub data_service: Address,
}

impl CollectionTuple {
    pub fn from_rav(rav: &ReceiptAggregateVoucher) -> Self {
        Self {
            collection_id: rav.collectionId,
            payer: rav.payer,
            service_provider: rav.serviceProvider,
            data_service: rav.dataService,
        }
    }

    /// Field-by-field comparison against a voucher, failing with the
    /// mismatching field's own error kind.
    pub fn ensure_matches_rav(&self, rav: &ReceiptAggregateVoucher) -> Result<(), SessionError> {
        if rav.collectionId != self.collection_id {
            return Err(SessionError::CollectionMismatch {
                expected: self.collection_id,
                received: rav.collectionId,
            });
        }
        if rav.payer != self.payer {
            return Err(SessionError::PayerMismatch {
                expected: self.payer,
                received: rav.payer,
            });
        }
        if rav.serviceProvider != self.service_provider {
            return Err(SessionError::ServiceProviderMismatch {
                expected: self.service_provider,
                received: rav.serviceProvider,
            });
        }
        if rav.dataService != self.data_service {
            return Err(SessionError::DataServiceMismatch {
                expected: self.data_service,
                received: rav.dataService,
            });
        }
        Ok(())
    }
}

/// The escrow account a consumer opens a session against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTuple {
    pub payer: Address,
    pub receiver: Address,
    pub data_service: Address,
}

/// Usage delivered over a session, accumulated field-wise.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub blocks_processed: u64,
    pub bytes_transferred: u64,
    pub requests: u64,
    pub cost: u128,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.blocks_processed = self.blocks_processed.saturating_add(other.blocks_processed);
        self.bytes_transferred = self
            .bytes_transferred
            .saturating_add(other.bytes_transferred);
        self.requests = self.requests.saturating_add(other.requests);
        self.cost = self.cost.checked_add(other.cost).unwrap_or_else(|| {
            // Should never happen with real prices; better a pinned counter
            // than a lost session.
            warn!("usage cost accumulation saturated at u128::MAX");
            u128::MAX
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Why a session ended, as exposed at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Complete,
    StoppedBySidecar,
    Cancelled,
    Failed,
}

pub(crate) struct SessionInner {
    pub tuple: CollectionTuple,
    pub rav: Option<SignedRav>,
    pub usage: Usage,
    /// Delivered value not yet covered by the current RAV.
    pub uncommitted_value: u128,
    /// Escrow balance observed at admission or on the last refresh, if any.
    pub escrow_balance: Option<u128>,
    /// Set when a new RAV lands, cleared by the next usage report.
    pub rav_updated: bool,
    pub status: SessionStatus,
    pub end_reason: Option<EndReason>,
    pub ended_at_ns: Option<u64>,
}

/// A live session record.
///
/// Owned by its session machine; the registry only hands out shared
/// references for lookup. All mutation happens through the session's own
/// lock, which totally orders operations within one session.
pub struct Session {
    id: SessionId,
    created_at_ns: u64,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub(crate) fn new(id: SessionId, created_at_ns: u64, tuple: CollectionTuple) -> Self {
        Self {
            id,
            created_at_ns,
            inner: Mutex::new(SessionInner {
                tuple,
                rav: None,
                usage: Usage::default(),
                uncommitted_value: 0,
                escrow_balance: None,
                rav_updated: false,
                status: SessionStatus::Active,
                end_reason: None,
                ended_at_ns: None,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at_ns(&self) -> u64 {
        self.created_at_ns
    }

    pub fn tuple(&self) -> CollectionTuple {
        self.lock().tuple
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.lock().end_reason
    }

    /// The RAV currently backing this session, if one has been attached.
    pub fn current_rav(&self) -> Option<SignedRav> {
        self.lock().rav.clone()
    }

    pub fn usage(&self) -> Usage {
        self.lock().usage
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap()
    }
}
