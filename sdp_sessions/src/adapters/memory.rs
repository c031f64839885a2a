// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory implementation of the on-chain adapters.
//!
//! This module provides an in-memory implementation of the escrow and
//! collector capabilities. It is useful for testing and development
//! purposes, and supports injecting failures and latency.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use alloy::primitives::Address;
use async_trait::async_trait;
use sdp_vouchers::SignedRav;

use super::{EscrowQuery, RavCollector};

/// Escrow balances keyed by `(payer, collector, receiver)`.
pub type EscrowStorage = Arc<RwLock<HashMap<(Address, Address, Address), u128>>>;

/// A RAV submitted for collection, as the mock chain recorded it.
#[derive(Debug, Clone)]
pub struct CollectedRav {
    pub rav: SignedRav,
    pub data_service_cut_ppm: u32,
    pub receiver: Address,
}

#[derive(Debug, thiserror::Error)]
#[error("something went wrong: {error}")]
pub struct InMemoryAdapterError {
    pub error: String,
}

/// In-memory chain context with rwlocks to allow sharing with other
/// components as needed.
#[derive(Clone, Default)]
pub struct InMemoryChainContext {
    escrow_storage: EscrowStorage,
    collected: Arc<RwLock<Vec<CollectedRav>>>,
    escrow_failures: Arc<RwLock<u32>>,
    collect_failures: Arc<RwLock<u32>>,
    query_delay: Arc<RwLock<Option<Duration>>>,
}

impl InMemoryChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_escrow_balance(
        &self,
        payer: Address,
        collector: Address,
        receiver: Address,
        balance: u128,
    ) {
        self.escrow_storage
            .write()
            .unwrap()
            .insert((payer, collector, receiver), balance);
    }

    /// The next `count` escrow queries fail before touching storage.
    pub fn fail_next_escrow_queries(&self, count: u32) {
        *self.escrow_failures.write().unwrap() = count;
    }

    /// The next `count` collection submissions fail.
    pub fn fail_next_collects(&self, count: u32) {
        *self.collect_failures.write().unwrap() = count;
    }

    /// Every escrow query sleeps for `delay` first.
    pub fn delay_escrow_queries(&self, delay: Duration) {
        *self.query_delay.write().unwrap() = Some(delay);
    }

    /// Everything submitted for collection so far.
    pub fn collected(&self) -> Vec<CollectedRav> {
        self.collected.read().unwrap().clone()
    }

    fn take_forced_failure(counter: &RwLock<u32>) -> bool {
        let mut remaining = counter.write().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl EscrowQuery for InMemoryChainContext {
    type AdapterError = InMemoryAdapterError;

    async fn escrow_balance(
        &self,
        payer: Address,
        collector: Address,
        receiver: Address,
    ) -> Result<u128, Self::AdapterError> {
        let delay = *self.query_delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_forced_failure(&self.escrow_failures) {
            return Err(InMemoryAdapterError {
                error: "forced escrow query failure".to_owned(),
            });
        }
        self.escrow_storage
            .read()
            .unwrap()
            .get(&(payer, collector, receiver))
            .copied()
            .ok_or(InMemoryAdapterError {
                error: "no escrow account found".to_owned(),
            })
    }
}

#[async_trait]
impl RavCollector for InMemoryChainContext {
    type AdapterError = InMemoryAdapterError;

    async fn collect(
        &self,
        rav: &SignedRav,
        data_service_cut_ppm: u32,
        receiver: Address,
    ) -> Result<u128, Self::AdapterError> {
        if Self::take_forced_failure(&self.collect_failures) {
            return Err(InMemoryAdapterError {
                error: "forced collection failure".to_owned(),
            });
        }

        let value = rav.message.valueAggregate;
        // Exact ppm split without overflowing u128
        let cut = (value / 1_000_000).saturating_mul(data_service_cut_ppm as u128)
            + (value % 1_000_000) * (data_service_cut_ppm as u128) / 1_000_000;
        let tokens = value - cut;

        self.collected.write().unwrap().push(CollectedRav {
            rav: rav.clone(),
            data_service_cut_ppm,
            receiver,
        });

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[tokio::test]
    async fn balances_are_scoped_to_the_triple() {
        let context = InMemoryChainContext::new();
        let payer = address!("1111111111111111111111111111111111111111");
        let collector = address!("5555555555555555555555555555555555555555");
        let receiver = address!("3333333333333333333333333333333333333333");

        context.set_escrow_balance(payer, collector, receiver, 1000);

        assert_eq!(
            context
                .escrow_balance(payer, collector, receiver)
                .await
                .unwrap(),
            1000
        );
        assert!(context
            .escrow_balance(receiver, collector, payer)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn forced_failures_are_consumed() {
        let context = InMemoryChainContext::new();
        let payer = address!("1111111111111111111111111111111111111111");
        let collector = address!("5555555555555555555555555555555555555555");
        let receiver = address!("3333333333333333333333333333333333333333");

        context.set_escrow_balance(payer, collector, receiver, 42);
        context.fail_next_escrow_queries(2);

        assert!(context
            .escrow_balance(payer, collector, receiver)
            .await
            .is_err());
        assert!(context
            .escrow_balance(payer, collector, receiver)
            .await
            .is_err());
        assert_eq!(
            context
                .escrow_balance(payer, collector, receiver)
                .await
                .unwrap(),
            42
        );
    }
}
