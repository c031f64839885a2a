// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Harness wiring a consumer machine and a provider machine back to back,
//! standing in for the two sidecar processes of a streaming session. The
//! gateway transport is replaced by direct calls.

use std::{collections::HashSet, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{address, Address},
    signers::local::PrivateKeySigner,
};
use sdp_sessions::{
    adapters::memory::InMemoryChainContext, ConsumerSessionManager, EscrowTuple, ProviderConfig,
    ProviderSessionManager, SessionRegistry,
};
use sdp_vouchers::sdp_eip712_domain;

pub const PAYER: Address = address!("e90874a5a29c95ec37d42cdbbb35ab1c524bc254");
pub const SERVICE_PROVIDER: Address = address!("a6f1840360f21e35b7593e9b2eff0c0c8e2015ac");
pub const DATA_SERVICE: Address = address!("37478f50cbc01b6c05e5b130d1c1e131b5195e11");
pub const COLLECTOR: Address = address!("5555555555555555555555555555555555555555");
pub const VERIFIER: Address = address!("1234567890123456789012345678901234567890");

/// One consumer and one provider sharing a domain and a mock chain.
pub struct Fabric {
    pub domain_separator: Eip712Domain,
    pub chain: InMemoryChainContext,
    pub consumer: ConsumerSessionManager,
    pub provider: ProviderSessionManager<InMemoryChainContext>,
}

impl Fabric {
    pub fn new(escrow_balance: u128) -> Self {
        let domain_separator = sdp_eip712_domain(1, VERIFIER);
        let wallet = PrivateKeySigner::random();

        let chain = InMemoryChainContext::new();
        chain.set_escrow_balance(PAYER, COLLECTOR, SERVICE_PROVIDER, escrow_balance);

        let consumer = ConsumerSessionManager::new(
            domain_separator.clone(),
            wallet.clone(),
            Arc::new(SessionRegistry::new()),
        );

        let mut config =
            ProviderConfig::new(SERVICE_PROVIDER, COLLECTOR).with_data_service(DATA_SERVICE);
        config.escrow_query_backoff = Duration::from_millis(1);
        let provider = ProviderSessionManager::new(
            domain_separator.clone(),
            chain.clone(),
            HashSet::from([wallet.address()]),
            config,
            Arc::new(SessionRegistry::new()),
        );

        Self {
            domain_separator,
            chain,
            consumer,
            provider,
        }
    }

    pub fn escrow(&self) -> EscrowTuple {
        EscrowTuple {
            payer: PAYER,
            receiver: SERVICE_PROVIDER,
            data_service: DATA_SERVICE,
        }
    }
}
