// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{address, fixed_bytes, Address},
    signers::local::PrivateKeySigner,
};
use rstest::*;
use sdp_eip712_message::Eip712SignedMessage;
use sdp_sessions::{
    ConsumerSessionManager, EndReason, EscrowTuple, SessionError, SessionRegistry, SessionStatus,
    Usage,
};
use sdp_vouchers::{sdp_eip712_domain, ReceiptAggregateVoucher};

#[fixture]
fn domain_separator() -> Eip712Domain {
    sdp_eip712_domain(1, address!("1234567890123456789012345678901234567890"))
}

#[fixture]
fn wallet() -> PrivateKeySigner {
    PrivateKeySigner::random()
}

#[fixture]
fn escrow() -> EscrowTuple {
    EscrowTuple {
        payer: address!("e90874a5a29c95ec37d42cdbbb35ab1c524bc254"),
        receiver: address!("a6f1840360f21e35b7593e9b2eff0c0c8e2015ac"),
        data_service: address!("37478f50cbc01b6c05e5b130d1c1e131b5195e11"),
    }
}

#[fixture]
fn manager(domain_separator: Eip712Domain, wallet: PrivateKeySigner) -> ConsumerSessionManager {
    ConsumerSessionManager::new(domain_separator, wallet, Arc::new(SessionRegistry::new()))
}

fn usage_with_cost(cost: u128) -> Usage {
    Usage {
        blocks_processed: 10,
        bytes_transferred: 4096,
        requests: 1,
        cost,
    }
}

#[rstest]
fn init_mints_zero_value_voucher(
    manager: ConsumerSessionManager,
    domain_separator: Eip712Domain,
    escrow: EscrowTuple,
) {
    let init = manager.init(escrow, None).unwrap();

    assert_eq!(init.initial_rav.message.valueAggregate, 0);
    assert_eq!(init.initial_rav.message.payer, escrow.payer);
    assert_eq!(init.initial_rav.message.serviceProvider, escrow.receiver);
    assert_eq!(init.initial_rav.message.dataService, escrow.data_service);
    assert!(init.initial_rav.message.collectionId.is_zero());
    assert_eq!(
        init.initial_rav.recover_signer(&domain_separator).unwrap(),
        manager.signer_address()
    );
    assert_eq!(init.session.status(), SessionStatus::Active);
}

#[rstest]
fn monotonic_session_over_ten_reports(manager: ConsumerSessionManager, escrow: EscrowTuple) {
    let init = manager.init(escrow, None).unwrap();
    let session_id = init.session.id().clone();

    let mut prior_ts = init.initial_rav.message.timestampNs;
    let mut prior_value = 0u128;
    for _ in 0..10 {
        let (rav, should_continue) = manager
            .report_usage(&session_id, usage_with_cost(1_000_000_000_000_000))
            .unwrap();
        assert!(should_continue);
        assert!(rav.message.timestampNs > prior_ts);
        assert!(rav.message.valueAggregate >= prior_value);
        prior_ts = rav.message.timestampNs;
        prior_value = rav.message.valueAggregate;
    }

    assert_eq!(prior_value, 10_000_000_000_000_000);
    assert_eq!(init.session.usage().cost, 10_000_000_000_000_000);
    assert_eq!(init.session.usage().blocks_processed, 100);
}

#[rstest]
fn init_adopts_collection_id_only_from_existing_voucher(
    manager: ConsumerSessionManager,
    domain_separator: Eip712Domain,
    wallet: PrivateKeySigner,
    escrow: EscrowTuple,
) {
    let collection_id =
        fixed_bytes!("0101010101010101010101010101010101010101010101010101010101010101");
    let existing = Eip712SignedMessage::new(
        &domain_separator,
        ReceiptAggregateVoucher::new(
            collection_id,
            escrow.payer,
            escrow.receiver,
            escrow.data_service,
            1_000,
            500,
        ),
        &wallet,
    )
    .unwrap();

    let init = manager.init(escrow, Some(existing)).unwrap();
    assert_eq!(init.initial_rav.message.collectionId, collection_id);
    assert_eq!(init.initial_rav.message.valueAggregate, 500);
    assert_eq!(init.session.tuple().collection_id, collection_id);

    // Subsequent vouchers keep growing from the adopted value
    let (rav, _) = manager
        .report_usage(init.session.id(), usage_with_cost(100))
        .unwrap();
    assert_eq!(rav.message.valueAggregate, 600);
    assert_eq!(rav.message.collectionId, collection_id);
}

#[rstest]
fn init_rejects_existing_voucher_with_wrong_tuple(
    manager: ConsumerSessionManager,
    domain_separator: Eip712Domain,
    wallet: PrivateKeySigner,
    escrow: EscrowTuple,
) {
    let other_payer = address!("fafafafafafafafafafafafafafafafafafafafa");
    let existing = Eip712SignedMessage::new(
        &domain_separator,
        ReceiptAggregateVoucher::new(
            alloy::primitives::FixedBytes::ZERO,
            other_payer,
            escrow.receiver,
            escrow.data_service,
            1_000,
            500,
        ),
        &wallet,
    )
    .unwrap();

    let res = manager.init(escrow, Some(existing));
    assert!(matches!(res, Err(SessionError::PayerMismatch { .. })));
}

#[rstest]
fn init_rejects_zero_addresses(manager: ConsumerSessionManager, escrow: EscrowTuple) {
    let res = manager.init(
        EscrowTuple {
            payer: Address::ZERO,
            ..escrow
        },
        None,
    );
    assert!(matches!(res, Err(SessionError::InvalidArgument { .. })));
}

#[rstest]
fn unknown_session_is_not_found(manager: ConsumerSessionManager, escrow: EscrowTuple) {
    let init = manager.init(escrow, None).unwrap();
    let id = init.session.id().clone();
    manager
        .end_session(&id, Usage::default(), EndReason::Complete)
        .unwrap();

    // A fresh registry knows nothing about foreign ids
    let other = ConsumerSessionManager::new(
        sdp_eip712_domain(1, address!("1234567890123456789012345678901234567890")),
        PrivateKeySigner::random(),
        Arc::new(SessionRegistry::new()),
    );
    assert!(matches!(
        other.report_usage(&id, Usage::default()),
        Err(SessionError::NotFound { .. })
    ));
}

#[rstest]
fn report_on_ended_session_fails_precondition(
    manager: ConsumerSessionManager,
    escrow: EscrowTuple,
) {
    let init = manager.init(escrow, None).unwrap();
    let session_id = init.session.id().clone();
    manager
        .end_session(&session_id, Usage::default(), EndReason::Complete)
        .unwrap();

    let res = manager.report_usage(&session_id, usage_with_cost(1));
    assert!(matches!(res, Err(SessionError::FailedPrecondition { .. })));
}

#[rstest]
fn end_session_is_idempotent(manager: ConsumerSessionManager, escrow: EscrowTuple) {
    let init = manager.init(escrow, None).unwrap();
    let session_id = init.session.id().clone();

    manager
        .report_usage(&session_id, usage_with_cost(700))
        .unwrap();
    let (final_rav, total_usage) = manager
        .end_session(&session_id, usage_with_cost(300), EndReason::Complete)
        .unwrap();
    assert_eq!(final_rav.message.valueAggregate, 1000);
    assert_eq!(total_usage.cost, 1000);
    assert_eq!(init.session.end_reason(), Some(EndReason::Complete));

    // The second end returns the recorded state; the failed reason does not
    // overwrite the first
    let (same_rav, same_usage) = manager
        .end_session(&session_id, usage_with_cost(999), EndReason::Failed)
        .unwrap();
    assert_eq!(same_rav.message.valueAggregate, 1000);
    assert_eq!(same_usage.cost, 1000);
    assert_eq!(init.session.end_reason(), Some(EndReason::Complete));
}

#[rstest]
fn aggregate_overflow_leaves_state_untouched(
    manager: ConsumerSessionManager,
    escrow: EscrowTuple,
) {
    let init = manager.init(escrow, None).unwrap();
    let session_id = init.session.id().clone();

    manager
        .report_usage(&session_id, usage_with_cost(u128::MAX))
        .unwrap();
    let res = manager.report_usage(&session_id, usage_with_cost(1));
    assert!(matches!(res, Err(SessionError::AggregateOverflow)));

    // The failed report neither advanced the voucher nor the counters
    let rav = init.session.current_rav().unwrap();
    assert_eq!(rav.message.valueAggregate, u128::MAX);
    assert_eq!(init.session.usage().blocks_processed, 10);
    assert_eq!(init.session.status(), SessionStatus::Active);
}
