// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{address, Address, FixedBytes},
    signers::local::PrivateKeySigner,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sdp_aggregator::check_and_aggregate_receipts;
use sdp_eip712_message::Eip712SignedMessage;
use sdp_vouchers::{sdp_eip712_domain, Receipt, SignedReceipt};

pub fn create_and_sign_receipt(
    domain_separator: &Eip712Domain,
    collection_id: FixedBytes<32>,
    value: u128,
    wallet: &PrivateKeySigner,
) -> SignedReceipt {
    Eip712SignedMessage::new(
        domain_separator,
        Receipt::new(
            collection_id,
            address!("abababababababababababababababababababab"),
            address!("deaddeaddeaddeaddeaddeaddeaddeaddeaddead"),
            address!("beefbeefbeefbeefbeefbeefbeefbeefbeefbeef"),
            value,
        )
        .unwrap(),
        wallet,
    )
    .unwrap()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let domain_separator = sdp_eip712_domain(1, Address::from([0x11u8; 20]));

    let wallet = PrivateKeySigner::random();
    let address = wallet.address();
    let accepted_addresses = HashSet::from([address]);

    // Arbitrary values wrapped in black box to avoid compiler optimizing them out
    let collection_id = FixedBytes::ZERO;
    let value = 12345u128;

    c.bench_function("Create Receipt", |b| {
        b.iter(|| {
            create_and_sign_receipt(
                black_box(&domain_separator),
                black_box(collection_id),
                black_box(value),
                black_box(&wallet),
            )
        })
    });

    let receipt = create_and_sign_receipt(&domain_separator, collection_id, value, &wallet);

    c.bench_function("Validate Receipt", |b| {
        b.iter(|| {
            black_box(&receipt)
                .verify(black_box(&domain_separator), black_box(address))
                .unwrap()
        })
    });

    let mut rav_group = c.benchmark_group("Aggregate batches of varying sizes");

    for log_number_of_receipts in [4u32, 6, 8, 10] {
        let receipts = (0..1u64 << log_number_of_receipts)
            .map(|_| create_and_sign_receipt(&domain_separator, collection_id, value, &wallet))
            .collect::<Vec<_>>();

        rav_group.bench_function(
            &format!("Aggregate 2^{log_number_of_receipts} receipts"),
            |b| {
                b.iter(|| {
                    check_and_aggregate_receipts(
                        black_box(&domain_separator),
                        black_box(&receipts),
                        black_box(None),
                        black_box(&wallet),
                        black_box(&accepted_addresses),
                    )
                    .unwrap()
                })
            },
        );
    }
    rav_group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
