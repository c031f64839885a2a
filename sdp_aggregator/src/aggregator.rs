// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{Address, FixedBytes},
    signers::local::PrivateKeySigner,
};
use rayon::prelude::*;
use sdp_eip712_message::{Eip712SignedMessage, SignatureBytesExt};
use sdp_vouchers::{AggregationError, ReceiptAggregateVoucher, SignedRav, SignedReceipt};

use crate::error::AggregatorError;

/// Validates a batch of signed receipts against an optional previous RAV and
/// folds them into a new RAV signed with `wallet`.
///
/// Gates run in a fixed order, each before any aggregation: batch non-empty,
/// signature uniqueness under low-S normalization, receipt signers accepted,
/// previous RAV signer accepted, receipt timestamps strictly greater than the
/// previous RAV timestamp, and tuple agreement across receipts and the
/// previous RAV.
pub fn check_and_aggregate_receipts(
    domain_separator: &Eip712Domain,
    receipts: &[SignedReceipt],
    previous_rav: Option<SignedRav>,
    wallet: &PrivateKeySigner,
    accepted_addresses: &HashSet<Address>,
) -> Result<SignedRav, AggregatorError> {
    // Get the tuple from the first receipt, return error if there are no receipts
    let (collection_id, payer, service_provider, data_service) = match receipts.first() {
        Some(receipt) => (
            receipt.message.collection_id,
            receipt.message.payer,
            receipt.message.service_provider,
            receipt.message.data_service,
        ),
        None => return Err(AggregationError::NoReceipts.into()),
    };

    check_signatures_unique(receipts)?;

    // Check that the receipts are signed by an accepted signer address
    receipts.par_iter().try_for_each(|receipt| {
        check_receipt_signer(receipt, domain_separator, accepted_addresses)
    })?;

    // Check that the previous rav is signed by an accepted signer address
    if let Some(previous_rav) = &previous_rav {
        let recovered_address = previous_rav.recover_signer(domain_separator)?;
        if !accepted_addresses.contains(&recovered_address) {
            return Err(AggregatorError::RavSignerMismatch {
                address: recovered_address,
            });
        }
    }

    // Check that the receipts timestamp is greater than the previous rav
    check_receipt_timestamps(receipts, previous_rav.as_ref())?;

    // Check that the receipts all have the same tuple
    check_tuple_uniform(
        receipts,
        collection_id,
        payer,
        service_provider,
        data_service,
    )?;

    // Check that the previous rav carries the same tuple as the receipts
    if let Some(previous_rav) = &previous_rav {
        let prev = &previous_rav.message;
        if prev.collectionId != collection_id {
            return Err(AggregatorError::CollectionMismatch {
                expected: prev.collectionId,
                received: collection_id,
            });
        }
        if prev.payer != payer {
            return Err(AggregatorError::PayerMismatch {
                expected: prev.payer,
                received: payer,
            });
        }
        if prev.serviceProvider != service_provider {
            return Err(AggregatorError::ServiceProviderMismatch {
                expected: prev.serviceProvider,
                received: service_provider,
            });
        }
        if prev.dataService != data_service {
            return Err(AggregatorError::DataServiceMismatch {
                expected: prev.dataService,
                received: data_service,
            });
        }
    }

    // Aggregate the receipts
    let rav = ReceiptAggregateVoucher::aggregate_receipts(
        collection_id,
        payer,
        service_provider,
        data_service,
        receipts,
        previous_rav,
    )?;

    // Sign the rav and return
    Ok(Eip712SignedMessage::new(domain_separator, rav, wallet)?)
}

fn check_receipt_signer(
    receipt: &SignedReceipt,
    domain_separator: &Eip712Domain,
    accepted_addresses: &HashSet<Address>,
) -> Result<(), AggregatorError> {
    let recovered_address = receipt.recover_signer(domain_separator)?;
    if !accepted_addresses.contains(&recovered_address) {
        return Err(AggregatorError::InvalidSigner {
            address: recovered_address,
        });
    }
    Ok(())
}

fn check_tuple_uniform(
    receipts: &[SignedReceipt],
    collection_id: FixedBytes<32>,
    payer: Address,
    service_provider: Address,
    data_service: Address,
) -> Result<(), AggregatorError> {
    for receipt in receipts.iter() {
        let receipt = &receipt.message;
        if receipt.collection_id != collection_id {
            return Err(AggregatorError::CollectionMismatch {
                expected: collection_id,
                received: receipt.collection_id,
            });
        }
        if receipt.payer != payer {
            return Err(AggregatorError::PayerMismatch {
                expected: payer,
                received: receipt.payer,
            });
        }
        if receipt.service_provider != service_provider {
            return Err(AggregatorError::ServiceProviderMismatch {
                expected: service_provider,
                received: receipt.service_provider,
            });
        }
        if receipt.data_service != data_service {
            return Err(AggregatorError::DataServiceMismatch {
                expected: data_service,
                received: receipt.data_service,
            });
        }
    }
    Ok(())
}

fn check_signatures_unique(receipts: &[SignedReceipt]) -> Result<(), AggregatorError> {
    let mut receipt_signatures = HashSet::new();
    for receipt in receipts.iter() {
        let signature = receipt.signature.get_signature_bytes();
        if !receipt_signatures.insert(signature) {
            return Err(AggregatorError::DuplicateSignature(format!(
                "{:?}",
                receipt.signature.get_signature_bytes()
            )));
        }
    }
    Ok(())
}

fn check_receipt_timestamps(
    receipts: &[SignedReceipt],
    previous_rav: Option<&Eip712SignedMessage<ReceiptAggregateVoucher>>,
) -> Result<(), AggregatorError> {
    if let Some(previous_rav) = &previous_rav {
        for receipt in receipts.iter() {
            let receipt = &receipt.message;
            if previous_rav.message.timestampNs >= receipt.timestamp_ns {
                return Err(AggregatorError::InvalidTimestamp {
                    rav_ts: previous_rav.message.timestampNs,
                    receipt_ts: receipt.timestamp_ns,
                });
            }
        }
    }

    Ok(())
}
