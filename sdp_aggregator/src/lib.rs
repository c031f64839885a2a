// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # SDP receipt aggregator
//!
//! Folds a batch of signed receipts, plus an optional previous receipt
//! aggregate voucher, into a new voucher signed by the aggregator key.
//! Every batch passes a strict validation pipeline before any value is
//! aggregated; each gate fails with its own error kind.

mod aggregator;
mod error;

pub use aggregator::check_and_aggregate_receipts;
pub use error::AggregatorError;
