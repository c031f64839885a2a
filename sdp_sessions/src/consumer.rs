// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consumer-side session machine.
//!
//! Opens a session against an escrow tuple and signs a fresh receipt
//! aggregate voucher every time usage is reported. Every voucher a session
//! produces carries a value aggregate no smaller than its predecessor's and
//! a strictly greater timestamp.

use std::{cmp, sync::Arc};

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{Address, FixedBytes},
    signers::local::PrivateKeySigner,
};
use log::debug;
use sdp_eip712_message::Eip712SignedMessage;
use sdp_vouchers::{ReceiptAggregateVoucher, SignedRav};

use crate::{
    error::SessionError,
    now_ns,
    registry::SessionRegistry,
    session::{CollectionTuple, EndReason, EscrowTuple, Session, SessionId, SessionInner,
        SessionStatus, Usage},
};

/// Result of opening a consumer session.
pub struct ConsumerSessionInit {
    pub session: Arc<Session>,
    pub initial_rav: SignedRav,
}

/// Signs monotonically growing vouchers for the sessions it owns.
///
/// The signing key is fixed at construction and never rotated at runtime.
pub struct ConsumerSessionManager {
    domain_separator: Eip712Domain,
    wallet: PrivateKeySigner,
    registry: Arc<SessionRegistry>,
}

impl ConsumerSessionManager {
    pub fn new(
        domain_separator: Eip712Domain,
        wallet: PrivateKeySigner,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            domain_separator,
            wallet,
            registry,
        }
    }

    /// The address whose signature the provider side must accept.
    pub fn signer_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Opens a session bound to `escrow` and returns it together with its
    /// initial voucher.
    ///
    /// Without an existing voucher, a zero-value one is minted on the zero
    /// collection id. An existing voucher is adopted after its tuple is
    /// checked against `escrow`, and its collection id becomes the
    /// session's.
    pub fn init(
        &self,
        escrow: EscrowTuple,
        existing_rav: Option<SignedRav>,
    ) -> Result<ConsumerSessionInit, SessionError> {
        if escrow.payer.is_zero() || escrow.receiver.is_zero() {
            return Err(SessionError::InvalidArgument {
                message: "escrow tuple carries a zero address".to_owned(),
            });
        }

        let (tuple, initial_rav) = match existing_rav {
            Some(rav) => {
                let message = &rav.message;
                if message.payer != escrow.payer {
                    return Err(SessionError::PayerMismatch {
                        expected: escrow.payer,
                        received: message.payer,
                    });
                }
                if message.serviceProvider != escrow.receiver {
                    return Err(SessionError::ServiceProviderMismatch {
                        expected: escrow.receiver,
                        received: message.serviceProvider,
                    });
                }
                if message.dataService != escrow.data_service {
                    return Err(SessionError::DataServiceMismatch {
                        expected: escrow.data_service,
                        received: message.dataService,
                    });
                }
                (CollectionTuple::from_rav(message), rav)
            }
            None => {
                let tuple = CollectionTuple {
                    collection_id: FixedBytes::ZERO,
                    payer: escrow.payer,
                    service_provider: escrow.receiver,
                    data_service: escrow.data_service,
                };
                let rav = ReceiptAggregateVoucher::new(
                    tuple.collection_id,
                    tuple.payer,
                    tuple.service_provider,
                    tuple.data_service,
                    now_ns()?,
                    0,
                );
                let signed = Eip712SignedMessage::new(&self.domain_separator, rav, &self.wallet)?;
                (tuple, signed)
            }
        };

        let session = self.registry.create(tuple)?;
        session.lock().rav = Some(initial_rav.clone());
        debug!("opened consumer session {}", session.id());

        Ok(ConsumerSessionInit {
            session,
            initial_rav,
        })
    }

    /// Folds `usage` into the session and returns a freshly signed voucher
    /// covering it, along with whether the caller should keep streaming.
    pub fn report_usage(
        &self,
        session_id: &SessionId,
        usage: Usage,
    ) -> Result<(SignedRav, bool), SessionError> {
        let session = self.registry.get(session_id)?;
        let mut inner = session.lock();
        if inner.status != SessionStatus::Active {
            return Err(SessionError::FailedPrecondition {
                message: format!("session {session_id} already ended"),
            });
        }

        // Sign first: a failed advance must leave the counters untouched.
        let signed = self.advance_rav(&mut inner, usage.cost)?;
        inner.usage.accumulate(&usage);

        // The consumer has no escrow view; liveness is the only continue signal.
        Ok((signed, true))
    }

    /// Folds `final_usage` into the session, signs the final voucher and
    /// marks the session ended. Calling this on an ended session returns its
    /// last voucher and totals unchanged.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        final_usage: Usage,
        reason: EndReason,
    ) -> Result<(SignedRav, Usage), SessionError> {
        let session = self.registry.get(session_id)?;
        let mut inner = session.lock();

        if inner.status == SessionStatus::Ended {
            let rav = inner.rav.clone().ok_or_else(|| {
                SessionError::FailedPrecondition {
                    message: format!("session {session_id} ended without a voucher"),
                }
            })?;
            return Ok((rav, inner.usage));
        }

        let signed = self.advance_rav(&mut inner, final_usage.cost)?;
        inner.usage.accumulate(&final_usage);
        inner.status = SessionStatus::Ended;
        inner.end_reason = Some(reason);
        inner.ended_at_ns = Some(now_ns()?);
        debug!("ended consumer session {session_id} ({reason:?})");

        Ok((signed, inner.usage))
    }

    /// Signs the next voucher: prior value plus `cost`, at a timestamp
    /// strictly greater than the prior one even if the wall clock regressed.
    fn advance_rav(
        &self,
        inner: &mut SessionInner,
        cost: u128,
    ) -> Result<SignedRav, SessionError> {
        let (prior_value, prior_ts) = inner
            .rav
            .as_ref()
            .map(|rav| (rav.message.valueAggregate, rav.message.timestampNs))
            .unwrap_or((0, 0));

        let value_aggregate = prior_value
            .checked_add(cost)
            .ok_or(SessionError::AggregateOverflow)?;
        let timestamp_ns = cmp::max(now_ns()?, prior_ts.saturating_add(1));

        let tuple = inner.tuple;
        let rav = ReceiptAggregateVoucher::new(
            tuple.collection_id,
            tuple.payer,
            tuple.service_provider,
            tuple.data_service,
            timestamp_ns,
            value_aggregate,
        );
        let signed = Eip712SignedMessage::new(&self.domain_separator, rav, &self.wallet)?;
        inner.rav = Some(signed.clone());
        Ok(signed)
    }
}
