// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Provider-side session machine.
//!
//! Gates admission to a streaming session, tracks delivered usage, solicits
//! voucher updates from the consumer, decides Continue/Stop from the escrow
//! headroom, and submits the final voucher for on-chain collection.

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use alloy::{dyn_abi::Eip712Domain, primitives::Address};
use anyhow::anyhow;
use log::{debug, info, warn};
use sdp_vouchers::{SignedRav, WithValueAndTimestamp};

use crate::{
    adapters::{EscrowQuery, RavCollector},
    error::SessionError,
    now_ns,
    registry::SessionRegistry,
    session::{CollectionTuple, EndReason, SessionId, SessionInner, SessionStatus, Usage},
};

/// Static configuration of a provider machine, injected at construction.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// The service provider every admitted voucher must name.
    pub service_provider: Address,
    /// When set, the data service every admitted voucher must name.
    pub data_service: Option<Address>,
    /// The collector contract escrow balances are scoped to.
    pub collector: Address,
    /// Share of collected value diverted to the data service, in parts per million.
    pub data_service_cut_ppm: u32,
    /// Slack allowed between uncovered usage and escrow headroom before the
    /// continuation policy says stop.
    pub escrow_tolerance: u128,
    /// Deadline for a single escrow query attempt.
    pub escrow_query_deadline: Duration,
    /// How many times an escrow query is attempted before giving up.
    pub escrow_query_attempts: u32,
    /// Pause between escrow query attempts.
    pub escrow_query_backoff: Duration,
}

impl ProviderConfig {
    pub fn new(service_provider: Address, collector: Address) -> Self {
        Self {
            service_provider,
            data_service: None,
            collector,
            data_service_cut_ppm: 0,
            escrow_tolerance: 0,
            escrow_query_deadline: Duration::from_secs(5),
            escrow_query_attempts: 3,
            escrow_query_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_data_service(mut self, data_service: Address) -> Self {
        self.data_service = Some(data_service);
        self
    }

    pub fn with_data_service_cut_ppm(mut self, data_service_cut_ppm: u32) -> Self {
        self.data_service_cut_ppm = data_service_cut_ppm;
        self
    }

    pub fn with_escrow_tolerance(mut self, escrow_tolerance: u128) -> Self {
        self.escrow_tolerance = escrow_tolerance;
        self
    }
}

/// Why a payment was turned away at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    SignerNotAuthorized { signer: Address },
    ServiceProviderMismatch { expected: Address, received: Address },
    DataServiceMismatch { expected: Address, received: Address },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignerNotAuthorized { .. } => f.write_str("signer not authorized"),
            Self::ServiceProviderMismatch { .. } => f.write_str("service provider mismatch"),
            Self::DataServiceMismatch { .. } => f.write_str("data service mismatch"),
        }
    }
}

/// Outcome of [`ProviderSessionManager::validate_payment`]. A rejection is a
/// normal reply, not an error.
#[derive(Debug)]
pub enum PaymentDecision {
    Accepted {
        session_id: SessionId,
        available_balance: Option<u128>,
    },
    Rejected {
        reason: RejectionReason,
    },
}

/// Per-admission overrides supplied by the provider process.
#[derive(Debug, Clone)]
pub struct ServiceParams {
    /// Overrides the configured data service expectation for this session.
    pub data_service: Option<Address>,
    /// Whether to look up the escrow balance at admission.
    pub query_escrow: bool,
}

impl Default for ServiceParams {
    fn default() -> Self {
        Self {
            data_service: None,
            query_escrow: true,
        }
    }
}

/// Why the continuation policy said stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    InsufficientEscrow,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientEscrow => f.write_str("insufficient escrow"),
        }
    }
}

/// Advisory outcome of a usage report. A `should_continue` of false signals
/// the caller; it does not stop the session.
#[derive(Debug, Clone, Copy)]
pub struct UsageDecision {
    pub should_continue: bool,
    pub stop_reason: Option<StopReason>,
    /// Whether a new voucher has landed since the previous report.
    pub rav_updated: bool,
}

/// Request for an updated voucher, for the gateway to relay to the consumer.
#[derive(Debug)]
pub struct RavRequest {
    /// The voucher currently backing the session, if any.
    pub previous_rav: Option<SignedRav>,
    /// Prior value aggregate plus all cost not yet covered by a voucher.
    pub expected_value: u128,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatusReport {
    pub active: bool,
    pub accumulated_value: u128,
    pub escrow_balance: Option<u128>,
    /// None when no balance has been observed.
    pub funds_sufficient: Option<bool>,
    /// Headroom divided by the average cost per block, when both are known.
    pub estimated_blocks_remaining: Option<u64>,
}

/// Reply of [`ProviderSessionManager::end_session`].
#[derive(Debug)]
pub struct ProviderSessionClosed {
    pub final_rav: Option<SignedRav>,
    pub total_usage: Usage,
    pub total_value: u128,
    /// Tokens collected on-chain, or the failure that the caller may retry.
    /// None when there was nothing to collect or the session was already
    /// ended.
    pub collection: Option<Result<u128, SessionError>>,
}

/// Validates incoming vouchers and meters delivery for the sessions it owns.
///
/// Generic over the on-chain context `E`; each operation bounds `E` by the
/// capabilities it actually needs. The accepted signers set is fixed at
/// construction.
pub struct ProviderSessionManager<E> {
    context: E,
    domain_separator: Eip712Domain,
    accepted_signers: HashSet<Address>,
    config: ProviderConfig,
    registry: Arc<SessionRegistry>,
}

impl<E> ProviderSessionManager<E> {
    pub fn new(
        domain_separator: Eip712Domain,
        context: E,
        accepted_signers: HashSet<Address>,
        config: ProviderConfig,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            context,
            domain_separator,
            accepted_signers,
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Folds `usage` into the session counters and evaluates the
    /// continuation policy.
    pub fn report_usage(
        &self,
        session_id: &SessionId,
        usage: Usage,
    ) -> Result<UsageDecision, SessionError> {
        let session = self.registry.get(session_id)?;
        let mut inner = session.lock();
        if inner.status != SessionStatus::Active {
            return Err(SessionError::FailedPrecondition {
                message: format!("session {session_id} already ended"),
            });
        }

        inner.usage.accumulate(&usage);
        inner.uncommitted_value = inner
            .uncommitted_value
            .checked_add(usage.cost)
            .unwrap_or_else(|| {
                warn!("uncommitted value saturated for session {session_id}");
                u128::MAX
            });

        let rav_updated = std::mem::take(&mut inner.rav_updated);
        let (should_continue, stop_reason) = self.continuation(&inner);

        Ok(UsageDecision {
            should_continue,
            stop_reason,
            rav_updated,
        })
    }

    /// Produces the request the consumer must honor with an updated voucher.
    pub fn request_rav(&self, session_id: &SessionId) -> Result<RavRequest, SessionError> {
        let session = self.registry.get(session_id)?;
        let inner = session.lock();
        if inner.status != SessionStatus::Active {
            return Err(SessionError::FailedPrecondition {
                message: format!("session {session_id} already ended"),
            });
        }

        let prior_value = inner.rav.as_ref().map(|rav| rav.value()).unwrap_or(0);
        let expected_value = prior_value
            .checked_add(inner.uncommitted_value)
            .ok_or(SessionError::AggregateOverflow)?;

        Ok(RavRequest {
            previous_rav: inner.rav.clone(),
            expected_value,
        })
    }

    /// Validates an updated voucher against the session and, on success,
    /// makes it the session's current voucher.
    ///
    /// `value_tolerance` bounds how far past the prior value the new
    /// aggregate may reach, absorbing usage reported while the voucher was
    /// in flight.
    pub fn receive_signed_rav(
        &self,
        session_id: &SessionId,
        rav: SignedRav,
        value_tolerance: u128,
    ) -> Result<(), SessionError> {
        let recovered_address = rav
            .recover_signer(&self.domain_separator)
            .map_err(|err| SessionError::InvalidArgument {
                message: format!("malformed RAV signature: {err}"),
            })?;
        if !self.accepted_signers.contains(&recovered_address) {
            return Err(SessionError::RavSignerMismatch {
                address: recovered_address,
            });
        }

        let session = self.registry.get(session_id)?;
        let mut inner = session.lock();
        if inner.status != SessionStatus::Active {
            return Err(SessionError::FailedPrecondition {
                message: format!("session {session_id} already ended"),
            });
        }

        inner.tuple.ensure_matches_rav(&rav.message)?;

        let (prior_value, prior_ts) = inner
            .rav
            .as_ref()
            .map(|prior| (prior.value(), prior.timestamp_ns()))
            .unwrap_or((0, 0));

        if rav.message.timestampNs <= prior_ts {
            return Err(SessionError::InvalidTimestamp {
                received_timestamp: rav.message.timestampNs,
                timestamp_min: prior_ts,
            });
        }
        let value = rav.message.valueAggregate;
        if value < prior_value {
            return Err(SessionError::InvalidArgument {
                message: format!(
                    "value aggregate regressed: {value} below prior {prior_value}"
                ),
            });
        }
        if value > prior_value.saturating_add(value_tolerance) {
            return Err(SessionError::InvalidArgument {
                message: format!(
                    "value aggregate {value} exceeds prior {prior_value} by more than the \
                     tolerated {value_tolerance}"
                ),
            });
        }

        inner.uncommitted_value = inner.uncommitted_value.saturating_sub(value - prior_value);
        inner.rav = Some(rav);
        inner.rav_updated = true;
        debug!("session {session_id} voucher advanced to value {value}");

        Ok(())
    }

    /// Point-in-time view of the session, from cached state only.
    pub fn session_status(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionStatusReport, SessionError> {
        let session = self.registry.get(session_id)?;
        let inner = session.lock();

        let committed = inner
            .rav
            .as_ref()
            .map(|rav| rav.message.valueAggregate)
            .unwrap_or(0);
        let headroom = inner
            .escrow_balance
            .map(|balance| balance.saturating_sub(committed));

        let estimated_blocks_remaining = headroom.and_then(|headroom| {
            if inner.usage.blocks_processed == 0 || inner.usage.cost == 0 {
                return None;
            }
            let cost_per_block = inner.usage.cost / inner.usage.blocks_processed as u128;
            if cost_per_block == 0 {
                return None;
            }
            u64::try_from(headroom / cost_per_block).ok()
        });

        let funds_sufficient = inner
            .escrow_balance
            .map(|_| self.continuation(&inner).0);

        Ok(SessionStatusReport {
            active: inner.status == SessionStatus::Active,
            accumulated_value: inner.usage.cost,
            escrow_balance: inner.escrow_balance,
            funds_sufficient,
            estimated_blocks_remaining,
        })
    }

    /// Continue while escrow headroom plus the configured tolerance covers
    /// the value not yet committed to a voucher. An unobserved balance never
    /// stops the stream: the balance is advisory.
    fn continuation(&self, inner: &SessionInner) -> (bool, Option<StopReason>) {
        let Some(balance) = inner.escrow_balance else {
            return (true, None);
        };
        let committed = inner.rav.as_ref().map(|rav| rav.value()).unwrap_or(0);
        let headroom = balance.saturating_sub(committed);
        if headroom.saturating_add(self.config.escrow_tolerance) >= inner.uncommitted_value {
            (true, None)
        } else {
            (false, Some(StopReason::InsufficientEscrow))
        }
    }
}

impl<E: EscrowQuery> ProviderSessionManager<E> {
    /// Runs admission on an incoming voucher: signer in the accepted set,
    /// service provider and data service as configured. On acceptance a
    /// session is created around the voucher, seeded with the escrow balance
    /// when one could be read.
    pub async fn validate_payment(
        &self,
        rav: SignedRav,
        params: Option<ServiceParams>,
    ) -> Result<PaymentDecision, SessionError> {
        let params = params.unwrap_or_default();

        let recovered_address = rav
            .recover_signer(&self.domain_separator)
            .map_err(|err| SessionError::InvalidArgument {
                message: format!("malformed RAV signature: {err}"),
            })?;
        if !self.accepted_signers.contains(&recovered_address) {
            info!("rejecting payment: signer {recovered_address} not authorized");
            return Ok(PaymentDecision::Rejected {
                reason: RejectionReason::SignerNotAuthorized {
                    signer: recovered_address,
                },
            });
        }

        if rav.message.serviceProvider != self.config.service_provider {
            return Ok(PaymentDecision::Rejected {
                reason: RejectionReason::ServiceProviderMismatch {
                    expected: self.config.service_provider,
                    received: rav.message.serviceProvider,
                },
            });
        }
        if let Some(expected) = params.data_service.or(self.config.data_service) {
            if rav.message.dataService != expected {
                return Ok(PaymentDecision::Rejected {
                    reason: RejectionReason::DataServiceMismatch {
                        expected,
                        received: rav.message.dataService,
                    },
                });
            }
        }

        let available_balance = if params.query_escrow {
            match self.query_escrow_balance(rav.message.payer).await {
                Ok(balance) => Some(balance),
                Err(err) => {
                    warn!("admitting session without an escrow balance: {err}");
                    None
                }
            }
        } else {
            None
        };

        let session = self.registry.create(CollectionTuple::from_rav(&rav.message))?;
        {
            let mut inner = session.lock();
            inner.rav = Some(rav);
            inner.escrow_balance = available_balance;
        }
        info!(
            "admitted session {} for signer {recovered_address}",
            session.id()
        );

        Ok(PaymentDecision::Accepted {
            session_id: session.id().clone(),
            available_balance,
        })
    }

    /// Re-reads the escrow balance for the session's payer and caches it.
    ///
    /// Unlike admission, a failure here is surfaced: the caller asked for
    /// the balance specifically.
    pub async fn refresh_escrow(&self, session_id: &SessionId) -> Result<u128, SessionError> {
        let session = self.registry.get(session_id)?;
        let payer = session.lock().tuple.payer;

        let balance = self.query_escrow_balance(payer).await?;
        session.lock().escrow_balance = Some(balance);
        Ok(balance)
    }

    /// Bounded retry around the escrow adapter. Each attempt runs under the
    /// configured deadline; an expired deadline on the last attempt surfaces
    /// as `Cancelled`, any other exhaustion as `EscrowUnavailable`.
    async fn query_escrow_balance(&self, payer: Address) -> Result<u128, SessionError> {
        let attempts = self.config.escrow_query_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.escrow_query_backoff).await;
            }
            let query = self.context.escrow_balance(
                payer,
                self.config.collector,
                self.config.service_provider,
            );
            match tokio::time::timeout(self.config.escrow_query_deadline, query).await {
                Ok(Ok(balance)) => return Ok(balance),
                Ok(Err(err)) => {
                    warn!("escrow query attempt {attempt} failed: {err}");
                    last_error = Some(SessionError::EscrowUnavailable {
                        source: anyhow::Error::new(err),
                    });
                }
                Err(_) => {
                    warn!("escrow query attempt {attempt} hit its deadline");
                    last_error = Some(SessionError::Cancelled {
                        operation: "escrow query",
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SessionError::EscrowUnavailable {
            source: anyhow!("escrow query made no attempts"),
        }))
    }
}

impl<E: RavCollector> ProviderSessionManager<E> {
    /// Folds the final usage in, marks the session ended and submits its
    /// voucher for on-chain collection.
    ///
    /// Ending is idempotent; a repeated call returns the recorded state and
    /// does not submit again. A collection failure is carried in the reply
    /// and leaves the session ended.
    pub async fn end_session(
        &self,
        session_id: &SessionId,
        final_usage: Usage,
        reason: EndReason,
    ) -> Result<ProviderSessionClosed, SessionError> {
        let session = self.registry.get(session_id)?;

        let (final_rav, total_usage, already_ended) = {
            let mut inner = session.lock();
            if inner.status == SessionStatus::Ended {
                (inner.rav.clone(), inner.usage, true)
            } else {
                inner.usage.accumulate(&final_usage);
                inner.uncommitted_value =
                    inner.uncommitted_value.saturating_add(final_usage.cost);
                inner.status = SessionStatus::Ended;
                inner.end_reason = Some(reason);
                inner.ended_at_ns = Some(now_ns()?);
                (inner.rav.clone(), inner.usage, false)
            }
        };

        let total_value = final_rav
            .as_ref()
            .map(|rav| rav.message.valueAggregate)
            .unwrap_or(0);

        if already_ended {
            return Ok(ProviderSessionClosed {
                final_rav,
                total_usage,
                total_value,
                collection: None,
            });
        }

        // Collection runs outside the session lock; the session stays ended
        // whatever happens on-chain.
        let collection = match &final_rav {
            Some(rav) if rav.message.valueAggregate > 0 => {
                let outcome = self
                    .context
                    .collect(
                        rav,
                        self.config.data_service_cut_ppm,
                        self.config.service_provider,
                    )
                    .await
                    .map_err(|err| SessionError::AdapterError {
                        operation: "collect",
                        source: anyhow::Error::new(err),
                    });
                if let Err(err) = &outcome {
                    warn!("collection failed for session {session_id}: {err}");
                }
                Some(outcome)
            }
            _ => None,
        };

        info!("ended session {session_id} ({reason:?}), collected value {total_value}");

        Ok(ProviderSessionClosed {
            final_rav,
            total_usage,
            total_value,
            collection,
        })
    }
}
