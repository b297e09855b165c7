//! Source verification against a block explorer.
//!
//! Explorers index new contracts asynchronously, so the first submissions after a
//! deployment commonly fail with "not indexed yet". [`VerificationAttempts`] is the
//! bounded sequence of submissions made until the explorer gives a terminal answer,
//! the attempt budget is spent, or the phase times out.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{CancelSignal, ConfirmedDeployment, NetworkProfile, SourceMetadata};

/// What the explorer receives.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    pub constructor_args_encoded: Bytes,
    pub source: SourceMetadata,
}

/// Classification of an explorer answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerStatus {
    Verified,
    AlreadyVerified,
    /// The explorer has not seen the contract's code yet.
    NotYetIndexed,
    /// Accepted but not processed yet, or a transient service problem.
    Pending,
    /// Malformed source, bytecode mismatch, bad credentials...
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerResponse {
    pub status: ExplorerStatus,
    pub message: String,
}

/// The explorer verification service.
pub trait ExplorerClient: Send + Sync {
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = anyhow::Result<ExplorerResponse>> + Send;
}

/// Outcome of one verification attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    AlreadyVerified,
    NotYetIndexed,
    PermanentReject,
}

impl AttemptOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Success | AttemptOutcome::AlreadyVerified | AttemptOutcome::PermanentReject
        )
    }
}

impl From<ExplorerStatus> for AttemptOutcome {
    fn from(status: ExplorerStatus) -> Self {
        match status {
            ExplorerStatus::Verified => AttemptOutcome::Success,
            ExplorerStatus::AlreadyVerified => AttemptOutcome::AlreadyVerified,
            ExplorerStatus::NotYetIndexed => AttemptOutcome::NotYetIndexed,
            ExplorerStatus::Pending => AttemptOutcome::Pending,
            ExplorerStatus::Rejected => AttemptOutcome::PermanentReject,
        }
    }
}

/// One submission to the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub target: ConfirmedDeployment,
    pub constructor_args: Bytes,
    /// Starts at 1.
    pub attempt_number: usize,
    pub outcome: AttemptOutcome,
    pub message: String,
}

/// Final verification result reported for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationStatus {
    /// Local network or no explorer credentials.
    Skipped,
    Success,
    AlreadyVerified,
    /// The explorer never gave a terminal answer within the budget.
    Timeout,
    /// The explorer refused the source; it must be fixed before retrying.
    Rejected(String),
    Cancelled,
}

impl VerificationStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationStatus::Success | VerificationStatus::AlreadyVerified)
    }

    /// Verification ran and was refused.
    pub fn is_failure(&self) -> bool {
        matches!(self, VerificationStatus::Rejected(_))
    }
}

/// Retry budget for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of submissions, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on every retry.
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Bound on the whole verification phase.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delays between consecutive attempts; yields `max_attempts - 1` values.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .build()
    }
}

/// Decides whether a deployment gets verified and starts the attempt sequence.
pub struct VerificationRequester<'a, E> {
    explorer: Option<&'a E>,
    policy: RetryPolicy,
}

impl<'a, E: ExplorerClient> VerificationRequester<'a, E> {
    pub fn new(explorer: Option<&'a E>, policy: RetryPolicy) -> Self {
        Self { explorer, policy }
    }

    /// Start verifying `confirmed`, or return `None` when verification does not apply.
    pub fn verify(
        &self,
        confirmed: &ConfirmedDeployment,
        constructor_args: &Bytes,
        source: &SourceMetadata,
        profile: &NetworkProfile,
    ) -> Option<VerificationAttempts<'a, E>> {
        if !profile.verification_enabled() {
            tracing::debug!(
                network = %profile.network_id,
                trust = %profile.trust_level,
                "Verification skipped"
            );
            return None;
        }

        let Some(explorer) = self.explorer else {
            tracing::debug!(network = %profile.network_id, "No explorer client, verification skipped");
            return None;
        };

        Some(VerificationAttempts {
            explorer,
            request: VerificationRequest {
                address: confirmed.contract_address,
                constructor_args_encoded: constructor_args.clone(),
                source: source.clone(),
            },
            target: confirmed.clone(),
            backoff: self.policy.backoff(),
            max_attempts: self.policy.max_attempts,
            timeout: self.policy.timeout,
            deadline: None,
            attempts: 0,
            last: None,
            state: SequenceState::Running,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceState {
    Running,
    Finished,
    TimedOut,
    Cancelled,
}

/// Lazy, finite sequence of verification attempts.
pub struct VerificationAttempts<'a, E> {
    explorer: &'a E,
    request: VerificationRequest,
    target: ConfirmedDeployment,
    backoff: ExponentialBackoff,
    max_attempts: usize,
    timeout: Duration,
    deadline: Option<Instant>,
    attempts: usize,
    last: Option<VerificationAttempt>,
    state: SequenceState,
}

impl<E: ExplorerClient> VerificationAttempts<'_, E> {
    /// Make the next attempt, or return `None` once the sequence is over.
    ///
    /// Between attempts this sleeps for the next backoff delay. Cancellation during the
    /// sleep or the request ends the sequence.
    pub async fn next_attempt(&mut self, cancel: &CancelSignal) -> Option<VerificationAttempt> {
        if self.state != SequenceState::Running {
            return None;
        }
        if self.attempts >= self.max_attempts {
            self.state = SequenceState::Finished;
            return None;
        }

        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.timeout);

        if self.attempts > 0 {
            let Some(delay) = self.backoff.next() else {
                self.state = SequenceState::Finished;
                return None;
            };

            if Instant::now() + delay >= deadline {
                self.state = SequenceState::TimedOut;
                return None;
            }

            tracing::debug!(
                address = %self.request.address,
                delay_ms = delay.as_millis() as u64,
                "Waiting before next verification attempt"
            );
            if cancel.sleep(delay).await.is_err() {
                self.state = SequenceState::Cancelled;
                return None;
            }
        }

        self.attempts += 1;
        let attempt_number = self.attempts;

        let response = tokio::select! {
            result = tokio::time::timeout_at(deadline, self.explorer.submit(&self.request)) => Some(result),
            _ = cancel.cancelled() => None,
        };
        let Some(response) = response else {
            self.state = SequenceState::Cancelled;
            return None;
        };

        let (outcome, message) = match response {
            Err(_) => {
                self.state = SequenceState::TimedOut;
                return None;
            }
            Ok(Ok(response)) => (AttemptOutcome::from(response.status), response.message),
            Ok(Err(e)) => (AttemptOutcome::Pending, format!("{:#}", e)),
        };

        tracing::info!(
            address = %self.request.address,
            attempt = attempt_number,
            outcome = %outcome,
            message = %message,
            "Verification attempt"
        );

        if outcome.is_terminal() {
            self.state = SequenceState::Finished;
        }

        let attempt = VerificationAttempt {
            target: self.target.clone(),
            constructor_args: self.request.constructor_args_encoded.clone(),
            attempt_number,
            outcome,
            message,
        };
        self.last = Some(attempt.clone());
        Some(attempt)
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Final status of the sequence, as far as it has run.
    pub fn status(&self) -> VerificationStatus {
        if self.state == SequenceState::Cancelled {
            return VerificationStatus::Cancelled;
        }

        match self.last.as_ref().map(|a| (a.outcome, a.message.as_str())) {
            Some((AttemptOutcome::Success, _)) => VerificationStatus::Success,
            Some((AttemptOutcome::AlreadyVerified, _)) => VerificationStatus::AlreadyVerified,
            Some((AttemptOutcome::PermanentReject, message)) => {
                VerificationStatus::Rejected(message.to_string())
            }
            _ => VerificationStatus::Timeout,
        }
    }

    /// Drive the sequence to its end and return the final status.
    pub async fn run(mut self, cancel: &CancelSignal) -> (VerificationStatus, usize) {
        while self.next_attempt(cancel).await.is_some() {}

        let status = self.status();
        match &status {
            VerificationStatus::Rejected(reason) => tracing::error!(
                address = %self.request.address,
                reason = %reason,
                "Explorer rejected the source, fix it before verifying again"
            ),
            VerificationStatus::Timeout => tracing::warn!(
                address = %self.request.address,
                attempts = self.attempts,
                "Verification gave up; the deployment is unaffected"
            ),
            other => tracing::info!(address = %self.request.address, status = %other, "Verification finished"),
        }
        (status, self.attempts)
    }
}
