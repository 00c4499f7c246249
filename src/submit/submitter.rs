use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use super::client::{AuthorityGateway, GatewayError};
use super::soap::{AuthorizationRecord, ReceptionState};
use crate::config::ServiceConfig;
use crate::core::{AttemptStatus, AuthorityMessage, AuthorizationResult, FiscalError, RetryPolicy};

/// Where a submission currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    NotSent,
    Sending,
    Accepted,
    Rejected,
    TimedOut,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotSent => "not_sent",
            Self::Sending => "sending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        })
    }
}

impl SubmissionState {
    /// Move to `next`. Only `NotSent -> Sending -> {Accepted, Rejected,
    /// TimedOut}` is allowed, plus ending straight from `NotSent` when the
    /// key is already authorized or the authority cannot be reached.
    pub fn advance(self, next: Self) -> Result<Self, FiscalError> {
        use SubmissionState::*;
        let allowed = matches!(
            (self, next),
            (NotSent, Sending) | (NotSent | Sending, Accepted | TimedOut) | (Sending, Rejected)
        );
        if !allowed {
            return Err(FiscalError::Build(format!(
                "submission cannot move from {self} to {next}"
            )));
        }
        tracing::debug!(from = %self, to = %next, "submission state");
        Ok(next)
    }

    /// End the run in `next`, returning the status its attempt is logged with.
    pub fn finish(self, next: Self) -> Result<AttemptStatus, FiscalError> {
        match self.advance(next)? {
            Self::Accepted => Ok(AttemptStatus::Accepted),
            Self::Rejected => Ok(AttemptStatus::Rejected),
            Self::TimedOut => Ok(AttemptStatus::Pending),
            other => Err(FiscalError::Build(format!("{other} is not a final submission state"))),
        }
    }
}

/// Drives one signed document through reception and authorization.
pub struct Submitter {
    gateway: Arc<dyn AuthorityGateway>,
    retry: RetryPolicy,
    polls: RetryPolicy,
}

impl Submitter {
    /// `retry` governs network retries of each call, `polls` the
    /// authorization polling schedule.
    pub fn new(gateway: Arc<dyn AuthorityGateway>, retry: RetryPolicy, polls: RetryPolicy) -> Self {
        Self {
            gateway,
            retry,
            polls,
        }
    }

    pub fn from_config(gateway: Arc<dyn AuthorityGateway>, config: &ServiceConfig) -> Self {
        let polls = RetryPolicy {
            max_attempts: config.max_polls.max(1),
            base_delay: config.poll_interval(),
            multiplier: config.submission.multiplier,
            max_delay: config.submission.max_delay,
        };
        Self::new(gateway, config.submission, polls)
    }

    /// Submit `signed_xml` and wait for its authorization.
    ///
    /// Every attempt's outcome is appended to `log`. Returns the accepted
    /// result. An access key the authority already authorized is not sent
    /// again and yields [`FiscalError::DuplicateSubmission`] carrying the
    /// existing record.
    #[tracing::instrument(skip_all, fields(access_key = %access_key))]
    pub async fn submit(
        &self,
        signed_xml: &str,
        access_key: &str,
        log: &mut Vec<AuthorizationResult>,
    ) -> Result<AuthorizationResult, FiscalError> {
        let mut state = SubmissionState::NotSent;

        let existing = self
            .with_retry("authorization lookup", || self.gateway.authorization(access_key))
            .await
            .map_err(|(attempts, e)| self.timed_out(state, log, attempts, e))?;
        if let Some(record) = existing
            .decisive()
            .filter(|r| r.status == AttemptStatus::Accepted)
        {
            let result = to_result(record, state.finish(SubmissionState::Accepted)?);
            log.push(result.clone());
            tracing::info!("access key already authorized, not resending");
            return Err(FiscalError::DuplicateSubmission {
                access_key: access_key.to_string(),
                existing: Box::new(result),
            });
        }

        state = state.advance(SubmissionState::Sending)?;
        let reception = self
            .with_retry("reception", || self.gateway.send(signed_xml))
            .await
            .map_err(|(attempts, e)| self.timed_out(state, log, attempts, e))?;
        match reception.state {
            ReceptionState::Received => {}
            ReceptionState::Returned if reception.already_received() => {
                tracing::debug!("document already received, polling authorization");
            }
            ReceptionState::Returned => {
                let result = AuthorizationResult {
                    status: state.finish(SubmissionState::Rejected)?,
                    authorization_number: None,
                    authorized_at: None,
                    messages: reception.messages,
                    raw_response: Some(reception.raw),
                    attempted_at: Utc::now(),
                };
                return Err(rejected(log, result));
            }
        }

        for poll in 1..=self.polls.max_attempts {
            if poll > 1 {
                tokio::time::sleep(self.polls.delay_for(poll - 1)).await;
            }
            let response = self
                .with_retry("authorization", || self.gateway.authorization(access_key))
                .await
                .map_err(|(attempts, e)| self.timed_out(state, log, attempts, e))?;
            let Some(record) = response.decisive() else {
                tracing::debug!(poll, "authorization not available yet");
                continue;
            };
            match record.status {
                AttemptStatus::Accepted => {
                    let result = to_result(record, state.finish(SubmissionState::Accepted)?);
                    log.push(result.clone());
                    return Ok(result);
                }
                AttemptStatus::Rejected => {
                    let result = to_result(record, state.finish(SubmissionState::Rejected)?);
                    return Err(rejected(log, result));
                }
                AttemptStatus::Pending => {
                    tracing::debug!(poll, "authorization in process");
                }
            }
        }

        log.push(AuthorizationResult {
            status: state.finish(SubmissionState::TimedOut)?,
            authorization_number: None,
            authorized_at: None,
            messages: Vec::new(),
            raw_response: None,
            attempted_at: Utc::now(),
        });
        Err(FiscalError::SubmissionTimeout {
            attempts: self.polls.max_attempts,
            reason: "authorization still in process".into(),
        })
    }

    /// Run `call`, retrying transient failures. On failure returns the
    /// number of attempts made with the last error.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, (u32, GatewayError)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(what, attempt, ?delay, error = %e, "retrying authority call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    fn timed_out(
        &self,
        state: SubmissionState,
        log: &mut Vec<AuthorizationResult>,
        attempts: u32,
        error: GatewayError,
    ) -> FiscalError {
        tracing::warn!(attempts, error = %error, "authority unreachable");
        let status = match state.finish(SubmissionState::TimedOut) {
            Ok(status) => status,
            Err(e) => return e,
        };
        log.push(AuthorizationResult {
            status,
            authorization_number: None,
            authorized_at: None,
            messages: vec![AuthorityMessage {
                identifier: String::new(),
                message: error.to_string(),
                additional_info: None,
                kind: "ERROR".into(),
            }],
            raw_response: None,
            attempted_at: Utc::now(),
        });
        FiscalError::SubmissionTimeout {
            attempts,
            reason: error.to_string(),
        }
    }
}

fn rejected(log: &mut Vec<AuthorizationResult>, result: AuthorizationResult) -> FiscalError {
    let reason = result.reason();
    tracing::info!(%reason, "document rejected by the authority");
    let messages = result.messages.clone();
    log.push(result);
    FiscalError::SubmissionRejected { reason, messages }
}

fn to_result(record: &AuthorizationRecord, status: AttemptStatus) -> AuthorizationResult {
    AuthorizationResult {
        status,
        authorization_number: record.number.clone(),
        authorized_at: record.authorized_at,
        messages: record.messages.clone(),
        raw_response: Some(record.raw.clone()),
        attempted_at: Utc::now(),
    }
}
