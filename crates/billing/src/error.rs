//! Billing error taxonomy
//!
//! Every failure mode of the engine maps onto one of these variants; the API
//! crate translates them to HTTP statuses. Processor failures carry the
//! classification the processor returned so a caller can tell a decline from
//! a timeout.

use thiserror::Error;

/// Classification of a payment processor failure.
///
/// A timeout is a failure outcome, not an unknown state: the idempotency key
/// makes a later retry with the same key safe even if the original request
/// actually succeeded on the processor side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorFailure {
    /// The processor rejected the charge (bad card, insufficient funds, ...).
    Declined { code: String, message: String },
    /// The processor did not answer within the bounded timeout.
    Timeout,
    /// Transport-level failure before a response was received.
    Network(String),
    /// The processor answered with an unexpected status or body.
    Api(String),
}

impl ProcessorFailure {
    /// Short classification tag recorded on the failed PaymentRecord.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorFailure::Declined { .. } => "declined",
            ProcessorFailure::Timeout => "timeout",
            ProcessorFailure::Network(_) => "network",
            ProcessorFailure::Api(_) => "api",
        }
    }
}

impl std::fmt::Display for ProcessorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorFailure::Declined { code, message } => {
                write!(f, "declined ({code}): {message}")
            }
            ProcessorFailure::Timeout => write!(f, "processor timeout"),
            ProcessorFailure::Network(msg) => write!(f, "network error: {msg}"),
            ProcessorFailure::Api(msg) => write!(f, "processor api error: {msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed request fields. Not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller lacks the required capability.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Unknown tenant, subscription, plan, invoice or estimate.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state transition, e.g. converting an already-converted estimate.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Processor failure. Already recorded as a failed PaymentRecord by the
    /// time it surfaces; not auto-retried by this component.
    #[error("processor error: {0}")]
    Processor(ProcessorFailure),

    /// Missing processor credentials. The operation is aborted before any
    /// external call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Ledger store failure.
    #[error("database error: {0}")]
    Database(String),

    /// Webhook signature did not verify against the shared key.
    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
