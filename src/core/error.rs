use thiserror::Error;

use super::types::{AuthorityMessage, AuthorizationResult, DocumentStatus};

/// Errors surfaced by the fiscal document pipeline.
///
/// Controllers never see these as panics: the service turns every variant
/// into a structured [`Outcome`](crate::service::Outcome) value.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FiscalError {
    /// Bad input shape or values. Must be fixed before retrying.
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    /// A line was priced in a different currency than the document.
    #[error("currency mismatch on line {line}: document uses {expected}, line uses {found}")]
    CurrencyMismatch {
        line: usize,
        expected: String,
        found: String,
    },

    /// The sequential could not be reserved within the retry budget.
    #[error("sequence allocation failed after {attempts} attempts: {reason}")]
    AllocationFailed { attempts: u32, reason: String },

    /// Unreadable, expired or wrongly unlocked signing certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Schema assembly or signature self-check fault. Indicates a defect.
    #[error("document build error: {0}")]
    Build(String),

    /// The authority could not be reached within the attempt budget.
    #[error("submission timed out after {attempts} attempts: {reason}")]
    SubmissionTimeout { attempts: u32, reason: String },

    /// The authority rejected the document content.
    #[error("rejected by the authority: {reason}")]
    SubmissionRejected {
        reason: String,
        messages: Vec<AuthorityMessage>,
    },

    /// The access key was already authorized; carries the existing record.
    #[error("access key {access_key} is already authorized")]
    DuplicateSubmission {
        access_key: String,
        existing: Box<AuthorizationResult>,
    },

    /// Requested document or artifact does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Status change not allowed by the document lifecycle.
    #[error("cannot move document from {from:?} to {to:?}: {reason}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
        reason: String,
    },

    /// Persistence failure in a repository or artifact store.
    #[error("storage error: {0}")]
    Store(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FiscalError {
    /// Single validation failure shorthand.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationError::new(field, message)])
    }

    /// Stable machine-readable kind, used in serialized outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::AllocationFailed { .. } => "allocation_failed",
            Self::InvalidCertificate(_) => "invalid_certificate",
            Self::Build(_) => "build_error",
            Self::SubmissionTimeout { .. } => "submission_timeout",
            Self::SubmissionRejected { .. } => "submission_rejected",
            Self::DuplicateSubmission { .. } => "duplicate_submission",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Store(_) => "storage_error",
            Self::Config(_) => "configuration_error",
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single validation error with field path and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "lines[2].quantity").
    pub field: String,
    /// Human-readable error description.
    pub message: String,
    /// Authority rule identifier if applicable.
    pub rule: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "[{}] {}: {}", rule, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

impl ValidationError {
    /// Create a validation error without a rule ID.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: None,
        }
    }

    /// Create a validation error tied to an authority rule.
    pub fn with_rule(
        field: impl Into<String>,
        message: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: Some(rule.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = FiscalError::Validation(vec![
            ValidationError::new("establishment", "must be 3 digits"),
            ValidationError::with_rule("buyer.identification", "bad RUC", "SRI-35"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("establishment: must be 3 digits"));
        assert!(msg.contains("[SRI-35] buyer.identification: bad RUC"));
        assert_eq!(err.kind(), "validation_error");
    }
}
