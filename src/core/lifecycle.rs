use chrono::{Datelike, NaiveDate};

use super::error::FiscalError;
use super::types::{DocumentStatus, FiscalDocument};

/// Day of the month following issuance until which an authorized document
/// may still be canceled.
pub const CANCELLATION_DEADLINE_DAY: u32 = 7;

/// Check that `from → to` is an allowed lifecycle edge.
///
/// ```text
/// Draft ──► Issued ──► Authorized ──► Canceled
///             ▲  │
///             │  ▼
///           Rejected
/// ```
pub fn check_transition(from: DocumentStatus, to: DocumentStatus) -> Result<(), FiscalError> {
    use DocumentStatus::*;
    let allowed = matches!(
        (from, to),
        (Draft, Issued)
            | (Issued, Issued)
            | (Issued, Authorized)
            | (Issued, Rejected)
            | (Rejected, Issued)
            | (Authorized, Canceled)
    );
    if allowed {
        Ok(())
    } else {
        Err(FiscalError::InvalidTransition {
            from,
            to,
            reason: match from {
                Authorized => "authorized documents are immutable".into(),
                Canceled => "canceled documents are final".into(),
                _ => "transition not allowed".into(),
            },
        })
    }
}

/// Move `doc` to `to`, enforcing the lifecycle.
pub fn transition(doc: &mut FiscalDocument, to: DocumentStatus) -> Result<(), FiscalError> {
    check_transition(doc.status, to)?;
    tracing::debug!(
        document = %doc.id,
        from = doc.status.as_str(),
        to = to.as_str(),
        "status change"
    );
    doc.status = to;
    Ok(())
}

/// Last day an authorized document issued on `issue_date` can be canceled.
pub fn cancellation_deadline(issue_date: NaiveDate) -> NaiveDate {
    let (year, month) = if issue_date.month() == 12 {
        (issue_date.year() + 1, 1)
    } else {
        (issue_date.year(), issue_date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, CANCELLATION_DEADLINE_DAY).unwrap_or(issue_date)
}

/// Cancel an authorized document if `today` is still inside the window.
pub fn cancel(doc: &mut FiscalDocument, today: NaiveDate) -> Result<(), FiscalError> {
    if doc.status == DocumentStatus::Authorized {
        let deadline = cancellation_deadline(doc.issue_date);
        if today > deadline {
            return Err(FiscalError::InvalidTransition {
                from: doc.status,
                to: DocumentStatus::Canceled,
                reason: format!("cancellation window closed on {deadline}"),
            });
        }
    }
    transition(doc, DocumentStatus::Canceled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn allowed_edges() {
        assert!(check_transition(Draft, Issued).is_ok());
        assert!(check_transition(Issued, Authorized).is_ok());
        assert!(check_transition(Issued, Rejected).is_ok());
        assert!(check_transition(Rejected, Issued).is_ok());
        assert!(check_transition(Authorized, Canceled).is_ok());
    }

    #[test]
    fn authorized_is_terminal_except_cancel() {
        for to in [Draft, Issued, Rejected, Authorized] {
            assert!(check_transition(Authorized, to).is_err());
        }
        assert!(check_transition(Draft, Authorized).is_err());
        assert!(check_transition(Canceled, Issued).is_err());
    }

    #[test]
    fn deadline_is_seventh_of_next_month() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 28).unwrap();
        assert_eq!(
            cancellation_deadline(d),
            NaiveDate::from_ymd_opt(2024, 4, 7).unwrap()
        );
        let dec = NaiveDate::from_ymd_opt(2024, 12, 2).unwrap();
        assert_eq!(
            cancellation_deadline(dec),
            NaiveDate::from_ymd_opt(2025, 1, 7).unwrap()
        );
    }
}
