use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Amount, Asset, BatchId};

/// Main error type for the DCA ledger
#[derive(Error, Debug)]
pub enum DcaeError {
    // Validation errors
    #[error("Amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    #[error("Nothing to withdraw: {asset} balance is zero")]
    NothingToWithdraw { asset: Asset },

    #[error("Nothing to invest in batch {batch_id}: no member can cover its invest amount")]
    NothingToInvest { batch_id: BatchId },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Unknown batch: {0}")]
    UnknownBatch(BatchId),

    #[error("No receipt claims to redeem")]
    NoClaims,

    #[error("Insufficient receipt balance: available {available}, requested {requested}")]
    InsufficientReceiptBalance { available: Amount, requested: Amount },

    #[error("Validation failed: {0}")]
    Validation(String),

    // Timing errors
    #[error("Interval not elapsed for batch {batch_id}: next execution at {next_eligible_at}")]
    IntervalNotElapsed {
        batch_id: BatchId,
        next_eligible_at: DateTime<Utc>,
    },

    #[error("Claim not mature: held {age_secs}s, minimum {min_age_secs}s")]
    ClaimNotMature { age_secs: i64, min_age_secs: i64 },

    // External adapter errors
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Swap failed: {0}")]
    SwapFailed(String),

    #[error("Asset transfer failed: {0}")]
    TransferFailed(String),

    // Arithmetic errors
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for DcaeError
pub type Result<T> = std::result::Result<T, DcaeError>;

/// Coarse error taxonomy reported at the call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected before any state change (bad input, empty balances)
    Validation,
    /// Rejected because a timer has not run out yet
    Timing,
    /// Oracle, swap venue or custody failed; the whole unit was discarded
    ExternalAdapter,
    /// Checked arithmetic failed
    Arithmetic,
    /// Configuration, IO and serialization problems outside the ledger
    Infrastructure,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Timing => write!(f, "timing"),
            Self::ExternalAdapter => write!(f, "external_adapter"),
            Self::Arithmetic => write!(f, "arithmetic"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

impl DcaeError {
    pub fn category(&self) -> ErrorCategory {
        use DcaeError::*;

        match self {
            BelowMinimum { .. }
            | NothingToWithdraw { .. }
            | NothingToInvest { .. }
            | UnknownParticipant(_)
            | UnknownBatch(_)
            | NoClaims
            | InsufficientReceiptBalance { .. }
            | Validation(_) => ErrorCategory::Validation,
            IntervalNotElapsed { .. } | ClaimNotMature { .. } => ErrorCategory::Timing,
            OracleUnavailable(_) | SwapFailed(_) | TransferFailed(_) => {
                ErrorCategory::ExternalAdapter
            }
            Overflow(_) => ErrorCategory::Arithmetic,
            Config(_) | Json(_) | Io(_) | Internal(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether a keeper may retry the same call later with a chance of success
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::ExternalAdapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            DcaeError::BelowMinimum {
                amount: 1,
                minimum: 2
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            DcaeError::ClaimNotMature {
                age_secs: 10,
                min_age_secs: 20
            }
            .category(),
            ErrorCategory::Timing
        );
        assert_eq!(
            DcaeError::SwapFailed("slippage".into()).category(),
            ErrorCategory::ExternalAdapter
        );
        assert_eq!(
            DcaeError::Overflow("total_input").category(),
            ErrorCategory::Arithmetic
        );
    }

    #[test]
    fn test_only_adapter_errors_are_retryable() {
        assert!(DcaeError::OracleUnavailable("no history".into()).is_retryable());
        assert!(DcaeError::TransferFailed("allowance".into()).is_retryable());
        assert!(!DcaeError::NoClaims.is_retryable());
        assert!(!DcaeError::Overflow("mint").is_retryable());
    }
}
