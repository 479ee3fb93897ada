//! Unit of work for atomic ledger updates
//!
//! Every public operation stages its effects on a private copy of the ledger
//! and only replaces the live state on `commit`. Dropping the unit without
//! committing discards everything, including effects written before an
//! adapter call.

use tracing::{debug, warn};

use crate::ledger::LedgerState;

/// Transaction scope identifier for tracking and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionScope {
    Deposit,
    SetInvestAmount,
    Withdrawal,
    BatchExecution,
    RewardBurn,
    ReceiptTransfer,
    ReserveFunding,
}

impl std::fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::SetInvestAmount => write!(f, "set_invest_amount"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::BatchExecution => write!(f, "batch_execution"),
            Self::RewardBurn => write!(f, "reward_burn"),
            Self::ReceiptTransfer => write!(f, "receipt_transfer"),
            Self::ReserveFunding => write!(f, "reserve_funding"),
        }
    }
}

/// Staged ledger changes with automatic rollback on drop
pub struct UnitOfWork<'a> {
    live: &'a mut LedgerState,
    staged: LedgerState,
    scope: TransactionScope,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(live: &'a mut LedgerState, scope: TransactionScope) -> Self {
        let staged = live.clone();
        debug!("Started unit of work for scope: {}", scope);
        Self {
            live,
            staged,
            scope,
            committed: false,
        }
    }

    pub fn state(&self) -> &LedgerState {
        &self.staged
    }

    pub fn state_mut(&mut self) -> &mut LedgerState {
        &mut self.staged
    }

    /// Publish the staged state
    pub fn commit(mut self) {
        std::mem::swap(self.live, &mut self.staged);
        self.committed = true;
        debug!("Committed unit of work for scope: {}", self.scope);
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(
                "Unit of work for scope {} was dropped without commit - rolling back",
                self.scope
            );
        }
    }
}
