//! Ledger records and the synchronous rules that mutate them
//!
//! - `state`: participant and batch arenas, reserve and receipt supply
//! - `accounts`: deposits, invest amounts, withdrawals
//! - `scheduler`: batch assignment, eligibility, cycle planning

pub mod accounts;
pub mod scheduler;
pub mod state;

pub use accounts::{DepositOutcome, WithdrawalOutcome};
pub use scheduler::{CyclePlan, PlannedDebit};
pub use state::LedgerState;
