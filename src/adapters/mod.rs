//! Reference adapters for simulation and tests

pub mod in_memory_custody;
pub mod simulated_swap;
pub mod twap_oracle;

pub use in_memory_custody::InMemoryCustody;
pub use simulated_swap::SimulatedSwapExecutor;
pub use twap_oracle::{Observation, TwapConfig, TwapOracle};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::domain::Amount;
use crate::error::{DcaeError, Result};

pub(crate) fn amount_to_decimal(amount: Amount) -> Result<Decimal> {
    Decimal::from_u128(amount).ok_or(DcaeError::Overflow("amount exceeds decimal range"))
}

/// Floor a non-negative decimal into an amount
pub(crate) fn decimal_to_amount(value: Decimal) -> Result<Amount> {
    value
        .floor()
        .to_u128()
        .ok_or(DcaeError::Overflow("decimal to amount"))
}
