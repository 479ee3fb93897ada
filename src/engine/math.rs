use alloy_primitives::U256;

use crate::domain::{Amount, BPS_DENOMINATOR};
use crate::error::{DcaeError, Result};

/// `floor(value * numerator / denominator)` with a 256-bit intermediate.
///
/// Fails only when the quotient itself does not fit in an `Amount`.
pub fn mul_div_floor(
    value: Amount,
    numerator: Amount,
    denominator: Amount,
    what: &'static str,
) -> Result<Amount> {
    if denominator == 0 {
        return Err(DcaeError::Internal(format!("zero denominator in {what}")));
    }
    let wide = U256::from(value) * U256::from(numerator) / U256::from(denominator);
    Amount::try_from(wide).map_err(|_| DcaeError::Overflow(what))
}

/// `floor(value * bps / 10_000)`
pub fn apply_bps(value: Amount, bps: u32, what: &'static str) -> Result<Amount> {
    mul_div_floor(
        value,
        Amount::from(bps),
        Amount::from(BPS_DENOMINATOR),
        what,
    )
}
