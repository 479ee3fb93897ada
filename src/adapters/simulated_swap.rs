//! Simulated liquidity venue
//!
//! Fills at a settable price minus a venue fee. When attached to an
//! [`InMemoryCustody`], a successful fill also converts the protocol's funding
//! holdings into target holdings so later payouts can settle.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{amount_to_decimal, decimal_to_amount, InMemoryCustody};
use crate::domain::{Amount, BPS_DENOMINATOR};
use crate::error::{DcaeError, Result};
use crate::exchange::SwapExecutor;

pub struct SimulatedSwapExecutor {
    /// Target-asset units per funding-asset unit
    price: RwLock<Decimal>,
    fee_bps: u32,
    custody: Option<Arc<InMemoryCustody>>,
    /// Upcoming swaps that fail outright (venue outage)
    pending_failures: AtomicU32,
}

impl SimulatedSwapExecutor {
    pub fn new(price: Decimal, fee_bps: u32) -> Self {
        Self {
            price: RwLock::new(price),
            fee_bps: fee_bps.min(BPS_DENOMINATOR),
            custody: None,
            pending_failures: AtomicU32::new(0),
        }
    }

    pub fn with_custody(mut self, custody: Arc<InMemoryCustody>) -> Self {
        self.custody = Some(custody);
        self
    }

    pub async fn set_price(&self, price: Decimal) {
        *self.price.write().await = price;
    }

    pub async fn price(&self) -> Decimal {
        *self.price.read().await
    }

    /// Make the next `count` swaps fail
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Output the venue would deliver for `input` at the current price
    pub async fn output_for(&self, input: Amount) -> Result<Amount> {
        let price = self.price().await;
        let fee = Decimal::from(self.fee_bps) / Decimal::from(BPS_DENOMINATOR);
        let gross = amount_to_decimal(input)?
            .checked_mul(price)
            .ok_or(DcaeError::Overflow("swap output"))?;
        decimal_to_amount(gross * (Decimal::ONE - fee))
    }
}

#[async_trait]
impl SwapExecutor for SimulatedSwapExecutor {
    async fn swap(&self, input: Amount, min_output: Amount) -> Result<Amount> {
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            warn!(input = %input, "Simulated venue outage");
            return Err(DcaeError::SwapFailed("venue unavailable".into()));
        }

        let output = self.output_for(input).await?;
        if output < min_output {
            return Err(DcaeError::SwapFailed(format!(
                "insufficient output: {output} < {min_output}"
            )));
        }
        if let Some(custody) = &self.custody {
            custody.settle_swap(input, output).await?;
        }
        debug!(input = %input, output = %output, "Simulated swap filled");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_fill_applies_fee() {
        let venue = SimulatedSwapExecutor::new(dec!(0.5), 30);
        // 1000 * 0.5 * 0.997
        assert_eq!(venue.swap(1_000, 0).await.unwrap(), 498);
    }

    #[tokio::test]
    async fn test_min_output_enforced() {
        let venue = SimulatedSwapExecutor::new(dec!(0.5), 0);
        assert!(matches!(
            venue.swap(1_000, 501).await,
            Err(DcaeError::SwapFailed(_))
        ));
        assert_eq!(venue.swap(1_000, 500).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let venue = SimulatedSwapExecutor::new(dec!(1), 0);
        venue.fail_next(1);
        assert!(venue.swap(10, 0).await.is_err());
        assert_eq!(venue.swap(10, 0).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_price_moves() {
        let venue = SimulatedSwapExecutor::new(dec!(1), 0);
        venue.set_price(dec!(2)).await;
        assert_eq!(venue.output_for(10).await.unwrap(), 20);
    }
}
