use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Amount;
use crate::error::{DcaeError, Result};

/// A holder's receipt balance collapsed into one bucket.
///
/// All outstanding units share a single age: the amount-weighted average of
/// the mint times of everything that flowed into the bucket. Minting more
/// units (or receiving a transfer) pulls the average towards the newer time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHolding {
    pub balance: Amount,
    /// Weighted-average mint time, unix seconds (meaningless when balance is zero)
    pub weighted_mint_secs: i64,
}

impl ReceiptHolding {
    pub fn is_empty(&self) -> bool {
        self.balance == 0
    }

    /// Add `amount` units minted at `minted_at`
    pub fn mint(&mut self, amount: Amount, minted_at: DateTime<Utc>) -> Result<()> {
        self.absorb(amount, minted_at.timestamp())
    }

    /// Add `amount` units carrying an existing weighted mint time
    pub fn absorb(&mut self, amount: Amount, mint_secs: i64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        if self.balance == 0 {
            self.balance = amount;
            self.weighted_mint_secs = mint_secs;
            return Ok(());
        }

        let new_balance = self
            .balance
            .checked_add(amount)
            .ok_or(DcaeError::Overflow("receipt balance"))?;

        // old + (new - old) * amount / new_balance, floor towards the older time
        let delta = i128::from(mint_secs) - i128::from(self.weighted_mint_secs);
        let amount_i = i128::try_from(amount).map_err(|_| DcaeError::Overflow("receipt weight"))?;
        let balance_i =
            i128::try_from(new_balance).map_err(|_| DcaeError::Overflow("receipt weight"))?;
        let shift = delta
            .checked_mul(amount_i)
            .ok_or(DcaeError::Overflow("receipt weight"))?
            .div_euclid(balance_i);
        let weighted = i128::from(self.weighted_mint_secs) + shift;

        self.weighted_mint_secs =
            i64::try_from(weighted).map_err(|_| DcaeError::Overflow("receipt weight"))?;
        self.balance = new_balance;
        Ok(())
    }

    /// Remove `amount` units; the remaining units keep their age
    pub fn take(&mut self, amount: Amount) -> Result<()> {
        if amount > self.balance {
            return Err(DcaeError::InsufficientReceiptBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        if self.balance == 0 {
            self.weighted_mint_secs = 0;
        }
        Ok(())
    }

    pub fn weighted_mint_time(&self) -> Option<DateTime<Utc>> {
        if self.balance == 0 {
            return None;
        }
        Utc.timestamp_opt(self.weighted_mint_secs, 0).single()
    }

    /// Seconds since the weighted mint time
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().saturating_sub(self.weighted_mint_secs)
    }
}

/// Lifecycle stage of a holder's receipt bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStage {
    /// No outstanding units (never minted, or burned)
    Empty,
    /// Younger than the minimum age, burn disallowed
    Maturing,
    /// Between minimum and maximum age, ratio rising
    Redeemable,
    /// At or past the maximum age, full ratio
    Matured,
}

impl ClaimStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStage::Empty => "EMPTY",
            ClaimStage::Maturing => "MATURING",
            ClaimStage::Redeemable => "REDEEMABLE",
            ClaimStage::Matured => "MATURED",
        }
    }

    pub fn can_burn(&self) -> bool {
        matches!(self, ClaimStage::Redeemable | ClaimStage::Matured)
    }
}

impl fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
