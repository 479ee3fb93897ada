//! Time-weighted average price oracle
//!
//! Keeps a bounded history of spot observations and quotes against the
//! average price over a trailing window, each observation weighted by how
//! long it was the prevailing price. A single manipulated print therefore
//! moves the quote only in proportion to how long it stood.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{amount_to_decimal, decimal_to_amount};
use crate::clock::Clock;
use crate::domain::Amount;
use crate::error::{DcaeError, Result};
use crate::exchange::PriceOracle;

const MAX_OBSERVATIONS: usize = 1_024;

#[derive(Debug, Clone)]
pub struct TwapConfig {
    /// Trailing averaging window
    pub window_secs: i64,
    /// Observations required inside the window
    pub min_observations: usize,
    /// Shortest covered span the average may be taken over
    pub min_window_secs: i64,
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self {
            window_secs: 1_800,
            min_observations: 2,
            min_window_secs: 300,
        }
    }
}

/// Target-asset units per funding-asset unit, observed at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

pub struct TwapOracle {
    config: TwapConfig,
    clock: Arc<dyn Clock>,
    /// Oldest first
    history: RwLock<VecDeque<Observation>>,
}

impl TwapOracle {
    pub fn new(config: TwapConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: RwLock::new(VecDeque::with_capacity(MAX_OBSERVATIONS)),
        }
    }

    /// Record a spot price at the current clock time
    pub async fn record(&self, price: Decimal) {
        self.record_at(price, self.clock.now()).await;
    }

    /// Record a price observed at `observed_at`; late arrivals are slotted in order
    pub async fn record_at(&self, price: Decimal, observed_at: DateTime<Utc>) {
        let mut history = self.history.write().await;
        let position = history.partition_point(|o| o.observed_at <= observed_at);
        history.insert(position, Observation { price, observed_at });
        while history.len() > MAX_OBSERVATIONS {
            history.pop_front();
        }
    }

    pub async fn observation_count(&self) -> usize {
        self.history.read().await.len()
    }

    /// Time-weighted average over the trailing window
    pub async fn twap(&self) -> Result<Decimal> {
        let now = self.clock.now();
        let history = self.history.read().await;
        compute_twap(&history, now, &self.config)
    }
}

fn compute_twap(
    history: &VecDeque<Observation>,
    now: DateTime<Utc>,
    config: &TwapConfig,
) -> Result<Decimal> {
    let window_start = Duration::try_seconds(config.window_secs)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let in_window = history
        .iter()
        .filter(|o| o.observed_at >= window_start && o.observed_at <= now)
        .count();
    if in_window < config.min_observations {
        return Err(DcaeError::OracleUnavailable(format!(
            "{in_window} observations in window, need {}",
            config.min_observations
        )));
    }

    let mut weighted = Decimal::ZERO;
    let mut covered: i64 = 0;
    for (i, obs) in history.iter().enumerate() {
        if obs.observed_at > now {
            break;
        }
        let start = obs.observed_at.max(window_start);
        let end = history
            .get(i + 1)
            .map(|next| next.observed_at.min(now))
            .unwrap_or(now);
        let secs = end.signed_duration_since(start).num_seconds();
        if secs <= 0 {
            continue;
        }
        weighted += obs.price * Decimal::from(secs);
        covered += secs;
    }

    if covered < config.min_window_secs.max(1) {
        return Err(DcaeError::OracleUnavailable(format!(
            "observations cover {covered}s, need {}s",
            config.min_window_secs
        )));
    }
    Ok(weighted / Decimal::from(covered))
}

#[async_trait]
impl PriceOracle for TwapOracle {
    async fn quote(&self, input: Amount) -> Result<Amount> {
        let price = self.twap().await?;
        let expected = amount_to_decimal(input)?
            .checked_mul(price)
            .ok_or(DcaeError::Overflow("oracle quote"))?;
        let output = decimal_to_amount(expected)?;
        debug!(input = %input, twap = %price, output = %output, "Oracle quote");
        Ok(output)
    }
}
