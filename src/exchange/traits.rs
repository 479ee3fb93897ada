use async_trait::async_trait;

use crate::domain::{Amount, Asset, ParticipantId};
use crate::error::Result;

/// Manipulation-resistant price source.
///
/// Given an input amount of the funding asset, returns the expected output
/// amount of the target asset. Failures surface as `OracleUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn quote(&self, input: Amount) -> Result<Amount>;
}

/// External liquidity venue converting funding asset into target asset.
///
/// Must fail (and move nothing) when it cannot deliver at least `min_output`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn swap(&self, input: Amount, min_output: Amount) -> Result<Amount>;
}

/// Fungible balance custody for the two assets.
///
/// `pull` debits a participant wallet into protocol holdings and requires a
/// prior allowance; `push` pays out of protocol holdings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetCustody: Send + Sync {
    async fn pull(&self, asset: Asset, from: &ParticipantId, amount: Amount) -> Result<()>;

    async fn push(&self, asset: Asset, to: &ParticipantId, amount: Amount) -> Result<()>;
}
