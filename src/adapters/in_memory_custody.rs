//! In-memory asset custody
//!
//! Wallet balances, allowances and protocol holdings for both assets. Pulls
//! need an allowance set with [`InMemoryCustody::approve`], mirroring the
//! approve-then-transfer flow of token custody.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Amount, Asset, ParticipantId};
use crate::error::{DcaeError, Result};
use crate::exchange::AssetCustody;

#[derive(Debug, Default)]
struct Book {
    wallets: HashMap<(Asset, ParticipantId), Amount>,
    allowances: HashMap<(Asset, ParticipantId), Amount>,
    protocol: HashMap<Asset, Amount>,
}

#[derive(Debug, Default)]
pub struct InMemoryCustody {
    book: RwLock<Book>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a wallet out of thin air (faucet)
    pub async fn mint_to(&self, asset: Asset, to: &ParticipantId, amount: Amount) {
        let mut book = self.book.write().await;
        let balance = book.wallets.entry((asset, to.clone())).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Allow the protocol to pull up to `amount` from `owner`
    pub async fn approve(&self, asset: Asset, owner: &ParticipantId, amount: Amount) {
        let mut book = self.book.write().await;
        book.allowances.insert((asset, owner.clone()), amount);
    }

    pub async fn balance_of(&self, asset: Asset, owner: &ParticipantId) -> Amount {
        let book = self.book.read().await;
        book.wallets
            .get(&(asset, owner.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub async fn allowance(&self, asset: Asset, owner: &ParticipantId) -> Amount {
        let book = self.book.read().await;
        book.allowances
            .get(&(asset, owner.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Amount of `asset` held by the protocol
    pub async fn protocol_balance(&self, asset: Asset) -> Amount {
        let book = self.book.read().await;
        book.protocol.get(&asset).copied().unwrap_or(0)
    }

    /// Overwrite protocol holdings, e.g. to back a ledger restored from a snapshot
    pub async fn seed_protocol(&self, asset: Asset, amount: Amount) {
        let mut book = self.book.write().await;
        book.protocol.insert(asset, amount);
    }

    /// Exchange protocol-held funding asset for target asset after a swap
    pub async fn settle_swap(&self, input: Amount, output: Amount) -> Result<()> {
        let mut book = self.book.write().await;
        let funding = book.protocol.entry(Asset::Funding).or_default();
        *funding = funding.checked_sub(input).ok_or_else(|| {
            DcaeError::TransferFailed(format!("protocol holds less than {input} funding"))
        })?;
        let target = book.protocol.entry(Asset::Target).or_default();
        *target = target
            .checked_add(output)
            .ok_or(DcaeError::Overflow("protocol target holdings"))?;
        Ok(())
    }
}

#[async_trait]
impl AssetCustody for InMemoryCustody {
    async fn pull(&self, asset: Asset, from: &ParticipantId, amount: Amount) -> Result<()> {
        let mut book = self.book.write().await;
        let key = (asset, from.clone());

        let allowance = book.allowances.get(&key).copied().unwrap_or(0);
        if allowance < amount {
            return Err(DcaeError::TransferFailed(format!(
                "allowance {allowance} below {amount} {asset} for {from}"
            )));
        }
        let balance = book.wallets.get(&key).copied().unwrap_or(0);
        if balance < amount {
            return Err(DcaeError::TransferFailed(format!(
                "wallet {from} holds {balance} {asset}, needs {amount}"
            )));
        }

        book.allowances.insert(key.clone(), allowance - amount);
        book.wallets.insert(key, balance - amount);
        let held = book.protocol.entry(asset).or_default();
        *held = held
            .checked_add(amount)
            .ok_or(DcaeError::Overflow("protocol holdings"))?;
        debug!(asset = %asset, from = %from, amount = %amount, "Pulled into custody");
        Ok(())
    }

    async fn push(&self, asset: Asset, to: &ParticipantId, amount: Amount) -> Result<()> {
        let mut book = self.book.write().await;
        let held = book.protocol.entry(asset).or_default();
        *held = held.checked_sub(amount).ok_or_else(|| {
            DcaeError::TransferFailed(format!("protocol holds less than {amount} {asset}"))
        })?;
        let wallet = book.wallets.entry((asset, to.clone())).or_default();
        *wallet = wallet
            .checked_add(amount)
            .ok_or(DcaeError::Overflow("wallet balance"))?;
        debug!(asset = %asset, to = %to, amount = %amount, "Pushed from custody");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pull_requires_allowance() {
        let custody = InMemoryCustody::new();
        let alice = ParticipantId::from("alice");
        custody.mint_to(Asset::Funding, &alice, 100).await;

        assert!(custody.pull(Asset::Funding, &alice, 50).await.is_err());

        custody.approve(Asset::Funding, &alice, 60).await;
        custody.pull(Asset::Funding, &alice, 50).await.unwrap();
        assert_eq!(custody.balance_of(Asset::Funding, &alice).await, 50);
        assert_eq!(custody.allowance(Asset::Funding, &alice).await, 10);
        assert_eq!(custody.protocol_balance(Asset::Funding).await, 50);
    }

    #[tokio::test]
    async fn test_pull_rejects_short_wallet() {
        let custody = InMemoryCustody::new();
        let alice = ParticipantId::from("alice");
        custody.mint_to(Asset::Funding, &alice, 10).await;
        custody.approve(Asset::Funding, &alice, 100).await;

        let err = custody.pull(Asset::Funding, &alice, 11).await.unwrap_err();
        assert!(matches!(err, DcaeError::TransferFailed(_)));
        assert_eq!(custody.allowance(Asset::Funding, &alice).await, 100);
    }

    #[tokio::test]
    async fn test_push_and_settle() {
        let custody = InMemoryCustody::new();
        let alice = ParticipantId::from("alice");
        custody.mint_to(Asset::Funding, &alice, 1_000).await;
        custody.approve(Asset::Funding, &alice, 1_000).await;
        custody.pull(Asset::Funding, &alice, 1_000).await.unwrap();

        custody.settle_swap(1_000, 5).await.unwrap();
        assert_eq!(custody.protocol_balance(Asset::Funding).await, 0);
        assert!(custody.push(Asset::Target, &alice, 6).await.is_err());

        custody.push(Asset::Target, &alice, 5).await.unwrap();
        assert_eq!(custody.balance_of(Asset::Target, &alice).await, 5);
        assert!(custody.settle_swap(1, 1).await.is_err());
    }
}
