use crate::domain::money::Balance;
use crate::domain::ports::{SharedStore, UnitOfWork};
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Per-entity balances.
///
/// Balance changes only happen through [`WalletStore::apply_delta`], inside a unit of work the
/// caller owns, so that a balance change and the status change that caused it commit together.
#[derive(Clone)]
pub struct WalletStore {
    store: SharedStore,
}

impl WalletStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", wallet_id))
    }

    pub async fn get_balance(&self, wallet_id: Uuid) -> Result<Balance> {
        Ok(self.get(wallet_id).await?.balance)
    }

    /// Adds `delta` (which may be negative) to a wallet's balance inside `uow`.
    ///
    /// Never clamps: a change that would leave the balance below zero fails with
    /// `InsufficientFunds` and nothing is staged.
    pub async fn apply_delta(
        &self,
        uow: &mut dyn UnitOfWork,
        wallet_id: Uuid,
        delta: Decimal,
    ) -> Result<Wallet> {
        let mut wallet = uow
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", wallet_id))?;
        wallet.apply_delta(delta)?;
        uow.update_wallet(wallet.clone()).await?;
        tracing::debug!(wallet_id = %wallet_id, %delta, balance = %wallet.balance, "wallet balance staged");
        Ok(wallet)
    }

    /// Returns the platform wallet of `kind`, creating it on first use.
    ///
    /// Two callers racing on first use both try to insert; the loser gets `Conflict` from the
    /// store's (owner, kind) uniqueness rule and re-reads the winner's row.
    pub async fn get_or_create_singleton(&self, kind: WalletKind, currency: &str) -> Result<Wallet> {
        if !kind.is_platform() {
            return Err(LedgerError::Validation(format!(
                "{kind} is not a platform wallet kind"
            )));
        }

        let mut uow = self.store.begin().await?;
        if let Some(existing) = uow.platform_wallet(&kind).await? {
            return Ok(existing);
        }

        let wallet = Wallet::platform(kind.clone(), currency);
        let created = match uow.insert_wallet(wallet.clone()).await {
            Ok(()) => uow.commit().await,
            Err(e) => {
                drop(uow);
                Err(e)
            }
        };

        match created {
            Ok(()) => {
                tracing::info!(wallet_id = %wallet.id, %kind, "platform wallet created");
                Ok(wallet)
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(%kind, "platform wallet created concurrently, re-reading");
                let mut uow = self.store.begin().await?;
                uow.platform_wallet(&kind)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("platform wallet", &kind))
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a wallet for a user. A user holds at most one wallet per kind.
    pub async fn open_wallet(
        &self,
        user_id: Uuid,
        kind: WalletKind,
        currency: &str,
    ) -> Result<Wallet> {
        if kind.is_platform() {
            return Err(LedgerError::Validation(format!(
                "{kind} wallets belong to the platform, not to a user"
            )));
        }
        let wallet = Wallet::new(Some(user_id), kind, currency);
        let mut uow = self.store.begin().await?;
        uow.insert_wallet(wallet.clone()).await?;
        uow.commit().await?;
        tracing::info!(wallet_id = %wallet.id, user_id = %user_id, kind = %wallet.kind, "wallet opened");
        Ok(wallet)
    }

    pub async fn find_wallet(&self, user_id: Uuid, kind: &WalletKind) -> Result<Option<Wallet>> {
        let mut uow = self.store.begin().await?;
        uow.wallet_by_owner(user_id, kind).await
    }

    /// Deletes a wallet that no transaction references.
    pub async fn delete_wallet(&self, wallet_id: Uuid) -> Result<()> {
        let mut uow = self.store.begin().await?;
        if uow.wallet(wallet_id).await?.is_none() {
            return Err(LedgerError::not_found("wallet", wallet_id));
        }
        if uow.wallet_has_transactions(wallet_id).await? {
            return Err(LedgerError::Conflict(format!(
                "wallet {wallet_id} is referenced by transactions"
            )));
        }
        uow.delete_wallet(wallet_id).await?;
        uow.commit().await?;
        tracing::info!(wallet_id = %wallet_id, "wallet deleted");
        Ok(())
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        self.store.wallets().await
    }

    pub(crate) fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }
}
