//! Write staging shared by the store adapters.
//!
//! A [`StagedUnit`] holds the backend's exclusive writer guard for its whole lifetime and
//! buffers every write. Reads see staged rows first, then the backend. `commit` hands the
//! buffer to the backend in one call; dropping the unit discards it.

use crate::domain::payout::{Payout, PayoutItem};
use crate::domain::ports::UnitOfWork;
use crate::domain::transaction::Transaction;
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Changes buffered by one unit of work.
#[derive(Debug, Default)]
pub struct Staged {
    /// `None` marks a deleted wallet.
    pub wallets: HashMap<Uuid, Option<Wallet>>,
    pub transactions: HashMap<Uuid, Transaction>,
    pub payouts: HashMap<Uuid, Payout>,
    pub payout_items: Vec<PayoutItem>,
}

/// Committed state as seen by the holder of the writer guard.
pub trait Snapshot: Send {
    fn wallet(&self, id: Uuid) -> Result<Option<Wallet>>;
    fn wallet_id_by_owner(&self, owner: Option<Uuid>, kind: &WalletKind) -> Result<Option<Uuid>>;
    fn wallet_has_transactions(&self, wallet_id: Uuid) -> Result<bool>;
    fn transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    fn transaction_id_by_ref(&self, reference: &str) -> Result<Option<Uuid>>;
    fn payout(&self, id: Uuid) -> Result<Option<Payout>>;
    fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>>;
    /// Makes every staged change durable at once.
    fn apply(&mut self, staged: Staged) -> Result<()>;
}

pub struct StagedUnit<S: Snapshot> {
    base: S,
    staged: Staged,
}

impl<S: Snapshot> StagedUnit<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            staged: Staged::default(),
        }
    }

    fn current_wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        match self.staged.wallets.get(&id) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.wallet(id),
        }
    }

    fn find_wallet(&self, owner: Option<Uuid>, kind: &WalletKind) -> Result<Option<Wallet>> {
        let staged = self
            .staged
            .wallets
            .values()
            .flatten()
            .find(|w| w.user_id == owner && &w.kind == kind);
        if let Some(wallet) = staged {
            return Ok(Some(wallet.clone()));
        }
        match self.base.wallet_id_by_owner(owner, kind)? {
            Some(id) => self.current_wallet(id),
            None => Ok(None),
        }
    }

    fn current_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        match self.staged.transactions.get(&id) {
            Some(tx) => Ok(Some(tx.clone())),
            None => self.base.transaction(id),
        }
    }

    fn ensure_unused_ref(&self, id: Uuid, reference: &str) -> Result<()> {
        let staged_dup = self
            .staged
            .transactions
            .values()
            .any(|other| other.id != id && other.external_ref.as_deref() == Some(reference));
        let committed_dup = self
            .base
            .transaction_id_by_ref(reference)?
            .is_some_and(|other| other != id);
        if staged_dup || committed_dup {
            return Err(LedgerError::Conflict(format!(
                "external reference {reference} is already recorded"
            )));
        }
        Ok(())
    }

    fn current_payout(&self, id: Uuid) -> Result<Option<Payout>> {
        match self.staged.payouts.get(&id) {
            Some(payout) => Ok(Some(payout.clone())),
            None => self.base.payout(id),
        }
    }
}

#[async_trait]
impl<S: Snapshot + 'static> UnitOfWork for StagedUnit<S> {
    async fn wallet(&mut self, id: Uuid) -> Result<Option<Wallet>> {
        self.current_wallet(id)
    }

    async fn wallet_by_owner(
        &mut self,
        user_id: Uuid,
        kind: &WalletKind,
    ) -> Result<Option<Wallet>> {
        self.find_wallet(Some(user_id), kind)
    }

    async fn platform_wallet(&mut self, kind: &WalletKind) -> Result<Option<Wallet>> {
        self.find_wallet(None, kind)
    }

    async fn insert_wallet(&mut self, wallet: Wallet) -> Result<()> {
        if self.current_wallet(wallet.id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }
        if self.find_wallet(wallet.user_id, &wallet.kind)?.is_some() {
            return Err(LedgerError::Conflict(match wallet.user_id {
                Some(user) => format!("user {user} already has a {} wallet", wallet.kind),
                None => format!("platform wallet {} already exists", wallet.kind),
            }));
        }
        self.staged.wallets.insert(wallet.id, Some(wallet));
        Ok(())
    }

    async fn update_wallet(&mut self, wallet: Wallet) -> Result<()> {
        if self.current_wallet(wallet.id)?.is_none() {
            return Err(LedgerError::not_found("wallet", wallet.id));
        }
        self.staged.wallets.insert(wallet.id, Some(wallet));
        Ok(())
    }

    async fn delete_wallet(&mut self, id: Uuid) -> Result<()> {
        if self.current_wallet(id)?.is_none() {
            return Err(LedgerError::not_found("wallet", id));
        }
        self.staged.wallets.insert(id, None);
        Ok(())
    }

    async fn wallet_has_transactions(&mut self, wallet_id: Uuid) -> Result<bool> {
        let staged = self
            .staged
            .transactions
            .values()
            .any(|tx| tx.wallet_id == Some(wallet_id));
        Ok(staged || self.base.wallet_has_transactions(wallet_id)?)
    }

    async fn transaction(&mut self, id: Uuid) -> Result<Option<Transaction>> {
        self.current_transaction(id)
    }

    async fn insert_transaction(&mut self, tx: Transaction) -> Result<()> {
        if self.current_transaction(tx.id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        if let Some(reference) = tx.external_ref.as_deref() {
            self.ensure_unused_ref(tx.id, reference)?;
        }
        self.staged.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn update_transaction(&mut self, tx: Transaction) -> Result<()> {
        let existing = self
            .current_transaction(tx.id)?
            .ok_or_else(|| LedgerError::not_found("transaction", tx.id))?;
        match (existing.external_ref.as_deref(), tx.external_ref.as_deref()) {
            (old, new) if old == new => {}
            // a reference may be assigned once, e.g. when the gateway answers
            (None, Some(reference)) => self.ensure_unused_ref(tx.id, reference)?,
            _ => {
                return Err(LedgerError::Validation(format!(
                    "external reference of transaction {} is immutable",
                    tx.id
                )));
            }
        }
        self.staged.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn payout(&mut self, id: Uuid) -> Result<Option<Payout>> {
        self.current_payout(id)
    }

    async fn insert_payout(&mut self, payout: Payout) -> Result<()> {
        if self.current_payout(payout.id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "payout {} already exists",
                payout.id
            )));
        }
        self.staged.payouts.insert(payout.id, payout);
        Ok(())
    }

    async fn update_payout(&mut self, payout: Payout) -> Result<()> {
        if self.current_payout(payout.id)?.is_none() {
            return Err(LedgerError::not_found("payout", payout.id));
        }
        self.staged.payouts.insert(payout.id, payout);
        Ok(())
    }

    async fn payout_items(&mut self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        let mut items = self.base.payout_items(payout_id)?;
        items.extend(
            self.staged
                .payout_items
                .iter()
                .filter(|item| item.payout_id == payout_id)
                .cloned(),
        );
        Ok(items)
    }

    async fn insert_payout_item(&mut self, item: PayoutItem) -> Result<()> {
        self.staged.payout_items.push(item);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let StagedUnit { mut base, staged } = *self;
        base.apply(staged)
    }
}
