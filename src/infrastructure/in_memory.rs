use super::staging::{Snapshot, Staged, StagedUnit};
use crate::domain::payout::{Payout, PayoutFilter, PayoutItem};
use crate::domain::ports::{LedgerStore, TransactionTotals, UnitOfWorkBox};
use crate::domain::transaction::{Transaction, TransactionFilter};
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

/// Committed rows plus the indexes backing the uniqueness rules.
#[derive(Debug, Default)]
pub struct Tables {
    wallets: HashMap<Uuid, Wallet>,
    wallet_owners: HashMap<(Option<Uuid>, WalletKind), Uuid>,
    transactions: HashMap<Uuid, Transaction>,
    external_refs: HashMap<String, Uuid>,
    payouts: HashMap<Uuid, Payout>,
    payout_items: HashMap<Uuid, Vec<PayoutItem>>,
}

impl Snapshot for OwnedRwLockWriteGuard<Tables> {
    fn wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.wallets.get(&id).cloned())
    }

    fn wallet_id_by_owner(&self, owner: Option<Uuid>, kind: &WalletKind) -> Result<Option<Uuid>> {
        Ok(self.wallet_owners.get(&(owner, kind.clone())).copied())
    }

    fn wallet_has_transactions(&self, wallet_id: Uuid) -> Result<bool> {
        Ok(self
            .transactions
            .values()
            .any(|tx| tx.wallet_id == Some(wallet_id)))
    }

    fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(&id).cloned())
    }

    fn transaction_id_by_ref(&self, reference: &str) -> Result<Option<Uuid>> {
        Ok(self.external_refs.get(reference).copied())
    }

    fn payout(&self, id: Uuid) -> Result<Option<Payout>> {
        Ok(self.payouts.get(&id).cloned())
    }

    fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        Ok(self.payout_items.get(&payout_id).cloned().unwrap_or_default())
    }

    fn apply(&mut self, staged: Staged) -> Result<()> {
        for (id, wallet) in staged.wallets {
            match wallet {
                Some(wallet) => {
                    self.wallet_owners
                        .insert((wallet.user_id, wallet.kind.clone()), id);
                    self.wallets.insert(id, wallet);
                }
                None => {
                    if let Some(old) = self.wallets.remove(&id) {
                        let key = (old.user_id, old.kind);
                        if self.wallet_owners.get(&key) == Some(&id) {
                            self.wallet_owners.remove(&key);
                        }
                    }
                }
            }
        }
        for (id, tx) in staged.transactions {
            if let Some(reference) = &tx.external_ref {
                self.external_refs.insert(reference.clone(), id);
            }
            self.transactions.insert(id, tx);
        }
        self.payouts.extend(staged.payouts);
        for item in staged.payout_items {
            self.payout_items.entry(item.payout_id).or_default().push(item);
        }
        Ok(())
    }
}

/// A thread-safe in-memory ledger store.
///
/// Uses `Arc<RwLock<Tables>>`: a unit of work holds the write guard until it commits or is
/// dropped, so units are fully serialized. Reads share the lock.
/// Ideal for testing or small deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let guard = Arc::clone(&self.tables).write_owned().await;
        Ok(Box::new(StagedUnit::new(guard)))
    }

    async fn wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.get(&id).cloned())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let tables = self.tables.read().await;
        let mut wallets: Vec<Wallet> = tables.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| (w.created_at, w.id));
        Ok(wallets)
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn transaction_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .external_refs
            .get(reference)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matching.sort_by_key(|tx| (tx.created_at, tx.id));
        Ok(matching)
    }

    async fn transaction_totals(&self, filter: &TransactionFilter) -> Result<TransactionTotals> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .fold(TransactionTotals::default(), |mut totals, tx| {
                totals.count += 1;
                totals.amount += tx.amount.value();
                totals
            }))
    }

    async fn payout(&self, id: Uuid) -> Result<Option<Payout>> {
        let tables = self.tables.read().await;
        Ok(tables.payouts.get(&id).cloned())
    }

    async fn payouts(&self, filter: &PayoutFilter) -> Result<Vec<Payout>> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Payout> = tables
            .payouts
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by_key(|p| (p.scheduled_for.unwrap_or(p.created_at), p.id));
        Ok(matching)
    }

    async fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        let tables = self.tables.read().await;
        Ok(tables.payout_items.get(&payout_id).cloned().unwrap_or_default())
    }
}
