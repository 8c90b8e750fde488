use super::staging::{Snapshot, Staged, StagedUnit};
use crate::domain::payout::{Payout, PayoutFilter, PayoutItem};
use crate::domain::ports::{LedgerStore, TransactionTotals, UnitOfWorkBox};
use crate::domain::transaction::{Transaction, TransactionFilter};
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Column Family for wallet rows.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for transaction rows.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for payout rows.
pub const CF_PAYOUTS: &str = "payouts";
/// Column Family for payout items, keyed by payout id followed by item id.
pub const CF_PAYOUT_ITEMS: &str = "payout_items";
/// Unique index: owner + wallet kind -> wallet id.
pub const CF_WALLET_OWNERS: &str = "wallet_owners";
/// Unique index: external reference -> transaction id.
pub const CF_EXTERNAL_REFS: &str = "external_refs";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_PAYOUTS,
    CF_PAYOUT_ITEMS,
    CF_WALLET_OWNERS,
    CF_EXTERNAL_REFS,
];

/// A persistent ledger store using RocksDB.
///
/// Each table and unique index lives in its own Column Family. Units of work are serialized
/// by a writer mutex and committed through a single `WriteBatch`, so a commit lands entirely
/// or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }
}

fn handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        LedgerError::Storage(Box::new(std::io::Error::other(format!(
            "{name} column family not found"
        ))))
    })
}

fn get_json<T: DeserializeOwned>(db: &DB, cf: &str, key: &[u8]) -> Result<Option<T>> {
    match db.get_cf(handle(db, cf)?, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn get_id(db: &DB, cf: &str, key: &[u8]) -> Result<Option<Uuid>> {
    match db.get_cf(handle(db, cf)?, key)? {
        Some(bytes) => Uuid::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LedgerError::Storage(Box::new(e))),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(db: &DB, cf: &str) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    for item in db.iterator_cf(handle(db, cf)?, IteratorMode::Start) {
        let (_key, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}

fn scan_prefix<T: DeserializeOwned>(db: &DB, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    let iter = db.iterator_cf(
        handle(db, cf)?,
        IteratorMode::From(prefix, Direction::Forward),
    );
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}

fn owner_key(owner: Option<Uuid>, kind: &WalletKind) -> Vec<u8> {
    let owner = owner.map_or_else(|| "platform".to_string(), |id| id.to_string());
    format!("{owner}|{kind}").into_bytes()
}

fn item_key(item: &PayoutItem) -> Vec<u8> {
    let mut key = item.payout_id.as_bytes().to_vec();
    key.extend_from_slice(item.id.as_bytes());
    key
}

fn put_json<T: Serialize>(batch: &mut WriteBatch, cf: &ColumnFamily, key: &[u8], row: &T) -> Result<()> {
    batch.put_cf(cf, key, serde_json::to_vec(row)?);
    Ok(())
}

/// Writer-side view of the database, held by one unit of work at a time.
pub struct RocksWriter {
    db: Arc<DB>,
    _guard: OwnedMutexGuard<()>,
}

impl Snapshot for RocksWriter {
    fn wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        get_json(&self.db, CF_WALLETS, id.as_bytes())
    }

    fn wallet_id_by_owner(&self, owner: Option<Uuid>, kind: &WalletKind) -> Result<Option<Uuid>> {
        get_id(&self.db, CF_WALLET_OWNERS, &owner_key(owner, kind))
    }

    fn wallet_has_transactions(&self, wallet_id: Uuid) -> Result<bool> {
        let transactions: Vec<Transaction> = scan_json(&self.db, CF_TRANSACTIONS)?;
        Ok(transactions.iter().any(|tx| tx.wallet_id == Some(wallet_id)))
    }

    fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        get_json(&self.db, CF_TRANSACTIONS, id.as_bytes())
    }

    fn transaction_id_by_ref(&self, reference: &str) -> Result<Option<Uuid>> {
        get_id(&self.db, CF_EXTERNAL_REFS, reference.as_bytes())
    }

    fn payout(&self, id: Uuid) -> Result<Option<Payout>> {
        get_json(&self.db, CF_PAYOUTS, id.as_bytes())
    }

    fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        scan_prefix(&self.db, CF_PAYOUT_ITEMS, payout_id.as_bytes())
    }

    fn apply(&mut self, staged: Staged) -> Result<()> {
        let db = &self.db;
        let wallets = handle(db, CF_WALLETS)?;
        let owners = handle(db, CF_WALLET_OWNERS)?;
        let transactions = handle(db, CF_TRANSACTIONS)?;
        let refs = handle(db, CF_EXTERNAL_REFS)?;
        let payouts = handle(db, CF_PAYOUTS)?;
        let items = handle(db, CF_PAYOUT_ITEMS)?;

        let mut batch = WriteBatch::default();

        // deletions first so a replacement wallet keeps its index entry
        for (id, _) in staged.wallets.iter().filter(|(_, w)| w.is_none()) {
            if let Some(old) = get_json::<Wallet>(db, CF_WALLETS, id.as_bytes())? {
                let key = owner_key(old.user_id, &old.kind);
                if get_id(db, CF_WALLET_OWNERS, &key)? == Some(*id) {
                    batch.delete_cf(owners, &key);
                }
                batch.delete_cf(wallets, id.as_bytes());
            }
        }
        for (id, wallet) in staged.wallets.iter() {
            if let Some(wallet) = wallet {
                put_json(&mut batch, wallets, id.as_bytes(), wallet)?;
                batch.put_cf(owners, owner_key(wallet.user_id, &wallet.kind), id.as_bytes());
            }
        }
        for (id, tx) in staged.transactions.iter() {
            put_json(&mut batch, transactions, id.as_bytes(), tx)?;
            if let Some(reference) = &tx.external_ref {
                batch.put_cf(refs, reference.as_bytes(), id.as_bytes());
            }
        }
        for (id, payout) in staged.payouts.iter() {
            put_json(&mut batch, payouts, id.as_bytes(), payout)?;
        }
        for item in staged.payout_items.iter() {
            put_json(&mut batch, items, &item_key(item), item)?;
        }

        db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        Ok(Box::new(StagedUnit::new(RocksWriter {
            db: Arc::clone(&self.db),
            _guard: guard,
        })))
    }

    async fn wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        get_json(&self.db, CF_WALLETS, id.as_bytes())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = scan_json(&self.db, CF_WALLETS)?;
        wallets.sort_by_key(|w| (w.created_at, w.id));
        Ok(wallets)
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        get_json(&self.db, CF_TRANSACTIONS, id.as_bytes())
    }

    async fn transaction_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        match get_id(&self.db, CF_EXTERNAL_REFS, reference.as_bytes())? {
            Some(id) => get_json(&self.db, CF_TRANSACTIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let mut matching: Vec<Transaction> = scan_json::<Transaction>(&self.db, CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .collect();
        matching.sort_by_key(|tx| (tx.created_at, tx.id));
        Ok(matching)
    }

    async fn transaction_totals(&self, filter: &TransactionFilter) -> Result<TransactionTotals> {
        let transactions: Vec<Transaction> = scan_json(&self.db, CF_TRANSACTIONS)?;
        Ok(transactions
            .iter()
            .filter(|tx| filter.matches(tx))
            .fold(TransactionTotals::default(), |mut totals, tx| {
                totals.count += 1;
                totals.amount += tx.amount.value();
                totals
            }))
    }

    async fn payout(&self, id: Uuid) -> Result<Option<Payout>> {
        get_json(&self.db, CF_PAYOUTS, id.as_bytes())
    }

    async fn payouts(&self, filter: &PayoutFilter) -> Result<Vec<Payout>> {
        let mut matching: Vec<Payout> = scan_json::<Payout>(&self.db, CF_PAYOUTS)?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        matching.sort_by_key(|p| (p.scheduled_for.unwrap_or(p.created_at), p.id));
        Ok(matching)
    }

    async fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        scan_prefix(&self.db, CF_PAYOUT_ITEMS, payout_id.as_bytes())
    }
}
