use crate::domain::Metadata;
use crate::domain::ports::{SharedStore, UnitOfWork};
use crate::domain::transaction::{
    NewTransaction, Transaction, TransactionFilter, TransactionStatus,
};
use crate::error::{LedgerError, Result};
use uuid::Uuid;

/// The record of every money event.
///
/// `create` and `transition` come in two forms: the plain form runs in its own unit of work,
/// the `_in` form joins a unit the caller already holds.
#[derive(Clone)]
pub struct TransactionLedger {
    store: SharedStore,
}

impl TransactionLedger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let mut uow = self.store.begin().await?;
        let tx = self.create_in(uow.as_mut(), new).await?;
        uow.commit().await?;
        Ok(tx)
    }

    /// Records a PENDING transaction. A reused external reference fails with `Conflict`.
    pub async fn create_in(
        &self,
        uow: &mut dyn UnitOfWork,
        new: NewTransaction,
    ) -> Result<Transaction> {
        let tx = new.into_transaction();
        uow.insert_transaction(tx.clone()).await?;
        tracing::debug!(
            transaction_id = %tx.id,
            kind = %tx.kind,
            amount = %tx.amount,
            external_ref = tx.external_ref.as_deref().unwrap_or("-"),
            "transaction recorded"
        );
        Ok(tx)
    }

    pub async fn find_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        self.store.transaction_by_external_ref(reference).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction> {
        self.store
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", id))
    }

    pub async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        self.store.transactions(filter).await
    }

    pub async fn transition(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
        metadata: Metadata,
    ) -> Result<Transaction> {
        let mut uow = self.store.begin().await?;
        let tx = self
            .transition_in(uow.as_mut(), id, expected, next, metadata)
            .await?;
        uow.commit().await?;
        Ok(tx)
    }

    /// Compare-and-set on status.
    ///
    /// Fails with `Conflict` unless the transaction is currently `expected` and the state
    /// machine allows `expected -> next`. `metadata` is merged into the row's metadata.
    pub async fn transition_in(
        &self,
        uow: &mut dyn UnitOfWork,
        id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
        metadata: Metadata,
    ) -> Result<Transaction> {
        let mut tx = uow
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", id))?;
        tx.transition(expected, next)?;
        tx.merge_metadata(metadata);
        uow.update_transaction(tx.clone()).await?;
        Ok(tx)
    }
}
