use super::Metadata;
use super::gateway::{Customer, GatewayConfig, PaymentDetails};
use super::payout::{Payout, PayoutFilter, PayoutItem};
use super::transaction::{Transaction, TransactionFilter};
use super::wallet::{Wallet, WalletKind};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Durable storage for wallets, transactions, payouts and payout items.
///
/// Writes only happen through a [`UnitOfWork`]. Implementations may serialize units, so a task
/// holding a unit must not call the read methods here until it has committed or dropped it.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens an atomic unit of work. Dropping it without `commit` discards every change.
    async fn begin(&self) -> Result<UnitOfWorkBox>;

    async fn wallet(&self, id: Uuid) -> Result<Option<Wallet>>;
    async fn wallets(&self) -> Result<Vec<Wallet>>;
    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn transaction_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>>;
    async fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>>;
    async fn transaction_totals(&self, filter: &TransactionFilter) -> Result<TransactionTotals>;
    async fn payout(&self, id: Uuid) -> Result<Option<Payout>>;
    async fn payouts(&self, filter: &PayoutFilter) -> Result<Vec<Payout>>;
    async fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>>;
}

/// Reads and writes inside one atomic unit.
///
/// Rows read here are locked against other units until commit or drop. Inserts that would
/// break a uniqueness rule (external reference, platform singleton, one wallet per user and
/// kind) fail with `Conflict`.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn wallet(&mut self, id: Uuid) -> Result<Option<Wallet>>;
    async fn wallet_by_owner(&mut self, user_id: Uuid, kind: &WalletKind)
    -> Result<Option<Wallet>>;
    async fn platform_wallet(&mut self, kind: &WalletKind) -> Result<Option<Wallet>>;
    async fn insert_wallet(&mut self, wallet: Wallet) -> Result<()>;
    async fn update_wallet(&mut self, wallet: Wallet) -> Result<()>;
    async fn delete_wallet(&mut self, id: Uuid) -> Result<()>;
    async fn wallet_has_transactions(&mut self, wallet_id: Uuid) -> Result<bool>;

    async fn transaction(&mut self, id: Uuid) -> Result<Option<Transaction>>;
    async fn insert_transaction(&mut self, tx: Transaction) -> Result<()>;
    async fn update_transaction(&mut self, tx: Transaction) -> Result<()>;

    async fn payout(&mut self, id: Uuid) -> Result<Option<Payout>>;
    async fn insert_payout(&mut self, payout: Payout) -> Result<()>;
    async fn update_payout(&mut self, payout: Payout) -> Result<()>;
    async fn payout_items(&mut self, payout_id: Uuid) -> Result<Vec<PayoutItem>>;
    async fn insert_payout_item(&mut self, item: PayoutItem) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransactionTotals {
    pub count: u64,
    pub amount: Decimal,
}

/// The external payment-processing capability. Amounts are in minor units.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: &Metadata,
    ) -> Result<String>;

    fn verify_payment_signature(&self, order_ref: &str, payment_ref: &str, signature: &str)
    -> bool;

    fn verify_webhook_signature(&self, raw_payload: &[u8], signature: &str) -> bool;

    async fn fetch_payment_details(&self, payment_ref: &str) -> Result<PaymentDetails>;

    async fn initiate_refund(&self, payment_ref: &str, amount: Option<i64>) -> Result<String>;

    async fn create_payment_link(
        &self,
        amount: i64,
        currency: &str,
        description: &str,
        customer: Option<&Customer>,
    ) -> Result<String>;
}

pub type UnitOfWorkBox = Box<dyn UnitOfWork>;
pub type SharedStore = Arc<dyn LedgerStore>;
pub type GatewayBox = Arc<dyn GatewayProvider>;
/// Builds a gateway adapter for a gateway id and its configuration.
pub type GatewayFactory = Box<dyn Fn(&str, &GatewayConfig) -> Result<GatewayBox> + Send + Sync>;
