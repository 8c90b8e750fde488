use super::wallets::WalletStore;
use crate::domain::money::Balance;
use crate::domain::ports::{SharedStore, TransactionTotals};
use crate::domain::transaction::{TransactionFilter, TransactionKind, TransactionStatus};
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata key that tags a charge with the product module it was sold through.
pub const MODULE_TAG: &str = "module";
/// Module name used for charges without a module tag.
pub const DEFAULT_MODULE: &str = "general";

/// The platform wallets a caller may ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformWallet {
    Commission,
    Tax,
    Fees,
    Module(String),
}

impl PlatformWallet {
    pub fn kind(&self) -> WalletKind {
        match self {
            Self::Commission => WalletKind::PlatformCommission,
            Self::Tax => WalletKind::PlatformTax,
            Self::Fees => WalletKind::PlatformFees,
            Self::Module(name) => WalletKind::PlatformModule(name.to_ascii_lowercase()),
        }
    }
}

/// Half-open interval `[from, to)` over transaction creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(LedgerError::Validation(format!(
                "date range starts after it ends: {from} > {to}"
            )));
        }
        Ok(Self { from, to })
    }

    fn filter(&self, kind: TransactionKind, status: TransactionStatus) -> TransactionFilter {
        TransactionFilter {
            kind: Some(kind),
            status: Some(status),
            from: Some(self.from),
            to: Some(self.to),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlatformBalances {
    pub commission: Balance,
    pub tax: Balance,
    pub fees: Balance,
    pub modules: BTreeMap<String, Balance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RevenueBreakdown {
    /// Charges that settled and are still standing.
    pub charges: u64,
    pub gross: Decimal,
    pub instructor: Decimal,
    pub commission: Decimal,
    pub tax: Decimal,
    pub refunds: u64,
    pub refunded: Decimal,
    pub payouts: u64,
    pub paid_out: Decimal,
}

/// Get-or-create access to the platform's singleton wallets, plus read-only revenue reports.
#[derive(Clone)]
pub struct PlatformWalletRegistry {
    wallets: WalletStore,
    store: SharedStore,
    currency: String,
}

impl PlatformWalletRegistry {
    pub fn new(wallets: WalletStore, currency: impl Into<String>) -> Self {
        Self {
            store: wallets.store(),
            wallets,
            currency: currency.into(),
        }
    }

    pub async fn get_or_create(&self, which: PlatformWallet) -> Result<Wallet> {
        self.wallets
            .get_or_create_singleton(which.kind(), &self.currency)
            .await
    }

    pub async fn total_balances(&self) -> Result<PlatformBalances> {
        let mut totals = PlatformBalances::default();
        for wallet in self.store.wallets().await? {
            match wallet.kind {
                WalletKind::PlatformCommission => totals.commission += wallet.balance,
                WalletKind::PlatformTax => totals.tax += wallet.balance,
                WalletKind::PlatformFees => totals.fees += wallet.balance,
                WalletKind::PlatformModule(name) => {
                    *totals.modules.entry(name).or_default() += wallet.balance;
                }
                WalletKind::Instructor | WalletKind::Student => {}
            }
        }
        Ok(totals)
    }

    /// Sums settled charges, refunds and payouts created inside `range`.
    pub async fn revenue_breakdown(&self, range: DateRange) -> Result<RevenueBreakdown> {
        let charges = self
            .store
            .transactions(&range.filter(TransactionKind::Charge, TransactionStatus::Success))
            .await?;
        let refunds = self
            .store
            .transaction_totals(&range.filter(TransactionKind::Refund, TransactionStatus::Success))
            .await?;
        let payouts = self
            .store
            .transaction_totals(&range.filter(TransactionKind::Payout, TransactionStatus::Success))
            .await?;

        let mut breakdown = RevenueBreakdown {
            refunds: refunds.count,
            refunded: refunds.amount,
            payouts: payouts.count,
            paid_out: payouts.amount,
            ..Default::default()
        };
        for tx in charges {
            breakdown.charges += 1;
            breakdown.gross += tx.amount.value();
            if let Some(split) = tx.split {
                breakdown.instructor += split.instructor;
                breakdown.commission += split.commission;
                breakdown.tax += split.tax;
            }
        }
        Ok(breakdown)
    }

    /// Settled charge totals grouped by their `module` tag.
    pub async fn module_wise_revenue(&self) -> Result<BTreeMap<String, TransactionTotals>> {
        let filter = TransactionFilter {
            kind: Some(TransactionKind::Charge),
            status: Some(TransactionStatus::Success),
            ..Default::default()
        };
        let mut modules: BTreeMap<String, TransactionTotals> = BTreeMap::new();
        for tx in self.store.transactions(&filter).await? {
            let module = tx
                .metadata
                .get(MODULE_TAG)
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_MODULE)
                .to_ascii_lowercase();
            let totals = modules.entry(module).or_default();
            totals.count += 1;
            totals.amount += tx.amount.value();
        }
        Ok(modules)
    }
}
