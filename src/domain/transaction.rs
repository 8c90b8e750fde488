use super::Metadata;
use super::money::Amount;
use super::split::RevenueSplit;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Charge,
    Refund,
    Commission,
    Tax,
    Payout,
    NetPayout,
    Adjustment,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl TransactionStatus {
    /// PENDING is the only source of SUCCESS and FAILED; SUCCESS is the only source of REFUNDED.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Success, Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(label)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Charge => "CHARGE",
            Self::Refund => "REFUND",
            Self::Commission => "COMMISSION",
            Self::Tax => "TAX",
            Self::Payout => "PAYOUT",
            Self::NetPayout => "NET_PAYOUT",
            Self::Adjustment => "ADJUSTMENT",
        };
        f.write_str(label)
    }
}

/// One money-moving event. Everything except status, metadata and the typed settlement
/// fields is fixed at creation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    /// Gateway-side identifier; unique across all transactions when present.
    pub external_ref: Option<String>,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub user_id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Metadata,
    /// On a CHARGE, the revenue split credited at settlement. On a REFUND, the shares taken
    /// back from each wallet.
    #[serde(default)]
    pub split: Option<RevenueSplit>,
    /// For REFUND rows, the CHARGE being refunded.
    #[serde(default)]
    pub refund_of: Option<Uuid>,
    /// On a CHARGE, the PENDING REFUND waiting on the gateway. Blocks any other refund.
    #[serde(default)]
    pub pending_refund: Option<Uuid>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Moves the status from `expected` to `next`.
    ///
    /// Fails with `Conflict` when the current status is not `expected` or the state machine
    /// does not allow `expected -> next`.
    pub fn transition(
        &mut self,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<()> {
        if self.status != expected {
            return Err(LedgerError::Conflict(format!(
                "transaction {} is {}, expected {}",
                self.id, self.status, expected
            )));
        }
        if !expected.can_transition_to(next) {
            return Err(LedgerError::Conflict(format!(
                "transaction {} cannot move from {} to {}",
                self.id, expected, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn merge_metadata(&mut self, extra: Metadata) {
        self.metadata.extend(extra);
    }
}

/// Input for creating a transaction; it always starts PENDING.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: String,
    pub wallet_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub external_ref: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: Metadata,
}

impl NewTransaction {
    pub fn new(kind: TransactionKind, amount: Amount, currency: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            currency: currency.into(),
            wallet_id: None,
            user_id: None,
            external_ref: None,
            payment_method: None,
            metadata: Metadata::new(),
        }
    }

    pub fn wallet(mut self, wallet_id: Uuid) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn external_ref(mut self, reference: impl Into<String>) -> Self {
        self.external_ref = Some(reference.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_transaction(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            external_ref: self.external_ref,
            kind: self.kind,
            amount: self.amount,
            currency: self.currency,
            status: TransactionStatus::Pending,
            payment_method: self.payment_method,
            user_id: self.user_id,
            wallet_id: self.wallet_id,
            metadata: self.metadata,
            split: None,
            refund_of: None,
            pending_refund: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read-side filter for ledger scans and aggregates. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub wallet_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.kind.is_none_or(|kind| tx.kind == kind)
            && self.status.is_none_or(|status| tx.status == status)
            && self.wallet_id.is_none_or(|id| tx.wallet_id == Some(id))
            && self.from.is_none_or(|from| tx.created_at >= from)
            && self.to.is_none_or(|to| tx.created_at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn charge() -> Transaction {
        NewTransaction::new(
            TransactionKind::Charge,
            Amount::new(dec!(100.0)).unwrap(),
            "INR",
        )
        .external_ref("order_1")
        .into_transaction()
    }

    #[test]
    fn test_new_transaction_starts_pending() {
        let tx = charge();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.external_ref.as_deref(), Some("order_1"));
        assert!(tx.split.is_none());
    }

    #[test]
    fn test_transition_compare_and_set() {
        let mut tx = charge();
        tx.transition(TransactionStatus::Pending, TransactionStatus::Success)
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);

        let replay = tx.transition(TransactionStatus::Pending, TransactionStatus::Success);
        assert!(matches!(replay, Err(LedgerError::Conflict(_))));
        assert_eq!(tx.status, TransactionStatus::Success);
    }

    #[test]
    fn test_refunded_only_from_success() {
        let mut tx = charge();
        let early = tx.transition(TransactionStatus::Pending, TransactionStatus::Refunded);
        assert!(matches!(early, Err(LedgerError::Conflict(_))));

        tx.transition(TransactionStatus::Pending, TransactionStatus::Failed)
            .unwrap();
        let late = tx.transition(TransactionStatus::Failed, TransactionStatus::Refunded);
        assert!(matches!(late, Err(LedgerError::Conflict(_))));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TransactionStatus::Refunded).unwrap();
        assert_eq!(json, "\"REFUNDED\"");
        let kind: TransactionKind = serde_json::from_str("\"NET_PAYOUT\"").unwrap();
        assert_eq!(kind, TransactionKind::NetPayout);
    }

    #[test]
    fn test_filter_matches() {
        let tx = charge();
        let filter = TransactionFilter {
            kind: Some(TransactionKind::Charge),
            status: Some(TransactionStatus::Pending),
            ..Default::default()
        };
        assert!(filter.matches(&tx));

        let filter = TransactionFilter {
            status: Some(TransactionStatus::Success),
            ..Default::default()
        };
        assert!(!filter.matches(&tx));
    }
}
