use super::Metadata;
use super::money::Amount;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    /// Statuses from which a payout may still be processed or cancelled.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Why a payout ended up FAILED.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PayoutFailure {
    pub reason: String,
    /// Cancelled payouts are terminal and never retried.
    pub cancelled: bool,
    pub at: DateTime<Utc>,
}

/// Destination account for a payout. Kept in payout metadata for audit only.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BankDetails {
    pub account_holder: String,
    pub account_number: String,
    pub ifsc: String,
}

impl BankDetails {
    /// Account number with all but the last four digits hidden.
    pub fn masked_account_number(&self) -> String {
        let digits = self.account_number.chars().count();
        let visible: String = self
            .account_number
            .chars()
            .skip(digits.saturating_sub(4))
            .collect();
        format!("{}{}", "X".repeat(digits.saturating_sub(4)), visible)
    }
}

/// A request to move funds from an instructor wallet to an external bank account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payout {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Amount,
    pub currency: String,
    pub status: PayoutStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Settlement reference assigned on completion.
    pub external_ref: Option<String>,
    #[serde(default)]
    pub failure: Option<PayoutFailure>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// A payout with a `scheduled_for` later than `now` starts SCHEDULED, otherwise PENDING.
    pub fn new(
        instructor_id: Uuid,
        wallet_id: Uuid,
        amount: Amount,
        currency: impl Into<String>,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = match scheduled_for {
            Some(at) if at > now => PayoutStatus::Scheduled,
            _ => PayoutStatus::Pending,
        };
        Self {
            id: Uuid::new_v4(),
            instructor_id,
            wallet_id,
            amount,
            currency: currency.into(),
            status,
            scheduled_for,
            processed_at: None,
            external_ref: None,
            failure: None,
            attempts: 0,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.cancelled)
    }

    /// PENDING | SCHEDULED -> PROCESSING.
    pub fn begin_processing(&mut self) -> Result<()> {
        if !self.status.is_open() {
            return Err(self.conflict("process"));
        }
        self.status = PayoutStatus::Processing;
        self.attempts += 1;
        self.touch();
        Ok(())
    }

    /// PROCESSING -> COMPLETED.
    pub fn complete(&mut self, settlement_ref: String, at: DateTime<Utc>) -> Result<()> {
        if self.status != PayoutStatus::Processing {
            return Err(self.conflict("complete"));
        }
        self.status = PayoutStatus::Completed;
        self.external_ref = Some(settlement_ref);
        self.processed_at = Some(at);
        self.touch();
        Ok(())
    }

    /// PROCESSING -> FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status != PayoutStatus::Processing {
            return Err(self.conflict("fail"));
        }
        self.mark_failed(reason.into(), false);
        Ok(())
    }

    /// PENDING | SCHEDULED -> FAILED, never retried afterwards.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if !self.status.is_open() {
            return Err(self.conflict("cancel"));
        }
        self.mark_failed(reason.into(), true);
        Ok(())
    }

    /// FAILED -> PENDING, unless the failure was a cancellation.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != PayoutStatus::Failed {
            return Err(self.conflict("retry"));
        }
        if self.is_cancelled() {
            return Err(LedgerError::Conflict(format!(
                "payout {} was cancelled and cannot be retried",
                self.id
            )));
        }
        self.status = PayoutStatus::Pending;
        self.failure = None;
        self.touch();
        Ok(())
    }

    fn mark_failed(&mut self, reason: String, cancelled: bool) {
        let now = Utc::now();
        self.metadata.insert(
            "failure_reason".to_string(),
            serde_json::Value::String(reason.clone()),
        );
        self.status = PayoutStatus::Failed;
        self.failure = Some(PayoutFailure {
            reason,
            cancelled,
            at: now,
        });
        self.updated_at = now;
    }

    fn conflict(&self, action: &str) -> LedgerError {
        LedgerError::Conflict(format!(
            "cannot {action} payout {} while {}",
            self.id, self.status
        ))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Links a payout to the PAYOUT transaction that released its funds.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PayoutItem {
    pub id: Uuid,
    pub payout_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: Amount,
    pub released_at: DateTime<Utc>,
}

impl PayoutItem {
    pub fn new(payout_id: Uuid, transaction_id: Uuid, amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            payout_id,
            transaction_id,
            amount,
            released_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayoutFilter {
    pub instructor_id: Option<Uuid>,
    pub status: Option<PayoutStatus>,
    /// Only payouts whose `scheduled_for` is at or before this instant.
    pub due_by: Option<DateTime<Utc>>,
}

impl PayoutFilter {
    pub fn matches(&self, payout: &Payout) -> bool {
        self.instructor_id
            .is_none_or(|id| payout.instructor_id == id)
            && self.status.is_none_or(|status| payout.status == status)
            && self
                .due_by
                .is_none_or(|due| payout.scheduled_for.is_some_and(|at| at <= due))
    }
}
