use super::Metadata;
use super::money::{Amount, Balance};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a wallet holds money for.
///
/// Platform kinds are singletons: at most one wallet of each exists, and it has no owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WalletKind {
    Instructor,
    Student,
    PlatformCommission,
    PlatformTax,
    PlatformFees,
    /// Platform revenue scoped to one product module, e.g. `PLATFORM_MODULE:courses`.
    PlatformModule(String),
}

impl WalletKind {
    pub fn is_platform(&self) -> bool {
        !matches!(self, Self::Instructor | Self::Student)
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instructor => f.write_str("INSTRUCTOR"),
            Self::Student => f.write_str("STUDENT"),
            Self::PlatformCommission => f.write_str("PLATFORM_COMMISSION"),
            Self::PlatformTax => f.write_str("PLATFORM_TAX"),
            Self::PlatformFees => f.write_str("PLATFORM_FEES"),
            Self::PlatformModule(module) => write!(f, "PLATFORM_MODULE:{module}"),
        }
    }
}

impl FromStr for WalletKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some(module) = upper.strip_prefix("PLATFORM_MODULE:") {
            if module.is_empty() {
                return Err(LedgerError::Validation(
                    "module wallet kind needs a module name".to_string(),
                ));
            }
            return Ok(Self::PlatformModule(module.to_ascii_lowercase()));
        }
        match upper.as_str() {
            "INSTRUCTOR" => Ok(Self::Instructor),
            "STUDENT" => Ok(Self::Student),
            "PLATFORM_COMMISSION" => Ok(Self::PlatformCommission),
            "PLATFORM_TAX" => Ok(Self::PlatformTax),
            "PLATFORM_FEES" => Ok(Self::PlatformFees),
            other => Err(LedgerError::Validation(format!(
                "unknown wallet kind '{other}'"
            ))),
        }
    }
}

impl From<WalletKind> for String {
    fn from(kind: WalletKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for WalletKind {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A balance holder for a user or a platform purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    /// `None` marks a platform wallet.
    pub user_id: Option<Uuid>,
    pub kind: WalletKind,
    pub balance: Balance,
    pub currency: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Option<Uuid>, kind: WalletKind, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            balance: Balance::ZERO,
            currency: currency.into(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn platform(kind: WalletKind, currency: impl Into<String>) -> Self {
        Self::new(None, kind, currency)
    }

    pub fn is_platform(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }

    /// Applies a signed change to the balance.
    ///
    /// A negative delta that would take the balance below zero fails with
    /// `InsufficientFunds` and leaves the wallet untouched.
    pub fn apply_delta(&mut self, delta: Decimal) -> Result<()> {
        let next = self.balance.value() + delta;
        if next < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: self.id,
                balance: self.balance.value(),
                requested: -delta,
            });
        }
        self.balance = Balance::new(next);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount.into();
        self.updated_at = Utc::now();
    }

    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        self.apply_delta(-amount.value())
    }
}
