use crate::domain::split::{FeeConfig, SplitRates};
use crate::domain::transaction::TransactionKind;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How a successful transaction of some kind moves its wallet's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletEffect {
    Add,
    Subtract,
    None,
}

/// Wallet effect per transaction kind, applied on PENDING -> SUCCESS.
///
/// CHARGE is settled through the revenue split and REFUND through the refund flow, so
/// their entries are ignored by the orchestrator. A rule table read from config is laid
/// over the defaults; kinds it leaves out keep their default effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<TransactionKind, WalletEffect>",
    into = "HashMap<TransactionKind, WalletEffect>"
)]
pub struct LedgerRules(HashMap<TransactionKind, WalletEffect>);

impl LedgerRules {
    pub fn effect(&self, kind: TransactionKind) -> WalletEffect {
        self.0.get(&kind).copied().unwrap_or(WalletEffect::None)
    }

    pub fn with(mut self, kind: TransactionKind, effect: WalletEffect) -> Self {
        self.0.insert(kind, effect);
        self
    }
}

impl From<HashMap<TransactionKind, WalletEffect>> for LedgerRules {
    fn from(overrides: HashMap<TransactionKind, WalletEffect>) -> Self {
        let mut rules = Self::default();
        rules.0.extend(overrides);
        rules
    }
}

impl From<LedgerRules> for HashMap<TransactionKind, WalletEffect> {
    fn from(rules: LedgerRules) -> Self {
        rules.0
    }
}

impl Default for LedgerRules {
    fn default() -> Self {
        use TransactionKind::*;
        Self(HashMap::from([
            (Charge, WalletEffect::Add),
            (Refund, WalletEffect::Subtract),
            (Commission, WalletEffect::Add),
            (Tax, WalletEffect::Add),
            (Payout, WalletEffect::Subtract),
            (NetPayout, WalletEffect::Subtract),
            (Adjustment, WalletEffect::Add),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutPolicy {
    pub minimum_amount: Decimal,
    #[serde(default)]
    pub fee: FeeConfig,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            minimum_amount: dec!(1000),
            fee: FeeConfig::default(),
        }
    }
}

/// Everything the settlement engine needs to know about money rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub currency: String,
    pub split_rates: SplitRates,
    pub payout: PayoutPolicy,
    pub ledger_rules: LedgerRules,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            split_rates: SplitRates::default(),
            payout: PayoutPolicy::default(),
            ledger_rules: LedgerRules::default(),
        }
    }
}

impl SettlementConfig {
    /// Loads a JSON config file; missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::Validation(format!(
                "currency must be a 3-letter code, got '{}'",
                self.currency
            )));
        }
        if self.payout.minimum_amount < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "payout minimum must not be negative".to_string(),
            ));
        }
        for kind in [TransactionKind::Payout, TransactionKind::NetPayout] {
            let effect = self.ledger_rules.effect(kind);
            if effect != WalletEffect::Subtract {
                return Err(LedgerError::Validation(format!(
                    "{kind} must subtract from its wallet, configured as {effect:?}"
                )));
            }
        }
        self.payout.fee.validate()
    }
}
