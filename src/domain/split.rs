//! Revenue split and fee arithmetic.
//!
//! Everything here is pure: no storage, no clocks. Outputs are exact decimals and every split
//! sums back to its gross amount.

use super::money::{Amount, round_money};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fractions of a gross charge owed to the instructor, the platform and the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSplitRates")]
pub struct SplitRates {
    instructor: Decimal,
    commission: Decimal,
    tax: Decimal,
}

#[derive(Deserialize)]
struct RawSplitRates {
    instructor: Decimal,
    commission: Decimal,
    tax: Decimal,
}

impl TryFrom<RawSplitRates> for SplitRates {
    type Error = LedgerError;

    fn try_from(raw: RawSplitRates) -> Result<Self> {
        Self::new(raw.instructor, raw.commission, raw.tax)
    }
}

impl SplitRates {
    /// Rates must be non-negative and sum to exactly one.
    pub fn new(instructor: Decimal, commission: Decimal, tax: Decimal) -> Result<Self> {
        if instructor < Decimal::ZERO || commission < Decimal::ZERO || tax < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "split rates must not be negative".to_string(),
            ));
        }
        let total = instructor + commission + tax;
        if total != Decimal::ONE {
            return Err(LedgerError::Validation(format!(
                "split rates must sum to 1, got {total}"
            )));
        }
        Ok(Self {
            instructor,
            commission,
            tax,
        })
    }

    pub fn instructor(&self) -> Decimal {
        self.instructor
    }

    pub fn commission(&self) -> Decimal {
        self.commission
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }
}

impl Default for SplitRates {
    fn default() -> Self {
        Self {
            instructor: dec!(0.75),
            commission: dec!(0.10),
            tax: dec!(0.15),
        }
    }
}

/// The three shares of one gross amount, together with the rates that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub gross: Decimal,
    pub instructor: Decimal,
    pub commission: Decimal,
    pub tax: Decimal,
    pub rates: SplitRates,
}

/// Splits `gross` by `rates`.
///
/// Commission and tax are rounded to the money scale; the instructor share absorbs the
/// remainder so that `instructor + commission + tax == gross` holds exactly.
pub fn split(gross: Amount, rates: &SplitRates) -> RevenueSplit {
    let gross = gross.value();
    let commission = round_money(gross * rates.commission).min(gross);
    let tax = round_money(gross * rates.tax).min(gross - commission);
    RevenueSplit {
        gross,
        instructor: gross - commission - tax,
        commission,
        tax,
        rates: *rates,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentageBreakdown {
    pub commission: Decimal,
    pub tax: Decimal,
    pub net: Decimal,
}

/// Previews the commission and tax taken from `gross` at the given percentages (0-100).
pub fn net_after_percentages(
    gross: Decimal,
    commission_percent: Decimal,
    tax_percent: Decimal,
) -> Result<PercentageBreakdown> {
    if gross < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "gross must not be negative, got {gross}"
        )));
    }
    for percent in [commission_percent, tax_percent] {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(LedgerError::Validation(format!(
                "percentage out of range: {percent}"
            )));
        }
    }
    if commission_percent + tax_percent > Decimal::ONE_HUNDRED {
        return Err(LedgerError::Validation(
            "commission and tax together exceed 100%".to_string(),
        ));
    }
    let commission = round_money(gross * commission_percent / Decimal::ONE_HUNDRED);
    let tax = round_money(gross * tax_percent / Decimal::ONE_HUNDRED).min(gross - commission);
    Ok(PercentageBreakdown {
        commission,
        tax,
        net: gross - commission - tax,
    })
}

/// Processing fee charged on a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FeeConfig {
    Flat(Decimal),
    /// Percentage of the gross amount, 0-100.
    Percentage(Decimal),
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self::Flat(dec!(10))
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Flat(value) if value < Decimal::ZERO => Err(LedgerError::Validation(
                "flat fee must not be negative".to_string(),
            )),
            Self::Percentage(value) if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED => {
                Err(LedgerError::Validation(format!(
                    "fee percentage out of range: {value}"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub fee: Decimal,
    pub net: Decimal,
}

/// Previews the fee on `gross` and what is left after it. The net never goes below zero.
pub fn net_after_fee(gross: Decimal, fee: &FeeConfig) -> FeeBreakdown {
    let fee = match *fee {
        FeeConfig::Flat(value) => value,
        FeeConfig::Percentage(percent) => round_money(gross * percent / Decimal::ONE_HUNDRED),
    };
    FeeBreakdown {
        fee,
        net: (gross - fee).max(Decimal::ZERO),
    }
}
