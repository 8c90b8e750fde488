//! Types exchanged with a payment gateway, and the decimal <-> minor unit conversion that
//! happens at that boundary and nowhere else.

use super::money::Amount;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Number of minor units per major unit exponent for a currency (ISO 4217).
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

/// Converts an amount to the provider's smallest currency unit (paise for INR).
///
/// Fails if the amount carries more precision than the currency allows.
pub fn to_minor_units(amount: Amount, currency: &str) -> Result<i64> {
    let scaled = amount.value() * Decimal::from(10_i64.pow(currency_exponent(currency)));
    if scaled.fract() != Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} has more precision than {currency} allows"
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{amount} is out of range")))
}

/// Converts a provider amount in minor units back to an exact decimal.
pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    Decimal::new(minor, currency_exponent(currency))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_ref: String,
    pub order_ref: Option<String>,
    pub method: Option<String>,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
    pub contact: Option<String>,
}

/// Credentials and settings for one configured gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "INR".to_string()
}
