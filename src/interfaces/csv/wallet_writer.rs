use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One line of the balances report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletRow {
    /// The user's label, or `platform` for platform wallets.
    pub owner: String,
    pub kind: String,
    pub balance: Decimal,
    pub currency: String,
}

/// Writes wallet balances as CSV with an `owner,kind,balance,currency` header.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, rows: impl IntoIterator<Item = WalletRow>) -> Result<()> {
        for mut row in rows {
            row.balance = row.balance.normalize();
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
