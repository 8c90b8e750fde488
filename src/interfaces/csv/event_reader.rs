use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Open,
    Adjust,
    Charge,
    Capture,
    Verify,
    Fail,
    Refund,
    Payout,
    Process,
    Cancel,
    Retry,
    Sweep,
}

/// One row of a replay script: `op, user, kind, amount, reference, at`.
///
/// Which columns matter depends on `op`; unused ones may be left empty or omitted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerEvent {
    pub op: EventOp,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// Reads ledger events from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<LedgerEvent>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    /// Creates a new `EventReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes events.
    pub fn events(self) -> impl Iterator<Item = Result<LedgerEvent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, user, kind, amount, reference, at\n\
                    open, alice, instructor, , ,\n\
                    charge, alice, courses, 10000, rcpt-1, \n\
                    sweep, , , , , 2026-01-01T00:00:00Z";
        let reader = EventReader::new(data.as_bytes());
        let results: Vec<Result<LedgerEvent>> = reader.events().collect();

        assert_eq!(results.len(), 3);
        let open = results[0].as_ref().unwrap();
        assert_eq!(open.op, EventOp::Open);
        assert_eq!(open.user.as_deref(), Some("alice"));
        assert_eq!(open.amount, None);

        let charge = results[1].as_ref().unwrap();
        assert_eq!(charge.amount, Some(dec!(10000)));
        assert_eq!(charge.reference.as_deref(), Some("rcpt-1"));

        let sweep = results[2].as_ref().unwrap();
        assert!(sweep.at.is_some());
    }

    #[test]
    fn test_reader_short_rows() {
        let data = "op, user, kind, amount, reference, at\nprocess, , , , p1";
        let reader = EventReader::new(data.as_bytes());
        let event = reader.events().next().unwrap().unwrap();
        assert_eq!(event.op, EventOp::Process);
        assert_eq!(event.reference.as_deref(), Some("p1"));
        assert_eq!(event.at, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, user, kind, amount, reference, at\n\
                    explode, alice, , 1.0, ,\n\
                    charge, alice, , lots, rcpt, ";
        let reader = EventReader::new(data.as_bytes());
        let results: Vec<Result<LedgerEvent>> = reader.events().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }
}
