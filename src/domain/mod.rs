//! Domain layer: value objects, entities and the ports the engine depends on.

pub mod gateway;
pub mod money;
pub mod payout;
pub mod ports;
pub mod split;
pub mod transaction;
pub mod wallet;

/// Open-ended audit data attached to wallets, transactions and payouts.
///
/// Never consulted for state-machine decisions; those use typed fields.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
