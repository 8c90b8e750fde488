//! Application layer: the settlement engine's components.
//!
//! [`SettlementOrchestrator`](orchestrator::SettlementOrchestrator) owns every status change.
//! The wallet store, transaction ledger and platform registry are the building blocks it
//! drives; the webhook processor and payment service sit between it and a gateway.

pub mod ledger;
pub mod orchestrator;
pub mod payments;
pub mod platform;
pub mod wallets;
pub mod webhook;
