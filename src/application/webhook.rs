use super::orchestrator::SettlementOrchestrator;
use crate::domain::Metadata;
use crate::domain::gateway::to_minor_units;
use crate::domain::ports::GatewayBox;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const ORDER_PAID: &str = "order.paid";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const REFUND_CREATED: &str = "refund.created";

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// The event moved a PENDING transaction to its final status.
    Applied(Transaction),
    /// The transaction had already left PENDING; nothing changed.
    AlreadyProcessed(Uuid),
    /// The event carries no ledger effect.
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    payload: EventPayload,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    payment: Option<Entity<PaymentEntity>>,
    order: Option<Entity<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    /// Captured amount in minor units.
    #[serde(default)]
    amount: Option<i64>,
    method: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
}

impl EventPayload {
    /// References to try, most specific first: the order id, then the payment id.
    fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        if let Some(order) = &self.order {
            refs.push(order.entity.id.as_str());
        }
        if let Some(payment) = &self.payment {
            if let Some(order_id) = payment.entity.order_id.as_deref() {
                refs.push(order_id);
            }
            refs.push(payment.entity.id.as_str());
        }
        refs.dedup();
        refs
    }

    /// The gateway's amount must match the charge to the minor unit.
    fn check_amount(&self, tx: &Transaction) -> Result<()> {
        let reported = self
            .payment
            .as_ref()
            .and_then(|p| p.entity.amount)
            .or_else(|| self.order.as_ref().and_then(|o| o.entity.amount))
            .ok_or_else(|| {
                LedgerError::Validation(format!("webhook for {} carries no amount", tx.id))
            })?;
        let expected = to_minor_units(tx.amount, &tx.currency)?;
        if reported != expected {
            return Err(LedgerError::Validation(format!(
                "gateway captured {reported} minor units, charge {} expects {expected}",
                tx.id
            )));
        }
        Ok(())
    }

    fn audit(&self, event_type: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("gateway_event".to_string(), Value::String(event_type.to_string()));
        if let Some(payment) = &self.payment {
            metadata.insert(
                "payment_id".to_string(),
                Value::String(payment.entity.id.clone()),
            );
            if let Some(method) = &payment.entity.method {
                metadata.insert("payment_method".to_string(), Value::String(method.clone()));
            }
        }
        metadata
    }
}

/// Turns signed gateway notifications into ledger transitions.
///
/// Delivery is at-least-once, so every handler is idempotent: an event for a transaction
/// that already left PENDING reports `AlreadyProcessed` and changes nothing. Refund events
/// are informational; refunds only start from the ledger side.
pub struct WebhookProcessor {
    gateway: GatewayBox,
    orchestrator: Arc<SettlementOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(gateway: GatewayBox, orchestrator: Arc<SettlementOrchestrator>) -> Self {
        Self {
            gateway,
            orchestrator,
        }
    }

    pub async fn handle(
        &self,
        event_type: &str,
        raw_payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome> {
        if !self.gateway.verify_webhook_signature(raw_payload, signature) {
            tracing::warn!(event_type, "webhook signature rejected");
            return Err(LedgerError::SignatureInvalid);
        }

        match event_type {
            PAYMENT_CAPTURED | ORDER_PAID => {
                let payload = parse(raw_payload)?;
                let tx = self.locate(&payload).await?;
                if tx.status != TransactionStatus::Pending {
                    return Ok(already_processed(event_type, &tx));
                }
                if let Err(e) = payload.check_amount(&tx) {
                    tracing::warn!(transaction_id = %tx.id, event_type, error = %e, "webhook amount rejected");
                    return Err(e);
                }
                let outcome = self
                    .orchestrator
                    .complete_transaction(tx.id, payload.audit(event_type))
                    .await;
                settle(event_type, &tx, outcome)
            }
            PAYMENT_FAILED => {
                let payload = parse(raw_payload)?;
                let tx = self.locate(&payload).await?;
                if tx.status != TransactionStatus::Pending {
                    return Ok(already_processed(event_type, &tx));
                }
                let reason = payload
                    .payment
                    .as_ref()
                    .and_then(|p| p.entity.error_description.clone())
                    .unwrap_or_else(|| "payment failed at gateway".to_string());
                let outcome = self.orchestrator.fail_transaction(tx.id, &reason).await;
                settle(event_type, &tx, outcome)
            }
            REFUND_CREATED => {
                tracing::info!(event_type, "refund notification acknowledged");
                Ok(WebhookOutcome::Ignored(
                    "refunds are initiated through the ledger".to_string(),
                ))
            }
            other => {
                tracing::debug!(event_type = other, "unhandled webhook event");
                Ok(WebhookOutcome::Ignored(format!("unhandled event {other}")))
            }
        }
    }

    async fn locate(&self, payload: &EventPayload) -> Result<Transaction> {
        let references = payload.references();
        for reference in &references {
            if let Some(tx) = self
                .orchestrator
                .ledger()
                .find_by_external_ref(reference)
                .await?
            {
                return Ok(tx);
            }
        }
        Err(LedgerError::NotFound(format!(
            "no transaction for references {references:?}"
        )))
    }
}

fn parse(raw_payload: &[u8]) -> Result<EventPayload> {
    let envelope: Envelope = serde_json::from_slice(raw_payload)?;
    Ok(envelope.payload)
}

fn already_processed(event_type: &str, tx: &Transaction) -> WebhookOutcome {
    tracing::debug!(event_type, transaction_id = %tx.id, status = %tx.status, "webhook replay ignored");
    WebhookOutcome::AlreadyProcessed(tx.id)
}

/// A `Conflict` here means a concurrent delivery won the compare-and-set.
fn settle(
    event_type: &str,
    tx: &Transaction,
    outcome: Result<Transaction>,
) -> Result<WebhookOutcome> {
    match outcome {
        Ok(updated) => {
            tracing::info!(event_type, transaction_id = %updated.id, status = %updated.status, "webhook applied");
            Ok(WebhookOutcome::Applied(updated))
        }
        Err(e) if e.is_conflict() => Ok(already_processed(event_type, tx)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use crate::domain::gateway::GatewayConfig;
    use crate::domain::money::Amount;
    use crate::domain::ports::{GatewayProvider, SharedStore};
    use crate::domain::transaction::{NewTransaction, TransactionKind};
    use crate::domain::wallet::WalletKind;
    use crate::infrastructure::gateway::sandbox::SandboxGateway;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        gateway: Arc<SandboxGateway>,
        orchestrator: Arc<SettlementOrchestrator>,
        processor: WebhookProcessor,
        wallet_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store: SharedStore = Arc::new(InMemoryLedgerStore::new());
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store,
            SettlementConfig::default(),
        ));
        let gateway = Arc::new(SandboxGateway::new(GatewayConfig {
            key_id: "rzp_test".to_string(),
            key_secret: "key".to_string(),
            webhook_secret: "hook".to_string(),
            currency: "INR".to_string(),
        }));
        let processor = WebhookProcessor::new(gateway.clone(), orchestrator.clone());
        Fixture {
            gateway,
            orchestrator,
            processor,
            wallet_id: Uuid::nil(),
        }
    }

    /// Opens an instructor wallet, creates a gateway order and the PENDING charge for it.
    async fn order(f: &mut Fixture, amount: i64) -> (String, Transaction) {
        let instructor = Uuid::new_v4();
        let wallet = f
            .orchestrator
            .wallets()
            .open_wallet(instructor, WalletKind::Instructor, "INR")
            .await
            .unwrap();
        f.wallet_id = wallet.id;
        let order_ref = f
            .gateway
            .create_order(amount * 100, "INR", "rcpt", &Metadata::new())
            .await
            .unwrap();
        let tx = f
            .orchestrator
            .ledger()
            .create(
                NewTransaction::new(
                    TransactionKind::Charge,
                    Amount::new(amount.into()).unwrap(),
                    "INR",
                )
                .user(instructor)
                .wallet(wallet.id)
                .external_ref(order_ref.clone()),
            )
            .await
            .unwrap();
        (order_ref, tx)
    }

    #[tokio::test]
    async fn test_capture_then_replay() {
        let mut f = fixture().await;
        let (order_ref, tx) = order(&mut f, 1000).await;
        let captured = f.gateway.capture(&order_ref, "upi").unwrap();
        let hook = f.gateway.webhook(PAYMENT_CAPTURED, &captured.payment_ref).unwrap();

        let first = f
            .processor
            .handle(PAYMENT_CAPTURED, &hook.body, &hook.signature)
            .await
            .unwrap();
        match first {
            WebhookOutcome::Applied(updated) => {
                assert_eq!(updated.status, TransactionStatus::Success);
                assert_eq!(updated.metadata["payment_method"], "upi");
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let replay = f
            .processor
            .handle(PAYMENT_CAPTURED, &hook.body, &hook.signature)
            .await
            .unwrap();
        assert_eq!(replay, WebhookOutcome::AlreadyProcessed(tx.id));
        let balance = f.orchestrator.wallets().get_balance(f.wallet_id).await.unwrap();
        assert_eq!(balance.value(), dec!(750));
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let mut f = fixture().await;
        let (order_ref, tx) = order(&mut f, 1000).await;
        let captured = f.gateway.capture(&order_ref, "card").unwrap();
        let hook = f.gateway.webhook(ORDER_PAID, &captured.payment_ref).unwrap();

        let forged = SandboxGateway::sign("wrong-secret", &hook.body);
        let result = f.processor.handle(ORDER_PAID, &hook.body, &forged).await;
        assert!(matches!(result, Err(LedgerError::SignatureInvalid)));
        assert_eq!(
            f.orchestrator.ledger().get(tx.id).await.unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_payment_failed_marks_failed() {
        let mut f = fixture().await;
        let (order_ref, tx) = order(&mut f, 500).await;
        let payment_ref = f.gateway.decline(&order_ref, "insufficient balance").unwrap();
        let hook = f.gateway.webhook(PAYMENT_FAILED, &payment_ref).unwrap();

        let outcome = f
            .processor
            .handle(PAYMENT_FAILED, &hook.body, &hook.signature)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied(_)));
        let failed = f.orchestrator.ledger().get(tx.id).await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("insufficient balance"));
    }

    #[tokio::test]
    async fn test_refund_and_unknown_events_are_ignored() {
        let f = fixture().await;
        let body = br#"{"event":"refund.created","payload":{}}"#;
        let signature = SandboxGateway::sign("hook", body);
        let outcome = f
            .processor
            .handle(REFUND_CREATED, body, &signature)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

        let outcome = f
            .processor
            .handle("subscription.charged", body, &signature)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_captured_amount_must_match_charge() {
        let mut f = fixture().await;
        let (order_ref, tx) = order(&mut f, 1000).await;
        let captured = f.gateway.capture(&order_ref, "upi").unwrap();
        let hook = f.gateway.webhook(PAYMENT_CAPTURED, &captured.payment_ref).unwrap();

        let mut payload: Value = serde_json::from_slice(&hook.body).unwrap();
        payload["payload"]["payment"]["entity"]["amount"] = Value::from(100);
        let body = serde_json::to_vec(&payload).unwrap();
        let signature = SandboxGateway::sign("hook", &body);

        let result = f.processor.handle(PAYMENT_CAPTURED, &body, &signature).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(
            f.orchestrator.ledger().get(tx.id).await.unwrap().status,
            TransactionStatus::Pending
        );
        let balance = f.orchestrator.wallets().get_balance(f.wallet_id).await.unwrap();
        assert_eq!(balance.value(), dec!(0));

        let outcome = f
            .processor
            .handle(PAYMENT_CAPTURED, &hook.body, &hook.signature)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_unknown_reference_is_not_found() {
        let f = fixture().await;
        let body = br#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_x","order_id":"order_x"}}}}"#;
        let signature = SandboxGateway::sign("hook", body);
        let result = f.processor.handle(PAYMENT_CAPTURED, body, &signature).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }
}
