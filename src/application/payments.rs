use super::orchestrator::SettlementOrchestrator;
use super::platform::MODULE_TAG;
use crate::domain::Metadata;
use crate::domain::gateway::{Customer, to_minor_units};
use crate::domain::money::Amount;
use crate::domain::ports::GatewayBox;
use crate::domain::transaction::{
    NewTransaction, Transaction, TransactionKind, TransactionStatus,
};
use crate::domain::wallet::WalletKind;
use crate::error::{LedgerError, Result};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Metadata key holding the gateway's payment id once a charge is confirmed.
pub const PAYMENT_ID: &str = "payment_id";

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// The instructor who earns the charge.
    pub instructor_id: Uuid,
    pub payer_id: Option<Uuid>,
    pub amount: Amount,
    pub currency: String,
    pub receipt: String,
    pub module: Option<String>,
    pub metadata: Metadata,
}

/// A charge waiting for the customer to pay `order_ref`.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order_ref: String,
    /// What the gateway will collect, in minor units.
    pub amount_minor: i64,
    pub transaction: Transaction,
}

/// Checkout plumbing between the ledger and a gateway.
///
/// Decimal amounts are converted to the gateway's minor units here and nowhere else.
pub struct PaymentService {
    gateway: GatewayBox,
    orchestrator: Arc<SettlementOrchestrator>,
}

impl PaymentService {
    pub fn new(gateway: GatewayBox, orchestrator: Arc<SettlementOrchestrator>) -> Self {
        Self {
            gateway,
            orchestrator,
        }
    }

    /// Creates a gateway order and the PENDING CHARGE keyed by its order reference.
    pub async fn start_charge(&self, request: ChargeRequest) -> Result<Checkout> {
        let wallet = self
            .orchestrator
            .wallets()
            .find_wallet(request.instructor_id, &WalletKind::Instructor)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found("instructor wallet for user", request.instructor_id)
            })?;
        let amount_minor = to_minor_units(request.amount, &request.currency)?;

        let mut notes = request.metadata;
        if let Some(module) = &request.module {
            notes.insert(MODULE_TAG.to_string(), Value::String(module.to_ascii_lowercase()));
        }
        if let Some(payer) = request.payer_id {
            notes.insert("payer_id".to_string(), Value::String(payer.to_string()));
        }
        notes.insert("receipt".to_string(), Value::String(request.receipt.clone()));

        let order_ref = self
            .gateway
            .create_order(amount_minor, &request.currency, &request.receipt, &notes)
            .await?;
        let transaction = self
            .orchestrator
            .ledger()
            .create(
                NewTransaction::new(TransactionKind::Charge, request.amount, request.currency)
                    .user(request.instructor_id)
                    .wallet(wallet.id)
                    .external_ref(order_ref.clone())
                    .metadata(notes),
            )
            .await?;

        tracing::info!(transaction_id = %transaction.id, order_ref = %order_ref, amount_minor, "charge started");
        Ok(Checkout {
            order_ref,
            amount_minor,
            transaction,
        })
    }

    /// Confirms a payment reported by the checkout page.
    ///
    /// A bad signature fails the charge and returns `SignatureInvalid`. A good one completes
    /// it, which applies the revenue split. Repeating a confirmation returns `Conflict`.
    pub async fn verify_payment(
        &self,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<Transaction> {
        let tx = self
            .orchestrator
            .ledger()
            .find_by_external_ref(order_ref)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction for order", order_ref))?;

        if !self
            .gateway
            .verify_payment_signature(order_ref, payment_ref, signature)
        {
            tracing::warn!(transaction_id = %tx.id, order_ref, "payment signature rejected");
            match self
                .orchestrator
                .fail_transaction(tx.id, "payment signature verification failed")
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
            return Err(LedgerError::SignatureInvalid);
        }

        let details = self.gateway.fetch_payment_details(payment_ref).await?;
        let expected = to_minor_units(tx.amount, &tx.currency)?;
        if details.amount != expected {
            return Err(LedgerError::Validation(format!(
                "gateway captured {} minor units, charge expects {expected}",
                details.amount
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert(PAYMENT_ID.to_string(), Value::String(payment_ref.to_string()));
        if let Some(method) = details.method {
            metadata.insert("payment_method".to_string(), Value::String(method));
        }
        self.orchestrator.complete_transaction(tx.id, metadata).await
    }

    /// Refunds a settled charge. Returns the REFUND row.
    ///
    /// The ledger goes first: the refund is checked and its shares taken back before the
    /// gateway is asked to move money. A gateway failure releases the held refund.
    pub async fn refund_payment(
        &self,
        transaction_id: Uuid,
        amount: Option<Amount>,
        reason: &str,
    ) -> Result<Transaction> {
        let tx = self.orchestrator.ledger().get(transaction_id).await?;
        if tx.kind != TransactionKind::Charge || tx.status != TransactionStatus::Success {
            return Err(LedgerError::Conflict(format!(
                "{} {transaction_id} is {}, only settled charges can be refunded",
                tx.kind, tx.status
            )));
        }
        let payment_ref = tx
            .metadata
            .get(PAYMENT_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "charge {transaction_id} has no gateway payment to refund"
                ))
            })?;
        if let Some(amount) = amount {
            to_minor_units(amount, &tx.currency)?;
        }

        let held = self
            .orchestrator
            .begin_refund(transaction_id, amount, reason)
            .await?;
        let minor = to_minor_units(held.amount, &held.currency)?;
        match self.gateway.initiate_refund(payment_ref, Some(minor)).await {
            Ok(refund_ref) => {
                tracing::info!(transaction_id = %transaction_id, refund_ref = %refund_ref, "gateway refund initiated");
                self.orchestrator
                    .confirm_refund(held.id, Some(refund_ref))
                    .await
            }
            Err(e) => {
                self.orchestrator
                    .release_refund(held.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    pub async fn create_payment_link(
        &self,
        amount: Amount,
        currency: &str,
        description: &str,
        customer: Option<&Customer>,
    ) -> Result<String> {
        let minor = to_minor_units(amount, currency)?;
        self.gateway
            .create_payment_link(minor, currency, description, customer)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use crate::domain::gateway::GatewayConfig;
    use crate::domain::ports::{GatewayProvider, SharedStore};
    use crate::domain::transaction::TransactionFilter;
    use crate::infrastructure::gateway::sandbox::SandboxGateway;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        gateway: Arc<SandboxGateway>,
        orchestrator: Arc<SettlementOrchestrator>,
        payments: PaymentService,
        instructor: Uuid,
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
        let instructor = Uuid::new_v4();
        orchestrator
            .wallets()
            .open_wallet(instructor, WalletKind::Instructor, "INR")
            .await
            .unwrap();
        Fixture {
            payments: PaymentService::new(gateway.clone(), orchestrator.clone()),
            gateway,
            orchestrator,
            instructor,
        }
    }

    fn request(f: &Fixture, amount: rust_decimal::Decimal) -> ChargeRequest {
        ChargeRequest {
            instructor_id: f.instructor,
            payer_id: Some(Uuid::new_v4()),
            amount: Amount::new(amount).unwrap(),
            currency: "INR".to_string(),
            receipt: "rcpt-1".to_string(),
            module: Some("Courses".to_string()),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_charge_verify_refund() {
        let f = fixture().await;
        let checkout = f.payments.start_charge(request(&f, dec!(10000))).await.unwrap();
        assert_eq!(checkout.amount_minor, 1_000_000);
        assert_eq!(checkout.transaction.metadata[MODULE_TAG], "courses");

        let captured = f.gateway.capture(&checkout.order_ref, "upi").unwrap();
        let settled = f
            .payments
            .verify_payment(&checkout.order_ref, &captured.payment_ref, &captured.signature)
            .await
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);

        let repeat = f
            .payments
            .verify_payment(&checkout.order_ref, &captured.payment_ref, &captured.signature)
            .await;
        assert!(matches!(repeat, Err(LedgerError::Conflict(_))));

        let refund = f
            .payments
            .refund_payment(settled.id, None, "course cancelled")
            .await
            .unwrap();
        assert!(refund.external_ref.as_deref().unwrap().starts_with("rfnd_"));
        let wallet = f
            .orchestrator
            .wallets()
            .find_wallet(f.instructor, &WalletKind::Instructor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wallet.balance.value(), dec!(0));
    }

    async fn settled(f: &Fixture, amount: rust_decimal::Decimal) -> (Transaction, String) {
        let checkout = f.payments.start_charge(request(f, amount)).await.unwrap();
        let captured = f.gateway.capture(&checkout.order_ref, "upi").unwrap();
        let tx = f
            .payments
            .verify_payment(&checkout.order_ref, &captured.payment_ref, &captured.signature)
            .await
            .unwrap();
        (tx, captured.payment_ref)
    }

    async fn instructor_balance(f: &Fixture) -> rust_decimal::Decimal {
        f.orchestrator
            .wallets()
            .find_wallet(f.instructor, &WalletKind::Instructor)
            .await
            .unwrap()
            .unwrap()
            .balance
            .value()
    }

    #[tokio::test]
    async fn test_refund_after_payout_never_reaches_gateway() {
        let f = fixture().await;
        let (charge, payment_ref) = settled(&f, dec!(2000)).await;
        let wallet = charge.wallet_id.unwrap();
        let payout = f
            .orchestrator
            .schedule(f.instructor, wallet, Amount::new(dec!(1500)).unwrap(), None)
            .await
            .unwrap();
        f.orchestrator.process(payout.id, None).await.unwrap();

        for _ in 0..2 {
            let result = f.payments.refund_payment(charge.id, None, "cancelled").await;
            assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        }
        let stored = f.orchestrator.ledger().get(charge.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert!(stored.pending_refund.is_none());
        assert_eq!(instructor_balance(&f).await, dec!(0));

        // the whole payment is still refundable at the gateway
        assert!(f.gateway.initiate_refund(&payment_ref, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_gateway_refund_failure_restores_shares() {
        let f = fixture().await;
        let (charge, _) = settled(&f, dec!(2000)).await;
        f.gateway.set_available(false);

        let result = f.payments.refund_payment(charge.id, None, "cancelled").await;
        assert!(matches!(result, Err(LedgerError::ProviderUnavailable(_))));
        assert_eq!(instructor_balance(&f).await, dec!(1500));
        let stored = f.orchestrator.ledger().get(charge.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert!(stored.pending_refund.is_none());
        let failed = f
            .orchestrator
            .ledger()
            .list(&TransactionFilter {
                kind: Some(TransactionKind::Refund),
                status: Some(TransactionStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].refund_of, Some(charge.id));

        f.gateway.set_available(true);
        let refund = f
            .payments
            .refund_payment(charge.id, None, "cancelled")
            .await
            .unwrap();
        assert_eq!(refund.status, TransactionStatus::Success);
        assert_eq!(instructor_balance(&f).await, dec!(0));
        assert_eq!(
            f.orchestrator.ledger().get(charge.id).await.unwrap().status,
            TransactionStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_bad_signature_fails_charge() {
        let f = fixture().await;
        let checkout = f.payments.start_charge(request(&f, dec!(500))).await.unwrap();
        let captured = f.gateway.capture(&checkout.order_ref, "card").unwrap();

        let result = f
            .payments
            .verify_payment(&checkout.order_ref, &captured.payment_ref, "deadbeef")
            .await;
        assert!(matches!(result, Err(LedgerError::SignatureInvalid)));
        let tx = f
            .orchestrator
            .ledger()
            .get(checkout.transaction.id)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_gateway_offline_records_nothing() {
        let f = fixture().await;
        f.gateway.set_available(false);
        let result = f.payments.start_charge(request(&f, dec!(500))).await;
        assert!(matches!(result, Err(LedgerError::ProviderUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());
        let all = f.orchestrator.ledger().list(&Default::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_sub_paisa_amount_rejected() {
        let f = fixture().await;
        let result = f.payments.start_charge(request(&f, dec!(10.005))).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_payment_link() {
        let f = fixture().await;
        let customer = Customer {
            name: "Student".to_string(),
            email: Some("student@example.com".to_string()),
            contact: None,
        };
        let link = f
            .payments
            .create_payment_link(
                Amount::new(dec!(499)).unwrap(),
                "INR",
                "Course access",
                Some(&customer),
            )
            .await
            .unwrap();
        assert!(link.starts_with("plink_"));
    }
}
