use super::csv::event_reader::{EventOp, LedgerEvent};
use super::csv::wallet_writer::WalletRow;
use crate::application::orchestrator::SettlementOrchestrator;
use crate::application::payments::{ChargeRequest, PaymentService};
use crate::application::webhook::{PAYMENT_CAPTURED, PAYMENT_FAILED, WebhookOutcome, WebhookProcessor};
use crate::config::SettlementConfig;
use crate::domain::Metadata;
use crate::domain::gateway::GatewayConfig;
use crate::domain::money::Amount;
use crate::domain::ports::SharedStore;
use crate::domain::transaction::{NewTransaction, TransactionKind};
use crate::domain::wallet::WalletKind;
use crate::error::{LedgerError, Result};
use crate::infrastructure::gateway::sandbox::SandboxGateway;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Drives the engine from a script of [`LedgerEvent`]s against the sandbox gateway.
///
/// User labels map to stable ids, so a persistent store sees the same users across runs.
/// Receipts and payout labels only resolve within one run.
pub struct Replayer {
    orchestrator: Arc<SettlementOrchestrator>,
    payments: PaymentService,
    webhooks: WebhookProcessor,
    gateway: Arc<SandboxGateway>,
    users: HashMap<Uuid, String>,
    orders: HashMap<String, String>,
    payouts: HashMap<String, Uuid>,
}

impl Replayer {
    pub fn new(store: SharedStore, config: SettlementConfig, gateway_secret: &str) -> Self {
        let gateway = Arc::new(SandboxGateway::new(GatewayConfig {
            key_id: "sandbox".to_string(),
            key_secret: gateway_secret.to_string(),
            webhook_secret: format!("{gateway_secret}:webhook"),
            currency: config.currency.clone(),
        }));
        let orchestrator = Arc::new(SettlementOrchestrator::new(store, config));
        Self {
            payments: PaymentService::new(gateway.clone(), orchestrator.clone()),
            webhooks: WebhookProcessor::new(gateway.clone(), orchestrator.clone()),
            orchestrator,
            gateway,
            users: HashMap::new(),
            orders: HashMap::new(),
            payouts: HashMap::new(),
        }
    }

    pub fn orchestrator(&self) -> &SettlementOrchestrator {
        &self.orchestrator
    }

    fn user(&mut self, event: &LedgerEvent) -> Result<Uuid> {
        let label = required(event.user.as_deref(), "user")?;
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes());
        self.users.insert(id, label.to_string());
        Ok(id)
    }

    fn order(&self, event: &LedgerEvent) -> Result<String> {
        let receipt = required(event.reference.as_deref(), "reference")?;
        self.orders
            .get(receipt)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("order for receipt", receipt))
    }

    fn payout_id(&self, event: &LedgerEvent) -> Result<Uuid> {
        let label = required(event.reference.as_deref(), "reference")?;
        self.payouts
            .get(label)
            .copied()
            .ok_or_else(|| LedgerError::not_found("payout", label))
    }

    fn currency(&self) -> String {
        self.orchestrator.config().currency.clone()
    }

    pub async fn apply(&mut self, event: LedgerEvent) -> Result<()> {
        match event.op {
            EventOp::Open => {
                let user = self.user(&event)?;
                let kind = wallet_kind(&event)?;
                self.orchestrator
                    .wallets()
                    .open_wallet(user, kind, &self.currency())
                    .await?;
            }
            EventOp::Adjust => {
                let user = self.user(&event)?;
                let kind = wallet_kind(&event)?;
                let amount = amount(&event)?;
                let wallet = self
                    .orchestrator
                    .wallets()
                    .find_wallet(user, &kind)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("wallet for user", user))?;
                let tx = self
                    .orchestrator
                    .ledger()
                    .create(
                        NewTransaction::new(TransactionKind::Adjustment, amount, wallet.currency)
                            .wallet(wallet.id)
                            .user(user),
                    )
                    .await?;
                self.orchestrator
                    .complete_transaction(tx.id, Metadata::new())
                    .await?;
            }
            EventOp::Charge => {
                let instructor_id = self.user(&event)?;
                let receipt = required(event.reference.as_deref(), "reference")?.to_string();
                let checkout = self
                    .payments
                    .start_charge(ChargeRequest {
                        instructor_id,
                        payer_id: None,
                        amount: amount(&event)?,
                        currency: self.currency(),
                        receipt: receipt.clone(),
                        module: event.kind.clone(),
                        metadata: Metadata::new(),
                    })
                    .await?;
                self.orders.insert(receipt, checkout.order_ref);
            }
            EventOp::Capture => {
                let order_ref = self.order(&event)?;
                let method = event.kind.as_deref().unwrap_or("upi");
                let captured = self.gateway.capture(&order_ref, method)?;
                let hook = self.gateway.webhook(PAYMENT_CAPTURED, &captured.payment_ref)?;
                let outcome = self
                    .webhooks
                    .handle(&hook.event, &hook.body, &hook.signature)
                    .await?;
                report(&outcome);
            }
            EventOp::Verify => {
                let order_ref = self.order(&event)?;
                let method = event.kind.as_deref().unwrap_or("card");
                let captured = self.gateway.capture(&order_ref, method)?;
                self.payments
                    .verify_payment(&order_ref, &captured.payment_ref, &captured.signature)
                    .await?;
            }
            EventOp::Fail => {
                let order_ref = self.order(&event)?;
                let reason = event.kind.as_deref().unwrap_or("payment declined");
                let payment_ref = self.gateway.decline(&order_ref, reason)?;
                let hook = self.gateway.webhook(PAYMENT_FAILED, &payment_ref)?;
                let outcome = self
                    .webhooks
                    .handle(&hook.event, &hook.body, &hook.signature)
                    .await?;
                report(&outcome);
            }
            EventOp::Refund => {
                let order_ref = self.order(&event)?;
                let tx = self
                    .orchestrator
                    .ledger()
                    .find_by_external_ref(&order_ref)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("transaction for order", &order_ref))?;
                let amount = event.amount.map(Amount::new).transpose()?;
                self.payments
                    .refund_payment(tx.id, amount, "refund requested")
                    .await?;
            }
            EventOp::Payout => {
                let instructor = self.user(&event)?;
                let label = required(event.reference.as_deref(), "reference")?.to_string();
                let wallet = self
                    .orchestrator
                    .wallets()
                    .find_wallet(instructor, &WalletKind::Instructor)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("instructor wallet for user", instructor))?;
                let payout = self
                    .orchestrator
                    .schedule(instructor, wallet.id, amount(&event)?, event.at)
                    .await?;
                self.payouts.insert(label, payout.id);
            }
            EventOp::Process => {
                let id = self.payout_id(&event)?;
                self.orchestrator.process(id, None).await?;
            }
            EventOp::Cancel => {
                let id = self.payout_id(&event)?;
                let reason = event.kind.as_deref().unwrap_or("cancelled by operator");
                self.orchestrator.cancel(id, reason).await?;
            }
            EventOp::Retry => {
                let id = self.payout_id(&event)?;
                self.orchestrator.retry(id).await?;
            }
            EventOp::Sweep => {
                let now = event.at.unwrap_or_else(Utc::now);
                for outcome in self.orchestrator.process_due(now).await? {
                    if let Err(e) = outcome.result {
                        tracing::error!(payout_id = %outcome.payout_id, error = %e, "Error processing payout");
                    }
                }
            }
        }
        Ok(())
    }

    /// Every wallet with its owner label, users first, then platform wallets.
    pub async fn wallet_rows(&self) -> Result<Vec<WalletRow>> {
        let mut rows: Vec<WalletRow> = self
            .orchestrator
            .wallets()
            .list_wallets()
            .await?
            .into_iter()
            .map(|wallet| WalletRow {
                owner: match wallet.user_id {
                    Some(id) => self
                        .users
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| id.to_string()),
                    None => "platform".to_string(),
                },
                kind: wallet.kind.to_string(),
                balance: wallet.balance.value(),
                currency: wallet.currency,
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.owner == "platform", &a.owner, &a.kind).cmp(&(b.owner == "platform", &b.owner, &b.kind))
        });
        Ok(rows)
    }
}

fn required<'a>(value: Option<&'a str>, column: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::Validation(format!("column '{column}' is required")))
}

fn amount(event: &LedgerEvent) -> Result<Amount> {
    let value = event
        .amount
        .ok_or_else(|| LedgerError::Validation("column 'amount' is required".to_string()))?;
    Amount::new(value)
}

fn wallet_kind(event: &LedgerEvent) -> Result<WalletKind> {
    event.kind.as_deref().unwrap_or("instructor").parse()
}

fn report(outcome: &WebhookOutcome) {
    if let WebhookOutcome::AlreadyProcessed(id) = outcome {
        tracing::info!(transaction_id = %id, "gateway event was a replay");
    }
}
