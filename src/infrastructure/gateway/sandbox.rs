use crate::domain::Metadata;
use crate::domain::gateway::{Customer, GatewayConfig, PaymentDetails};
use crate::domain::ports::GatewayProvider;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
struct SandboxOrder {
    amount: i64,
    currency: String,
    receipt: String,
    paid: bool,
}

#[derive(Debug, Default)]
struct SandboxState {
    orders: HashMap<String, SandboxOrder>,
    payments: HashMap<String, PaymentDetails>,
    refunded: HashMap<String, i64>,
    links: HashMap<String, i64>,
    failure_reasons: HashMap<String, String>,
}

/// What a checkout page hands back after the customer pays.
#[derive(Debug, Clone)]
pub struct CapturedPayment {
    pub order_ref: String,
    pub payment_ref: String,
    pub signature: String,
}

/// A webhook body exactly as the gateway would deliver it, with its signature header value.
#[derive(Debug, Clone)]
pub struct SignedWebhook {
    pub event: String,
    pub body: Vec<u8>,
    pub signature: String,
}

/// In-process gateway that behaves like a hosted checkout.
///
/// Payment confirmations are signed with HMAC-SHA256 over `order_ref|payment_ref` using the
/// key secret; webhook bodies are signed with the webhook secret. Orders, payments and refunds
/// are kept in memory. Calls that would hit the network fail with `ProviderUnavailable` while
/// the gateway is switched off.
pub struct SandboxGateway {
    config: GatewayConfig,
    state: Mutex<SandboxState>,
    available: AtomicBool,
}

impl SandboxGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SandboxState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Hex-encoded HMAC-SHA256 of `data`.
    pub fn sign(secret: &str, data: &[u8]) -> String {
        // HMAC accepts keys of any length
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return String::new();
        };
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(secret: &str, data: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(data);
        // constant-time comparison
        mac.verify_slice(&expected).is_ok()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::ProviderUnavailable(
                "sandbox gateway is offline".to_string(),
            ))
        }
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulates the customer paying an order.
    pub fn capture(&self, order_ref: &str, method: &str) -> Result<CapturedPayment> {
        let mut state = self.state();
        let order = state
            .orders
            .get_mut(order_ref)
            .ok_or_else(|| LedgerError::not_found("order", order_ref))?;
        if order.paid {
            return Err(LedgerError::Conflict(format!("order {order_ref} already paid")));
        }
        order.paid = true;
        let details = PaymentDetails {
            payment_ref: format!("pay_{}", Uuid::new_v4().simple()),
            order_ref: Some(order_ref.to_string()),
            method: Some(method.to_string()),
            amount: order.amount,
            currency: order.currency.clone(),
            status: "captured".to_string(),
        };
        let payment_ref = details.payment_ref.clone();
        state.payments.insert(payment_ref.clone(), details);

        let payload = format!("{order_ref}|{payment_ref}");
        Ok(CapturedPayment {
            order_ref: order_ref.to_string(),
            signature: Self::sign(&self.config.key_secret, payload.as_bytes()),
            payment_ref,
        })
    }

    /// Simulates a declined payment attempt against an order.
    pub fn decline(&self, order_ref: &str, reason: &str) -> Result<String> {
        let mut state = self.state();
        let order = state
            .orders
            .get(order_ref)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("order", order_ref))?;
        let payment_ref = format!("pay_{}", Uuid::new_v4().simple());
        state.payments.insert(
            payment_ref.clone(),
            PaymentDetails {
                payment_ref: payment_ref.clone(),
                order_ref: Some(order_ref.to_string()),
                method: None,
                amount: order.amount,
                currency: order.currency,
                status: "failed".to_string(),
            },
        );
        state
            .failure_reasons
            .insert(payment_ref.clone(), reason.to_string());
        Ok(payment_ref)
    }

    /// Builds and signs the webhook the gateway sends for `event` about `payment_ref`.
    pub fn webhook(&self, event: &str, payment_ref: &str) -> Result<SignedWebhook> {
        let state = self.state();
        let payment = state
            .payments
            .get(payment_ref)
            .ok_or_else(|| LedgerError::not_found("payment", payment_ref))?;
        let mut payload = json!({
            "payment": {
                "entity": {
                    "id": payment.payment_ref,
                    "order_id": payment.order_ref,
                    "amount": payment.amount,
                    "currency": payment.currency,
                    "method": payment.method,
                    "status": payment.status,
                    "error_description": state.failure_reasons.get(payment_ref),
                }
            }
        });
        if event == "order.paid"
            && let Some(order_ref) = &payment.order_ref
            && let Some(order) = state.orders.get(order_ref)
        {
            payload["order"] = json!({
                "entity": {
                    "id": order_ref,
                    "amount": order.amount,
                    "receipt": order.receipt,
                    "status": "paid",
                }
            });
        }
        let body = serde_json::to_vec(&json!({ "event": event, "payload": payload }))?;
        Ok(SignedWebhook {
            event: event.to_string(),
            signature: Self::sign(&self.config.webhook_secret, &body),
            body,
        })
    }
}

#[async_trait]
impl GatewayProvider for SandboxGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        _notes: &Metadata,
    ) -> Result<String> {
        self.ensure_available()?;
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "order amount must be positive, got {amount}"
            )));
        }
        let order_ref = format!("order_{}", Uuid::new_v4().simple());
        self.state().orders.insert(
            order_ref.clone(),
            SandboxOrder {
                amount,
                currency: currency.to_string(),
                receipt: receipt.to_string(),
                paid: false,
            },
        );
        Ok(order_ref)
    }

    fn verify_payment_signature(
        &self,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> bool {
        let payload = format!("{order_ref}|{payment_ref}");
        Self::verify(&self.config.key_secret, payload.as_bytes(), signature)
    }

    fn verify_webhook_signature(&self, raw_payload: &[u8], signature: &str) -> bool {
        Self::verify(&self.config.webhook_secret, raw_payload, signature)
    }

    async fn fetch_payment_details(&self, payment_ref: &str) -> Result<PaymentDetails> {
        self.ensure_available()?;
        self.state()
            .payments
            .get(payment_ref)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("payment", payment_ref))
    }

    async fn initiate_refund(&self, payment_ref: &str, amount: Option<i64>) -> Result<String> {
        self.ensure_available()?;
        let mut state = self.state();
        let payment = state
            .payments
            .get(payment_ref)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("payment", payment_ref))?;
        if payment.status != "captured" {
            return Err(LedgerError::Conflict(format!(
                "payment {payment_ref} is {}, not captured",
                payment.status
            )));
        }
        let already = state.refunded.get(payment_ref).copied().unwrap_or(0);
        let amount = amount.unwrap_or(payment.amount - already);
        if amount <= 0 || already + amount > payment.amount {
            return Err(LedgerError::InvalidAmount(format!(
                "refund of {amount} exceeds refundable {}",
                payment.amount - already
            )));
        }
        state.refunded.insert(payment_ref.to_string(), already + amount);
        Ok(format!("rfnd_{}", Uuid::new_v4().simple()))
    }

    async fn create_payment_link(
        &self,
        amount: i64,
        _currency: &str,
        _description: &str,
        _customer: Option<&Customer>,
    ) -> Result<String> {
        self.ensure_available()?;
        let link_ref = format!("plink_{}", Uuid::new_v4().simple());
        self.state().links.insert(link_ref.clone(), amount);
        Ok(link_ref)
    }
}
