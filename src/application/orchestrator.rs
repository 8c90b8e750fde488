use super::ledger::TransactionLedger;
use super::platform::{PlatformWallet, PlatformWalletRegistry};
use super::wallets::WalletStore;
use crate::config::{SettlementConfig, WalletEffect};
use crate::domain::Metadata;
use crate::domain::money::Amount;
use crate::domain::payout::{BankDetails, Payout, PayoutFilter, PayoutItem, PayoutStatus};
use crate::domain::ports::{SharedStore, UnitOfWork};
use crate::domain::split::{self, FeeBreakdown, RevenueSplit};
use crate::domain::transaction::{
    NewTransaction, Transaction, TransactionKind, TransactionStatus,
};
use crate::domain::wallet::WalletKind;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use uuid::Uuid;

/// Result of processing one payout during a sweep.
#[derive(Debug)]
pub struct SweepOutcome {
    pub payout_id: Uuid,
    pub result: Result<Payout>,
}

/// Wallets credited by a charge split, other than the instructor's.
#[derive(Debug, Clone, Copy)]
struct SplitWallets {
    commission: Uuid,
    tax: Uuid,
}

/// The only component that changes transaction and payout status.
///
/// Every status change and the balance movements it causes run in one unit of work: they
/// commit together or not at all.
pub struct SettlementOrchestrator {
    store: SharedStore,
    wallets: WalletStore,
    ledger: TransactionLedger,
    platform: PlatformWalletRegistry,
    config: SettlementConfig,
}

impl SettlementOrchestrator {
    pub fn new(store: SharedStore, config: SettlementConfig) -> Self {
        let wallets = WalletStore::new(store.clone());
        Self {
            ledger: TransactionLedger::new(store.clone()),
            platform: PlatformWalletRegistry::new(wallets.clone(), config.currency.clone()),
            wallets,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn wallets(&self) -> &WalletStore {
        &self.wallets
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn platform(&self) -> &PlatformWalletRegistry {
        &self.platform
    }

    async fn split_wallets(&self) -> Result<SplitWallets> {
        let commission = self.platform.get_or_create(PlatformWallet::Commission).await?;
        let tax = self.platform.get_or_create(PlatformWallet::Tax).await?;
        Ok(SplitWallets {
            commission: commission.id,
            tax: tax.id,
        })
    }

    async fn instructor_wallet(&self, uow: &mut dyn UnitOfWork, tx: &Transaction) -> Result<Uuid> {
        let user = tx.user_id.ok_or_else(|| {
            LedgerError::Validation(format!("charge {} has no instructor", tx.id))
        })?;
        let wallet = uow
            .wallet_by_owner(user, &WalletKind::Instructor)
            .await?
            .ok_or_else(|| LedgerError::not_found("instructor wallet for user", user))?;
        Ok(wallet.id)
    }

    /// PENDING -> SUCCESS, with the side effects of the transaction's kind.
    ///
    /// A CHARGE credits the instructor, commission and tax wallets with its revenue split.
    /// Other kinds move their own wallet as the ledger rules say. A second call fails with
    /// `Conflict` and changes nothing.
    pub async fn complete_transaction(&self, id: Uuid, metadata: Metadata) -> Result<Transaction> {
        // kind never changes, so it is safe to look at before taking the unit
        let kind = self.ledger.get(id).await?.kind;
        if kind == TransactionKind::Refund {
            return Err(LedgerError::Validation(format!(
                "refund {id} settles through confirm_refund"
            )));
        }
        let split_wallets = match kind {
            TransactionKind::Charge => Some(self.split_wallets().await?),
            _ => None,
        };

        let mut uow = self.store.begin().await?;
        let mut tx = self
            .ledger
            .transition_in(
                uow.as_mut(),
                id,
                TransactionStatus::Pending,
                TransactionStatus::Success,
                metadata,
            )
            .await?;

        match (tx.kind, split_wallets) {
            (TransactionKind::Charge, Some(targets)) => {
                self.apply_split(uow.as_mut(), &mut tx, targets).await?;
            }
            _ => self.apply_rule(uow.as_mut(), &tx).await?,
        }
        uow.commit().await?;

        tracing::info!(transaction_id = %tx.id, kind = %tx.kind, amount = %tx.amount, "transaction completed");
        Ok(tx)
    }

    async fn apply_split(
        &self,
        uow: &mut dyn UnitOfWork,
        tx: &mut Transaction,
        targets: SplitWallets,
    ) -> Result<()> {
        if tx.split.is_some() {
            tracing::warn!(transaction_id = %tx.id, "revenue split already applied, skipping");
            return Ok(());
        }
        let instructor = self.instructor_wallet(uow, tx).await?;
        let shares = split::split(tx.amount, &self.config.split_rates);

        self.wallets
            .apply_delta(uow, instructor, shares.instructor)
            .await?;
        self.wallets
            .apply_delta(uow, targets.commission, shares.commission)
            .await?;
        self.wallets.apply_delta(uow, targets.tax, shares.tax).await?;

        tx.metadata
            .insert("split".to_string(), serde_json::to_value(&shares)?);
        tx.split = Some(shares);
        uow.update_transaction(tx.clone()).await
    }

    async fn apply_rule(&self, uow: &mut dyn UnitOfWork, tx: &Transaction) -> Result<()> {
        let delta = match self.config.ledger_rules.effect(tx.kind) {
            WalletEffect::Add => tx.amount.value(),
            WalletEffect::Subtract => -tx.amount.value(),
            WalletEffect::None => return Ok(()),
        };
        let wallet_id = tx.wallet_id.ok_or_else(|| {
            LedgerError::Validation(format!("{} transaction {} has no wallet", tx.kind, tx.id))
        })?;
        self.wallets.apply_delta(uow, wallet_id, delta).await?;
        Ok(())
    }

    /// PENDING -> FAILED. No balance moves, except for a REFUND held for the gateway: that
    /// one is released and its shares go back to their wallets.
    pub async fn fail_transaction(&self, id: Uuid, reason: &str) -> Result<Transaction> {
        if self.ledger.get(id).await?.kind == TransactionKind::Refund {
            return self.release_refund(id, reason).await;
        }
        let mut extra = Metadata::new();
        extra.insert("failure_reason".to_string(), Value::String(reason.to_string()));

        let mut uow = self.store.begin().await?;
        let mut tx = self
            .ledger
            .transition_in(
                uow.as_mut(),
                id,
                TransactionStatus::Pending,
                TransactionStatus::Failed,
                extra,
            )
            .await?;
        tx.failure_reason = Some(reason.to_string());
        uow.update_transaction(tx.clone()).await?;
        uow.commit().await?;

        tracing::warn!(transaction_id = %id, reason, "transaction failed");
        Ok(tx)
    }

    /// Refunds a settled CHARGE, fully or in part, once.
    ///
    /// The charge moves SUCCESS -> REFUNDED and a SUCCESS REFUND row is recorded. The split is
    /// recomputed on the refunded amount with the rates the charge was settled at, and each
    /// share is taken back from the wallet it went to. Returns the REFUND row.
    pub async fn refund(
        &self,
        id: Uuid,
        amount: Option<Amount>,
        reason: &str,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        let targets = self.split_wallets().await?;
        let mut uow = self.store.begin().await?;
        let refund = self
            .stage_refund(uow.as_mut(), id, amount, reason, targets)
            .await?;
        let refund = self
            .settle_refund(uow.as_mut(), refund, external_ref)
            .await?;
        uow.commit().await?;

        tracing::info!(transaction_id = %id, refund_id = %refund.id, amount = %refund.amount, "charge refunded");
        Ok(refund)
    }

    /// First half of a gateway refund: every ledger check and the split reversal, committed
    /// before any money moves at the gateway.
    ///
    /// Returns a PENDING REFUND row. The charge stays SUCCESS but refuses other refunds until
    /// [`confirm_refund`](Self::confirm_refund) or [`release_refund`](Self::release_refund).
    pub async fn begin_refund(
        &self,
        id: Uuid,
        amount: Option<Amount>,
        reason: &str,
    ) -> Result<Transaction> {
        let targets = self.split_wallets().await?;
        let mut uow = self.store.begin().await?;
        let refund = self
            .stage_refund(uow.as_mut(), id, amount, reason, targets)
            .await?;
        uow.commit().await?;

        tracing::info!(transaction_id = %id, refund_id = %refund.id, amount = %refund.amount, "refund held for gateway");
        Ok(refund)
    }

    /// The gateway accepted the refund: PENDING REFUND -> SUCCESS, charge SUCCESS -> REFUNDED.
    pub async fn confirm_refund(
        &self,
        refund_id: Uuid,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        let mut uow = self.store.begin().await?;
        let refund = self.held_refund(uow.as_mut(), refund_id).await?;
        let refund = self
            .settle_refund(uow.as_mut(), refund, external_ref)
            .await?;
        uow.commit().await?;

        tracing::info!(refund_id = %refund_id, "refund confirmed");
        Ok(refund)
    }

    /// The gateway refused the refund: PENDING REFUND -> FAILED and the shares taken back by
    /// [`begin_refund`](Self::begin_refund) are credited again. The charge can be refunded
    /// afresh.
    pub async fn release_refund(&self, refund_id: Uuid, reason: &str) -> Result<Transaction> {
        let targets = self.split_wallets().await?;
        let mut uow = self.store.begin().await?;
        let mut refund = self.held_refund(uow.as_mut(), refund_id).await?;
        refund.transition(TransactionStatus::Pending, TransactionStatus::Failed)?;
        refund.failure_reason = Some(reason.to_string());
        refund
            .metadata
            .insert("failure_reason".to_string(), Value::String(reason.to_string()));

        if let (Some(reversal), Some(instructor)) = (&refund.split, refund.wallet_id) {
            for (wallet_id, share) in [
                (instructor, reversal.instructor),
                (targets.commission, reversal.commission),
                (targets.tax, reversal.tax),
            ] {
                if share > Decimal::ZERO {
                    self.wallets.apply_delta(uow.as_mut(), wallet_id, share).await?;
                }
            }
        }
        uow.update_transaction(refund.clone()).await?;

        if let Some(charge_id) = refund.refund_of
            && let Some(mut charge) = uow.transaction(charge_id).await?
            && charge.pending_refund == Some(refund_id)
        {
            charge.pending_refund = None;
            uow.update_transaction(charge).await?;
        }
        uow.commit().await?;

        tracing::warn!(refund_id = %refund_id, reason, "refund released");
        Ok(refund)
    }

    async fn held_refund(&self, uow: &mut dyn UnitOfWork, refund_id: Uuid) -> Result<Transaction> {
        let refund = uow
            .transaction(refund_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("refund", refund_id))?;
        if refund.kind != TransactionKind::Refund {
            return Err(LedgerError::Validation(format!(
                "{refund_id} is a {}, not a REFUND",
                refund.kind
            )));
        }
        Ok(refund)
    }

    /// Checks the charge, records a PENDING REFUND and takes the split back.
    async fn stage_refund(
        &self,
        uow: &mut dyn UnitOfWork,
        id: Uuid,
        amount: Option<Amount>,
        reason: &str,
        targets: SplitWallets,
    ) -> Result<Transaction> {
        let mut charge = uow
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", id))?;
        if charge.kind != TransactionKind::Charge {
            return Err(LedgerError::Validation(format!(
                "only CHARGE transactions can be refunded, {id} is {}",
                charge.kind
            )));
        }
        if charge.status != TransactionStatus::Success {
            return Err(LedgerError::Conflict(format!(
                "charge {id} is {}, only SUCCESS charges can be refunded",
                charge.status
            )));
        }
        if let Some(held) = charge.pending_refund {
            return Err(LedgerError::Conflict(format!(
                "charge {id} already has refund {held} in flight"
            )));
        }
        let amount = amount.unwrap_or(charge.amount);
        if amount > charge.amount {
            return Err(LedgerError::InvalidAmount(format!(
                "refund of {amount} exceeds charge of {}",
                charge.amount
            )));
        }

        let instructor = self.instructor_wallet(uow, &charge).await?;
        let mut new = NewTransaction::new(TransactionKind::Refund, amount, charge.currency.clone())
            .wallet(instructor)
            .metadata(Metadata::from_iter([
                ("reason".to_string(), Value::String(reason.to_string())),
                ("refund_of".to_string(), Value::String(id.to_string())),
            ]));
        if let Some(user) = charge.user_id {
            new = new.user(user);
        }
        let mut refund = self.ledger.create_in(uow, new).await?;
        refund.refund_of = Some(id);

        if let Some(applied) = &charge.split {
            let reversal = split::split(amount, &applied.rates);
            self.reverse_split(uow, &reversal, instructor, targets)
                .await?;
            refund
                .metadata
                .insert("split_reversal".to_string(), serde_json::to_value(&reversal)?);
            refund.split = Some(reversal);
        }
        uow.update_transaction(refund.clone()).await?;

        charge.pending_refund = Some(refund.id);
        charge
            .metadata
            .insert("refund_reason".to_string(), Value::String(reason.to_string()));
        uow.update_transaction(charge).await?;
        Ok(refund)
    }

    /// PENDING REFUND -> SUCCESS and its charge SUCCESS -> REFUNDED, in the caller's unit.
    async fn settle_refund(
        &self,
        uow: &mut dyn UnitOfWork,
        mut refund: Transaction,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        let charge_id = refund.refund_of.ok_or_else(|| {
            LedgerError::Validation(format!("refund {} has no charge", refund.id))
        })?;
        refund.transition(TransactionStatus::Pending, TransactionStatus::Success)?;
        if external_ref.is_some() {
            refund.external_ref = external_ref;
        }
        uow.update_transaction(refund.clone()).await?;

        let mut charge = self
            .ledger
            .transition_in(
                uow,
                charge_id,
                TransactionStatus::Success,
                TransactionStatus::Refunded,
                Metadata::new(),
            )
            .await?;
        charge.pending_refund = None;
        uow.update_transaction(charge).await?;
        Ok(refund)
    }

    async fn reverse_split(
        &self,
        uow: &mut dyn UnitOfWork,
        reversal: &RevenueSplit,
        instructor: Uuid,
        targets: SplitWallets,
    ) -> Result<()> {
        for (wallet_id, share) in [
            (instructor, reversal.instructor),
            (targets.commission, reversal.commission),
            (targets.tax, reversal.tax),
        ] {
            if share > Decimal::ZERO {
                self.wallets.apply_delta(uow, wallet_id, -share).await?;
            }
        }
        Ok(())
    }

    /// Creates a payout from an instructor's wallet: PENDING, or SCHEDULED when
    /// `scheduled_for` is in the future.
    pub async fn schedule(
        &self,
        instructor_id: Uuid,
        wallet_id: Uuid,
        amount: Amount,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<Payout> {
        let minimum = self.config.payout.minimum_amount;
        if amount.value() < minimum {
            return Err(LedgerError::InvalidAmount(format!(
                "payout of {amount} is below the minimum of {minimum}"
            )));
        }

        let mut uow = self.store.begin().await?;
        let wallet = uow
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", wallet_id))?;
        if !wallet.is_owned_by(instructor_id) || wallet.kind != WalletKind::Instructor {
            return Err(LedgerError::Validation(format!(
                "wallet {wallet_id} is not an instructor wallet of {instructor_id}"
            )));
        }
        if !wallet.balance.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                wallet_id,
                balance: wallet.balance.value(),
                requested: amount.value(),
            });
        }

        let payout = Payout::new(
            instructor_id,
            wallet_id,
            amount,
            wallet.currency.clone(),
            scheduled_for,
            Utc::now(),
        );
        uow.insert_payout(payout.clone()).await?;
        uow.commit().await?;

        tracing::info!(payout_id = %payout.id, instructor_id = %instructor_id, amount = %amount, status = %payout.status, "payout scheduled");
        Ok(payout)
    }

    /// Pays out an open payout.
    ///
    /// Runs in two units. The first re-checks the balance and claims the payout
    /// (PENDING | SCHEDULED -> PROCESSING); a concurrent second call fails there with
    /// `Conflict`. The second releases the funds and completes it. If the second unit fails
    /// the payout is marked FAILED and the error returned.
    pub async fn process(&self, payout_id: Uuid, bank: Option<BankDetails>) -> Result<Payout> {
        let mut uow = self.store.begin().await?;
        let mut payout = uow
            .payout(payout_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payout", payout_id))?;
        payout.begin_processing()?;

        let wallet = uow
            .wallet(payout.wallet_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", payout.wallet_id))?;
        if !wallet.balance.covers(payout.amount) {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: wallet.id,
                balance: wallet.balance.value(),
                requested: payout.amount.value(),
            });
        }
        if let Some(bank) = bank {
            payout.metadata.insert(
                "bank_account".to_string(),
                json!({
                    "account_holder": bank.account_holder,
                    "account_number": bank.masked_account_number(),
                    "ifsc": bank.ifsc,
                }),
            );
        }
        uow.update_payout(payout).await?;
        uow.commit().await?;
        tracing::debug!(payout_id = %payout_id, "payout claimed for processing");

        self.settle_or_fail(payout_id).await
    }

    /// Finishes a payout left in PROCESSING, e.g. after a crash between the two units of
    /// `process`. Safe to repeat: funds already released are not released again.
    pub async fn reconcile(&self, payout_id: Uuid) -> Result<Payout> {
        self.settle_or_fail(payout_id).await
    }

    async fn settle_or_fail(&self, payout_id: Uuid) -> Result<Payout> {
        match self.settle(payout_id).await {
            Ok(payout) => Ok(payout),
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                tracing::error!(payout_id = %payout_id, error = %e, "payout settlement failed");
                self.mark_failed(payout_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn settle(&self, payout_id: Uuid) -> Result<Payout> {
        let mut uow = self.store.begin().await?;
        let mut payout = uow
            .payout(payout_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payout", payout_id))?;
        if payout.status != PayoutStatus::Processing {
            return Err(LedgerError::Conflict(format!(
                "payout {payout_id} is {}, not PROCESSING",
                payout.status
            )));
        }

        if uow.payout_items(payout_id).await?.is_empty() {
            let new = NewTransaction::new(
                TransactionKind::Payout,
                payout.amount,
                payout.currency.clone(),
            )
            .wallet(payout.wallet_id)
            .user(payout.instructor_id)
            .metadata(Metadata::from_iter([(
                "payout_id".to_string(),
                Value::String(payout_id.to_string()),
            )]));
            let tx = self.ledger.create_in(uow.as_mut(), new).await?;
            let tx = self
                .ledger
                .transition_in(
                    uow.as_mut(),
                    tx.id,
                    TransactionStatus::Pending,
                    TransactionStatus::Success,
                    Metadata::new(),
                )
                .await?;
            // released funds always leave the wallet, whatever the rule table says
            self.wallets
                .apply_delta(uow.as_mut(), payout.wallet_id, -payout.amount.value())
                .await?;
            uow.insert_payout_item(PayoutItem::new(payout_id, tx.id, payout.amount))
                .await?;
        } else {
            tracing::debug!(payout_id = %payout_id, "funds already released, completing payout");
        }

        let settlement_ref = format!("STL-{}", Uuid::new_v4().simple()).to_uppercase();
        payout.complete(settlement_ref, Utc::now())?;
        uow.update_payout(payout.clone()).await?;
        uow.commit().await?;

        tracing::info!(payout_id = %payout_id, amount = %payout.amount, "payout completed");
        Ok(payout)
    }

    async fn mark_failed(&self, payout_id: Uuid, reason: &str) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let Some(mut payout) = uow.payout(payout_id).await? else {
            return Ok(());
        };
        if payout.status != PayoutStatus::Processing {
            return Ok(());
        }
        payout.fail(reason)?;
        uow.update_payout(payout).await?;
        uow.commit().await
    }

    /// PENDING | SCHEDULED -> FAILED. A cancelled payout is never retried.
    pub async fn cancel(&self, payout_id: Uuid, reason: &str) -> Result<Payout> {
        let mut uow = self.store.begin().await?;
        let mut payout = uow
            .payout(payout_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payout", payout_id))?;
        payout.cancel(reason)?;
        uow.update_payout(payout.clone()).await?;
        uow.commit().await?;

        tracing::info!(payout_id = %payout_id, reason, "payout cancelled");
        Ok(payout)
    }

    /// FAILED -> PENDING, then processes the payout again.
    pub async fn retry(&self, payout_id: Uuid) -> Result<Payout> {
        let mut uow = self.store.begin().await?;
        let mut payout = uow
            .payout(payout_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payout", payout_id))?;
        payout.reset_for_retry()?;
        uow.update_payout(payout).await?;
        uow.commit().await?;

        tracing::info!(payout_id = %payout_id, "payout retried");
        self.process(payout_id, None).await
    }

    /// Processes every SCHEDULED payout due at `now`. One payout failing does not stop the
    /// others; each gets its own outcome.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<Vec<SweepOutcome>> {
        let due = self
            .store
            .payouts(&PayoutFilter {
                status: Some(PayoutStatus::Scheduled),
                due_by: Some(now),
                ..Default::default()
            })
            .await?;

        let mut outcomes = Vec::with_capacity(due.len());
        for payout in due {
            let result = self.process(payout.id, None).await;
            if let Err(e) = &result {
                tracing::error!(payout_id = %payout.id, error = %e, "scheduled payout failed");
            }
            outcomes.push(SweepOutcome {
                payout_id: payout.id,
                result,
            });
        }
        tracing::info!(count = outcomes.len(), "payout sweep finished");
        Ok(outcomes)
    }

    pub async fn payout(&self, payout_id: Uuid) -> Result<Payout> {
        self.store
            .payout(payout_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payout", payout_id))
    }

    pub async fn payouts_for(&self, instructor_id: Uuid) -> Result<Vec<Payout>> {
        self.store
            .payouts(&PayoutFilter {
                instructor_id: Some(instructor_id),
                ..Default::default()
            })
            .await
    }

    pub async fn payout_items(&self, payout_id: Uuid) -> Result<Vec<PayoutItem>> {
        self.store.payout_items(payout_id).await
    }

    /// Fee and net for a payout of `amount` under the configured payout policy.
    pub fn preview_payout_fee(&self, amount: Decimal) -> Result<FeeBreakdown> {
        let minimum = self.config.payout.minimum_amount;
        if amount < minimum {
            return Err(LedgerError::InvalidAmount(format!(
                "payout of {amount} is below the minimum of {minimum}"
            )));
        }
        Ok(split::net_after_fee(amount, &self.config.payout.fee))
    }
}
