//! Money entering and leaving the platform through the gateway:
//! wallet funding, withdrawals and webhook settlement.

use tracing::{info, warn};

use super::{Engine, EngineError, PaymentError, ValidationError};
use crate::Amount;
use crate::gateway::{Checkout, PaymentIntent, PaymentPurpose};
use crate::ledger::{Leg, LedgerEntry, LedgerError, Settlement, TrxKind, WalletOwner};
use crate::model::{EscrowState, UserId};
use crate::notify::Notification;
use crate::webhook::{
    EventFamily, GatewayStatus, SIGNATURE_HEADER, WebhookError, WebhookEvent, WebhookReply,
    WebhookStatus,
};

impl Engine {
    /// Open a card top-up for the actor's wallet. The wallet is credited on webhook.
    pub fn fund_wallet(&mut self, actor: UserId, amount: Amount) -> Result<Checkout, EngineError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        let user = self.user_ref(actor)?;
        let (wallet, email) = (user.wallet, user.email.clone());

        let reference = self.ledger.issue_reference(TrxKind::Funding);
        let intent = PaymentIntent {
            reference: reference.clone(),
            amount,
            email,
            purpose: PaymentPurpose::WalletFunding,
        };
        let checkout = self
            .gateway
            .initialize(&intent)
            .map_err(PaymentError::from)?;
        self.ledger
            .open_pending(reference.clone(), Leg::credit(wallet, amount, TrxKind::Funding))?;

        info!(
            user = actor,
            reference = %reference,
            amount = %amount,
            gateway = self.gateway.name(),
            "wallet funding initialized"
        );
        Ok(checkout)
    }

    /// Reserve `amount` for a payout and take the withdrawal charge.
    ///
    /// The gateway's transfer webhook settles the reservation.
    pub fn withdraw(&mut self, actor: UserId, amount: Amount) -> Result<String, EngineError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        let wallet = self.user_ref(actor)?.wallet;
        let fee = self.config.charges.withdrawal.fee_for(amount);

        let requested = amount
            .checked_add(fee)
            .ok_or(ValidationError::AmountTooLarge(amount, fee))?;
        let available = self.ledger.balance(wallet)?;
        if available < requested {
            return Err(LedgerError::InsufficientFunds {
                wallet,
                available,
                requested,
            }
            .into());
        }

        let reference = self.ledger.issue_reference(TrxKind::Withdrawal);
        self.ledger
            .open_pending(reference.clone(), Leg::debit(wallet, amount, TrxKind::Withdrawal))?;
        if fee.is_positive() {
            let platform = self.ledger.platform_wallet();
            self.ledger.transfer(&[
                Leg::debit(wallet, fee, TrxKind::Commission),
                Leg::credit(platform, fee, TrxKind::Commission),
            ])?;
        }

        info!(user = actor, reference = %reference, amount = %amount, fee = %fee, "withdrawal requested");
        Ok(reference)
    }

    /// Process a gateway callback. Never fails: the outcome is in the reply status.
    ///
    /// Settlement is a compare-and-set on the pending entry, so a replayed
    /// callback is answered with `already_processed` and moves nothing.
    pub fn handle_webhook(&mut self, body: &[u8], signature: Option<&str>) -> WebhookReply {
        let secret = self.config.webhook_secret.as_deref();
        let event = match WebhookEvent::from_signed(secret, body, signature) {
            Ok(event) => event,
            Err(WebhookError::InvalidSignature) => {
                warn!(header = SIGNATURE_HEADER, "webhook signature rejected");
                return WebhookReply::new(WebhookStatus::InvalidSignature, None);
            }
            Err(e) => {
                warn!(reason = %e, "webhook payload rejected");
                return WebhookReply::new(WebhookStatus::InvalidPayload, None);
            }
        };

        let reference = event.data.reference.as_str();
        let status = match event.gateway_status() {
            Ok(status) => status,
            Err(e) => {
                warn!(reference, reason = %e, "webhook payload rejected");
                return WebhookReply::new(WebhookStatus::InvalidPayload, Some(reference));
            }
        };

        let Some(entry) = self.ledger.entry(reference) else {
            warn!(reference, event = %event.event, "webhook for unknown reference");
            return WebhookReply::new(WebhookStatus::UnknownReference, Some(reference));
        };

        let expected = match entry.kind {
            TrxKind::Withdrawal => EventFamily::Transfer,
            _ => EventFamily::Charge,
        };
        if event.family() != Some(expected) {
            warn!(reference, event = %event.event, kind = ?entry.kind, "webhook event does not fit entry");
            return WebhookReply::new(WebhookStatus::InvalidPayload, Some(reference));
        }

        if let Some(reported) = event.data.amount.map(Amount::from_minor) {
            if status == GatewayStatus::Success && reported != entry.amount {
                warn!(
                    reference,
                    expected = %entry.amount,
                    reported = %reported,
                    "webhook amount does not match"
                );
                return WebhookReply::new(WebhookStatus::AmountMismatch, Some(reference));
            }
        }

        let settlement = match status {
            GatewayStatus::Success => self.ledger.settle_success(reference),
            GatewayStatus::Failed => self.ledger.settle_failure(reference),
        };
        let entry = match settlement {
            Ok(Settlement::Settled(entry)) => entry,
            Ok(Settlement::AlreadyProcessed(entry)) => {
                info!(reference, status = ?entry.status, "webhook already processed");
                return WebhookReply::new(WebhookStatus::AlreadyProcessed, Some(reference));
            }
            Err(LedgerError::ReferenceNotFound(_)) => {
                return WebhookReply::new(WebhookStatus::UnknownReference, Some(reference));
            }
            Err(e) => {
                warn!(reference, reason = %e, "webhook settlement failed");
                return WebhookReply::new(WebhookStatus::SettlementFailed, Some(reference));
            }
        };

        info!(reference, kind = ?entry.kind, status = ?entry.status, amount = %entry.amount, "payment settled");
        self.after_settlement(&entry, status);

        let reply_status = match status {
            GatewayStatus::Success => WebhookStatus::Success,
            GatewayStatus::Failed => WebhookStatus::Failure,
        };
        WebhookReply::new(reply_status, Some(reference))
    }
}

impl Engine {
    fn after_settlement(&mut self, entry: &LedgerEntry, status: GatewayStatus) {
        let owner = self.ledger.wallet(entry.wallet).map(|w| w.owner());
        let success = status == GatewayStatus::Success;

        match (entry.kind, owner) {
            (TrxKind::Funding, Some(WalletOwner::User(user))) if success => {
                self.notifier.notify(Notification::WalletFunded {
                    user,
                    amount: entry.amount,
                });
            }
            (TrxKind::Withdrawal, Some(WalletOwner::User(user))) => {
                self.notifier.notify(Notification::WithdrawalSettled {
                    user,
                    amount: entry.amount,
                    success,
                });
            }
            (TrxKind::Payment, _) => self.on_request_payment(entry, success),
            _ => {}
        }
    }

    fn on_request_payment(&mut self, entry: &LedgerEntry, success: bool) {
        let Some(&id) = self.payments.get(&entry.reference) else {
            return;
        };
        let user_wallet = self
            .requests
            .get(&id)
            .and_then(|r| self.users.get(&r.user))
            .map(|u| u.wallet);
        let escrow_wallet = self.ledger.escrow_wallet();
        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };

        match (success, request.escrow) {
            (true, EscrowState::AwaitingPayment) => {
                request.escrow = EscrowState::Held;
                self.notifier.notify(Notification::RequestReceived {
                    creator: request.creator,
                    request: id,
                });
            }
            // paid after the creator already declined
            (true, EscrowState::Cancelled) => {
                let Some(user_wallet) = user_wallet else {
                    return;
                };
                let total = request.total_amount;
                let refund = self.ledger.transfer(&[
                    Leg::debit(escrow_wallet, total, TrxKind::Refund).for_request(id),
                    Leg::credit(user_wallet, total, TrxKind::Refund).for_request(id),
                ]);
                match refund {
                    Ok(_) => {
                        request.escrow = EscrowState::Refunded;
                        warn!(request = id, amount = %total, "payment arrived after decline, refunded");
                        self.notifier.notify(Notification::RequestDeclined {
                            user: request.user,
                            request: id,
                            refunded: total,
                        });
                    }
                    Err(e) => warn!(request = id, reason = %e, "late payment refund failed"),
                }
            }
            (false, EscrowState::AwaitingPayment) => {
                request.escrow = EscrowState::PaymentFailed;
                info!(request = id, "request payment failed");
            }
            (_, escrow) => {
                warn!(request = id, escrow = ?escrow, status = ?request.status, "unexpected payment settlement");
            }
        }
    }
}
