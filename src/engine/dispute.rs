//! Disputes over fulfilled or declined requests.

use tracing::{info, warn};

use super::{Action, Engine, EngineError, Entity, InvalidStateError, ValidationError};
use crate::Amount;
use crate::ledger::{Leg, TrxKind};
use crate::model::{
    Dispute, DisputeId, DisputeOutcome, DisputeReason, DisputeStatus, EscrowState, RequestId,
    RequestStatus, UserId,
};
use crate::notify::Notification;

impl Engine {
    /// Contest the outcome of a fulfilled or declined request.
    ///
    /// Either party of the request may open one dispute per request.
    pub fn open_dispute(
        &mut self,
        actor: UserId,
        request_id: RequestId,
        reason: DisputeReason,
        message: &str,
    ) -> Result<DisputeId, EngineError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ValidationError::Empty("dispute message").into());
        }

        let request = self
            .requests
            .get(&request_id)
            .ok_or(EngineError::not_found(Entity::Request, request_id))?;

        let counterparty = if actor == request.user {
            request.creator
        } else if actor == request.creator {
            request.user
        } else {
            return Err(EngineError::Unauthorized {
                actor,
                action: Action::OpenDispute,
            });
        };

        // Disputed and Resolved requests already had their dispute
        if !matches!(request.status, RequestStatus::Fulfilled | RequestStatus::Declined) {
            return Err(
                InvalidStateError::Request(Action::OpenDispute, request_id, request.status).into(),
            );
        }

        let id = self.next_dispute;
        self.next_dispute += 1;
        let amount = request.total_amount;
        self.disputes.insert(
            id,
            Dispute {
                id,
                request: request_id,
                opened_by: actor,
                reason,
                message: message.to_string(),
                amount,
                status: DisputeStatus::Open,
                outcome: None,
            },
        );
        self.request_mut(request_id)?.status = RequestStatus::Disputed;

        info!(dispute = id, request = request_id, opened_by = actor, reason = ?reason, "dispute opened");
        self.notifier.notify(Notification::DisputeOpened {
            counterparty,
            dispute: id,
        });
        Ok(id)
    }

    /// Admin ruling on an open dispute.
    ///
    /// Ruling for the disputant moves the request's funds to them when the
    /// other party currently holds them. Clawbacks may overdraw a wallet.
    pub fn resolve_dispute(
        &mut self,
        actor: UserId,
        dispute_id: DisputeId,
        outcome: DisputeOutcome,
    ) -> Result<(), EngineError> {
        self.require_admin(actor, Action::ResolveDispute)?;

        let dispute = self
            .disputes
            .get(&dispute_id)
            .ok_or(EngineError::not_found(Entity::Dispute, dispute_id))?;
        if dispute.status != DisputeStatus::Open {
            return Err(
                InvalidStateError::Dispute(Action::ResolveDispute, dispute_id, dispute.status)
                    .into(),
            );
        }
        let (request_id, disputant) = (dispute.request, dispute.opened_by);

        let request = self
            .requests
            .get(&request_id)
            .ok_or(EngineError::not_found(Entity::Request, request_id))?;
        let (user, creator, total) = (request.user, request.creator, request.total_amount);

        let holder = request.funds_holder();
        let compensate = outcome == DisputeOutcome::FavorDisputant
            && holder.is_some()
            && holder != Some(disputant);

        let mut escrow = request.escrow;
        let mut platform_fee = request.platform_fee;
        let mut legs = Vec::new();

        if compensate {
            let user_wallet = self.user_ref(user)?.wallet;
            let creator_wallet = self.user_ref(creator)?.wallet;

            match request.escrow {
                // creator was paid, user wins the money back
                EscrowState::Released => {
                    let fee = request.platform_fee.unwrap_or(Amount::ZERO);
                    let share = total - fee;
                    if share.is_positive() {
                        legs.push(
                            Leg::debit(creator_wallet, share, TrxKind::Reversal)
                                .for_request(request_id)
                                .allow_overdraft(),
                        );
                    }
                    if fee.is_positive() {
                        legs.push(
                            Leg::debit(self.ledger.platform_wallet(), fee, TrxKind::Reversal)
                                .for_request(request_id)
                                .allow_overdraft(),
                        );
                    }
                    legs.push(Leg::credit(user_wallet, total, TrxKind::Refund).for_request(request_id));
                    escrow = EscrowState::Refunded;
                    platform_fee = None;
                }
                // user was refunded, creator wins the payout
                EscrowState::Refunded => {
                    let fee = self.config.charges.collaboration.fee_for(total);
                    legs.push(
                        Leg::debit(user_wallet, total, TrxKind::Reversal)
                            .for_request(request_id)
                            .allow_overdraft(),
                    );
                    legs.extend(self.payout_legs(request, fee));
                    escrow = EscrowState::Released;
                    platform_fee = Some(fee);
                }
                _ => {}
            }
        }

        if !legs.is_empty() {
            for leg in legs.iter().filter(|l| l.overdraft) {
                let balance = self.ledger.balance(leg.wallet)?;
                if balance < leg.amount {
                    warn!(
                        dispute = dispute_id,
                        wallet = leg.wallet,
                        balance = %balance,
                        clawback = %leg.amount,
                        "dispute clawback overdraws wallet"
                    );
                }
            }
            self.ledger.transfer(&legs)?;
        }

        let request = self.request_mut(request_id)?;
        request.status = RequestStatus::Resolved;
        request.escrow = escrow;
        request.platform_fee = platform_fee;

        if let Some(dispute) = self.disputes.get_mut(&dispute_id) {
            dispute.status = DisputeStatus::Resolved;
            dispute.outcome = Some(outcome);
        }

        info!(
            dispute = dispute_id,
            request = request_id,
            outcome = ?outcome,
            compensated = compensate,
            "dispute resolved"
        );
        for party in [user, creator] {
            self.notifier.notify(Notification::DisputeResolved {
                user: party,
                dispute: dispute_id,
                outcome,
            });
        }
        Ok(())
    }
}
