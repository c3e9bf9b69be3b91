//! Request state machine: creation, fulfillment and decline.

use tracing::info;

use super::{Action, Engine, EngineError, Entity, InvalidStateError, PaymentError, ValidationError};
use crate::Amount;
use crate::command::RequestReceipt;
use crate::gateway::{PaymentIntent, PaymentPurpose};
use crate::ledger::{Leg, TrxKind};
use crate::model::{
    EscrowState, PaymentMethod, Request, RequestDetails, RequestId, RequestStatus, Role, UserId,
};
use crate::notify::Notification;

impl Engine {
    /// Create a request from `actor` to `creator` and take payment into escrow.
    ///
    /// Wallet payments settle immediately. Card payments return a checkout and
    /// wait for the gateway webhook.
    pub fn create_request(
        &mut self,
        actor: UserId,
        creator: UserId,
        method: PaymentMethod,
        details: RequestDetails,
    ) -> Result<RequestReceipt, EngineError> {
        let user = self.user_ref(actor)?;
        if user.role != Role::Regular {
            return Err(EngineError::Unauthorized {
                actor,
                action: Action::CreateRequest,
            });
        }
        let (user_wallet, user_email) = (user.wallet, user.email.clone());

        if !details.amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(details.amount).into());
        }

        let profile = self
            .user_ref(creator)?
            .creator
            .as_ref()
            .ok_or(ValidationError::NotACreator(creator))?;
        if !profile.active {
            return Err(ValidationError::CreatorInactive(creator).into());
        }

        let fast_track_fee = if details.fast_track {
            profile.fast_track_fee
        } else {
            Amount::ZERO
        };
        let total_amount = details
            .amount
            .checked_add(fast_track_fee)
            .ok_or(ValidationError::AmountTooLarge(details.amount, fast_track_fee))?;

        let id = self.next_request;
        let escrow_wallet = self.ledger.escrow_wallet();

        let (escrow, payment_reference, checkout) = match method {
            PaymentMethod::Wallet => {
                let mut refs = self.ledger.transfer(&[
                    Leg::debit(user_wallet, total_amount, TrxKind::Payment).for_request(id),
                    Leg::credit(escrow_wallet, total_amount, TrxKind::Payment).for_request(id),
                ])?;
                (EscrowState::Held, refs.swap_remove(0), None)
            }
            PaymentMethod::Card => {
                let reference = self.ledger.issue_reference(TrxKind::Payment);
                let intent = PaymentIntent {
                    reference: reference.clone(),
                    amount: total_amount,
                    email: user_email,
                    purpose: PaymentPurpose::RequestPayment,
                };
                let checkout = self
                    .gateway
                    .initialize(&intent)
                    .map_err(PaymentError::from)?;
                self.ledger.open_pending(
                    reference.clone(),
                    Leg::credit(escrow_wallet, total_amount, TrxKind::Payment).for_request(id),
                )?;
                self.payments.insert(reference.clone(), id);
                info!(request = id, reference = %reference, gateway = self.gateway.name(), "card payment initialized");
                (EscrowState::AwaitingPayment, reference, Some(checkout))
            }
        };

        self.next_request += 1;
        self.requests.insert(
            id,
            Request {
                id,
                user: actor,
                creator,
                request_amount: details.amount,
                fast_track_fee,
                total_amount,
                payment_method: method,
                payment_reference,
                script: details.script,
                status: RequestStatus::Pending,
                escrow,
                video_url: None,
                decline_reason: None,
                feedback: None,
                platform_fee: None,
            },
        );

        info!(
            request = id,
            user = actor,
            creator,
            total = %total_amount,
            method = ?method,
            "request created"
        );
        if escrow == EscrowState::Held {
            self.notifier
                .notify(Notification::RequestReceived { creator, request: id });
        }

        Ok(RequestReceipt {
            request: id,
            total_amount,
            checkout,
        })
    }

    /// Deliver the video: escrow pays the creator, minus the collaboration charge.
    pub fn fulfill_request(
        &mut self,
        actor: UserId,
        id: RequestId,
        video_url: &str,
    ) -> Result<(), EngineError> {
        let video_url = video_url.trim();
        if video_url.is_empty() {
            return Err(ValidationError::Empty("video url").into());
        }

        let request = self.pending_request_of_creator(actor, id, Action::FulfillRequest)?;
        if request.escrow != EscrowState::Held {
            return Err(PaymentError::NotConfirmed(id).into());
        }

        let total = request.total_amount;
        let fee = self.config.charges.collaboration.fee_for(total);
        let escrow_wallet = self.ledger.escrow_wallet();
        let mut legs = vec![Leg::debit(escrow_wallet, total, TrxKind::Release).for_request(id)];
        legs.extend(self.payout_legs(request, fee));
        let user = request.user;

        self.ledger.transfer(&legs)?;

        let request = self.request_mut(id)?;
        request.status = RequestStatus::Fulfilled;
        request.escrow = EscrowState::Released;
        request.video_url = Some(video_url.to_string());
        request.platform_fee = Some(fee);

        info!(request = id, total = %total, fee = %fee, "request fulfilled");
        self.notifier
            .notify(Notification::RequestFulfilled { user, request: id });
        Ok(())
    }

    /// Refuse the request. Escrowed funds go back to the paying user.
    pub fn decline_request(
        &mut self,
        actor: UserId,
        id: RequestId,
        reason: &str,
        feedback: Option<String>,
    ) -> Result<(), EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::Empty("decline reason").into());
        }

        let request = self.pending_request_of_creator(actor, id, Action::DeclineRequest)?;
        let (user, total, escrow) = (request.user, request.total_amount, request.escrow);

        let (escrow, refunded) = match escrow {
            EscrowState::Held => {
                let user_wallet = self.user_ref(user)?.wallet;
                let escrow_wallet = self.ledger.escrow_wallet();
                self.ledger.transfer(&[
                    Leg::debit(escrow_wallet, total, TrxKind::Refund).for_request(id),
                    Leg::credit(user_wallet, total, TrxKind::Refund).for_request(id),
                ])?;
                (EscrowState::Refunded, total)
            }
            // a card payment that lands later is refunded on arrival
            EscrowState::AwaitingPayment | EscrowState::PaymentFailed => {
                (EscrowState::Cancelled, Amount::ZERO)
            }
            other => (other, Amount::ZERO),
        };

        let request = self.request_mut(id)?;
        request.status = RequestStatus::Declined;
        request.escrow = escrow;
        request.decline_reason = Some(reason.to_string());
        request.feedback = feedback;

        info!(request = id, refunded = %refunded, reason, "request declined");
        self.notifier.notify(Notification::RequestDeclined {
            user,
            request: id,
            refunded,
        });
        Ok(())
    }
}

impl Engine {
    /// Look up a request the actor, as its creator, may act on while it is pending.
    fn pending_request_of_creator(
        &self,
        actor: UserId,
        id: RequestId,
        action: Action,
    ) -> Result<&Request, EngineError> {
        let request = self
            .requests
            .get(&id)
            .ok_or(EngineError::not_found(Entity::Request, id))?;

        if request.creator != actor {
            return Err(EngineError::Unauthorized { actor, action });
        }
        if request.status != RequestStatus::Pending {
            return Err(InvalidStateError::Request(action, id, request.status).into());
        }
        Ok(request)
    }

    /// Credits paying out a request's total: creator share and platform commission.
    pub(super) fn payout_legs(&self, request: &Request, fee: Amount) -> Vec<Leg> {
        let mut legs = Vec::with_capacity(2);
        let share = request.total_amount - fee;
        if share.is_positive() {
            if let Some(creator) = self.users.get(&request.creator) {
                legs.push(Leg::credit(creator.wallet, share, TrxKind::Release).for_request(request.id));
            }
        }
        if fee.is_positive() {
            legs.push(
                Leg::credit(self.ledger.platform_wallet(), fee, TrxKind::Commission)
                    .for_request(request.id),
            );
        }
        legs
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::*;
    use crate::gateway::MockGateway;
    use crate::ledger::TrxStatus;

    const VIDEO: &str = "https://cdn.lyvads.test/v/1.mp4";

    // Create

    #[test]
    fn total_is_amount_plus_fast_track_fee() {
        let mut f = Fixture::new();
        f.fund(f.user, 2_000);

        let receipt = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Wallet, details(1_000, true))
            .unwrap();

        let request = f.engine.request(receipt.request).unwrap();
        assert_eq!(request.request_amount, naira(1_000));
        assert_eq!(request.fast_track_fee, naira(200));
        assert_eq!(request.total_amount, naira(1_200));
        assert_eq!(receipt.total_amount, naira(1_200));
        assert_eq!(request.total_amount, request.request_amount + request.fast_track_fee);
    }

    #[test]
    fn total_past_max_amount_is_rejected() {
        let mut f = Fixture::new();
        let details = RequestDetails {
            amount: Amount::from_minor(i64::MAX),
            fast_track: true,
            script: "Say hi".to_string(),
        };

        let result = f.engine.create_request(f.user, f.creator, PaymentMethod::Card, details);
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::AmountTooLarge(amount, fee)))
                if amount == Amount::from_minor(i64::MAX) && fee == naira(200)
        ));
        assert!(f.engine.requests_for(f.user).is_empty());
    }

    #[test]
    fn no_fast_track_fee_without_fast_track() {
        let mut f = Fixture::new();
        let id = f.held_request(1_000);
        let request = f.engine.request(id).unwrap();
        assert_eq!(request.fast_track_fee, Amount::ZERO);
        assert_eq!(request.total_amount, naira(1_000));
    }

    #[test]
    fn wallet_payment_moves_funds_into_escrow() {
        let mut f = Fixture::new();
        f.fund(f.user, 1_500);
        let receipt = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Wallet, details(1_000, true))
            .unwrap();

        assert_eq!(f.balance(f.user), naira(300));
        assert_eq!(f.escrow_balance(), naira(1_200));
        let request = f.engine.request(receipt.request).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.escrow, EscrowState::Held);
        assert_eq!(
            f.engine.ledger().entry(&request.payment_reference).unwrap().status,
            TrxStatus::Success
        );
        assert!(f.outbox.sent().contains(&Notification::RequestReceived {
            creator: f.creator,
            request: receipt.request,
        }));
        f.assert_escrow_consistent();
    }

    #[test]
    fn wallet_payment_insufficient_funds_creates_nothing() {
        let mut f = Fixture::new();
        f.fund(f.user, 100);

        let result = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Wallet, details(1_000, false));
        assert_eq!(result.unwrap_err().kind(), super::super::ErrorKind::InsufficientFunds);
        assert!(f.engine.requests_for(f.user).is_empty());
        assert_eq!(f.balance(f.user), naira(100));
        assert_eq!(f.escrow_balance(), Amount::ZERO);
    }

    #[test]
    fn card_payment_waits_for_gateway() {
        let mut f = Fixture::new();
        let receipt = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Card, details(1_000, true))
            .unwrap();

        let checkout = receipt.checkout.unwrap();
        let request = f.engine.request(receipt.request).unwrap();
        assert_eq!(request.escrow, EscrowState::AwaitingPayment);
        assert_eq!(request.payment_reference, checkout.reference);
        let entry = f.engine.ledger().entry(&checkout.reference).unwrap();
        assert_eq!(entry.status, TrxStatus::Pending);
        assert_eq!(entry.kind, TrxKind::Payment);
        assert_eq!(entry.amount, naira(1_200));
        assert_eq!(f.escrow_balance(), Amount::ZERO);
    }

    #[test]
    fn gateway_rejection_is_a_payment_error() {
        let mut f = Fixture::with_gateway(MockGateway::with_limit(naira(500)));

        let result = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Card, details(1_000, false));
        assert!(matches!(
            result,
            Err(EngineError::Payment(PaymentError::Gateway(_)))
        ));
        assert!(f.engine.requests_for(f.user).is_empty());
    }

    #[test]
    fn unknown_creator_fails() {
        let mut f = Fixture::new();
        let result = f
            .engine
            .create_request(f.user, 999, PaymentMethod::Card, details(1_000, false));
        assert!(matches!(
            result,
            Err(EngineError::NotFound {
                entity: Entity::User,
                id: 999
            })
        ));
    }

    #[test]
    fn requesting_from_non_creator_fails() {
        let mut f = Fixture::new();
        let result = f
            .engine
            .create_request(f.user, f.admin, PaymentMethod::Card, details(1_000, false));
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::NotACreator(_)))
        ));
    }

    #[test]
    fn creators_cannot_create_requests() {
        let mut f = Fixture::new();
        let result = f
            .engine
            .create_request(f.creator, f.creator, PaymentMethod::Card, details(1_000, false));
        assert!(matches!(
            result,
            Err(EngineError::Unauthorized {
                action: Action::CreateRequest,
                ..
            })
        ));
    }

    #[test]
    fn zero_amount_fails() {
        let mut f = Fixture::new();
        let result = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Card, details(0, true));
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::NonPositiveAmount(_)))
        ));
    }

    // Fulfill

    #[test]
    fn fulfill_releases_escrow_minus_commission() {
        let mut f = Fixture::new();
        let id = f.held_request(1_000);

        f.engine.fulfill_request(f.creator, id, VIDEO).unwrap();

        let request = f.engine.request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Fulfilled);
        assert_eq!(request.escrow, EscrowState::Released);
        assert_eq!(request.video_url.as_deref(), Some(VIDEO));
        assert_eq!(request.platform_fee, Some(naira(100)));

        // default collaboration charge is 10%
        assert_eq!(f.balance(f.creator), naira(900));
        assert_eq!(f.platform_balance(), naira(100));
        assert_eq!(f.escrow_balance(), Amount::ZERO);
        f.assert_escrow_consistent();
    }

    #[test]
    fn fulfill_twice_fails() {
        let mut f = Fixture::new();
        let id = f.held_request(1_000);
        f.engine.fulfill_request(f.creator, id, VIDEO).unwrap();

        let result = f.engine.fulfill_request(f.creator, id, VIDEO);
        assert!(matches!(
            result,
            Err(EngineError::InvalidState(InvalidStateError::Request(
                Action::FulfillRequest,
                _,
                RequestStatus::Fulfilled
            )))
        ));
        assert_eq!(f.balance(f.creator), naira(900));
    }

    #[test]
    fn fulfill_by_someone_else_fails() {
        let mut f = Fixture::new();
        let id = f.held_request(1_000);
        let result = f.engine.fulfill_request(f.user, id, VIDEO);
        assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    }

    #[test]
    fn fulfill_unpaid_request_fails() {
        let mut f = Fixture::new();
        let receipt = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Card, details(1_000, false))
            .unwrap();

        let result = f.engine.fulfill_request(f.creator, receipt.request, VIDEO);
        assert!(matches!(
            result,
            Err(EngineError::Payment(PaymentError::NotConfirmed(_)))
        ));
        assert_eq!(
            f.engine.request(receipt.request).unwrap().status,
            RequestStatus::Pending
        );
    }

    #[test]
    fn fulfill_needs_video() {
        let mut f = Fixture::new();
        let id = f.held_request(1_000);
        let result = f.engine.fulfill_request(f.creator, id, "  ");
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::Empty(_)))
        ));
    }

    #[test]
    fn fulfill_unknown_request_fails() {
        let mut f = Fixture::new();
        let result = f.engine.fulfill_request(f.creator, 42, VIDEO);
        assert!(matches!(
            result,
            Err(EngineError::NotFound {
                entity: Entity::Request,
                id: 42
            })
        ));
    }

    // Decline

    #[test]
    fn decline_refunds_exact_total() {
        let mut f = Fixture::new();
        let id = f.held_request(500);
        assert_eq!(f.balance(f.user), Amount::ZERO);

        f.engine
            .decline_request(f.creator, id, "Not my style", Some("try another creator".into()))
            .unwrap();

        let request = f.engine.request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Declined);
        assert_eq!(request.escrow, EscrowState::Refunded);
        assert_eq!(request.decline_reason.as_deref(), Some("Not my style"));
        assert_eq!(f.balance(f.user), naira(500));
        assert_eq!(f.escrow_balance(), Amount::ZERO);
        assert!(f.outbox.sent().contains(&Notification::RequestDeclined {
            user: f.user,
            request: id,
            refunded: naira(500),
        }));
        f.assert_escrow_consistent();
    }

    #[test]
    fn decline_after_fulfill_fails() {
        let mut f = Fixture::new();
        let id = f.held_request(500);
        f.engine.fulfill_request(f.creator, id, VIDEO).unwrap();

        let result = f.engine.decline_request(f.creator, id, "changed my mind", None);
        assert!(matches!(
            result,
            Err(EngineError::InvalidState(InvalidStateError::Request(
                Action::DeclineRequest,
                _,
                RequestStatus::Fulfilled
            )))
        ));
    }

    #[test]
    fn decline_unpaid_request_cancels_without_refund() {
        let mut f = Fixture::new();
        let receipt = f
            .engine
            .create_request(f.user, f.creator, PaymentMethod::Card, details(500, false))
            .unwrap();

        f.engine
            .decline_request(f.creator, receipt.request, "busy", None)
            .unwrap();

        let request = f.engine.request(receipt.request).unwrap();
        assert_eq!(request.status, RequestStatus::Declined);
        assert_eq!(request.escrow, EscrowState::Cancelled);
        assert_eq!(f.balance(f.user), Amount::ZERO);
    }

    #[test]
    fn decline_needs_reason() {
        let mut f = Fixture::new();
        let id = f.held_request(500);
        assert!(matches!(
            f.engine.decline_request(f.creator, id, "", None),
            Err(EngineError::Validation(ValidationError::Empty(_)))
        ));
    }
}
