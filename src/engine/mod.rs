//! Escrow engine.
//!
//! The engine owns users, wallets, collaboration requests and disputes. It runs
//! the request state machine, moves money through the ledger and settles
//! gateway callbacks. All state sits behind `&mut self`; concurrent callers go
//! through an [`EngineHandle`], which serialises them on one task.

use std::collections::HashMap;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Amount;
use crate::charge::{Charge, ChargeKind, ChargeSchedule};
use crate::command::{Command, Outcome};
use crate::config::Config;
use crate::gateway::{MockGateway, PaymentGateway};
use crate::ledger::{Ledger, LedgerEntry, WalletOwner};
use crate::model::{
    CreatorProfile, Dispute, DisputeId, DisputeStatus, Registration, Request, RequestId, Role,
    User, UserId,
};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::onboarding::{EmailVerifier, VerifiedEmail};

mod dispute;
mod payment;
mod request;

mod error;
pub use error::{
    Action, EngineError, Entity, ErrorKind, InvalidStateError, PaymentError, ValidationError,
};

mod handle;
pub use handle::{EngineHandle, HandleError};

pub struct Engine {
    config: Config,
    ledger: Ledger,
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    requests: HashMap<RequestId, Request>,
    /// Payment reference of each card-paid request
    payments: HashMap<String, RequestId>,
    disputes: HashMap<DisputeId, Dispute>,
    verifier: EmailVerifier,
    gateway: Box<dyn PaymentGateway>,
    notifier: Box<dyn Notifier>,
    next_user: UserId,
    next_request: RequestId,
    next_dispute: DisputeId,
}

/// Public API
impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            verifier: EmailVerifier::new(),
            config,
            ledger: Ledger::new(),
            users: HashMap::new(),
            emails: HashMap::new(),
            requests: HashMap::new(),
            payments: HashMap::new(),
            disputes: HashMap::new(),
            gateway: Box::new(MockGateway::default()),
            notifier: Box::new(TracingNotifier),
            next_user: 1,
            next_request: 1,
            next_dispute: 1,
        }
    }

    pub fn with_gateway(mut self, gateway: impl PaymentGateway + 'static) -> Self {
        self.gateway = Box::new(gateway);
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Run the engine over a command stream; failed commands are logged and skipped.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            let _ = self.apply(command);
        }
    }

    /// Apply a single command on top of the current engine state.
    pub fn apply(&mut self, command: Command) -> Result<Outcome, EngineError> {
        let name = command.name();
        let result = match command {
            Command::FundWallet { actor, amount } => {
                self.fund_wallet(actor, amount).map(Outcome::Checkout)
            }
            Command::CreateRequest {
                actor,
                creator,
                method,
                details,
            } => self
                .create_request(actor, creator, method, details)
                .map(Outcome::Request),
            Command::FulfillRequest {
                actor,
                request,
                video_url,
            } => self
                .fulfill_request(actor, request, &video_url)
                .map(|()| Outcome::Done),
            Command::DeclineRequest {
                actor,
                request,
                reason,
                feedback,
            } => self
                .decline_request(actor, request, &reason, feedback)
                .map(|()| Outcome::Done),
            Command::OpenDispute {
                actor,
                request,
                reason,
                message,
            } => self
                .open_dispute(actor, request, reason, &message)
                .map(Outcome::Dispute),
            Command::ResolveDispute {
                actor,
                dispute,
                outcome,
            } => self
                .resolve_dispute(actor, dispute, outcome)
                .map(|()| Outcome::Done),
            Command::Withdraw { actor, amount } => {
                self.withdraw(actor, amount).map(Outcome::Withdrawal)
            }
            Command::Webhook { body, signature } => Ok(Outcome::Webhook(
                self.handle_webhook(&body, signature.as_deref()),
            )),
            Command::SetCharge {
                actor,
                kind,
                charge,
            } => self.set_charge(actor, kind, charge).map(|()| Outcome::Done),
            Command::SetCreatorActive {
                actor,
                creator,
                active,
            } => self
                .set_creator_active(actor, creator, active)
                .map(|()| Outcome::Done),
        };
        Self::log_result(name, &result);
        result
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn charges(&self) -> &ChargeSchedule {
        &self.config.charges
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn find_user(&self, email: &str) -> Option<&User> {
        self.emails
            .get(&email.trim().to_lowercase())
            .and_then(|id| self.users.get(id))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> + '_ {
        self.users.values()
    }

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    /// Requests a user sent or a creator received, in creation order.
    pub fn requests_for(&self, user: UserId) -> Vec<&Request> {
        let mut requests: Vec<_> = self
            .requests
            .values()
            .filter(|r| r.user == user || r.creator == user)
            .collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    pub fn dispute(&self, id: DisputeId) -> Option<&Dispute> {
        self.disputes.get(&id)
    }

    /// Disputes waiting for an admin, oldest first.
    pub fn open_disputes(&self) -> Vec<&Dispute> {
        let mut disputes: Vec<_> = self
            .disputes
            .values()
            .filter(|d| d.status == DisputeStatus::Open)
            .collect();
        disputes.sort_by_key(|d| d.id);
        disputes
    }

    /// Balance of a user's wallet.
    pub fn balance(&self, user: UserId) -> Result<Amount, EngineError> {
        let wallet = self.user_ref(user)?.wallet;
        Ok(self.ledger.balance(wallet)?)
    }

    /// Ledger entries touching a user's wallet, oldest first.
    pub fn transactions(&self, user: UserId) -> Result<Vec<&LedgerEntry>, EngineError> {
        let wallet = self.user_ref(user)?.wallet;
        Ok(self.ledger.entries_for(wallet).collect())
    }

    /// Send a verification code to `email` through the notifier.
    pub fn request_verification(&mut self, email: &str) -> Result<(), EngineError> {
        let code = self.verifier.issue(email)?;
        self.notifier.notify(Notification::VerificationCode {
            email: email.trim().to_lowercase(),
            code,
        });
        Ok(())
    }

    pub fn verify_email(&mut self, email: &str, code: &str) -> Result<VerifiedEmail, EngineError> {
        Ok(self.verifier.verify(email, code)?)
    }

    /// Create a user and its wallet from a verified email.
    pub fn register(
        &mut self,
        verified: VerifiedEmail,
        registration: Registration,
    ) -> Result<UserId, EngineError> {
        let email = verified.into_inner();
        if self.emails.contains_key(&email) {
            return Err(EngineError::EmailTaken(email));
        }

        let (role, creator) = if self.config.admin_emails.contains(&email) {
            (Role::Admin, None)
        } else {
            match registration {
                Registration::Regular => (Role::Regular, None),
                Registration::Creator { fast_track_fee } => {
                    if fast_track_fee.is_negative() {
                        return Err(ValidationError::NonPositiveAmount(fast_track_fee).into());
                    }
                    let profile = CreatorProfile {
                        active: true,
                        fast_track_fee,
                    };
                    (Role::Creator, Some(profile))
                }
            }
        };

        let id = self.next_user;
        self.next_user += 1;
        let wallet = self.ledger.open_wallet(WalletOwner::User(id));

        self.emails.insert(email.clone(), id);
        self.users.insert(
            id,
            User {
                id,
                email: email.clone(),
                role,
                wallet,
                creator,
            },
        );
        info!(user = id, email = %email, role = ?role, wallet, "user registered");
        Ok(id)
    }

    pub fn set_charge(
        &mut self,
        actor: UserId,
        kind: ChargeKind,
        charge: Charge,
    ) -> Result<(), EngineError> {
        self.require_admin(actor, Action::SetCharge)?;
        if !charge.is_valid() {
            return Err(ValidationError::InvalidCharge.into());
        }
        self.config.charges.set(kind, charge);
        let charge = self.config.charges.get(kind);
        info!(kind = ?kind, bps = charge.percentage_bps, status = ?charge.status, "charge updated");
        Ok(())
    }

    pub fn set_creator_active(
        &mut self,
        actor: UserId,
        creator: UserId,
        active: bool,
    ) -> Result<(), EngineError> {
        self.require_admin(actor, Action::ModerateCreator)?;
        let profile = self
            .users
            .get_mut(&creator)
            .ok_or(EngineError::not_found(Entity::User, creator))?
            .creator
            .as_mut()
            .ok_or(ValidationError::NotACreator(creator))?;
        profile.active = active;
        info!(creator, active, "creator moderated");
        Ok(())
    }
}

/// Private API
impl Engine {
    /// Small helper to log `apply` results
    fn log_result(name: &str, result: &Result<Outcome, EngineError>) {
        match result {
            Ok(outcome) => info!(outcome = ?outcome, "{name} applied"),
            Err(e) => info!(reason = %e, kind = ?e.kind(), "{name} skipped"),
        }
    }

    fn user_ref(&self, id: UserId) -> Result<&User, EngineError> {
        self.users
            .get(&id)
            .ok_or(EngineError::not_found(Entity::User, id))
    }

    fn require_admin(&self, actor: UserId, action: Action) -> Result<(), EngineError> {
        if self.user_ref(actor)?.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Unauthorized { actor, action })
        }
    }

    fn request_mut(&mut self, id: RequestId) -> Result<&mut Request, EngineError> {
        self.requests
            .get_mut(&id)
            .ok_or(EngineError::not_found(Entity::Request, id))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
