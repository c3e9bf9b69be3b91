//! Drives an [`Engine`] from journal entries, standing in for the API and the gateway.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

use crate::Amount;
use crate::charge::Charge;
use crate::command::{Command, Outcome};
use crate::config::Config;
use crate::csv::JournalEntry;
use crate::engine::{Engine, EngineError};
use crate::ledger::{WalletId, WalletOwner};
use crate::model::{RequestDetails, UserId};
use crate::notify::{Notification, Outbox};
use crate::webhook::{self, WebhookError, WebhookStatus};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("no open {kind} for {email}")]
    NothingToSettle { kind: &'static str, email: String },
    #[error("verification code for {0} was never sent")]
    CodeNotSent(String),
    #[error("webhook for {reference} answered {status:?}")]
    Webhook {
        reference: String,
        status: WebhookStatus,
    },
    #[error(transparent)]
    Signing(#[from] WebhookError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct Replay {
    engine: Engine,
    outbox: Outbox,
    secret: Option<String>,
    /// Open checkout references per email, oldest first
    checkouts: HashMap<String, VecDeque<String>>,
    withdrawals: HashMap<String, VecDeque<String>>,
}

impl Replay {
    pub fn new(config: Config) -> Self {
        let outbox = Outbox::default();
        let secret = config.webhook_secret.clone();
        Self {
            engine: Engine::new(config).with_notifier(outbox.clone()),
            outbox,
            secret,
            checkouts: HashMap::new(),
            withdrawals: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn apply(&mut self, entry: JournalEntry) -> Result<(), ReplayError> {
        let command = match entry {
            JournalEntry::Register {
                email,
                registration,
            } => {
                self.engine.request_verification(&email)?;
                let code = self.last_code(&email).ok_or(ReplayError::CodeNotSent(email.clone()))?;
                let verified = self.engine.verify_email(&email, &code)?;
                self.engine.register(verified, registration)?;
                return Ok(());
            }
            JournalEntry::Callback {
                email,
                status,
                amount,
            } => {
                let event = format!("charge.{status}");
                return self.settle(Queue::Checkouts, email, &event, &status, amount);
            }
            JournalEntry::Transfer { email, status } => {
                let event = format!("transfer.{status}");
                return self.settle(Queue::Withdrawals, email, &event, &status, None);
            }
            JournalEntry::Fund { email, amount } => Command::FundWallet {
                actor: self.user(&email)?,
                amount,
            },
            JournalEntry::Request {
                email,
                creator,
                amount,
                method,
                fast_track,
            } => Command::CreateRequest {
                actor: self.user(&email)?,
                creator: self.user(&creator)?,
                method,
                details: RequestDetails {
                    amount,
                    fast_track,
                    script: format!("journal request from {email}"),
                },
            },
            JournalEntry::Fulfill {
                email,
                request,
                video_url,
            } => Command::FulfillRequest {
                actor: self.user(&email)?,
                request,
                video_url,
            },
            JournalEntry::Decline {
                email,
                request,
                reason,
            } => Command::DeclineRequest {
                actor: self.user(&email)?,
                request,
                reason,
                feedback: None,
            },
            JournalEntry::Dispute {
                email,
                request,
                reason,
            } => Command::OpenDispute {
                actor: self.user(&email)?,
                request,
                reason,
                message: format!("{reason:?}"),
            },
            JournalEntry::Resolve {
                email,
                dispute,
                outcome,
            } => Command::ResolveDispute {
                actor: self.user(&email)?,
                dispute,
                outcome,
            },
            JournalEntry::Withdraw { email, amount } => Command::Withdraw {
                actor: self.user(&email)?,
                amount,
            },
            JournalEntry::Charge {
                email,
                kind,
                percentage_bps,
            } => Command::SetCharge {
                actor: self.user(&email)?,
                kind,
                charge: Charge::percent(percentage_bps),
            },
        };

        let actor = self.actor_email(&command);
        match self.engine.apply(command)? {
            Outcome::Checkout(checkout) => self.open(Queue::Checkouts, actor, checkout.reference),
            Outcome::Request(receipt) => {
                if let Some(checkout) = receipt.checkout {
                    self.open(Queue::Checkouts, actor, checkout.reference);
                }
            }
            Outcome::Withdrawal(reference) => self.open(Queue::Withdrawals, actor, reference),
            Outcome::Dispute(_) | Outcome::Webhook(_) | Outcome::Done => {}
        }
        Ok(())
    }

    /// Balance of every wallet, by wallet id. Users are named by email.
    pub fn balances(&self) -> Vec<(WalletId, String, Amount)> {
        let ledger = self.engine.ledger();
        let mut rows: Vec<_> = ledger
            .wallets()
            .map(|wallet| {
                let owner = match wallet.owner() {
                    WalletOwner::User(id) => self
                        .engine
                        .user(id)
                        .map(|u| u.email.clone())
                        .unwrap_or_else(|| format!("user {id}")),
                    WalletOwner::Escrow => "escrow".to_string(),
                    WalletOwner::Platform => "platform".to_string(),
                };
                (wallet.id(), owner, wallet.balance())
            })
            .collect();
        rows.sort_by_key(|(id, _, _)| *id);
        rows
    }
}

#[derive(Debug, Clone, Copy)]
enum Queue {
    Checkouts,
    Withdrawals,
}

impl Replay {
    fn user(&self, email: &str) -> Result<UserId, ReplayError> {
        self.engine
            .find_user(email)
            .map(|u| u.id)
            .ok_or_else(|| ReplayError::UnknownUser(email.to_string()))
    }

    fn actor_email(&self, command: &Command) -> Option<String> {
        let actor = match command {
            Command::FundWallet { actor, .. }
            | Command::CreateRequest { actor, .. }
            | Command::Withdraw { actor, .. } => *actor,
            _ => return None,
        };
        self.engine.user(actor).map(|u| u.email.clone())
    }

    fn last_code(&self, email: &str) -> Option<String> {
        let email = email.trim().to_lowercase();
        self.outbox.sent().into_iter().rev().find_map(|n| match n {
            Notification::VerificationCode { email: to, code } if to == email => Some(code),
            _ => None,
        })
    }

    fn queue(&mut self, queue: Queue) -> &mut HashMap<String, VecDeque<String>> {
        match queue {
            Queue::Checkouts => &mut self.checkouts,
            Queue::Withdrawals => &mut self.withdrawals,
        }
    }

    fn open(&mut self, queue: Queue, email: Option<String>, reference: String) {
        if let Some(email) = email {
            debug!(email = %email, reference = %reference, "reference opened");
            self.queue(queue).entry(email).or_default().push_back(reference);
        }
    }

    /// Send a signed webhook for the oldest open reference of `email`.
    fn settle(
        &mut self,
        queue: Queue,
        email: String,
        event: &str,
        status: &str,
        amount: Option<Amount>,
    ) -> Result<(), ReplayError> {
        let email = self
            .engine
            .find_user(&email)
            .map(|u| u.email.clone())
            .ok_or(ReplayError::UnknownUser(email))?;
        let kind = match queue {
            Queue::Checkouts => "checkout",
            Queue::Withdrawals => "withdrawal",
        };
        let Some(reference) = self
            .queue(queue)
            .get(&email)
            .and_then(|refs| refs.front())
            .cloned()
        else {
            return Err(ReplayError::NothingToSettle { kind, email });
        };

        let mut data = serde_json::json!({ "reference": reference, "status": status });
        if let Some(amount) = amount {
            data["amount"] = serde_json::json!(amount.minor());
        }
        let body = serde_json::json!({ "event": event, "data": data })
            .to_string()
            .into_bytes();
        let signature = self
            .secret
            .as_deref()
            .map(|secret| webhook::sign(secret, &body))
            .transpose()?;

        let Outcome::Webhook(reply) = self.engine.apply(Command::Webhook { body, signature })? else {
            return Ok(());
        };
        match reply.status {
            WebhookStatus::Success | WebhookStatus::Failure | WebhookStatus::AlreadyProcessed => {
                if let Some(refs) = self.queue(queue).get_mut(&email) {
                    refs.pop_front();
                }
                Ok(())
            }
            status => {
                warn!(reference = %reference, status = ?status, "journal webhook refused");
                Err(ReplayError::Webhook { reference, status })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge::ChargeKind;
    use crate::model::{DisputeOutcome, DisputeReason, PaymentMethod, Registration, RequestStatus};

    const SECRET: &str = "sk_test_journal";

    fn replay() -> Replay {
        let config = Config::default()
            .with_webhook_secret(SECRET)
            .with_admin("admin@lyvads.test");
        let mut replay = Replay::new(config);
        for (email, registration) in [
            ("admin@lyvads.test", Registration::Regular),
            ("bo@lyvads.test", Registration::Regular),
            (
                "ada@lyvads.test",
                Registration::Creator {
                    fast_track_fee: Amount::from_major(200.0).unwrap(),
                },
            ),
        ] {
            replay
                .apply(JournalEntry::Register {
                    email: email.to_string(),
                    registration,
                })
                .unwrap();
        }
        replay
    }

    fn balance(replay: &Replay, email: &str) -> Amount {
        let id = replay.engine().find_user(email).unwrap().id;
        replay.engine().balance(id).unwrap()
    }

    fn fund(replay: &mut Replay, email: &str, major: f64) {
        replay
            .apply(JournalEntry::Fund {
                email: email.to_string(),
                amount: Amount::from_major(major).unwrap(),
            })
            .unwrap();
        replay
            .apply(JournalEntry::Callback {
                email: email.to_string(),
                status: "success".to_string(),
                amount: Some(Amount::from_major(major).unwrap()),
            })
            .unwrap();
    }

    #[test]
    fn funding_then_request_then_fulfill() {
        let mut r = replay();
        fund(&mut r, "bo@lyvads.test", 1_500.0);
        assert_eq!(balance(&r, "bo@lyvads.test"), Amount::from_major(1_500.0).unwrap());

        r.apply(JournalEntry::Request {
            email: "bo@lyvads.test".to_string(),
            creator: "ada@lyvads.test".to_string(),
            amount: Amount::from_major(1_000.0).unwrap(),
            method: PaymentMethod::Wallet,
            fast_track: true,
        })
        .unwrap();
        r.apply(JournalEntry::Fulfill {
            email: "ada@lyvads.test".to_string(),
            request: 1,
            video_url: "https://cdn.lyvads.test/v/1.mp4".to_string(),
        })
        .unwrap();

        assert_eq!(balance(&r, "bo@lyvads.test"), Amount::from_major(300.0).unwrap());
        assert_eq!(balance(&r, "ada@lyvads.test"), Amount::from_major(1_080.0).unwrap());
        let rows = r.balances();
        assert_eq!(rows[1], (2, "platform".to_string(), Amount::from_major(120.0).unwrap()));
    }

    #[test]
    fn card_request_settles_through_callback() {
        let mut r = replay();
        r.apply(JournalEntry::Request {
            email: "bo@lyvads.test".to_string(),
            creator: "ada@lyvads.test".to_string(),
            amount: Amount::from_major(500.0).unwrap(),
            method: PaymentMethod::Card,
            fast_track: false,
        })
        .unwrap();
        r.apply(JournalEntry::Callback {
            email: "bo@lyvads.test".to_string(),
            status: "success".to_string(),
            amount: None,
        })
        .unwrap();

        assert_eq!(r.balances()[0].2, Amount::from_major(500.0).unwrap());
        r.apply(JournalEntry::Dispute {
            email: "bo@lyvads.test".to_string(),
            request: 1,
            reason: DisputeReason::Other,
        })
        .unwrap_err();
    }

    #[test]
    fn callback_without_checkout_fails() {
        let mut r = replay();
        let result = r.apply(JournalEntry::Callback {
            email: "bo@lyvads.test".to_string(),
            status: "success".to_string(),
            amount: None,
        });
        assert!(matches!(result, Err(ReplayError::NothingToSettle { .. })));
    }

    #[test]
    fn mismatched_callback_keeps_reference_open() {
        let mut r = replay();
        r.apply(JournalEntry::Fund {
            email: "bo@lyvads.test".to_string(),
            amount: Amount::from_major(100.0).unwrap(),
        })
        .unwrap();
        let result = r.apply(JournalEntry::Callback {
            email: "bo@lyvads.test".to_string(),
            status: "success".to_string(),
            amount: Some(Amount::from_major(1.0).unwrap()),
        });
        assert!(matches!(
            result,
            Err(ReplayError::Webhook {
                status: WebhookStatus::AmountMismatch,
                ..
            })
        ));

        r.apply(JournalEntry::Callback {
            email: "bo@lyvads.test".to_string(),
            status: "success".to_string(),
            amount: None,
        })
        .unwrap();
        assert_eq!(balance(&r, "bo@lyvads.test"), Amount::from_major(100.0).unwrap());
    }

    #[test]
    fn withdrawal_reversed_by_transfer() {
        let mut r = replay();
        fund(&mut r, "ada@lyvads.test", 400.0);
        r.apply(JournalEntry::Charge {
            email: "admin@lyvads.test".to_string(),
            kind: ChargeKind::Withdrawal,
            percentage_bps: 100,
        })
        .unwrap();
        r.apply(JournalEntry::Withdraw {
            email: "ada@lyvads.test".to_string(),
            amount: Amount::from_major(300.0).unwrap(),
        })
        .unwrap();
        assert_eq!(balance(&r, "ada@lyvads.test"), Amount::from_major(97.0).unwrap());

        r.apply(JournalEntry::Transfer {
            email: "ada@lyvads.test".to_string(),
            status: "reversed".to_string(),
        })
        .unwrap();
        assert_eq!(balance(&r, "ada@lyvads.test"), Amount::from_major(397.0).unwrap());
    }

    #[test]
    fn dispute_resolution_through_journal() {
        let mut r = replay();
        fund(&mut r, "bo@lyvads.test", 500.0);
        r.apply(JournalEntry::Request {
            email: "bo@lyvads.test".to_string(),
            creator: "ada@lyvads.test".to_string(),
            amount: Amount::from_major(500.0).unwrap(),
            method: PaymentMethod::Wallet,
            fast_track: false,
        })
        .unwrap();
        r.apply(JournalEntry::Decline {
            email: "ada@lyvads.test".to_string(),
            request: 1,
            reason: "busy".to_string(),
        })
        .unwrap();
        r.apply(JournalEntry::Dispute {
            email: "ada@lyvads.test".to_string(),
            request: 1,
            reason: DisputeReason::WrongfulDecline,
        })
        .unwrap();
        r.apply(JournalEntry::Resolve {
            email: "admin@lyvads.test".to_string(),
            dispute: 1,
            outcome: DisputeOutcome::FavorDisputant,
        })
        .unwrap();

        assert_eq!(r.engine().request(1).unwrap().status, RequestStatus::Resolved);
        assert_eq!(balance(&r, "ada@lyvads.test"), Amount::from_major(450.0).unwrap());
        assert_eq!(balance(&r, "bo@lyvads.test"), Amount::ZERO);
    }

    #[test]
    fn unknown_user_is_reported() {
        let mut r = replay();
        let result = r.apply(JournalEntry::Withdraw {
            email: "ghost@lyvads.test".to_string(),
            amount: Amount::from_major(1.0).unwrap(),
        });
        assert!(matches!(result, Err(ReplayError::UnknownUser(_))));
    }

    #[test]
    fn oversized_request_is_rejected() {
        use crate::engine::ValidationError;

        let mut r = replay();
        let result = r.apply(JournalEntry::Request {
            email: "bo@lyvads.test".to_string(),
            creator: "ada@lyvads.test".to_string(),
            amount: Amount::from_minor(i64::MAX),
            method: PaymentMethod::Card,
            fast_track: true,
        });
        assert!(matches!(
            result,
            Err(ReplayError::Engine(EngineError::Validation(ValidationError::AmountTooLarge(..))))
        ));
        assert!(r.engine().request(1).is_none());

        // the replay keeps going
        fund(&mut r, "bo@lyvads.test", 10.0);
        assert_eq!(balance(&r, "bo@lyvads.test"), Amount::from_minor(1_000));
    }
}
