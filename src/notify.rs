//! Notification seam. Delivery (email, push) lives outside the engine.

use tracing::info;

use crate::Amount;
use crate::model::{DisputeId, DisputeOutcome, RequestId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    VerificationCode { email: String, code: String },
    WalletFunded { user: UserId, amount: Amount },
    /// The creator has a paid request waiting.
    RequestReceived { creator: UserId, request: RequestId },
    RequestFulfilled { user: UserId, request: RequestId },
    RequestDeclined { user: UserId, request: RequestId, refunded: Amount },
    DisputeOpened { counterparty: UserId, dispute: DisputeId },
    DisputeResolved { user: UserId, dispute: DisputeId, outcome: DisputeOutcome },
    WithdrawalSettled { user: UserId, amount: Amount, success: bool },
}

pub trait Notifier: Send {
    fn notify(&mut self, notification: Notification);
}

/// Logs every notification at `info`.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&mut self, notification: Notification) {
        match &notification {
            // never log the code itself
            Notification::VerificationCode { email, .. } => {
                info!(email, "verification code sent");
            }
            other => info!(notification = ?other, "notification sent"),
        }
    }
}

/// Keeps notifications in memory, for inspection.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    sent: std::sync::Arc<std::sync::Mutex<Vec<Notification>>>,
}

impl Outbox {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for Outbox {
    fn notify(&mut self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
