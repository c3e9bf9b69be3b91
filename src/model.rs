//! Core domain types for the escrow engine.

use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::ledger::WalletId;

/// User identifier.
pub type UserId = u64;

/// Collaboration request identifier.
pub type RequestId = u64;

/// Dispute identifier.
pub type DisputeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Regular,
    Creator,
    Admin,
}

/// Creator-specific settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorProfile {
    /// Inactive creators cannot receive new requests.
    pub active: bool,
    /// Extra charged when a user asks for fast-track delivery.
    pub fast_track_fee: Amount,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub wallet: WalletId,
    pub creator: Option<CreatorProfile>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_active_creator(&self) -> bool {
        self.creator.as_ref().is_some_and(|profile| profile.active)
    }
}

/// What a newly verified user signs up as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Regular,
    Creator { fast_track_fee: Amount },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid from the user's wallet balance, settles immediately.
    Wallet,
    /// Paid through the card gateway, settles on webhook.
    Card,
}

/// What the user asks the creator for.
#[derive(Debug, Clone)]
pub struct RequestDetails {
    pub amount: Amount,
    pub fast_track: bool,
    pub script: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Declined,
    Disputed,
    Resolved,
}

/// Where the money paid for a request currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Card payment initialized, gateway confirmation outstanding.
    AwaitingPayment,
    /// Funds sit in the escrow wallet.
    Held,
    /// Funds went to the creator (and the platform commission).
    Released,
    /// Funds went back to the user.
    Refunded,
    /// The gateway reported the payment as failed.
    PaymentFailed,
    /// Declined before any payment arrived.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub user: UserId,
    pub creator: UserId,
    pub request_amount: Amount,
    pub fast_track_fee: Amount,
    pub total_amount: Amount,
    pub payment_method: PaymentMethod,
    pub payment_reference: String,
    pub script: String,
    pub status: RequestStatus,
    pub escrow: EscrowState,
    pub video_url: Option<String>,
    pub decline_reason: Option<String>,
    pub feedback: Option<String>,
    /// Commission taken when the funds were released to the creator.
    pub platform_fee: Option<Amount>,
}

impl Request {
    /// Party that currently holds the request's funds, if any.
    pub fn funds_holder(&self) -> Option<UserId> {
        match self.escrow {
            EscrowState::Released => Some(self.creator),
            EscrowState::Refunded => Some(self.user),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    NotAsDescribed,
    PoorQuality,
    InappropriateContent,
    WrongfulDecline,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

/// Admin ruling on a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    FavorDisputant,
    FavorCounterparty,
    Dismissed,
}

#[derive(Debug, Clone)]
pub struct Dispute {
    pub id: DisputeId,
    pub request: RequestId,
    pub opened_by: UserId,
    pub reason: DisputeReason,
    pub message: String,
    pub amount: Amount,
    pub status: DisputeStatus,
    pub outcome: Option<DisputeOutcome>,
}
