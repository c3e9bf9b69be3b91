//! Inputs the engine accepts through [`Engine::apply`](crate::Engine::apply).

use crate::Amount;
use crate::charge::{Charge, ChargeKind};
use crate::gateway::Checkout;
use crate::model::{
    DisputeId, DisputeOutcome, DisputeReason, PaymentMethod, RequestDetails, RequestId, UserId,
};
use crate::webhook::WebhookReply;

#[derive(Debug, Clone)]
pub enum Command {
    /// Top up the actor's wallet through the card gateway.
    FundWallet { actor: UserId, amount: Amount },
    /// Ask a creator for a video.
    CreateRequest {
        actor: UserId,
        creator: UserId,
        method: PaymentMethod,
        details: RequestDetails,
    },
    /// Deliver the video and release escrow to the creator.
    FulfillRequest {
        actor: UserId,
        request: RequestId,
        video_url: String,
    },
    /// Refuse the request and refund the user.
    DeclineRequest {
        actor: UserId,
        request: RequestId,
        reason: String,
        feedback: Option<String>,
    },
    OpenDispute {
        actor: UserId,
        request: RequestId,
        reason: DisputeReason,
        message: String,
    },
    ResolveDispute {
        actor: UserId,
        dispute: DisputeId,
        outcome: DisputeOutcome,
    },
    Withdraw { actor: UserId, amount: Amount },
    /// Raw gateway callback with its signature header.
    Webhook {
        body: Vec<u8>,
        signature: Option<String>,
    },
    SetCharge {
        actor: UserId,
        kind: ChargeKind,
        charge: Charge,
    },
    SetCreatorActive {
        actor: UserId,
        creator: UserId,
        active: bool,
    },
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::FundWallet { .. } => "fund wallet",
            Command::CreateRequest { .. } => "create request",
            Command::FulfillRequest { .. } => "fulfill request",
            Command::DeclineRequest { .. } => "decline request",
            Command::OpenDispute { .. } => "open dispute",
            Command::ResolveDispute { .. } => "resolve dispute",
            Command::Withdraw { .. } => "withdraw",
            Command::Webhook { .. } => "webhook",
            Command::SetCharge { .. } => "set charge",
            Command::SetCreatorActive { .. } => "set creator active",
        }
    }
}

/// Result of a request creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReceipt {
    pub request: RequestId,
    pub total_amount: Amount,
    /// Present for card payments.
    pub checkout: Option<Checkout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Checkout(Checkout),
    Request(RequestReceipt),
    Dispute(DisputeId),
    /// Reference of the pending withdrawal.
    Withdrawal(String),
    Webhook(WebhookReply),
    Done,
}
