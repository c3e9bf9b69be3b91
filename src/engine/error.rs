//! Error types for engine operations.

use std::fmt;
use thiserror::Error;

use crate::Amount;
use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::model::{DisputeId, DisputeStatus, RequestId, RequestStatus, UserId};
use crate::onboarding::OnboardingError;

/// Top-level error returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("payment failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("{0}")]
    InvalidState(#[from] InvalidStateError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("onboarding: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: u64 },

    #[error("user {actor} is not allowed to {action}")]
    Unauthorized { actor: UserId, action: Action },

    #[error("email {0} is already registered")]
    EmailTaken(String),
}

/// Coarse classification of an [`EngineError`], used to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Payment,
    InsufficientFunds,
    InvalidState,
    NotFound,
    Unauthorized,
    Conflict,
    /// A balance hit the representable limit.
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::Onboarding(_) => ErrorKind::Validation,
            EngineError::Payment(_) => ErrorKind::Payment,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Unauthorized { .. } => ErrorKind::Unauthorized,
            EngineError::EmailTaken(_) => ErrorKind::Conflict,
            EngineError::Ledger(e) => match e {
                LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
                LedgerError::NonPositiveAmount(_) => ErrorKind::Validation,
                LedgerError::WalletNotFound(_) | LedgerError::ReferenceNotFound(_) => {
                    ErrorKind::NotFound
                }
                LedgerError::DuplicateReference(_) => ErrorKind::Conflict,
                LedgerError::BalanceOverflow(_) => ErrorKind::Internal,
            },
        }
    }

    pub(crate) fn not_found(entity: Entity, id: u64) -> Self {
        EngineError::NotFound { entity, id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Request,
    Dispute,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "user",
            Entity::Request => "request",
            Entity::Dispute => "dispute",
        })
    }
}

/// The operation an actor attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateRequest,
    FulfillRequest,
    DeclineRequest,
    OpenDispute,
    ResolveDispute,
    SetCharge,
    ModerateCreator,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::CreateRequest => "create requests",
            Action::FulfillRequest => "fulfill this request",
            Action::DeclineRequest => "decline this request",
            Action::OpenDispute => "dispute this request",
            Action::ResolveDispute => "resolve disputes",
            Action::SetCharge => "configure charges",
            Action::ModerateCreator => "moderate creators",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("user {0} is not a creator")]
    NotACreator(UserId),
    #[error("creator {0} is not active")]
    CreatorInactive(UserId),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("charge must be at most 100% with min not above max")]
    InvalidCharge,
    #[error("{0} plus {1} is too large")]
    AmountTooLarge(Amount, Amount),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("payment for request {0} has not been confirmed")]
    NotConfirmed(RequestId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidStateError {
    #[error("{0}: request {1} is {2:?}")]
    Request(Action, RequestId, RequestStatus),

    #[error("{0}: dispute {1} is {2:?}")]
    Dispute(Action, DisputeId, DisputeStatus),
}
