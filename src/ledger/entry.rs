use serde::Serialize;

use super::WalletId;
use crate::Amount;
use crate::model::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

/// Why money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrxKind {
    /// Wallet top-up through the gateway.
    Funding,
    /// A user paying for a request.
    Payment,
    /// Escrow paying out to a creator.
    Release,
    /// Platform fee.
    Commission,
    /// Money returned to a user.
    Refund,
    /// Wallet cash-out through the gateway.
    Withdrawal,
    /// Clawback ordered by a dispute ruling.
    Reversal,
}

impl TrxKind {
    pub(super) fn prefix(self) -> &'static str {
        match self {
            TrxKind::Funding => "fnd",
            TrxKind::Payment => "pay",
            TrxKind::Release => "rel",
            TrxKind::Commission => "com",
            TrxKind::Refund => "rfd",
            TrxKind::Withdrawal => "wdr",
            TrxKind::Reversal => "rev",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrxStatus {
    Pending,
    Success,
    Failed,
}

/// One line of the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub reference: String,
    pub wallet: WalletId,
    pub amount: Amount,
    pub direction: Direction,
    pub kind: TrxKind,
    pub status: TrxStatus,
    pub request: Option<RequestId>,
}

/// A single wallet movement, applied together with the other legs of a transfer.
#[derive(Debug, Clone)]
pub struct Leg {
    pub wallet: WalletId,
    pub amount: Amount,
    pub direction: Direction,
    pub kind: TrxKind,
    pub request: Option<RequestId>,
    /// Debit may push the balance below zero.
    pub overdraft: bool,
}

impl Leg {
    pub fn credit(wallet: WalletId, amount: Amount, kind: TrxKind) -> Self {
        Self {
            wallet,
            amount,
            direction: Direction::Credit,
            kind,
            request: None,
            overdraft: false,
        }
    }

    pub fn debit(wallet: WalletId, amount: Amount, kind: TrxKind) -> Self {
        Self {
            direction: Direction::Debit,
            ..Self::credit(wallet, amount, kind)
        }
    }

    pub fn for_request(mut self, request: RequestId) -> Self {
        self.request = Some(request);
        self
    }

    pub fn allow_overdraft(mut self) -> Self {
        self.overdraft = true;
        self
    }
}

/// Result of settling a pending entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The entry moved out of `Pending` with this call.
    Settled(LedgerEntry),
    /// The entry had already been settled; nothing changed.
    AlreadyProcessed(LedgerEntry),
}
