//! Wallet store and append-only transaction log.
//!
//! Every balance change goes through a [`LedgerEntry`]. Multi-leg transfers are
//! validated in full before any leg is applied, so they either land completely
//! or not at all. Pending entries settle exactly once.

use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::Amount;

mod entry;
mod wallet;

pub use entry::{Direction, Leg, LedgerEntry, Settlement, TrxKind, TrxStatus};
pub use wallet::{Wallet, WalletId, WalletOwner};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),
    #[error("insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("duplicate transaction reference {0}")]
    DuplicateReference(String),
    #[error("transaction reference {0} not found")]
    ReferenceNotFound(String),
    #[error("balance of wallet {0} would overflow")]
    BalanceOverflow(WalletId),
}

#[derive(Debug)]
pub struct Ledger {
    wallets: HashMap<WalletId, Wallet>,
    entries: Vec<LedgerEntry>,
    /// Position of each reference in `entries`
    by_reference: HashMap<String, usize>,
    escrow: WalletId,
    platform: WalletId,
    next_wallet: WalletId,
    next_reference: u64,
}

/// Public API
impl Ledger {
    pub fn new() -> Self {
        let mut ledger = Self {
            wallets: HashMap::new(),
            entries: Vec::new(),
            by_reference: HashMap::new(),
            escrow: 0,
            platform: 0,
            next_wallet: 1,
            next_reference: 1,
        };
        ledger.escrow = ledger.open_wallet(WalletOwner::Escrow);
        ledger.platform = ledger.open_wallet(WalletOwner::Platform);
        ledger
    }

    pub fn escrow_wallet(&self) -> WalletId {
        self.escrow
    }

    pub fn platform_wallet(&self) -> WalletId {
        self.platform
    }

    pub fn open_wallet(&mut self, owner: WalletOwner) -> WalletId {
        let id = self.next_wallet;
        self.next_wallet += 1;
        self.wallets.insert(id, Wallet::new(id, owner));
        id
    }

    pub fn wallet(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets.get(&id)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> + '_ {
        self.wallets.values()
    }

    pub fn balance(&self, id: WalletId) -> Result<Amount, LedgerError> {
        self.wallet(id)
            .map(Wallet::balance)
            .ok_or(LedgerError::WalletNotFound(id))
    }

    pub fn entry(&self, reference: &str) -> Option<&LedgerEntry> {
        self.by_reference.get(reference).map(|&idx| &self.entries[idx])
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Transaction history of one wallet, oldest first.
    pub fn entries_for(&self, wallet: WalletId) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.entries.iter().filter(move |e| e.wallet == wallet)
    }

    /// Hand out a fresh reference, e.g. for a gateway intent created before its entry.
    pub fn issue_reference(&mut self, kind: TrxKind) -> String {
        let seq = self.next_reference;
        self.next_reference += 1;
        format!("{}_{seq:08}", kind.prefix())
    }

    pub fn credit(&mut self, wallet: WalletId, amount: Amount, kind: TrxKind) -> Result<String, LedgerError> {
        let mut refs = self.transfer(&[Leg::credit(wallet, amount, kind)])?;
        Ok(refs.remove(0))
    }

    pub fn debit(&mut self, wallet: WalletId, amount: Amount, kind: TrxKind) -> Result<String, LedgerError> {
        let mut refs = self.transfer(&[Leg::debit(wallet, amount, kind)])?;
        Ok(refs.remove(0))
    }

    /// Apply every leg as a successful entry, or none of them.
    pub fn transfer(&mut self, legs: &[Leg]) -> Result<Vec<String>, LedgerError> {
        self.validate(legs)?;

        let mut references = Vec::with_capacity(legs.len());
        for leg in legs {
            let reference = self.issue_reference(leg.kind);
            self.apply_leg(leg)?;
            self.append(reference.clone(), leg, TrxStatus::Success);
            references.push(reference);
        }
        Ok(references)
    }

    /// Record an entry that waits for an external confirmation.
    ///
    /// A pending credit moves nothing until it settles successfully.
    /// A pending debit reserves the funds right away and gives them back if it fails.
    pub fn open_pending(&mut self, reference: String, leg: Leg) -> Result<(), LedgerError> {
        if self.by_reference.contains_key(&reference) {
            return Err(LedgerError::DuplicateReference(reference));
        }
        self.validate(std::slice::from_ref(&leg))?;

        if leg.direction == Direction::Debit {
            self.apply_leg(&leg)?;
        }
        self.append(reference, &leg, TrxStatus::Pending);
        Ok(())
    }

    pub fn settle_success(&mut self, reference: &str) -> Result<Settlement, LedgerError> {
        self.settle(reference, TrxStatus::Success)
    }

    pub fn settle_failure(&mut self, reference: &str) -> Result<Settlement, LedgerError> {
        self.settle(reference, TrxStatus::Failed)
    }
}

/// Private API
impl Ledger {
    fn validate(&self, legs: &[Leg]) -> Result<(), LedgerError> {
        // running balances so several debits on one wallet are checked together
        let mut projected: HashMap<WalletId, Amount> = HashMap::new();

        for leg in legs {
            if !leg.amount.is_positive() {
                return Err(LedgerError::NonPositiveAmount(leg.amount));
            }
            let balance = match projected.get(&leg.wallet) {
                Some(balance) => *balance,
                None => self.balance(leg.wallet)?,
            };
            let after = match leg.direction {
                Direction::Credit => balance.checked_add(leg.amount),
                Direction::Debit => {
                    if !leg.overdraft && balance < leg.amount {
                        return Err(LedgerError::InsufficientFunds {
                            wallet: leg.wallet,
                            available: balance,
                            requested: leg.amount,
                        });
                    }
                    balance.checked_sub(leg.amount)
                }
            };
            let after = after.ok_or(LedgerError::BalanceOverflow(leg.wallet))?;
            projected.insert(leg.wallet, after);
        }
        Ok(())
    }

    /// Caller must have validated the leg.
    fn apply_leg(&mut self, leg: &Leg) -> Result<(), LedgerError> {
        let wallet = self
            .wallets
            .get_mut(&leg.wallet)
            .ok_or(LedgerError::WalletNotFound(leg.wallet))?;
        match leg.direction {
            Direction::Credit => wallet.credit(leg.amount)?,
            Direction::Debit => {
                wallet.debit(leg.amount)?;
                if wallet.balance().is_negative() {
                    warn!(
                        wallet = leg.wallet,
                        balance = %wallet.balance(),
                        kind = ?leg.kind,
                        "debit left wallet with negative balance"
                    );
                }
            }
        }
        Ok(())
    }

    fn append(&mut self, reference: String, leg: &Leg, status: TrxStatus) {
        self.by_reference.insert(reference.clone(), self.entries.len());
        self.entries.push(LedgerEntry {
            reference,
            wallet: leg.wallet,
            amount: leg.amount,
            direction: leg.direction,
            kind: leg.kind,
            status,
            request: leg.request,
        });
    }

    /// Compare-and-set from `Pending` to `outcome`.
    fn settle(&mut self, reference: &str, outcome: TrxStatus) -> Result<Settlement, LedgerError> {
        let idx = *self
            .by_reference
            .get(reference)
            .ok_or_else(|| LedgerError::ReferenceNotFound(reference.to_string()))?;

        let entry = &self.entries[idx];
        if entry.status != TrxStatus::Pending {
            return Ok(Settlement::AlreadyProcessed(entry.clone()));
        }

        // a successful credit, or a failed debit releasing its reservation
        let credits = matches!(
            (entry.direction, outcome),
            (Direction::Credit, TrxStatus::Success) | (Direction::Debit, TrxStatus::Failed)
        );
        if credits {
            let wallet = self
                .wallets
                .get_mut(&entry.wallet)
                .ok_or(LedgerError::WalletNotFound(entry.wallet))?;
            wallet.credit(entry.amount)?;
        }

        let entry = &mut self.entries[idx];
        entry.status = outcome;
        Ok(Settlement::Settled(entry.clone()))
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naira(value: i64) -> Amount {
        Amount::from_minor(value * 100)
    }

    fn funded(amount: i64) -> (Ledger, WalletId) {
        let mut ledger = Ledger::new();
        let wallet = ledger.open_wallet(WalletOwner::User(1));
        ledger.credit(wallet, naira(amount), TrxKind::Funding).unwrap();
        (ledger, wallet)
    }

    #[test]
    fn new_ledger_has_system_wallets() {
        let ledger = Ledger::new();
        assert_eq!(ledger.wallets().count(), 2);
        assert_eq!(ledger.wallet(ledger.escrow_wallet()).unwrap().owner(), WalletOwner::Escrow);
        assert_eq!(
            ledger.wallet(ledger.platform_wallet()).unwrap().owner(),
            WalletOwner::Platform
        );
    }

    #[test]
    fn credit_appends_successful_entry() {
        let (ledger, wallet) = funded(100);
        assert_eq!(ledger.balance(wallet).unwrap(), naira(100));

        let entries: Vec<_> = ledger.entries_for(wallet).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TrxStatus::Success);
        assert_eq!(entries[0].kind, TrxKind::Funding);
        assert!(entries[0].reference.starts_with("fnd_"));
    }

    #[test]
    fn debit_insufficient_funds_fails() {
        let (mut ledger, wallet) = funded(100);

        let result = ledger.debit(wallet, naira(101), TrxKind::Withdrawal);
        assert_eq!(
            result,
            Err(LedgerError::InsufficientFunds {
                wallet,
                available: naira(100),
                requested: naira(101),
            })
        );
        assert_eq!(ledger.balance(wallet).unwrap(), naira(100));
        assert_eq!(ledger.entries_for(wallet).count(), 1);
    }

    #[test]
    fn non_positive_amount_fails() {
        let (mut ledger, wallet) = funded(100);
        assert_eq!(
            ledger.credit(wallet, Amount::ZERO, TrxKind::Funding),
            Err(LedgerError::NonPositiveAmount(Amount::ZERO))
        );
    }

    #[test]
    fn unknown_wallet_fails() {
        let mut ledger = Ledger::new();
        assert_eq!(
            ledger.credit(99, naira(1), TrxKind::Funding),
            Err(LedgerError::WalletNotFound(99))
        );
        assert_eq!(ledger.balance(99), Err(LedgerError::WalletNotFound(99)));
    }

    #[test]
    fn transfer_is_all_or_nothing() {
        let (mut ledger, wallet) = funded(100);
        let escrow = ledger.escrow_wallet();

        // second debit on the same wallet overdraws the running balance
        let legs = [
            Leg::debit(wallet, naira(60), TrxKind::Payment),
            Leg::credit(escrow, naira(60), TrxKind::Payment),
            Leg::debit(wallet, naira(60), TrxKind::Payment),
        ];
        assert!(matches!(
            ledger.transfer(&legs),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.balance(wallet).unwrap(), naira(100));
        assert_eq!(ledger.balance(escrow).unwrap(), Amount::ZERO);
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn transfer_moves_money() {
        let (mut ledger, wallet) = funded(100);
        let escrow = ledger.escrow_wallet();

        let refs = ledger
            .transfer(&[
                Leg::debit(wallet, naira(40), TrxKind::Payment).for_request(5),
                Leg::credit(escrow, naira(40), TrxKind::Payment).for_request(5),
            ])
            .unwrap();

        assert_eq!(refs.len(), 2);
        assert_ne!(refs[0], refs[1]);
        assert_eq!(ledger.balance(wallet).unwrap(), naira(60));
        assert_eq!(ledger.balance(escrow).unwrap(), naira(40));
        assert_eq!(ledger.entry(&refs[1]).unwrap().request, Some(5));
    }

    #[test]
    fn overdraft_leg_may_go_negative() {
        let (mut ledger, wallet) = funded(10);
        ledger
            .transfer(&[Leg::debit(wallet, naira(30), TrxKind::Reversal).allow_overdraft()])
            .unwrap();
        assert_eq!(ledger.balance(wallet).unwrap(), naira(-20));
    }

    #[test]
    fn pending_credit_settles_once() {
        let mut ledger = Ledger::new();
        let wallet = ledger.open_wallet(WalletOwner::User(1));
        let reference = ledger.issue_reference(TrxKind::Funding);
        ledger
            .open_pending(reference.clone(), Leg::credit(wallet, naira(50), TrxKind::Funding))
            .unwrap();
        assert_eq!(ledger.balance(wallet).unwrap(), Amount::ZERO);

        assert!(matches!(
            ledger.settle_success(&reference).unwrap(),
            Settlement::Settled(_)
        ));
        assert!(matches!(
            ledger.settle_success(&reference).unwrap(),
            Settlement::AlreadyProcessed(_)
        ));
        assert!(matches!(
            ledger.settle_failure(&reference).unwrap(),
            Settlement::AlreadyProcessed(_)
        ));

        assert_eq!(ledger.balance(wallet).unwrap(), naira(50));
        assert_eq!(ledger.entry(&reference).unwrap().status, TrxStatus::Success);
    }

    #[test]
    fn failed_pending_credit_moves_nothing() {
        let mut ledger = Ledger::new();
        let wallet = ledger.open_wallet(WalletOwner::User(1));
        let reference = ledger.issue_reference(TrxKind::Funding);
        ledger
            .open_pending(reference.clone(), Leg::credit(wallet, naira(50), TrxKind::Funding))
            .unwrap();
        ledger.settle_failure(&reference).unwrap();
        assert_eq!(ledger.balance(wallet).unwrap(), Amount::ZERO);
        assert_eq!(ledger.entry(&reference).unwrap().status, TrxStatus::Failed);
    }

    #[test]
    fn pending_debit_reserves_and_failure_releases() {
        let (mut ledger, wallet) = funded(100);
        let reference = ledger.issue_reference(TrxKind::Withdrawal);
        ledger
            .open_pending(reference.clone(), Leg::debit(wallet, naira(70), TrxKind::Withdrawal))
            .unwrap();
        assert_eq!(ledger.balance(wallet).unwrap(), naira(30));

        ledger.settle_failure(&reference).unwrap();
        assert_eq!(ledger.balance(wallet).unwrap(), naira(100));
    }

    #[test]
    fn pending_debit_needs_funds() {
        let (mut ledger, wallet) = funded(10);
        let reference = ledger.issue_reference(TrxKind::Withdrawal);
        assert!(matches!(
            ledger.open_pending(reference.clone(), Leg::debit(wallet, naira(70), TrxKind::Withdrawal)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(ledger.entry(&reference).is_none());
    }

    #[test]
    fn duplicate_pending_reference_fails() {
        let mut ledger = Ledger::new();
        let wallet = ledger.open_wallet(WalletOwner::User(1));
        let leg = Leg::credit(wallet, naira(5), TrxKind::Funding);
        ledger.open_pending("fnd_x".to_string(), leg.clone()).unwrap();
        assert_eq!(
            ledger.open_pending("fnd_x".to_string(), leg),
            Err(LedgerError::DuplicateReference("fnd_x".to_string()))
        );
    }

    #[test]
    fn settle_unknown_reference_fails() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.settle_success("nope"),
            Err(LedgerError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn credit_overflowing_balance_moves_nothing() {
        let (mut ledger, wallet) = funded(100);
        let escrow = ledger.escrow_wallet();
        let huge = Amount::from_minor(i64::MAX);

        assert_eq!(
            ledger.credit(wallet, huge, TrxKind::Funding),
            Err(LedgerError::BalanceOverflow(wallet))
        );
        assert_eq!(
            ledger.transfer(&[
                Leg::credit(escrow, huge, TrxKind::Payment),
                Leg::credit(escrow, naira(1), TrxKind::Payment),
            ]),
            Err(LedgerError::BalanceOverflow(escrow))
        );
        assert_eq!(ledger.balance(wallet).unwrap(), naira(100));
        assert_eq!(ledger.balance(escrow).unwrap(), Amount::ZERO);
        assert_eq!(ledger.entries_for(escrow).count(), 0);
    }

    #[test]
    fn overflowing_settlement_stays_pending() {
        let (mut ledger, wallet) = funded(100);
        let reference = ledger.issue_reference(TrxKind::Funding);
        let room = Amount::from_minor(i64::MAX - naira(100).minor());
        ledger
            .open_pending(reference.clone(), Leg::credit(wallet, room, TrxKind::Funding))
            .unwrap();
        // balance grows while the credit waits
        ledger.credit(wallet, naira(1), TrxKind::Funding).unwrap();

        assert_eq!(
            ledger.settle_success(&reference),
            Err(LedgerError::BalanceOverflow(wallet))
        );
        assert_eq!(ledger.entry(&reference).unwrap().status, TrxStatus::Pending);
        assert_eq!(ledger.balance(wallet).unwrap(), naira(101));
    }
}
