use serde::Serialize;

use super::LedgerError;
use crate::Amount;
use crate::model::UserId;

/// Wallet identifier.
pub type WalletId = u64;

/// Who a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum WalletOwner {
    User(UserId),
    /// Holds request payments until release or refund.
    Escrow,
    /// Collects platform commissions.
    Platform,
}

/// A balance holder. Only the ledger mutates it.
#[derive(Debug)]
pub struct Wallet {
    id: WalletId,
    owner: WalletOwner,
    balance: Amount,
}

impl Wallet {
    pub(super) fn new(id: WalletId, owner: WalletOwner) -> Self {
        Self {
            id,
            owner,
            balance: Amount::ZERO,
        }
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn owner(&self) -> WalletOwner {
        self.owner
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub(super) fn credit(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(self.id))?;
        Ok(())
    }

    pub(super) fn debit(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(LedgerError::BalanceOverflow(self.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(7, WalletOwner::User(3));
        assert_eq!(wallet.id(), 7);
        assert_eq!(wallet.owner(), WalletOwner::User(3));
        assert_eq!(wallet.balance(), Amount::ZERO);
    }

    #[test]
    fn credit_then_debit() {
        let mut wallet = Wallet::new(1, WalletOwner::Escrow);
        wallet.credit(Amount::from_minor(500)).unwrap();
        wallet.debit(Amount::from_minor(200)).unwrap();
        assert_eq!(wallet.balance(), Amount::from_minor(300));
    }

    #[test]
    fn credit_past_max_balance_fails() {
        let mut wallet = Wallet::new(2, WalletOwner::Platform);
        wallet.credit(Amount::from_minor(i64::MAX)).unwrap();
        assert_eq!(
            wallet.credit(Amount::from_minor(1)),
            Err(LedgerError::BalanceOverflow(2))
        );
        assert_eq!(wallet.balance(), Amount::from_minor(i64::MAX));
    }

    #[test]
    fn owner_serializes_tagged() {
        let json = serde_json::to_string(&WalletOwner::User(4)).unwrap();
        assert_eq!(json, r#"{"type":"user","id":4}"#);
        let json = serde_json::to_string(&WalletOwner::Platform).unwrap();
        assert_eq!(json, r#"{"type":"platform"}"#);
    }
}
