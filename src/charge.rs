//! Platform charges.

use serde::{Deserialize, Serialize};

use crate::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    /// Commission taken when a request's funds are released to the creator.
    Collaboration,
    /// Fee added on top of a wallet withdrawal.
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Active,
    Inactive,
}

/// A percentage fee clamped between a minimum and an optional maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Percentage in basis points: 1_000 is 10%.
    pub percentage_bps: u32,
    pub min_amount: Amount,
    pub max_amount: Option<Amount>,
    pub status: ChargeStatus,
}

impl Charge {
    pub const MAX_BPS: u32 = 10_000;

    pub fn percent(percentage_bps: u32) -> Self {
        Self {
            percentage_bps,
            min_amount: Amount::ZERO,
            max_amount: None,
            status: ChargeStatus::Active,
        }
    }

    pub fn inactive() -> Self {
        Self {
            status: ChargeStatus::Inactive,
            ..Self::percent(0)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.percentage_bps <= Self::MAX_BPS
            && !self.min_amount.is_negative()
            && self.max_amount.is_none_or(|max| max >= self.min_amount)
    }

    /// Fee owed on `amount`; never more than `amount` itself.
    pub fn fee_for(&self, amount: Amount) -> Amount {
        if self.status == ChargeStatus::Inactive || !amount.is_positive() {
            return Amount::ZERO;
        }

        let mut fee = amount.basis_points(self.percentage_bps);
        if fee < self.min_amount {
            fee = self.min_amount;
        }
        if let Some(max) = self.max_amount {
            if fee > max {
                fee = max;
            }
        }
        fee.min(amount)
    }
}

/// The charge configured for each [`ChargeKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeSchedule {
    pub collaboration: Charge,
    pub withdrawal: Charge,
}

impl ChargeSchedule {
    pub fn get(&self, kind: ChargeKind) -> &Charge {
        match kind {
            ChargeKind::Collaboration => &self.collaboration,
            ChargeKind::Withdrawal => &self.withdrawal,
        }
    }

    pub fn set(&mut self, kind: ChargeKind, charge: Charge) {
        match kind {
            ChargeKind::Collaboration => self.collaboration = charge,
            ChargeKind::Withdrawal => self.withdrawal = charge,
        }
    }
}

impl Default for ChargeSchedule {
    fn default() -> Self {
        Self {
            collaboration: Charge::percent(1_000),
            withdrawal: Charge::inactive(),
        }
    }
}
