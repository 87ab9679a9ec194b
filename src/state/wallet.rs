use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Wallet aggregate: a user's spendable token balance plus lifetime counters.
///
/// Invariants:
/// - Balance never becomes negative
/// - Lifetime counters only grow
/// - Only the ledger engine mutates a wallet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: String,

    /// Spendable tokens
    pub balance: u64,

    pub lifetime_purchased: u64,
    pub lifetime_spent: u64,
    pub lifetime_earned: u64,

    /// Earned tokens already cashed out to fiat
    #[serde(default)]
    pub lifetime_paid_out: u64,

    pub created_at: u64,
    pub updated_at: u64,
}

impl Wallet {
    /// Create an empty wallet
    pub fn new(user_id: &str, now: u64) -> Self {
        Wallet {
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            ..Wallet::default()
        }
    }

    /// Create a wallet with an initial balance (tests and fixtures)
    pub fn with_balance(user_id: &str, balance: u64) -> Self {
        Wallet {
            user_id: user_id.to_string(),
            balance,
            ..Wallet::default()
        }
    }

    /// Add to balance. Returns the new balance.
    pub fn credit(&mut self, amount: u64) -> Result<u64> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            Error::Validation(format!(
                "Credit of {} overflows balance of {}",
                amount, self.user_id
            ))
        })?;
        Ok(self.balance)
    }

    /// Subtract from balance. Fails without touching the balance if it
    /// does not cover `amount`.
    pub fn debit(&mut self, amount: u64) -> Result<u64> {
        if self.balance < amount {
            return Err(Error::InsufficientFunds {
                available: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        Ok(self.balance)
    }

    pub fn has_sufficient_balance(&self, amount: u64) -> bool {
        self.balance >= amount
    }

    pub fn record_purchase(&mut self, amount: u64) {
        self.lifetime_purchased = self.lifetime_purchased.saturating_add(amount);
    }

    pub fn record_spend(&mut self, amount: u64) {
        self.lifetime_spent = self.lifetime_spent.saturating_add(amount);
    }

    pub fn record_earning(&mut self, amount: u64) {
        self.lifetime_earned = self.lifetime_earned.saturating_add(amount);
    }

    pub fn record_payout(&mut self, amount: u64) {
        self.lifetime_paid_out = self.lifetime_paid_out.saturating_add(amount);
    }

    /// Tokens eligible for cash-out: earned, not yet paid out, and still held.
    pub fn withdrawable(&self) -> u64 {
        self.lifetime_earned
            .saturating_sub(self.lifetime_paid_out)
            .min(self.balance)
    }

    pub fn touch(&mut self, now: u64) {
        self.updated_at = now;
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new("alice", 42);
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.user_id, "alice");
        assert_eq!(wallet.created_at, 42);
    }

    #[test]
    fn test_credit() {
        let mut wallet = Wallet::new("alice", 0);
        assert_eq!(wallet.credit(50).unwrap(), 50);
        assert_eq!(wallet.balance, 50);
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let mut wallet = Wallet::with_balance("alice", u64::MAX);
        assert!(wallet.credit(1).is_err());
        assert_eq!(wallet.balance, u64::MAX);
    }

    #[test]
    fn test_debit_success() {
        let mut wallet = Wallet::with_balance("alice", 100);
        assert_eq!(wallet.debit(30).unwrap(), 70);
    }

    #[test]
    fn test_debit_insufficient() {
        let mut wallet = Wallet::with_balance("alice", 50);
        let err = wallet.debit(100).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds {
                available: 50,
                required: 100
            }
        ));
        assert_eq!(wallet.balance, 50); // Balance unchanged
    }

    #[test]
    fn test_withdrawable() {
        let mut wallet = Wallet::with_balance("bob", 500);
        wallet.record_earning(300);
        assert_eq!(wallet.withdrawable(), 300);
        wallet.record_payout(100);
        assert_eq!(wallet.withdrawable(), 200);
        wallet.balance = 50;
        assert_eq!(wallet.withdrawable(), 50);
    }
}
