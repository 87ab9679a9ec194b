//! Cash-out of earned tokens.
//!
//! Eligibility lives with external collaborators (identity and tax
//! services); the ledger only sees their yes/no answers through
//! [`PayoutEligibility`]. Settlement to bank rails happens elsewhere.

use crate::current_timestamp;
use crate::error::{Error, Result};
use crate::ledger::ops::{self, Movement};
use crate::ledger::{CreditReceipt, Ledger};
use crate::store::Store;
use crate::tx::{validate_amount, validate_user_id, EntryMetadata, Source, TxType};
use tracing::info;

pub trait PayoutEligibility {
    /// Identity verified and age confirmed.
    fn identity_verified(&self, user_id: &str) -> bool;

    /// Tax profile complete, with consent on file.
    fn tax_profile_complete(&self, user_id: &str) -> bool;
}

/// Fixed answers, for callers that already resolved eligibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eligibility {
    pub identity_verified: bool,
    pub tax_profile_complete: bool,
}

impl Eligibility {
    pub fn verified() -> Self {
        Eligibility {
            identity_verified: true,
            tax_profile_complete: true,
        }
    }
}

impl PayoutEligibility for Eligibility {
    fn identity_verified(&self, _user_id: &str) -> bool {
        self.identity_verified
    }

    fn tax_profile_complete(&self, _user_id: &str) -> bool {
        self.tax_profile_complete
    }
}

impl<S: Store> Ledger<S> {
    pub fn cash_out(
        &self,
        user_id: &str,
        amount: u64,
        eligibility: &dyn PayoutEligibility,
    ) -> Result<CreditReceipt> {
        self.cash_out_at(user_id, amount, eligibility, current_timestamp())
    }

    /// Debit earned tokens for payout. Only tokens that were earned and not
    /// yet paid out can leave; purchased tokens stay on the platform.
    pub fn cash_out_at(
        &self,
        user_id: &str,
        amount: u64,
        eligibility: &dyn PayoutEligibility,
        now: u64,
    ) -> Result<CreditReceipt> {
        validate_user_id(user_id)?;
        validate_amount(amount)?;
        if !eligibility.identity_verified(user_id) {
            return Err(Error::Unauthorized(format!(
                "{} has not completed identity verification",
                user_id
            )));
        }
        if !eligibility.tax_profile_complete(user_id) {
            return Err(Error::Unauthorized(format!(
                "{} has no complete tax profile",
                user_id
            )));
        }

        let posted = self.run("cash_out", now, |txn| {
            let withdrawable = txn.wallet(user_id)?.withdrawable();
            if amount > withdrawable {
                return Err(Error::InsufficientFunds {
                    available: withdrawable,
                    required: amount,
                });
            }
            ops::post(
                txn,
                user_id,
                TxType::Payout,
                Source::Payout,
                None,
                Movement::Debit(amount),
                None,
                EntryMetadata::default(),
            )
        })?;
        info!(user = %user_id, amount, "cash out");
        Ok(CreditReceipt {
            tx_id: posted.tx_id,
            new_balance: posted.balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::CreditRequest;

    fn ledger() -> Ledger<crate::store::MemoryStore> {
        let ledger = Ledger::in_memory();
        ledger
            .purchase_at(&CreditRequest::new("bob", 100, Source::TokenPurchase), 1)
            .unwrap();
        ledger
            .earn_at(&CreditRequest::new("bob", 40, Source::Bonus), 1)
            .unwrap();
        ledger
    }

    #[test]
    fn test_ineligible_is_unauthorized() {
        let ledger = ledger();
        let no_tax = Eligibility {
            identity_verified: true,
            tax_profile_complete: false,
        };
        assert!(matches!(
            ledger.cash_out_at("bob", 10, &no_tax, 2),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.cash_out_at("bob", 10, &Eligibility::default(), 2),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_only_earned_tokens_leave() {
        let ledger = ledger();
        assert!(matches!(
            ledger.cash_out_at("bob", 41, &Eligibility::verified(), 2),
            Err(Error::InsufficientFunds { available: 40, .. })
        ));
        let receipt = ledger.cash_out_at("bob", 30, &Eligibility::verified(), 2).unwrap();
        assert_eq!(receipt.new_balance, 110);
        let wallet = ledger.wallet("bob").unwrap().unwrap();
        assert_eq!(wallet.lifetime_paid_out, 30);
        assert_eq!(wallet.withdrawable(), 10);
    }
}
