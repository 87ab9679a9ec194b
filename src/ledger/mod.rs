//! Ledger engine: the only place wallets are mutated.
//!
//! Every public operation runs as one [`Txn`] against the store and is
//! retried with exponential backoff when the commit loses an optimistic
//! concurrency race. Any other error aborts the operation with nothing
//! applied.

pub mod ops;
pub mod receipt;

pub use receipt::{ApiError, ApiResponse, CreditReceipt, RefundReceipt, SpendReceipt};

use crate::config::RetryConfig;
use crate::current_timestamp;
use crate::error::{Error, Result};
use crate::state::{Escrow, PlatformRevenue, Wallet};
use crate::store::{Key, MemoryStore, Record, Store, Txn};
use crate::tx::{CreditRequest, LedgerEntry, RefundRequest, SpendRequest};
use tracing::{debug, info, warn};

pub struct Ledger<S: Store> {
    store: S,
    retry: RetryConfig,
}

impl Ledger<MemoryStore> {
    /// Empty in-memory ledger with default retry settings.
    pub fn in_memory() -> Self {
        Ledger::new(MemoryStore::new(), RetryConfig::default())
    }
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S, retry: RetryConfig) -> Self {
        Ledger { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `f` inside a transaction and commit it, retrying on conflicts.
    ///
    /// `f` is re-run from scratch on every attempt against fresh reads, so
    /// it must not have side effects outside the transaction.
    pub fn run<T, F>(&self, op: &'static str, now: u64, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Txn<'_, S>) -> Result<T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut txn = Txn::new(&self.store, now);
            let out = f(&mut txn)?;
            match self.store.commit(txn.into_changes()) {
                Ok(committed) => {
                    debug!(
                        op,
                        attempt,
                        entries = committed.entries.len(),
                        next_seq = committed.next_seq,
                        "committed"
                    );
                    return Ok(out);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    debug!(op, attempt, backoff_ms = backoff.as_millis() as u64, "commit conflict, retrying");
                    std::thread::sleep(backoff);
                }
                Err(e) if e.is_retryable() => {
                    warn!(op, attempts = attempt, "giving up after repeated conflicts");
                    return Err(Error::ConcurrencyConflict { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn spend(&self, req: &SpendRequest) -> Result<SpendReceipt> {
        self.spend_at(req, current_timestamp())
    }

    /// Debit the payer and split the amount between earner and platform.
    pub fn spend_at(&self, req: &SpendRequest, now: u64) -> Result<SpendReceipt> {
        let result = self.run("spend", now, |txn| ops::spend(txn, req));
        match &result {
            Ok(spent) => info!(
                payer = %req.payer_id,
                amount = req.amount,
                context = %spent.context,
                earner_share = spent.split.earner,
                platform_share = spent.split.platform,
                "spend"
            ),
            Err(Error::InsufficientFunds {
                available,
                required,
            }) => info!(
                payer = %req.payer_id,
                available,
                required,
                "spend rejected: insufficient funds"
            ),
            Err(_) => {}
        }
        let spent = result?;
        Ok(SpendReceipt {
            tx_id: spent.tx_id,
            new_balance: spent.payer_balance,
            earner_earned: spent.earner_credited,
            platform_share: spent.split.platform,
            escrowed: spent.escrowed,
            context: spent.context,
        })
    }

    pub fn earn(&self, req: &CreditRequest) -> Result<CreditReceipt> {
        self.earn_at(req, current_timestamp())
    }

    pub fn earn_at(&self, req: &CreditRequest, now: u64) -> Result<CreditReceipt> {
        let posted = self.run("earn", now, |txn| ops::earn(txn, req))?;
        info!(user = %req.user_id, amount = req.amount, source = %req.source, "earn");
        Ok(CreditReceipt {
            tx_id: posted.tx_id,
            new_balance: posted.balance,
        })
    }

    pub fn purchase(&self, req: &CreditRequest) -> Result<CreditReceipt> {
        self.purchase_at(req, current_timestamp())
    }

    /// Credit tokens already paid for through the payment gateway.
    pub fn purchase_at(&self, req: &CreditRequest, now: u64) -> Result<CreditReceipt> {
        let posted = self.run("purchase", now, |txn| ops::purchase(txn, req))?;
        info!(user = %req.user_id, amount = req.amount, "purchase");
        Ok(CreditReceipt {
            tx_id: posted.tx_id,
            new_balance: posted.balance,
        })
    }

    pub fn refund(&self, req: &RefundRequest) -> Result<RefundReceipt> {
        self.refund_at(req, current_timestamp())
    }

    pub fn refund_at(&self, req: &RefundRequest, now: u64) -> Result<RefundReceipt> {
        let out = self.run("refund", now, |txn| ops::refund(txn, req))?;
        info!(
            user = %req.user_id,
            amount = req.amount,
            reason = %req.reason,
            earner_deducted = out.earner_deducted,
            platform_deducted = out.platform_deducted,
            "refund"
        );
        Ok(RefundReceipt {
            tx_id: out.tx_id,
            new_balance: out.balance,
            earner_deducted: out.earner_deducted,
            platform_deducted: out.platform_deducted,
            clawback_skipped: out.clawback_skipped,
        })
    }

    /// Latest committed wallet. A snapshot for display; never use it to
    /// authorise a spend.
    pub fn wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        match self.store.get(&Key::Wallet(user_id.to_string()))? {
            Some(v) => match v.record {
                Record::Wallet(w) => Ok(Some(w)),
                other => Err(Error::Storage(format!(
                    "Expected wallet record, found {:?}",
                    other
                ))),
            },
            None => Ok(None),
        }
    }

    /// Balance of a wallet; 0 for users who never transacted.
    pub fn balance(&self, user_id: &str) -> Result<u64> {
        Ok(self.wallet(user_id)?.map(|w| w.balance).unwrap_or(0))
    }

    /// Entries of one user with `from_ts <= created_at <= to_ts`, commit order.
    pub fn history(&self, user_id: &str, from_ts: u64, to_ts: u64) -> Result<Vec<LedgerEntry>> {
        if from_ts > to_ts {
            return Err(Error::Validation(format!(
                "Empty time range: {} > {}",
                from_ts, to_ts
            )));
        }
        self.store.entries_for_user(user_id, from_ts, to_ts)
    }

    pub fn platform_revenue(&self) -> Result<PlatformRevenue> {
        self.store.platform_revenue()
    }

    pub fn escrow(&self) -> Result<Escrow> {
        self.store.escrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RevenueContext;
    use crate::tx::Source;

    fn funded(amount: u64) -> Ledger<MemoryStore> {
        let ledger = Ledger::in_memory();
        ledger
            .purchase_at(&CreditRequest::new("alice", amount, Source::TokenPurchase), 1)
            .unwrap();
        ledger
    }

    #[test]
    fn test_spend_receipt() {
        let ledger = funded(100);
        let req = SpendRequest::new("alice", 100, Source::Tip, RevenueContext::Tip).earner("bob");
        let receipt = ledger.spend_at(&req, 2).unwrap();
        assert_eq!(receipt.new_balance, 0);
        assert_eq!(receipt.earner_earned, 90);
        assert_eq!(receipt.platform_share, 10);
        assert_eq!(ledger.balance("bob").unwrap(), 90);
    }

    #[test]
    fn test_overspend_leaves_balance() {
        let ledger = funded(50);
        let req = SpendRequest::new("alice", 51, Source::Chat, RevenueContext::ChatPaid).earner("bob");
        let err = ledger.spend_at(&req, 2).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InsufficientFunds);
        assert_eq!(ledger.balance("alice").unwrap(), 50);
        assert!(ledger.wallet("bob").unwrap().is_none());
    }

    #[test]
    fn test_history_range() {
        let ledger = funded(10);
        ledger
            .earn_at(&CreditRequest::new("alice", 5, Source::Bonus), 20)
            .unwrap();
        assert_eq!(ledger.history("alice", 0, 100).unwrap().len(), 2);
        assert_eq!(ledger.history("alice", 10, 100).unwrap().len(), 1);
        assert!(ledger.history("alice", 5, 4).is_err());
    }

    #[test]
    fn test_validation_is_not_retried() {
        let ledger = funded(10);
        let mut calls = 0;
        let res: Result<()> = ledger.run("noop", 0, |_| {
            calls += 1;
            Err(Error::Validation("bad".into()))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_conflict_exhausts_retry_budget() {
        let ledger = Ledger::new(
            MemoryStore::new(),
            RetryConfig {
                max_attempts: 3,
                base_backoff_ms: 0,
                max_backoff_ms: 0,
            },
        );
        let mut calls = 0;
        let res = ledger.run("contended", 0, |txn| {
            calls += 1;
            let w = txn.wallet("alice")?;
            txn.put_wallet(w);
            // Sneak a competing commit in behind the transaction's back.
            let mut rival = Txn::new(ledger.store(), 0);
            let mut other = rival.wallet("alice")?;
            other.credit(1)?;
            rival.put_wallet(other);
            ledger.store().commit(rival.into_changes())?;
            Ok(())
        });
        assert!(matches!(res, Err(Error::ConcurrencyConflict { attempts: 3 })));
        assert_eq!(calls, 3);
    }
}
