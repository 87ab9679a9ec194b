use crate::audit::GENESIS_HASH;
use crate::error::{Error, Result};
use crate::state::{Escrow, PlatformRevenue, State};
use crate::store::{
    place, ChangeSet, Checkpoint, CommitRecord, Committed, Key, KeyKind, Record, Store, Versioned,
};
use crate::tx::LedgerEntry;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<Key, Versioned>,
    platform_revenue: PlatformRevenue,
    escrow: Escrow,
    log: Vec<LedgerEntry>,
    /// Index of the first commit in `journal`
    journal_base: u64,
    journal: Vec<CommitRecord>,
}

impl Inner {
    fn version_of(&self, key: &Key) -> u64 {
        self.records.get(key).map(|v| v.version).unwrap_or(0)
    }
}

/// In-process store. Commits take the write lock, validate every read
/// version in key order, then apply writes, counters and entries together.
///
/// Only commits made since the store was opened are kept in the journal;
/// earlier ones are already covered by the snapshot it was opened from.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Rebuild from a state image, the full entry log and the number of
    /// journaled commits that produced them.
    pub fn from_parts(state: State, log: Vec<LedgerEntry>, commits: u64) -> Self {
        let mut records = BTreeMap::new();
        for (id, wallet) in state.wallets {
            records.insert(Key::Wallet(id), versioned(Record::Wallet(wallet)));
        }
        for (id, booking) in state.bookings {
            records.insert(Key::Booking(id), versioned(Record::Booking(booking)));
        }
        for (id, event) in state.events {
            records.insert(Key::Event(id), versioned(Record::Event(event)));
        }
        for (id, session) in state.sessions {
            records.insert(Key::Session(id), versioned(Record::Session(session)));
        }
        MemoryStore {
            inner: RwLock::new(Inner {
                records,
                platform_revenue: state.platform_revenue,
                escrow: state.escrow,
                log,
                journal_base: commits,
                journal: Vec::new(),
            }),
        }
    }
}

fn versioned(record: Record) -> Versioned {
    Versioned { version: 1, record }
}

impl Store for MemoryStore {
    fn get(&self, key: &Key) -> Result<Option<Versioned>> {
        Ok(self.inner.read().records.get(key).cloned())
    }

    fn commit(&self, changes: ChangeSet) -> Result<Committed> {
        if let Some(bad) = changes.entries.iter().find(|e| !e.is_balanced()) {
            return Err(Error::InvalidState(format!(
                "Entry {} does not balance: {} {:+} != {}",
                bad.tx_id, bad.before_balance, bad.amount_tokens, bad.after_balance
            )));
        }

        let mut inner = self.inner.write();

        for (key, seen) in &changes.reads {
            if inner.version_of(key) != *seen {
                return Err(Error::ConcurrencyConflict { attempts: 1 });
            }
        }

        // Seal against the current tip before anything changes.
        let mut sealed = Vec::with_capacity(changes.entries.len());
        let mut prev_hash = inner
            .log
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        for (offset, mut entry) in changes.entries.into_iter().enumerate() {
            entry.seal(inner.log.len() as u64 + offset as u64, &prev_hash)?;
            prev_hash = entry.hash.clone();
            sealed.push(entry);
        }

        // Counters next: the last step that can still fail.
        let Inner {
            platform_revenue,
            escrow,
            ..
        } = &mut *inner;
        changes.counters.apply_to(platform_revenue, escrow)?;

        for (key, record) in &changes.writes {
            let version = inner.version_of(key) + 1;
            inner.records.insert(
                key.clone(),
                Versioned {
                    version,
                    record: record.clone(),
                },
            );
        }
        inner.log.extend(sealed.iter().cloned());

        if !(changes.writes.is_empty() && changes.counters.is_empty() && sealed.is_empty()) {
            inner.journal.push(CommitRecord {
                writes: changes.writes,
                counters: changes.counters,
                entries: sealed.clone(),
            });
        }

        Ok(Committed {
            entries: sealed,
            next_seq: inner.log.len() as u64,
        })
    }

    fn keys(&self, kind: KeyKind) -> Result<Vec<Key>> {
        Ok(self
            .inner
            .read()
            .records
            .keys()
            .filter(|k| k.kind() == kind)
            .cloned()
            .collect())
    }

    fn platform_revenue(&self) -> Result<PlatformRevenue> {
        Ok(self.inner.read().platform_revenue.clone())
    }

    fn escrow(&self) -> Result<Escrow> {
        Ok(self.inner.read().escrow.clone())
    }

    fn entries_from(&self, from_seq: u64) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read();
        let start = (from_seq as usize).min(inner.log.len());
        Ok(inner.log[start..].to_vec())
    }

    fn entries_for_user(&self, user_id: &str, from_ts: u64, to_ts: u64) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .inner
            .read()
            .log
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= from_ts && e.created_at <= to_ts)
            .cloned()
            .collect())
    }

    fn next_seq(&self) -> Result<u64> {
        Ok(self.inner.read().log.len() as u64)
    }

    fn commits_from(&self, from: u64) -> Result<Vec<CommitRecord>> {
        let inner = self.inner.read();
        let offset = from.checked_sub(inner.journal_base).ok_or_else(|| {
            Error::Storage(format!(
                "Commits before {} were not made by this store",
                inner.journal_base
            ))
        })?;
        let start = (offset as usize).min(inner.journal.len());
        Ok(inner.journal[start..].to_vec())
    }

    fn checkpoint(&self) -> Result<Checkpoint> {
        let inner = self.inner.read();
        Ok(Checkpoint {
            next_seq: inner.log.len() as u64,
            commits: inner.journal_base + inner.journal.len() as u64,
        })
    }

    fn snapshot(&self) -> Result<State> {
        let inner = self.inner.read();
        let mut state = State::new();
        for (key, v) in &inner.records {
            place(&mut state, key, v.record.clone())?;
        }
        state.platform_revenue = inner.platform_revenue.clone();
        state.escrow = inner.escrow.clone();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RevenueContext, Wallet};
    use crate::store::Txn;
    use crate::tx::{EntryMetadata, Source, TxType};

    fn credit_alice(store: &MemoryStore, amount: u64) -> Result<Committed> {
        let mut txn = Txn::new(store, 10);
        let mut w = txn.wallet("alice")?;
        let before = w.balance;
        w.credit(amount)?;
        let after = w.balance;
        txn.put_wallet(w);
        txn.append(LedgerEntry::new(
            "alice",
            TxType::Purchase,
            Source::TokenPurchase,
            None,
            amount as i64,
            before,
            after,
            None,
            EntryMetadata::default(),
            10,
        ));
        store.commit(txn.into_changes())
    }

    #[test]
    fn test_commit_and_read() {
        let store = MemoryStore::new();
        let committed = credit_alice(&store, 100).unwrap();
        assert_eq!(committed.next_seq, 1);
        assert_eq!(committed.entries[0].prev_hash, GENESIS_HASH);

        let v = store.get(&Key::Wallet("alice".into())).unwrap().unwrap();
        assert_eq!(v.version, 1);
        assert!(matches!(v.record, Record::Wallet(ref w) if w.balance == 100));

        credit_alice(&store, 50).unwrap();
        let v = store.get(&Key::Wallet("alice".into())).unwrap().unwrap();
        assert_eq!(v.version, 2);
        let log = store.entries_from(0).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].prev_hash, log[0].hash);
    }

    #[test]
    fn test_stale_read_conflicts_and_writes_nothing() {
        let store = MemoryStore::new();
        credit_alice(&store, 100).unwrap();

        let mut stale = Txn::new(&store, 0);
        let mut w = stale.wallet("alice").unwrap();
        w.debit(10).unwrap();
        stale.put_wallet(w);

        credit_alice(&store, 1).unwrap();

        let err = store.commit(stale.into_changes()).unwrap_err();
        assert!(err.is_retryable());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.wallets["alice"].balance, 101);
        assert_eq!(store.next_seq().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_first_creation_conflicts() {
        let store = MemoryStore::new();
        let mut a = Txn::new(&store, 0);
        let mut b = Txn::new(&store, 0);
        let wa = a.wallet("carol").unwrap();
        let wb = b.wallet("carol").unwrap();
        a.put_wallet(wa);
        b.put_wallet(wb);
        store.commit(a.into_changes()).unwrap();
        assert!(store.commit(b.into_changes()).is_err());
    }

    #[test]
    fn test_counters_and_escrow_underflow() {
        let store = MemoryStore::new();
        let mut txn = Txn::new(&store, 0);
        txn.credit_platform(RevenueContext::Tip, 10);
        txn.hold_escrow(90);
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.platform_revenue().unwrap().gross, 10);
        assert_eq!(store.escrow().unwrap().held, 90);

        let mut txn = Txn::new(&store, 0);
        txn.release_escrow(91);
        assert!(store.commit(txn.into_changes()).is_err());
        assert_eq!(store.escrow().unwrap().held, 90);
    }

    #[test]
    fn test_unbalanced_entry_rejected() {
        let store = MemoryStore::new();
        let mut txn = Txn::new(&store, 0);
        txn.append(LedgerEntry::new(
            "alice",
            TxType::Earn,
            Source::Bonus,
            None,
            10,
            0,
            9,
            None,
            EntryMetadata::default(),
            0,
        ));
        assert!(store.commit(txn.into_changes()).is_err());
        assert_eq!(store.next_seq().unwrap(), 0);
    }

    #[test]
    fn test_snapshot_roundtrip_through_from_parts() {
        let store = MemoryStore::new();
        credit_alice(&store, 100).unwrap();
        let state = store.snapshot().unwrap();
        let log = store.entries_from(0).unwrap();
        let restored = MemoryStore::from_parts(state.clone(), log, 1);
        assert_eq!(restored.snapshot().unwrap(), state);
        assert_eq!(restored.next_seq().unwrap(), 1);
        assert_eq!(
            restored.snapshot().unwrap().wallets.get("alice"),
            Some(&Wallet {
                user_id: "alice".into(),
                balance: 100,
                created_at: 10,
                updated_at: 10,
                ..Wallet::default()
            })
        );
    }

    #[test]
    fn test_journal_replays_to_same_state() {
        let store = MemoryStore::new();
        credit_alice(&store, 100).unwrap();
        let mut txn = Txn::new(&store, 0);
        txn.credit_platform(RevenueContext::Tip, 10);
        txn.hold_escrow(90);
        store.commit(txn.into_changes()).unwrap();
        // Nothing to record.
        store.commit(Txn::new(&store, 0).into_changes()).unwrap();

        assert_eq!(
            store.checkpoint().unwrap(),
            Checkpoint {
                next_seq: 1,
                commits: 2
            }
        );
        let mut rebuilt = State::new();
        for commit in store.commits_from(0).unwrap() {
            commit.apply_to(&mut rebuilt).unwrap();
        }
        assert_eq!(rebuilt, store.snapshot().unwrap());
        assert_eq!(store.commits_from(1).unwrap().len(), 1);
    }

    #[test]
    fn test_reopened_store_journals_from_base() {
        let store = MemoryStore::from_parts(State::new(), Vec::new(), 4);
        credit_alice(&store, 1).unwrap();
        assert!(store.commits_from(0).is_err());
        assert_eq!(store.commits_from(4).unwrap().len(), 1);
        assert_eq!(store.checkpoint().unwrap().commits, 5);
    }

    #[test]
    fn test_entries_for_user_time_range() {
        let store = MemoryStore::new();
        credit_alice(&store, 1).unwrap();
        assert_eq!(store.entries_for_user("alice", 0, 10).unwrap().len(), 1);
        assert_eq!(store.entries_for_user("alice", 11, 20).unwrap().len(), 0);
        assert_eq!(store.entries_for_user("bob", 0, 10).unwrap().len(), 0);
    }
}
