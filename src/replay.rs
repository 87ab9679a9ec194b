//! Replay: rebuild state from storage and cross-check it against the log.
//!
//! The commit journal is the source of truth. A snapshot covers a prefix of
//! it; commits journaled after that prefix (a crash between the journal
//! append and the snapshot write) are re-applied in full: records, revenue
//! and escrow counters alike. The entry log carried by the journal is then
//! checked against the rebuilt wallet balances.

use crate::audit::{log_digest, verify_chain, LogDigest};
use crate::error::{Error, Result};
use crate::state::{State, Wallet};
use crate::storage::Storage;
use crate::store::{Checkpoint, MemoryStore};
use crate::tx::{LedgerEntry, TxType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Apply one entry to its wallet. The wallet must be exactly at
/// `before_balance`, otherwise the log and the state have diverged.
pub fn apply_entry(state: &mut State, entry: &LedgerEntry) -> Result<()> {
    let wallet = state
        .wallets
        .entry(entry.user_id.clone())
        .or_insert_with(|| Wallet::new(&entry.user_id, entry.created_at));
    if wallet.balance != entry.before_balance {
        return Err(Error::InvalidState(format!(
            "Entry {} expects {} at {}, wallet holds {}",
            entry.seq, entry.user_id, entry.before_balance, wallet.balance
        )));
    }
    wallet.balance = entry.after_balance;
    let magnitude = entry.amount_tokens.unsigned_abs();
    match (entry.tx_type, entry.amount_tokens >= 0) {
        (TxType::Purchase, true) => wallet.record_purchase(magnitude),
        (TxType::Spend, false) => wallet.record_spend(magnitude),
        (TxType::Earn, true) => wallet.record_earning(magnitude),
        (TxType::Payout, false) => wallet.record_payout(magnitude),
        _ => {}
    }
    wallet.touch(entry.created_at);
    Ok(())
}

/// Balances implied by a full log, starting from empty wallets.
pub fn rebuild_balances(entries: &[LedgerEntry]) -> Result<BTreeMap<String, u64>> {
    let mut state = State::new();
    for entry in entries {
        apply_entry(&mut state, entry)?;
    }
    Ok(state
        .wallets
        .into_iter()
        .map(|(id, w)| (id, w.balance))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub log: LogDigest,
    pub wallets: usize,
    pub total_balances: u128,
}

/// Check the hash chain and that every wallet balance in `state` is what
/// the log says it should be.
pub fn verify(state: &State, entries: &[LedgerEntry]) -> Result<VerifyReport> {
    verify_chain(entries)?;
    let rebuilt = rebuild_balances(entries)?;

    for (user_id, wallet) in &state.wallets {
        let expected = rebuilt.get(user_id).copied().unwrap_or(0);
        if wallet.balance != expected {
            return Err(Error::InvalidState(format!(
                "Wallet {} holds {}, log replays to {}",
                user_id, wallet.balance, expected
            )));
        }
    }
    if let Some((user_id, balance)) = rebuilt
        .iter()
        .find(|(id, b)| **b > 0 && !state.wallets.contains_key(*id))
    {
        return Err(Error::InvalidState(format!(
            "Log credits {} to {} but the wallet is missing",
            balance, user_id
        )));
    }

    Ok(VerifyReport {
        log: log_digest(entries),
        wallets: state.wallets.len(),
        total_balances: state.total_balances(),
    })
}

/// Storage contents brought up to the tip of the journal.
#[derive(Debug, Clone)]
pub struct Replayed {
    pub state: State,
    pub entries: Vec<LedgerEntry>,
    pub checkpoint: Checkpoint,
}

/// Load snapshot and journal, bring the snapshot up to the tip of the
/// journal, and verify the result.
pub fn replay_to_tip<St: Storage>(storage: &St) -> Result<Replayed> {
    let (mut state, covered) = storage
        .load_state()?
        .unwrap_or_else(|| (State::new(), Checkpoint::default()));
    let commits = storage.load_commits_from(0)?;
    if (commits.len() as u64) < covered.commits {
        return Err(Error::Storage(format!(
            "Snapshot covers {} commits, journal holds only {}",
            covered.commits,
            commits.len()
        )));
    }

    let (done, trailing) = commits.split_at(covered.commits as usize);
    let covered_entries: u64 = done.iter().map(|c| c.entries.len() as u64).sum();
    if covered_entries != covered.next_seq {
        return Err(Error::Storage(format!(
            "Snapshot covers {} entries, its commits hold {}",
            covered.next_seq, covered_entries
        )));
    }

    if !trailing.is_empty() {
        warn!(
            count = trailing.len(),
            "journal is ahead of snapshot, re-applying trailing commits"
        );
        for commit in trailing {
            commit.apply_to(&mut state)?;
        }
    }

    let entries: Vec<LedgerEntry> = commits
        .iter()
        .flat_map(|c| c.entries.iter().cloned())
        .collect();
    let report = verify(&state, &entries)?;
    info!(
        commits = commits.len(),
        entries = report.log.entry_count,
        wallets = report.wallets,
        "replayed to tip"
    );
    let checkpoint = Checkpoint {
        next_seq: entries.len() as u64,
        commits: commits.len() as u64,
    };
    Ok(Replayed {
        state,
        entries,
        checkpoint,
    })
}

/// Open an in-memory store over whatever the storage holds.
pub fn load_store<St: Storage>(storage: &St) -> Result<MemoryStore> {
    let replayed = replay_to_tip(storage)?;
    Ok(MemoryStore::from_parts(
        replayed.state,
        replayed.entries,
        replayed.checkpoint.commits,
    ))
}
