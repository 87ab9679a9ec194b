pub mod kv;

pub use kv::FileStorage;

use crate::error::Result;
use crate::state::State;
use crate::store::{Checkpoint, CommitRecord};
use crate::tx::LedgerEntry;

/// Durable home of the commit journal and state snapshots.
///
/// Implementations must preserve:
/// - Append-only semantics for the journal
/// - Atomic snapshot writes (crash-safe)
/// - Deterministic replay from the journal
pub trait Storage {
    /// Append commit records to the journal (fsync before returning)
    fn append_commits(&mut self, commits: &[CommitRecord]) -> Result<()>;

    /// Load the latest snapshot with the checkpoint it covers
    ///
    /// Returns `None` if no snapshot exists (genesis state).
    fn load_state(&self) -> Result<Option<(State, Checkpoint)>>;

    /// Persist a snapshot atomically (write to temp file, fsync, rename)
    fn persist_state(&mut self, state: &State, checkpoint: Checkpoint) -> Result<()>;

    /// Load journaled commits with index `>= from`
    fn load_commits_from(&self, from: u64) -> Result<Vec<CommitRecord>>;

    /// Load ledger entries with `seq >= from_seq`
    fn load_entries_from(&self, from_seq: u64) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .load_commits_from(0)?
            .into_iter()
            .flat_map(|commit| commit.entries)
            .filter(|entry| entry.seq >= from_seq)
            .collect())
    }
}
