//! Tamper evidence for the entry log.
//!
//! Every sealed entry carries `hash = sha256(bincode(entry with hash cleared))`
//! and the previous entry's hash, so editing, dropping or reordering any
//! entry breaks the chain from that point on.

use crate::error::{Error, Result};
use crate::sha256_digest;
use crate::tx::LedgerEntry;
use serde::{Deserialize, Serialize};

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA256 of data, lowercase hex.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(sha256_digest(data))
}

/// Hash of an entry as sealed. The `hash` field itself is excluded.
pub fn entry_hash(entry: &LedgerEntry) -> Result<String> {
    let mut unsealed = entry.clone();
    unsealed.hash = String::new();
    let bytes = bincode::serialize(&unsealed).map_err(|e| {
        Error::Storage(format!("Failed to serialize entry {}: {}", entry.tx_id, e))
    })?;
    Ok(digest_hex(&bytes))
}

/// Check sequence numbers, back links and per-entry hashes of a full log.
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<()> {
    let mut prev = GENESIS_HASH.to_string();
    for (i, entry) in entries.iter().enumerate() {
        if entry.seq != i as u64 {
            return Err(Error::InvalidState(format!(
                "Entry {} has seq {}, expected {}",
                entry.tx_id, entry.seq, i
            )));
        }
        if entry.prev_hash != prev {
            return Err(Error::InvalidState(format!(
                "Chain broken at seq {}",
                entry.seq
            )));
        }
        if entry_hash(entry)? != entry.hash {
            return Err(Error::InvalidState(format!(
                "Entry at seq {} was modified",
                entry.seq
            )));
        }
        if !entry.is_balanced() {
            return Err(Error::InvalidState(format!(
                "Entry at seq {} does not balance",
                entry.seq
            )));
        }
        prev = entry.hash.clone();
    }
    Ok(())
}

/// Short summary of a verified log, suitable for printing or comparing
/// two replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDigest {
    pub entry_count: u64,
    pub head_hash: String,
}

pub fn log_digest(entries: &[LedgerEntry]) -> LogDigest {
    LogDigest {
        entry_count: entries.len() as u64,
        head_hash: entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()),
    }
}
