pub mod audit;
pub mod billing;
pub mod booking;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logger;
pub mod payout;
pub mod replay;
pub mod state;
pub mod storage;
pub mod store;
pub mod tx;

use sha2::{Digest, Sha256};

/// Current Unix timestamp in seconds (0 if the clock is before the epoch)
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
