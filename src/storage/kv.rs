use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::State;
use crate::storage::Storage;
use crate::store::{Checkpoint, CommitRecord};
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// File-based storage using an append-only commit journal and snapshots.
///
/// Files:
/// - `ledger.log`: commit records, each a u64 little-endian length then
///   bincode bytes; the sealed entries travel inside their commit
/// - `state.bin`: snapshot (bincode `State`, then u64 `next_seq` and u64
///   commit count)
/// - `state.bin.tmp`: scratch file for atomic snapshot writes
pub struct FileStorage {
    log_path: PathBuf,
    state_path: PathBuf,
    state_tmp_path: PathBuf,
}

fn io_err(what: &str) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{}: {}", what, e))
}

impl FileStorage {
    /// Create a FileStorage with paths from config
    pub fn new(config: &Config) -> Self {
        FileStorage::with_paths(config.get_log_path(), config.get_state_path())
    }

    /// Create FileStorage with custom paths (for testing)
    pub fn with_paths(log_path: PathBuf, state_path: PathBuf) -> Self {
        let state_tmp_path = state_path.with_extension("bin.tmp");
        FileStorage {
            log_path,
            state_path,
            state_tmp_path,
        }
    }

    /// True once anything was ever written here
    pub fn is_initialized(&self) -> bool {
        self.log_path.exists() || self.state_path.exists()
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).map_err(io_err("Failed to create data directory"))?;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn append_commits(&mut self, commits: &[CommitRecord]) -> Result<()> {
        if commits.is_empty() {
            return Ok(());
        }
        self.ensure_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(io_err("Failed to open ledger log for append"))?;
        let mut writer = BufWriter::new(file);

        for commit in commits {
            let bytes = bincode::serialize(commit)
                .map_err(|e| Error::Storage(format!("Failed to serialize commit: {}", e)))?;
            writer
                .write_all(&(bytes.len() as u64).to_le_bytes())
                .map_err(io_err("Failed to write commit length"))?;
            writer
                .write_all(&bytes)
                .map_err(io_err("Failed to write commit"))?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| Error::Storage(format!("Failed to flush ledger log: {}", e)))?;
        // Fsync for crash safety (append-only semantics)
        file.sync_all().map_err(io_err("Failed to fsync ledger log"))?;
        Ok(())
    }

    fn load_state(&self) -> Result<Option<(State, Checkpoint)>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let mut data = Vec::new();
        File::open(&self.state_path)
            .map_err(io_err("Failed to open state file"))?
            .read_to_end(&mut data)
            .map_err(io_err("Failed to read state file"))?;

        // Format: [State bytes][next_seq: u64][commits: u64]
        if data.len() < 16 {
            return Err(Error::Storage("State file too short".to_string()));
        }
        let (state_bytes, tail) = data.split_at(data.len() - 16);
        let mut word = [0u8; 8];
        word.copy_from_slice(&tail[..8]);
        let next_seq = u64::from_le_bytes(word);
        word.copy_from_slice(&tail[8..]);
        let commits = u64::from_le_bytes(word);

        let state: State = bincode::deserialize(state_bytes)
            .map_err(|e| Error::Storage(format!("Failed to deserialize state: {}", e)))?;

        Ok(Some((state, Checkpoint { next_seq, commits })))
    }

    fn persist_state(&mut self, state: &State, checkpoint: Checkpoint) -> Result<()> {
        self.ensure_dir()?;

        let state_bytes = bincode::serialize(state)
            .map_err(|e| Error::Storage(format!("Failed to serialize state: {}", e)))?;

        let mut file =
            File::create(&self.state_tmp_path).map_err(io_err("Failed to create temp state file"))?;
        file.write_all(&state_bytes)
            .map_err(io_err("Failed to write state"))?;
        file.write_all(&checkpoint.next_seq.to_le_bytes())
            .map_err(io_err("Failed to write next_seq"))?;
        file.write_all(&checkpoint.commits.to_le_bytes())
            .map_err(io_err("Failed to write commit count"))?;

        // Fsync before rename (crash safety)
        file.sync_all()
            .map_err(io_err("Failed to fsync temp state file"))?;
        drop(file);

        fs::rename(&self.state_tmp_path, &self.state_path)
            .map_err(io_err("Failed to rename temp state file"))?;

        // Fsync parent directory so the rename itself is durable
        if let Some(parent) = self.state_path.parent() {
            File::open(parent)
                .map_err(io_err("Failed to open parent directory"))?
                .sync_all()
                .map_err(io_err("Failed to fsync parent directory"))?;
        }

        Ok(())
    }

    fn load_commits_from(&self, from: u64) -> Result<Vec<CommitRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path).map_err(io_err("Failed to open ledger log"))?;
        let file_len = file
            .metadata()
            .map_err(io_err("Failed to stat ledger log"))?
            .len();
        let mut reader = BufReader::new(file);
        let mut commits = Vec::new();
        let mut position = 0u64;
        let mut offset = 0u64;

        loop {
            let mut len_buf = [0u8; 8];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {
                    offset += 8;
                    let len = u64::from_le_bytes(len_buf);
                    let remaining = file_len.saturating_sub(offset);
                    if len > remaining {
                        return Err(Error::Storage(format!(
                            "Commit {} claims {} bytes, only {} left in ledger log",
                            position, len, remaining
                        )));
                    }
                    let mut buf = vec![0u8; len as usize];
                    reader
                        .read_exact(&mut buf)
                        .map_err(io_err("Truncated ledger log commit"))?;
                    offset += len;

                    if position >= from {
                        let commit: CommitRecord = bincode::deserialize(&buf).map_err(|e| {
                            Error::Storage(format!(
                                "Failed to deserialize commit {}: {}",
                                position, e
                            ))
                        })?;
                        commits.push(commit);
                    }
                    position += 1;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::Storage(format!("Failed to read ledger log: {}", e))),
            }
        }

        Ok(commits)
    }
}
