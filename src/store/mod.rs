//! Transactional key-value store abstraction.
//!
//! A ledger operation runs against a [`Txn`]: reads go to the store once and
//! are cached with their version, writes stay in a private overlay
//! (read-your-writes), and log entries are buffered. [`Store::commit`]
//! applies the whole change set or nothing, rejecting it with
//! `ConcurrencyConflict` when any key read by the transaction changed since.
//!
//! Revenue and escrow counters are commutative: transactions only add
//! deltas, which are applied at commit without version checks, so the global
//! counters never become a conflict hotspot.
//!
//! Every non-empty commit is also journaled as a [`CommitRecord`]: the
//! record writes, counter deltas and sealed entries it applied. Replaying the
//! journal over a snapshot reproduces the store exactly.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::{Error, Result};
use crate::state::{Booking, Escrow, Event, PlatformRevenue, RevenueContext, Session, State, Wallet};
use crate::tx::LedgerEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store key. Ordering is total, so change sets are validated and applied
/// in one deterministic order.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Wallet(String),
    Booking(String),
    Event(String),
    Session(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Wallet,
    Booking,
    Event,
    Session,
}

impl Key {
    pub fn kind(&self) -> KeyKind {
        match self {
            Key::Wallet(_) => KeyKind::Wallet,
            Key::Booking(_) => KeyKind::Booking,
            Key::Event(_) => KeyKind::Event,
            Key::Session(_) => KeyKind::Session,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Key::Wallet(id) | Key::Booking(id) | Key::Event(id) | Key::Session(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Wallet(Wallet),
    Booking(Booking),
    Event(Event),
    Session(Session),
}

/// A record with its version. Versions start at 1; an absent key reads as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: u64,
    pub record: Record,
}

/// Commutative adjustments to the global counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub revenue_credits: BTreeMap<RevenueContext, u64>,
    pub revenue_clawback: u64,
    pub escrow_held: u64,
    pub escrow_released: u64,
    pub escrow_refunded: u64,
}

impl CounterDelta {
    pub fn is_empty(&self) -> bool {
        *self == CounterDelta::default()
    }

    /// Apply the deltas. Escrow is checked before anything changes, so an
    /// error leaves both counters untouched.
    pub fn apply_to(&self, revenue: &mut PlatformRevenue, escrow: &mut Escrow) -> Result<()> {
        let held = (escrow.held as u128 + self.escrow_held as u128)
            .checked_sub(self.escrow_released as u128 + self.escrow_refunded as u128)
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "Escrow underflow: held {}, releasing {}, refunding {}",
                    escrow.held, self.escrow_released, self.escrow_refunded
                ))
            })?;
        escrow.held =
            u64::try_from(held).map_err(|_| Error::InvalidState("Escrow overflow".to_string()))?;
        escrow.total_released = escrow.total_released.saturating_add(self.escrow_released);
        escrow.total_refunded = escrow.total_refunded.saturating_add(self.escrow_refunded);

        for (context, amount) in &self.revenue_credits {
            revenue.credit(*context, *amount);
        }
        revenue.claw_back(self.revenue_clawback);
        Ok(())
    }
}

/// Journal record of one applied commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub writes: BTreeMap<Key, Record>,
    pub counters: CounterDelta,
    /// Sealed entries, in log order
    pub entries: Vec<LedgerEntry>,
}

impl CommitRecord {
    /// Re-apply this commit to a state image.
    pub fn apply_to(&self, state: &mut State) -> Result<()> {
        self.counters
            .apply_to(&mut state.platform_revenue, &mut state.escrow)?;
        for (key, record) in &self.writes {
            place(state, key, record.clone())?;
        }
        Ok(())
    }
}

/// How far a snapshot reaches into the entry log and the commit journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// First log position not covered
    pub next_seq: u64,
    /// Number of journaled commits covered
    pub commits: u64,
}

/// Put `record` into the matching map of `state`.
pub fn place(state: &mut State, key: &Key, record: Record) -> Result<()> {
    match (key, record) {
        (Key::Wallet(id), Record::Wallet(w)) => {
            state.wallets.insert(id.clone(), w);
        }
        (Key::Booking(id), Record::Booking(b)) => {
            state.bookings.insert(id.clone(), b);
        }
        (Key::Event(id), Record::Event(e)) => {
            state.events.insert(id.clone(), e);
        }
        (Key::Session(id), Record::Session(s)) => {
            state.sessions.insert(id.clone(), s);
        }
        (key, record) => {
            return Err(Error::Storage(format!(
                "Key {:?} holds mismatched record {:?}",
                key, record
            )))
        }
    }
    Ok(())
}

/// Everything a transaction wants to commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Version observed for every key read (0 = absent)
    pub reads: BTreeMap<Key, u64>,
    pub writes: BTreeMap<Key, Record>,
    pub counters: CounterDelta,
    /// Unsealed entries, in the order they were produced
    pub entries: Vec<LedgerEntry>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Sealed entries as written to the log
    pub entries: Vec<LedgerEntry>,
    /// Next free log position after this commit
    pub next_seq: u64,
}

/// Storage backend with atomic multi-key commits.
pub trait Store: Send + Sync {
    /// Read the latest committed version of `key`.
    fn get(&self, key: &Key) -> Result<Option<Versioned>>;

    /// Apply `changes` atomically. Fails with `ConcurrencyConflict` and
    /// writes nothing if any read version is stale.
    fn commit(&self, changes: ChangeSet) -> Result<Committed>;

    /// All keys of one kind, in key order.
    fn keys(&self, kind: KeyKind) -> Result<Vec<Key>>;

    fn platform_revenue(&self) -> Result<PlatformRevenue>;

    fn escrow(&self) -> Result<Escrow>;

    /// Log entries with `seq >= from_seq`.
    fn entries_from(&self, from_seq: u64) -> Result<Vec<LedgerEntry>>;

    /// Entries of one user with `from_ts <= created_at <= to_ts`.
    fn entries_for_user(&self, user_id: &str, from_ts: u64, to_ts: u64) -> Result<Vec<LedgerEntry>>;

    fn next_seq(&self) -> Result<u64>;

    /// Journaled commits with index `>= from`.
    fn commits_from(&self, from: u64) -> Result<Vec<CommitRecord>>;

    /// Log and journal positions matching the current [`Store::snapshot`].
    fn checkpoint(&self) -> Result<Checkpoint>;

    /// Consistent image of all records and counters.
    fn snapshot(&self) -> Result<State>;
}

/// One atomic unit of work against a [`Store`].
pub struct Txn<'a, S: Store + ?Sized> {
    store: &'a S,
    now: u64,
    reads: BTreeMap<Key, (u64, Option<Record>)>,
    writes: BTreeMap<Key, Record>,
    counters: CounterDelta,
    entries: Vec<LedgerEntry>,
}

impl<'a, S: Store + ?Sized> Txn<'a, S> {
    pub fn new(store: &'a S, now: u64) -> Self {
        Txn {
            store,
            now,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            counters: CounterDelta::default(),
            entries: Vec::new(),
        }
    }

    /// Clock for everything recorded by this transaction.
    pub fn now(&self) -> u64 {
        self.now
    }

    fn read(&mut self, key: &Key) -> Result<Option<Record>> {
        if let Some(record) = self.writes.get(key) {
            return Ok(Some(record.clone()));
        }
        if let Some((_, cached)) = self.reads.get(key) {
            return Ok(cached.clone());
        }
        let (version, record) = match self.store.get(key)? {
            Some(v) => (v.version, Some(v.record)),
            None => (0, None),
        };
        self.reads.insert(key.clone(), (version, record.clone()));
        Ok(record)
    }

    fn write(&mut self, key: Key, record: Record) {
        self.writes.insert(key, record);
    }

    /// Get-or-create: a missing wallet is materialised here and only
    /// persisted if the transaction writes it back.
    pub fn wallet(&mut self, user_id: &str) -> Result<Wallet> {
        match self.read(&Key::Wallet(user_id.to_string()))? {
            Some(Record::Wallet(w)) => Ok(w),
            Some(other) => Err(type_mismatch("wallet", &other)),
            None => Ok(Wallet::new(user_id, self.now)),
        }
    }

    pub fn put_wallet(&mut self, wallet: Wallet) {
        self.write(Key::Wallet(wallet.user_id.clone()), Record::Wallet(wallet));
    }

    pub fn booking(&mut self, booking_id: &str) -> Result<Booking> {
        match self.read(&Key::Booking(booking_id.to_string()))? {
            Some(Record::Booking(b)) => Ok(b),
            Some(other) => Err(type_mismatch("booking", &other)),
            None => Err(Error::NotFound(format!("Booking {}", booking_id))),
        }
    }

    /// Insert a new booking; fails if the id is taken.
    pub fn insert_booking(&mut self, booking: Booking) -> Result<()> {
        let key = Key::Booking(booking.booking_id.clone());
        if self.read(&key)?.is_some() {
            return Err(Error::Validation(format!(
                "Booking {} already exists",
                booking.booking_id
            )));
        }
        self.write(key, Record::Booking(booking));
        Ok(())
    }

    pub fn put_booking(&mut self, booking: Booking) {
        self.write(Key::Booking(booking.booking_id.clone()), Record::Booking(booking));
    }

    pub fn event(&mut self, event_id: &str) -> Result<Event> {
        match self.read(&Key::Event(event_id.to_string()))? {
            Some(Record::Event(e)) => Ok(e),
            Some(other) => Err(type_mismatch("event", &other)),
            None => Err(Error::NotFound(format!("Event {}", event_id))),
        }
    }

    pub fn insert_event(&mut self, event: Event) -> Result<()> {
        let key = Key::Event(event.event_id.clone());
        if self.read(&key)?.is_some() {
            return Err(Error::Validation(format!(
                "Event {} already exists",
                event.event_id
            )));
        }
        self.write(key, Record::Event(event));
        Ok(())
    }

    pub fn put_event(&mut self, event: Event) {
        self.write(Key::Event(event.event_id.clone()), Record::Event(event));
    }

    pub fn session(&mut self, session_id: &str) -> Result<Session> {
        match self.read(&Key::Session(session_id.to_string()))? {
            Some(Record::Session(s)) => Ok(s),
            Some(other) => Err(type_mismatch("session", &other)),
            None => Err(Error::NotFound(format!("Session {}", session_id))),
        }
    }

    pub fn insert_session(&mut self, session: Session) -> Result<()> {
        let key = Key::Session(session.session_id.clone());
        if self.read(&key)?.is_some() {
            return Err(Error::Validation(format!(
                "Session {} already exists",
                session.session_id
            )));
        }
        self.write(key, Record::Session(session));
        Ok(())
    }

    pub fn put_session(&mut self, session: Session) {
        self.write(Key::Session(session.session_id.clone()), Record::Session(session));
    }

    pub fn credit_platform(&mut self, context: RevenueContext, amount: u64) {
        if amount == 0 {
            return;
        }
        let slot = self.counters.revenue_credits.entry(context).or_default();
        *slot = slot.saturating_add(amount);
    }

    pub fn claw_back_platform(&mut self, amount: u64) {
        self.counters.revenue_clawback = self.counters.revenue_clawback.saturating_add(amount);
    }

    pub fn hold_escrow(&mut self, amount: u64) {
        self.counters.escrow_held = self.counters.escrow_held.saturating_add(amount);
    }

    pub fn release_escrow(&mut self, amount: u64) {
        self.counters.escrow_released = self.counters.escrow_released.saturating_add(amount);
    }

    pub fn refund_escrow(&mut self, amount: u64) {
        self.counters.escrow_refunded = self.counters.escrow_refunded.saturating_add(amount);
    }

    /// Buffer an entry; returns its tx id.
    pub fn append(&mut self, entry: LedgerEntry) -> String {
        let tx_id = entry.tx_id.clone();
        self.entries.push(entry);
        tx_id
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn into_changes(self) -> ChangeSet {
        ChangeSet {
            reads: self
                .reads
                .into_iter()
                .map(|(key, (version, _))| (key, version))
                .collect(),
            writes: self.writes,
            counters: self.counters,
            entries: self.entries,
        }
    }
}

fn type_mismatch(expected: &str, found: &Record) -> Error {
    Error::Storage(format!("Expected {} record, found {:?}", expected, found))
}
