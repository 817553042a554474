use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tapgame_types::{LeaderboardEntry, PlayerState, Totals};
use thiserror::Error as ThisError;

/// Default time a transaction waits for a row held by another request.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock timeouts and connection failures; safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Constraint violations, corruption and anything else that will not heal on retry.
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// A transaction scoped to a single player row.
///
/// The row is exclusively locked from `Store::begin` until the transaction is
/// committed or dropped. Dropping without `commit` rolls back every write.
pub trait PlayerTxn {
    /// Reads the locked row.
    fn load(&mut self) -> Result<Option<PlayerState>, StoreError>;

    /// Creates the row with `defaults` unless it already exists.
    fn insert_if_absent(&mut self, defaults: &PlayerState) -> Result<(), StoreError>;

    /// Overwrites every field of the row.
    fn update(&mut self, state: &PlayerState) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

/// Keyed player record store.
pub trait Store: Send + Sync {
    type Txn<'a>: PlayerTxn
    where
        Self: 'a;

    /// Opens a transaction holding the exclusive lock on `user_id`'s row.
    fn begin(&self, user_id: &str) -> Result<Self::Txn<'_>, StoreError>;

    /// Unlocked point read.
    fn get(&self, user_id: &str) -> Result<Option<PlayerState>, StoreError>;

    /// Point-in-time scan ordered by coins descending.
    fn top_by_coins(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError>;

    fn totals(&self) -> Result<Totals, StoreError>;
}

/// Per-identity exclusive locks for backends without native row locking.
pub struct RowLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    timeout: Duration,
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl RowLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until `user_id` is free, then holds it until the guard drops.
    pub fn acquire(&self, user_id: &str) -> Result<RowGuard<'_>, StoreError> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self.held();
        while held.contains(user_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(StoreError::Transient(format!(
                    "row lock timeout for {user_id}"
                )));
            }
            held = self
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        held.insert(user_id.to_string());
        Ok(RowGuard {
            locks: self,
            user_id: user_id.to_string(),
        })
    }
}

pub struct RowGuard<'a> {
    locks: &'a RowLocks,
    user_id: String,
}

impl RowGuard<'_> {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.user_id);
        self.locks.released.notify_all();
    }
}

/// Write buffered by a transaction until commit.
#[derive(Default)]
pub struct PendingRow {
    row: Option<PlayerState>,
}

impl PendingRow {
    pub fn get(&self) -> Option<&PlayerState> {
        self.row.as_ref()
    }

    pub fn set(&mut self, state: &PlayerState) {
        self.row = Some(state.clone());
    }

    pub fn take(&mut self) -> Option<PlayerState> {
        self.row.take()
    }
}

pub fn leaderboard_entry(user_id: &str, state: &PlayerState) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id: user_id.to_string(),
        username: state.username.clone(),
        first_name: state.first_name.clone(),
        coins: state.coins,
        multi_tap_level: state.multi_tap_level,
    }
}

/// In-process store used by tests and `--store memory`.
#[derive(Default)]
pub struct Memory {
    rows: Mutex<HashMap<String, PlayerState>>,
    locks: RowLocks,
}

impl Memory {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: Mutex::default(),
            locks: RowLocks::new(lock_timeout),
        }
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, PlayerState>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes a row directly, bypassing locks. Test fixtures only.
    pub fn seed(&self, user_id: &str, state: PlayerState) {
        self.rows().insert(user_id.to_string(), state);
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

pub struct MemoryTxn<'a> {
    store: &'a Memory,
    guard: RowGuard<'a>,
    pending: PendingRow,
}

impl PlayerTxn for MemoryTxn<'_> {
    fn load(&mut self) -> Result<Option<PlayerState>, StoreError> {
        if let Some(row) = self.pending.get() {
            return Ok(Some(row.clone()));
        }
        Ok(self.store.rows().get(self.guard.user_id()).cloned())
    }

    fn insert_if_absent(&mut self, defaults: &PlayerState) -> Result<(), StoreError> {
        if self.load()?.is_none() {
            self.pending.set(defaults);
        }
        Ok(())
    }

    fn update(&mut self, state: &PlayerState) -> Result<(), StoreError> {
        if self.load()?.is_none() {
            return Err(StoreError::Fatal(format!(
                "update of missing row {}",
                self.guard.user_id()
            )));
        }
        self.pending.set(state);
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        if let Some(row) = self.pending.take() {
            self.store
                .rows()
                .insert(self.guard.user_id().to_string(), row);
        }
        Ok(())
    }
}

impl Store for Memory {
    type Txn<'a> = MemoryTxn<'a>;

    fn begin(&self, user_id: &str) -> Result<Self::Txn<'_>, StoreError> {
        let guard = self.locks.acquire(user_id)?;
        Ok(MemoryTxn {
            store: self,
            guard,
            pending: PendingRow::default(),
        })
    }

    fn get(&self, user_id: &str) -> Result<Option<PlayerState>, StoreError> {
        Ok(self.rows().get(user_id).cloned())
    }

    fn top_by_coins(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = self.rows();
        let mut entries: Vec<_> = rows
            .iter()
            .map(|(user_id, state)| leaderboard_entry(user_id, state))
            .collect();
        entries.sort_by(|a, b| b.coins.total_cmp(&a.coins));
        entries.truncate(limit);
        Ok(entries)
    }

    fn totals(&self) -> Result<Totals, StoreError> {
        let total_users = self.rows().len() as u64;
        let total_coins = self.rows().values().map(|state| state.coins).sum();
        let top_player = self.top_by_coins(1)?.into_iter().next();
        Ok(Totals {
            total_users,
            total_coins,
            top_player,
        })
    }
}
