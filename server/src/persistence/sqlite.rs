use anyhow::Context;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tapgame_execution::state::{PendingRow, RowGuard, DEFAULT_LOCK_TIMEOUT};
use tapgame_execution::{PlayerTxn, RowLocks, Store, StoreError};
use tapgame_types::{LeaderboardEntry, PlayerState, Totals};
use tracing::info;

use super::{to_i64, to_u32, PlayerRow, LEADERBOARD_COLUMNS, PLAYER_COLUMNS};

/// Columns introduced after the first schema, with their definitions.
const ADDED_COLUMNS: [(&str, &str); 3] = [
    ("ban_end_time", "INTEGER NOT NULL DEFAULT 0"),
    ("tap_window_start", "INTEGER NOT NULL DEFAULT 0"),
    ("tap_count", "INTEGER NOT NULL DEFAULT 0"),
];

const UPSERT_PLAYER: &str = "INSERT INTO users (
        user_id, coins, energy, max_energy, multi_tap_level, energy_level, auto_tap_level,
        skin_bought, last_update, username, first_name, ban_end_time, tap_window_start,
        tap_count
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
    ON CONFLICT(user_id) DO UPDATE SET
        coins = excluded.coins,
        energy = excluded.energy,
        max_energy = excluded.max_energy,
        multi_tap_level = excluded.multi_tap_level,
        energy_level = excluded.energy_level,
        auto_tap_level = excluded.auto_tap_level,
        skin_bought = excluded.skin_bought,
        last_update = excluded.last_update,
        username = excluded.username,
        first_name = excluded.first_name,
        ban_end_time = excluded.ban_end_time,
        tap_window_start = excluded.tap_window_start,
        tap_count = excluded.tap_count";

fn store_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Fatal(err.to_string()),
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS users (
             user_id TEXT PRIMARY KEY,
             coins REAL NOT NULL DEFAULT 0,
             energy REAL NOT NULL DEFAULT 1000,
             max_energy INTEGER NOT NULL DEFAULT 1000,
             multi_tap_level INTEGER NOT NULL DEFAULT 1,
             energy_level INTEGER NOT NULL DEFAULT 1,
             auto_tap_level INTEGER NOT NULL DEFAULT 0,
             skin_bought INTEGER NOT NULL DEFAULT 0,
             last_update INTEGER NOT NULL DEFAULT 0,
             username TEXT NOT NULL DEFAULT '',
             first_name TEXT NOT NULL DEFAULT ''
         );",
    )
    .context("init sqlite player schema")?;

    for (column, definition) in ADDED_COLUMNS {
        if !column_exists(conn, "users", column)? {
            conn.execute(
                &format!("ALTER TABLE users ADD COLUMN {column} {definition}"),
                [],
            )
            .with_context(|| format!("add users.{column}"))?;
            info!(column, "migrated sqlite player schema");
        }
    }

    conn.execute_batch("CREATE INDEX IF NOT EXISTS users_coins ON users(coins DESC);")
        .context("create sqlite leaderboard index")?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .context("inspect sqlite schema")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn read_player(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerRow> {
    Ok(PlayerRow {
        coins: row.get(0)?,
        energy: row.get(1)?,
        max_energy: row.get(2)?,
        multi_tap_level: row.get(3)?,
        energy_level: row.get(4)?,
        auto_tap_level: row.get(5)?,
        skin_bought: row.get(6)?,
        last_update: row.get(7)?,
        username: row.get(8)?,
        first_name: row.get(9)?,
        ban_end_time: row.get(10)?,
        tap_window_start: row.get(11)?,
        tap_count: row.get(12)?,
    })
}

/// SQLite-backed player store.
///
/// SQLite locks the whole database for writing, so row exclusivity is provided by
/// in-process [`RowLocks`] and each commit is a single upsert statement. The file
/// must not be shared with another writer process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    locks: RowLocks,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite player store at {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(DEFAULT_LOCK_TIMEOUT)
            .context("set sqlite busy timeout")?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            locks: RowLocks::default(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn select(&self, user_id: &str) -> Result<Option<PlayerState>, StoreError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {PLAYER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                read_player,
            )
            .optional()
            .map_err(store_error)?;
        row.map(PlayerRow::into_state).transpose()
    }

    fn upsert(&self, user_id: &str, state: &PlayerState) -> Result<(), StoreError> {
        let row = PlayerRow::from_state(state)?;
        self.conn()
            .execute(
                UPSERT_PLAYER,
                params![
                    user_id,
                    row.coins,
                    row.energy,
                    row.max_energy,
                    row.multi_tap_level,
                    row.energy_level,
                    row.auto_tap_level,
                    row.skin_bought,
                    row.last_update,
                    row.username,
                    row.first_name,
                    row.ban_end_time,
                    row.tap_window_start,
                    row.tap_count,
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }
}

pub struct SqliteTxn<'a> {
    store: &'a SqliteStore,
    guard: RowGuard<'a>,
    pending: PendingRow,
}

impl PlayerTxn for SqliteTxn<'_> {
    fn load(&mut self) -> Result<Option<PlayerState>, StoreError> {
        if let Some(row) = self.pending.get() {
            return Ok(Some(row.clone()));
        }
        self.store.select(self.guard.user_id())
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
        match self.pending.take() {
            Some(row) => self.store.upsert(self.guard.user_id(), &row),
            None => Ok(()),
        }
    }
}

impl Store for SqliteStore {
    type Txn<'a> = SqliteTxn<'a>;

    fn begin(&self, user_id: &str) -> Result<Self::Txn<'_>, StoreError> {
        let guard = self.locks.acquire(user_id)?;
        Ok(SqliteTxn {
            store: self,
            guard,
            pending: PendingRow::default(),
        })
    }

    fn get(&self, user_id: &str) -> Result<Option<PlayerState>, StoreError> {
        self.select(user_id)
    }

    fn top_by_coins(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let limit = to_i64(limit as u64, "limit")?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEADERBOARD_COLUMNS} FROM users ORDER BY coins DESC LIMIT ?1"
            ))
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(store_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)?;
        rows.into_iter()
            .map(|(user_id, username, first_name, coins, level)| {
                Ok(LeaderboardEntry {
                    user_id,
                    username,
                    first_name,
                    coins,
                    multi_tap_level: to_u32(level, "multi_tap_level")?,
                })
            })
            .collect()
    }

    fn totals(&self) -> Result<Totals, StoreError> {
        let (count, coins) = self
            .conn()
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(coins), 0.0) FROM users",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )
            .map_err(store_error)?;
        Ok(Totals {
            total_users: super::to_u64(count, "total_users")?,
            total_coins: coins,
            top_player: self.top_by_coins(1)?.into_iter().next(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tapgame_execution::mocks::plain_rng;
    use tapgame_execution::Layer;
    use tapgame_types::{Event, Identity};

    const T0: u64 = 1_700_000_000_000;

    fn ann() -> Identity {
        Identity::new("42").with_names(Some("ann"), Some("Ann"))
    }

    #[test]
    fn tap_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("players.db");
        {
            let layer = Layer::new(SqliteStore::open(&path).unwrap());
            let response = layer.process_at(&ann(), "tap", T0, &mut plain_rng()).unwrap();
            assert_eq!(response.event, Event::tapped(1, false));
        }
        let store = SqliteStore::open(&path).unwrap();
        let stored = store.get("42").unwrap().unwrap();
        assert_eq!(stored.coins, 1.0);
        assert_eq!(stored.energy, 999.0);
        assert_eq!(stored.first_name, "Ann");
        assert_eq!(stored.last_update, T0);
    }

    #[test]
    fn dropped_transaction_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let mut txn = store.begin("1").unwrap();
            txn.insert_if_absent(&PlayerState::new("a", "A", T0)).unwrap();
        }
        assert_eq!(store.get("1").unwrap(), None);
    }

    #[test]
    fn commit_overwrites_every_field() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut txn = store.begin("1").unwrap();
        txn.insert_if_absent(&PlayerState::new("a", "A", T0)).unwrap();
        txn.commit().unwrap();

        let updated = PlayerState {
            coins: 1_234.5,
            energy: 10.25,
            max_energy: 1_500,
            multi_tap_level: 4,
            energy_level: 2,
            skin_bought: true,
            ban_end_time: T0 + 5,
            tap_window_start: T0,
            tap_count: 7,
            ..PlayerState::new("b", "B", T0 + 1)
        };
        let mut txn = store.begin("1").unwrap();
        txn.update(&updated).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.get("1").unwrap(), Some(updated));
    }

    #[test]
    fn leaderboard_and_totals() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, coins) in [("a", 5.0), ("b", 500.0), ("c", 50.0)] {
            let mut txn = store.begin(id).unwrap();
            txn.insert_if_absent(&PlayerState {
                coins,
                ..PlayerState::new(id, id, T0)
            })
            .unwrap();
            txn.commit().unwrap();
        }
        let ids: Vec<_> = store
            .top_by_coins(2)
            .unwrap()
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);

        let totals = store.totals().unwrap();
        assert_eq!(totals.total_users, 3);
        assert_eq!(totals.total_coins, 555.0);
        assert_eq!(totals.top_player.unwrap().user_id, "b");
    }

    #[test]
    fn empty_store_totals() {
        let store = SqliteStore::open_in_memory().unwrap();
        let totals = store.totals().unwrap();
        assert_eq!(totals, Totals::default());
    }

    #[test]
    fn legacy_schema_gains_abuse_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (
                     user_id TEXT PRIMARY KEY,
                     coins REAL NOT NULL DEFAULT 0,
                     energy REAL NOT NULL DEFAULT 1000,
                     max_energy INTEGER NOT NULL DEFAULT 1000,
                     multi_tap_level INTEGER NOT NULL DEFAULT 1,
                     energy_level INTEGER NOT NULL DEFAULT 1,
                     auto_tap_level INTEGER NOT NULL DEFAULT 0,
                     skin_bought INTEGER NOT NULL DEFAULT 0,
                     last_update INTEGER NOT NULL DEFAULT 0,
                     username TEXT NOT NULL DEFAULT '',
                     first_name TEXT NOT NULL DEFAULT ''
                 );
                 INSERT INTO users (user_id, coins, last_update) VALUES ('9', 77, 1000);",
            )
            .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let stored = store.get("9").unwrap().unwrap();
        assert_eq!(stored.coins, 77.0);
        assert_eq!(stored.ban_end_time, 0);
        assert_eq!(stored.tap_count, 0);
    }

    #[test]
    fn concurrent_taps_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(Layer::new(
            SqliteStore::open(&dir.path().join("players.db")).unwrap(),
        ));
        let barrier = Arc::new(Barrier::new(20));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let layer = Arc::clone(&layer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    layer.process_at(&ann(), "tap", T0, &mut plain_rng()).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().event.is_ok());
        }
        let stored = layer.store().get("42").unwrap().unwrap();
        assert_eq!(stored.energy, 980.0);
        assert_eq!(stored.coins, 20.0);
        assert_eq!(stored.tap_count, 20);
    }
}
