//! Split reader/writer SQLite pools for the ledger database.
//!
//! SQLite serializes writers, so the ledger funnels every mutation through
//! a single-connection writer pool while reads fan out over a small
//! read-only pool. WAL mode lets the readers proceed during a write, and
//! `synchronous=NORMAL` pairs with WAL to keep commits durable without a
//! full fsync per transaction.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

/// Read connections for a single router process. Ledger reads are short
/// point queries; four connections cover the gate, accountant, alert and
/// admin paths without contending.
const READER_CONNECTIONS: u32 = 4;

/// Paired pools over one database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and bring the schema up to date.
    ///
    /// Migrations run on the writer before the reader opens, so a fresh
    /// database file is fully usable by the time this returns.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Database URL under `TOLLGATE_DATA_DIR`, falling back to
/// `~/.tollgate/tollgate.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("TOLLGATE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".tollgate")
        });
    format!("sqlite://{}", data_dir.join("tollgate.db").display())
}
