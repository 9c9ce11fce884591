//! Database connection management

use std::path::Path;
use std::sync::Arc;

use libsql::{Builder, Connection, Database as LibSqlDatabase, Transaction, TransactionBehavior};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::migrations;
use crate::error::Result;

/// How long a connection waits on a locked database file before failing (ms)
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Database wrapper for libSQL connections
///
/// `SQLite` admits a single writer, so write transactions are funnelled
/// through one gate. File-backed databases hand every session its own
/// connection; an in-memory database only exists on its original connection,
/// so sessions share it and reads take the gate too.
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
    in_memory: bool,
    write_gate: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            in_memory: false,
            write_gate: Arc::new(Mutex::new(())),
        };
        database.configure().await?;
        database.migrate().await?;
        tracing::info!(path = %path_str, "Opened database");
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            in_memory: true,
            write_gate: Arc::new(Mutex::new(())),
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for concurrent readers and a single writer
    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the refusal
        self.conn
            .query("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        configure_session(&self.conn).await
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Begin an immediate write transaction
    ///
    /// The returned handle holds the write gate until it is committed or
    /// rolled back.
    pub async fn begin(&self) -> Result<WriteTransaction> {
        let gate = Arc::clone(&self.write_gate).lock_owned().await;
        let conn = self.session_connection().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;
        Ok(WriteTransaction { tx, _gate: gate })
    }

    /// Get a connection for read-only work outside any write transaction
    pub async fn reader(&self) -> Result<ReadConnection> {
        if self.in_memory {
            let gate = Arc::clone(&self.write_gate).lock_owned().await;
            return Ok(ReadConnection {
                conn: self.conn.clone(),
                _gate: Some(gate),
            });
        }

        let conn = self.session_connection().await?;
        Ok(ReadConnection { conn, _gate: None })
    }

    async fn session_connection(&self) -> Result<Connection> {
        if self.in_memory {
            return Ok(self.conn.clone());
        }
        let conn = self.db.connect()?;
        configure_session(&conn).await?;
        Ok(conn)
    }

    /// Check whether this database lives only in memory
    pub const fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

async fn configure_session(conn: &Connection) -> Result<()> {
    conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"), ())
        .await?;
    Ok(())
}

/// An open `BEGIN IMMEDIATE` transaction
pub struct WriteTransaction {
    tx: Transaction,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    /// Connection that executes inside this transaction
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    /// Commit and release the write gate
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back and release the write gate
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// A connection for reads, pinned to the write gate when the database is in memory
pub struct ReadConnection {
    conn: Connection,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl ReadConnection {
    /// The underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
