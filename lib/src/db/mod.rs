mod migrations;

use sqlx::{
    sqlite::{
        Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    },
    Row, SqlitePool,
};
use std::{io, path::Path, time::Duration};
#[cfg(test)]
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;

/// Database connection.
pub type Connection = SqliteConnection;

/// Database connection checked out of the pool.
pub type PoolConnection = sqlx::pool::PoolConnection<Sqlite>;

/// Database transaction. Rolled back when dropped without being committed.
pub type Transaction = sqlx::Transaction<'static, Sqlite>;

/// Database connection pool.
#[derive(Clone)]
pub struct Pool {
    inner: SqlitePool,
}

impl Pool {
    fn new(inner: SqlitePool) -> Self {
        Self { inner }
    }

    pub async fn acquire(&self) -> Result<PoolConnection, sqlx::Error> {
        self.inner.acquire().await
    }

    /// Begins a read-only (deferred) transaction.
    pub async fn begin_read(&self) -> Result<Transaction, sqlx::Error> {
        self.inner.begin().await
    }

    /// Begins a write transaction.
    pub async fn begin_write(&self) -> Result<Transaction, sqlx::Error> {
        // Take the write lock up front. A deferred transaction that reads first and then tries
        // to upgrade to a write can fail with `SQLITE_BUSY` when another connection wrote in the
        // meantime, and the only way out of that is to retry the whole transaction. With
        // `IMMEDIATE` the busy wait happens in `begin` where sqlite retries it by itself.
        self.inner.begin_with("BEGIN IMMEDIATE").await
    }

    pub async fn close(&self) {
        self.inner.close().await
    }
}

/// Creates a new database and opens a connection to it.
pub(crate) async fn create(path: impl AsRef<Path>) -> Result<Pool, Error> {
    let path = path.as_ref();

    if fs::metadata(path).await.is_ok() {
        return Err(Error::Exists);
    }

    create_directory(path).await?;

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = create_pool(connect_options).await?;
    migrations::run(&pool).await?;

    Ok(pool)
}

/// Creates a new database in a temporary directory. Useful for tests.
#[cfg(test)]
pub(crate) async fn create_temp() -> Result<(TempDir, Pool), Error> {
    let temp_dir = TempDir::new().map_err(Error::CreateDirectory)?;
    let pool = create(temp_dir.path().join("catalog.db")).await?;

    Ok((temp_dir, pool))
}

/// Opens a connection to the specified database. Fails if the db doesn't exist.
pub(crate) async fn open(path: impl AsRef<Path>) -> Result<Pool, Error> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = create_pool(connect_options).await?;
    migrations::run(&pool).await?;

    Ok(pool)
}

async fn create_directory(path: &Path) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(Error::CreateDirectory)?
    }

    Ok(())
}

async fn create_pool(connect_options: SqliteConnectOptions) -> Result<Pool, Error> {
    let connect_options = connect_options
        // Every claimant and mover on every site goes through this store, so lock waits can be
        // long. There is no way to ask for an infinite timeout; a day is the next best thing.
        .busy_timeout(Duration::from_secs(24 * 60 * 60));

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(connect_options)
        .await
        .map(Pool::new)
        .map_err(Error::Open)
}

// Explicit cast from `i64` to `u64` to work around the lack of native `u64` support in the sqlx
// crate.
pub(crate) const fn decode_u64(i: i64) -> u64 {
    i as u64
}

// Explicit cast from `u64` to `i64` to work around the lack of native `u64` support in the sqlx
// crate.
pub(crate) const fn encode_u64(u: u64) -> i64 {
    u as i64
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create database directory")]
    CreateDirectory(#[source] io::Error),
    #[error("database already exists")]
    Exists,
    #[error("failed to open database")]
    Open(#[source] sqlx::Error),
    #[error("failed to execute database query")]
    Query(#[from] sqlx::Error),
}

async fn get_pragma(conn: &mut Connection, name: &str) -> Result<u32, Error> {
    Ok(sqlx::query(&format!("PRAGMA {}", name))
        .fetch_one(&mut *conn)
        .await?
        .get(0))
}

async fn set_pragma(conn: &mut Connection, name: &str, value: u32) -> Result<(), Error> {
    // `bind` doesn't seem to be supported for setting PRAGMAs...
    sqlx::query(&format!("PRAGMA {} = {}", name, value))
        .execute(&mut *conn)
        .await?;

    Ok(())
}
