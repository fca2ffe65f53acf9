//! The `transfer_commands` table: a crash-recoverable queue of "copy this file to that site"
//! requests.

use crate::{
    db,
    error::{Error, Result},
    time,
};
use chrono::{DateTime, Utc};

define_row_id! {
    /// Identifies a pending transfer.
    pub struct TransferId;
}

/// Table of the row a transfer command refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferTable {
    Resources,
    Ancillaries,
}

impl TransferTable {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::Ancillaries => "ancillaries",
        }
    }

    fn parse(name: &str) -> Result<Self> {
        match name {
            "resources" => Ok(Self::Resources),
            "ancillaries" => Ok(Self::Ancillaries),
            _ => Err(Error::MalformedData),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferStatus {
    Pending = 0,
    Success = 1,
    Failure = 2,
}

impl TransferStatus {
    fn encode(self) -> i64 {
        self as i64
    }

    fn decode(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Success),
            2 => Ok(Self::Failure),
            _ => Err(Error::MalformedData),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransferCommand {
    pub id: TransferId,
    pub table: TransferTable,
    pub row_id: i64,
    /// Site the file is to be copied to.
    pub site: String,
    pub creation_time: DateTime<Utc>,
    pub status: TransferStatus,
}

pub(crate) async fn submit(
    conn: &mut db::Connection,
    table: TransferTable,
    row_id: i64,
    site: &str,
) -> Result<TransferId> {
    Ok(TransferId::new(
        sqlx::query(
            "INSERT INTO transfer_commands (table_name, row_id, site, creation_time, complete)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(table.as_str())
        .bind(row_id)
        .bind(site)
        .bind(time::to_millis(time::now()))
        .bind(TransferStatus::Pending.encode())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid(),
    ))
}

pub(crate) async fn status(
    conn: &mut db::Connection,
    id: TransferId,
) -> Result<Option<TransferStatus>> {
    sqlx::query_scalar::<_, i64>("SELECT complete FROM transfer_commands WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(TransferStatus::decode)
        .transpose()
}

/// Pending commands, oldest first. Restricted to one destination site if `site` is given.
pub(crate) async fn pending(
    conn: &mut db::Connection,
    site: Option<&str>,
) -> Result<Vec<TransferCommand>> {
    let rows: Vec<(TransferId, String, i64, String, i64, i64)> = sqlx::query_as(
        "SELECT id, table_name, row_id, site, creation_time, complete
         FROM transfer_commands
         WHERE complete = ? AND (? IS NULL OR site = ?)
         ORDER BY id",
    )
    .bind(TransferStatus::Pending.encode())
    .bind(site)
    .bind(site)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(id, table, row_id, site, creation_time, status)| {
            Ok(TransferCommand {
                id,
                table: TransferTable::parse(&table)?,
                row_id,
                site,
                creation_time: time::from_millis(creation_time)?,
                status: TransferStatus::decode(status)?,
            })
        })
        .collect()
}

/// Completes a pending command. Returns false if it was already completed.
pub(crate) async fn complete(
    conn: &mut db::Connection,
    id: TransferId,
    status: TransferStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE transfer_commands SET complete = ? WHERE id = ? AND complete = ?")
        .bind(status.encode())
        .bind(id)
        .bind(TransferStatus::Pending.encode())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
