//! Claim tickets.
//!
//! A marker records that the unit of work "process `product` for `colony`" has been taken. The
//! `UNIQUE (product, colony)` constraint on the table is the only cross-process mutex of the claim
//! protocol: whoever inserts the row owns the work.

use crate::{
    db,
    error::{Error, Result},
    product::ProductId,
};
use serde::{Deserialize, Serialize};

define_row_id! {
    /// Identifies a marker row.
    pub struct MarkerId;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MarkerStatus {
    Pending = 0,
    Done = 1,
    Failed = 2,
}

impl MarkerStatus {
    pub(crate) fn encode(self) -> i64 {
        self as i64
    }

    pub(crate) fn decode(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Done),
            2 => Ok(Self::Failed),
            _ => Err(Error::MalformedData),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    pub product: ProductId,
    /// The claim group.
    pub colony: String,
    pub status: MarkerStatus,
    /// Identity of the claiming process.
    pub location: String,
}

/// Outcome of a claim attempt.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Claim {
    /// The marker was inserted; the caller owns the work unit.
    Won(MarkerId),
    /// Somebody else holds the marker.
    Lost,
    /// The insert affected an impossible number of rows.
    Unexpected(u64),
}

/// Inserts a pending marker for `(product, colony)` unless one already exists.
///
/// The existence check and the insert are a single statement, so two claimants can never both
/// succeed for the same pair.
pub(crate) async fn claim(
    conn: &mut db::Connection,
    product: ProductId,
    colony: &str,
    location: &str,
) -> Result<Claim> {
    let result = sqlx::query(
        "INSERT INTO markers (product, colony, status, location)
         SELECT ?, ?, ?, ?
         WHERE NOT EXISTS (
             SELECT 1 FROM markers WHERE product = ? AND colony = ?
         )
         ON CONFLICT (product, colony) DO NOTHING",
    )
    .bind(product)
    .bind(colony)
    .bind(MarkerStatus::Pending.encode())
    .bind(location)
    .bind(product)
    .bind(colony)
    .execute(&mut *conn)
    .await?;

    Ok(match result.rows_affected() {
        0 => Claim::Lost,
        1 => Claim::Won(MarkerId::new(result.last_insert_rowid())),
        n => Claim::Unexpected(n),
    })
}

/// Updates the status of the marker for `(product, colony)`. Never creates or removes a marker.
/// Returns whether the marker exists.
pub(crate) async fn set_status(
    conn: &mut db::Connection,
    product: ProductId,
    colony: &str,
    status: MarkerStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE markers SET status = ? WHERE product = ? AND colony = ?")
        .bind(status.encode())
        .bind(product)
        .bind(colony)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn load(conn: &mut db::Connection, id: MarkerId) -> Result<Option<Marker>> {
    sqlx::query_as::<_, (MarkerId, ProductId, String, i64, String)>(
        "SELECT id, product, colony, status, location FROM markers WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .map(decode)
    .transpose()
}

pub(crate) async fn load_for_product(
    conn: &mut db::Connection,
    product: ProductId,
) -> Result<Vec<Marker>> {
    sqlx::query_as::<_, (MarkerId, ProductId, String, i64, String)>(
        "SELECT id, product, colony, status, location FROM markers WHERE product = ? ORDER BY id",
    )
    .bind(product)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(decode)
    .collect()
}

/// Finds a marker of `colony` on any direct ancestor of `product`.
pub(crate) async fn find_in_ancestors(
    conn: &mut db::Connection,
    product: ProductId,
    colony: &str,
) -> Result<Option<MarkerId>> {
    Ok(sqlx::query_scalar(
        "SELECT m.id
         FROM markers m
         JOIN ancestors a ON a.ancestor = m.product
         WHERE a.product = ? AND m.colony = ?
         ORDER BY m.id
         LIMIT 1",
    )
    .bind(product)
    .bind(colony)
    .fetch_optional(&mut *conn)
    .await?)
}

pub(crate) async fn remove_for_product(conn: &mut db::Connection, product: ProductId) -> Result<()> {
    sqlx::query("DELETE FROM markers WHERE product = ?")
        .bind(product)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn decode(
    (id, product, colony, status, location): (MarkerId, ProductId, String, i64, String),
) -> Result<Marker> {
    Ok(Marker {
        id,
        product,
        colony,
        status: MarkerStatus::decode(status)?,
        location,
    })
}
