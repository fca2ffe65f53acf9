use crate::{
    db,
    error::{Error, Result},
    geo::Footprint,
    time,
};
use chrono::{DateTime, Utc};

define_row_id! {
    /// Identifies a pass.
    pub struct PassId;
}

/// One spacecraft overflight. Immutable once stored, except for the protection flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    pub id: Option<PassId>,
    pub station: String,
    /// Always upper case.
    pub spacecraft: String,
    /// Acquisition of signal.
    pub aos: DateTime<Utc>,
    /// Loss of signal.
    pub los: DateTime<Utc>,
    pub footprint: Footprint,
    pub delete_protected: bool,
    pub creation: DateTime<Utc>,
}

impl Pass {
    pub fn new(
        station: impl Into<String>,
        spacecraft: &str,
        aos: DateTime<Utc>,
        los: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            station: station.into(),
            spacecraft: normalize_spacecraft(spacecraft),
            aos,
            los,
            footprint: Footprint::default(),
            delete_protected: false,
            creation: time::now(),
        }
    }

    pub fn with_footprint(self, footprint: Footprint) -> Self {
        Self { footprint, ..self }
    }

    pub fn protected(self) -> Self {
        Self {
            delete_protected: true,
            ..self
        }
    }
}

pub(crate) fn normalize_spacecraft(spacecraft: &str) -> String {
    spacecraft.to_uppercase()
}

#[derive(sqlx::FromRow)]
struct PassRow {
    id: PassId,
    station: String,
    spacecraft: String,
    aos: i64,
    los: i64,
    delete_protected: bool,
    creation: i64,
    #[sqlx(flatten)]
    footprint: Footprint,
}

impl TryFrom<PassRow> for Pass {
    type Error = Error;

    fn try_from(row: PassRow) -> Result<Self> {
        Ok(Self {
            id: Some(row.id),
            station: row.station,
            spacecraft: row.spacecraft,
            aos: time::from_millis(row.aos)?,
            los: time::from_millis(row.los)?,
            footprint: row.footprint,
            delete_protected: row.delete_protected,
            creation: time::from_millis(row.creation)?,
        })
    }
}

const SELECT: &str = "SELECT id, station, spacecraft, aos, los, delete_protected, creation,
                             center_latitude, center_longitude, north_latitude,
                             south_latitude, east_longitude, west_longitude
                      FROM passes";

/// Stores the pass. A pass with the same station, spacecraft and times is the same pass; its
/// existing id is returned and the stored row is left untouched.
pub(crate) async fn store(conn: &mut db::Connection, pass: &Pass) -> Result<PassId> {
    let spacecraft = normalize_spacecraft(&pass.spacecraft);

    sqlx::query(
        "INSERT INTO passes
             (station, spacecraft, aos, los, delete_protected, creation,
              center_latitude, center_longitude, north_latitude,
              south_latitude, east_longitude, west_longitude)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (station, spacecraft, aos, los) DO NOTHING",
    )
    .bind(&pass.station)
    .bind(&spacecraft)
    .bind(time::to_millis(pass.aos))
    .bind(time::to_millis(pass.los))
    .bind(pass.delete_protected)
    .bind(time::to_millis(pass.creation))
    .bind(pass.footprint.center_latitude)
    .bind(pass.footprint.center_longitude)
    .bind(pass.footprint.north_latitude)
    .bind(pass.footprint.south_latitude)
    .bind(pass.footprint.east_longitude)
    .bind(pass.footprint.west_longitude)
    .execute(&mut *conn)
    .await?;

    Ok(sqlx::query_scalar(
        "SELECT id FROM passes WHERE station = ? AND spacecraft = ? AND aos = ? AND los = ?",
    )
    .bind(&pass.station)
    .bind(&spacecraft)
    .bind(time::to_millis(pass.aos))
    .bind(time::to_millis(pass.los))
    .fetch_one(&mut *conn)
    .await?)
}

pub(crate) async fn load(conn: &mut db::Connection, id: PassId) -> Result<Pass> {
    sqlx::query_as::<_, PassRow>(&format!("{SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::PassNotFound(id))?
        .try_into()
}

pub(crate) async fn find(
    conn: &mut db::Connection,
    station: &str,
    spacecraft: &str,
    aos: DateTime<Utc>,
    los: DateTime<Utc>,
) -> Result<Option<Pass>> {
    sqlx::query_as::<_, PassRow>(&format!(
        "{SELECT} WHERE station = ? AND spacecraft = ? AND aos = ? AND los = ?"
    ))
    .bind(station)
    .bind(normalize_spacecraft(spacecraft))
    .bind(time::to_millis(aos))
    .bind(time::to_millis(los))
    .fetch_optional(&mut *conn)
    .await?
    .map(Pass::try_from)
    .transpose()
}

pub(crate) async fn exists(conn: &mut db::Connection, id: PassId) -> Result<bool> {
    Ok(sqlx::query("SELECT 0 FROM passes WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some())
}

pub(crate) async fn set_protected(
    conn: &mut db::Connection,
    id: PassId,
    protected: bool,
) -> Result<()> {
    let result = sqlx::query("UPDATE passes SET delete_protected = ? WHERE id = ?")
        .bind(protected)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::PassNotFound(id));
    }

    Ok(())
}

/// Removes the pass if no product references it and it isn't protected. Returns whether it was
/// removed.
pub(crate) async fn remove_if_orphaned(conn: &mut db::Connection, id: PassId) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM passes
         WHERE id = ?
           AND delete_protected = 0
           AND NOT EXISTS (SELECT 1 FROM products WHERE pass = ?)",
    )
    .bind(id)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
