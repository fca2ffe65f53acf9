//! Ancillary files (leap seconds, polar motion, ephemerides, ...) and the resolver picking the
//! one nearest to a given time.

mod window;

pub use self::window::TimeWindow;

use crate::{
    catalog::Catalog,
    db,
    error::{Error, Result},
    pass::normalize_spacecraft,
    resource::Location,
    site::Site,
    time,
    transfer::TransferCoordinator,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;

/// Keyword of the leap second tables.
pub const LEAPSEC_KEYWORD: &str = "leapsec";
/// Keyword of the polar motion tables.
pub const UTCPOLE_KEYWORD: &str = "utcpole";

define_row_id! {
    /// Identifies an ancillary file.
    pub struct AncillaryId;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ancillary {
    pub id: Option<AncillaryId>,
    pub keyword: String,
    /// Upper case. `None` for files not specific to a spacecraft.
    pub spacecraft: Option<String>,
    /// Time the file applies to.
    pub time: DateTime<Utc>,
    /// File name, without directory.
    pub name: String,
    pub creation: DateTime<Utc>,
    pub local: Option<Location>,
    pub remote: Vec<Location>,
}

impl Ancillary {
    /// Ancillary file at `path` on `site`.
    pub fn at(
        site: &Site,
        keyword: impl Into<String>,
        time: DateTime<Utc>,
        path: impl AsRef<Path>,
    ) -> Self {
        let path = site.absolute(path);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let directory = path
            .parent()
            .map(|dir| site.relative(dir))
            .unwrap_or_default();

        Self {
            id: None,
            keyword: keyword.into(),
            spacecraft: None,
            time,
            name,
            creation: time::now(),
            local: Some(Location::new(site.name.clone(), directory)),
            remote: Vec::new(),
        }
    }

    pub fn with_spacecraft(self, spacecraft: &str) -> Self {
        Self {
            spacecraft: Some(normalize_spacecraft(spacecraft)),
            ..self
        }
    }

    pub fn local_path(&self, site: &Site) -> Option<PathBuf> {
        self.local
            .as_ref()
            .map(|location| site.absolute(&location.directory).join(&self.name))
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.local.iter().chain(self.remote.iter())
    }
}

impl Catalog {
    /// Stores the ancillary file. Its local location is recorded under the acting site.
    pub async fn store_ancillary(&self, ancillary: &Ancillary) -> Result<AncillaryId> {
        let mut tx = self.pool().begin_write().await?;

        let id = AncillaryId::new(
            sqlx::query(
                "INSERT INTO ancillaries (keyword, spacecraft, time, path, creation)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&ancillary.keyword)
            .bind(ancillary.spacecraft.as_deref().map(normalize_spacecraft))
            .bind(time::to_millis(ancillary.time))
            .bind(&ancillary.name)
            .bind(time::to_millis(ancillary.creation))
            .execute(&mut *tx)
            .await?
            .last_insert_rowid(),
        );

        if let Some(location) = &ancillary.local {
            insert_location(
                &mut tx,
                id,
                self.site_name(),
                &location.directory,
                location.creation,
            )
            .await?;
        }

        for location in &ancillary.remote {
            insert_location(
                &mut tx,
                id,
                &location.site,
                &location.directory,
                location.creation,
            )
            .await?;
        }

        tx.commit().await?;

        Ok(id)
    }

    pub async fn load_ancillary(&self, id: AncillaryId) -> Result<Option<Ancillary>> {
        let mut conn = self.pool().acquire().await?;
        load(&mut conn, id, self.site_name()).await
    }
}

pub(crate) async fn load(
    conn: &mut db::Connection,
    id: AncillaryId,
    site: &str,
) -> Result<Option<Ancillary>> {
    let row: Option<(String, Option<String>, i64, String, i64)> = sqlx::query_as(
        "SELECT keyword, spacecraft, time, path, creation FROM ancillaries WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((keyword, spacecraft, time, name, creation)) = row else {
        return Ok(None);
    };

    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT site, directory, creation FROM ancillary_sites WHERE ancillary = ? ORDER BY site",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let mut local = None;
    let mut remote = Vec::new();

    for (location_site, directory, creation) in rows {
        let location = Location {
            site: location_site,
            directory: PathBuf::from(directory),
            creation: time::from_millis(creation)?,
        };

        if location.site == site {
            local = Some(location);
        } else {
            remote.push(location);
        }
    }

    Ok(Some(Ancillary {
        id: Some(id),
        keyword,
        spacecraft,
        time: time::from_millis(time)?,
        name,
        creation: time::from_millis(creation)?,
        local,
        remote,
    }))
}

pub(crate) async fn insert_location(
    conn: &mut db::Connection,
    id: AncillaryId,
    site: &str,
    directory: &Path,
    creation: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ancillary_sites (ancillary, site, directory, creation)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (ancillary, site) DO UPDATE SET
             directory = excluded.directory,
             creation = excluded.creation",
    )
    .bind(id)
    .bind(site)
    .bind(directory.to_str().ok_or(Error::MalformedData)?)
    .bind(time::to_millis(creation))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct Candidate {
    id: AncillaryId,
    path: String,
    directory: Option<String>,
}

/// Finds the ancillary file nearest to a given time and makes sure it's present on the acting
/// site.
pub struct AncillaryResolver {
    catalog: Catalog,
    transfers: TransferCoordinator,
}

impl AncillaryResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            transfers: TransferCoordinator::new(catalog.clone()),
            catalog,
        }
    }

    /// Returns the local path of the file of `keyword` nearest to `time` within `window`, or
    /// `None` if no such file can be made available here. Candidates not present on this site
    /// are localized first, which blocks until the transfer completes.
    #[instrument(skip(self, window))]
    pub async fn resolve(
        &self,
        keyword: &str,
        time: DateTime<Utc>,
        spacecraft: Option<&str>,
        window: &TimeWindow,
    ) -> Result<Option<PathBuf>> {
        let candidates = self.candidates(keyword, time, spacecraft, window).await?;
        let site = &self.catalog.config().site;

        for candidate in candidates {
            if let Some(directory) = candidate.directory {
                let path = site.absolute(directory).join(&candidate.path);

                if fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Some(path));
                }

                tracing::warn!(
                    ancillary = %candidate.id,
                    path = ?path,
                    "ancillary file recorded on this site is missing"
                );

                continue;
            }

            match self.transfers.localize_ancillary(candidate.id).await {
                Ok(path) => return Ok(Some(path)),
                Err(Error::TransferFailed(transfer)) => {
                    tracing::warn!(
                        ancillary = %candidate.id,
                        %transfer,
                        "failed to localize ancillary file"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        Ok(None)
    }

    async fn candidates(
        &self,
        keyword: &str,
        time: DateTime<Utc>,
        spacecraft: Option<&str>,
        window: &TimeWindow,
    ) -> Result<Vec<Candidate>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT a.id, a.path, s.directory
             FROM ancillaries a
             LEFT JOIN ancillary_sites s ON s.ancillary = a.id AND s.site = ",
        );

        builder
            .push_bind(self.catalog.site_name())
            .push(" WHERE a.keyword = ")
            .push_bind(keyword);

        if let Some(spacecraft) = spacecraft {
            builder
                .push(" AND a.spacecraft = ")
                .push_bind(normalize_spacecraft(spacecraft));
        }

        window.push_predicates(&mut builder, time);

        builder
            .push(" ORDER BY ABS(a.time - ")
            .push_bind(time::to_millis(time))
            .push("), a.id");

        let mut conn = self.catalog.pool().acquire().await?;

        Ok(builder
            .build_query_as::<Candidate>()
            .fetch_all(&mut *conn)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, at};
    use chrono::TimeZone;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    async fn store(catalog: &Catalog, keyword: &str, time: DateTime<Utc>, name: &str) -> PathBuf {
        let site = &catalog.config().site;
        let ancillary = Ancillary::at(site, keyword, time, format!("anc/{name}"));
        let path = ancillary.local_path(site).unwrap();

        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, name).await.unwrap();
        catalog.store_ancillary(&ancillary).await.unwrap();

        path
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nearest_first() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;

        store(&catalog, LEAPSEC_KEYWORD, at(9, 0), "minus3h").await;
        let nearest = store(&catalog, LEAPSEC_KEYWORD, at(13, 0), "plus1h").await;
        store(&catalog, LEAPSEC_KEYWORD, at(17, 0), "plus5h").await;
        store(&catalog, UTCPOLE_KEYWORD, at(12, 0), "other").await;

        let resolver = AncillaryResolver::new(catalog);
        let path = resolver
            .resolve(LEAPSEC_KEYWORD, at(12, 0), None, &TimeWindow::unbounded())
            .await
            .unwrap();

        assert_eq!(path, Some(nearest));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn window_excludes_everything() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;

        store(&catalog, LEAPSEC_KEYWORD, at(9, 0), "minus3h").await;

        let resolver = AncillaryResolver::new(catalog);
        let window = TimeWindow::date(HOUR, HOUR).unwrap();

        assert_eq!(
            resolver
                .resolve(LEAPSEC_KEYWORD, at(12, 0), None, &window)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn time_of_day_window_crosses_midnight() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;

        let before = store(
            &catalog,
            "tle",
            Utc.with_ymd_and_hms(2024, 4, 10, 23, 50, 0).unwrap(),
            "before",
        )
        .await;
        store(&catalog, "tle", at(12, 0), "noon").await;

        let resolver = AncillaryResolver::new(catalog);
        let window = TimeWindow::time_of_day(HOUR, HOUR).unwrap();

        // The noon file is nearer in absolute time but outside the time-of-day band.
        assert_eq!(
            resolver
                .resolve("tle", at(0, 20), None, &window)
                .await
                .unwrap(),
            Some(before)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spacecraft_filter_and_missing_files() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;
        let site = catalog.config().site.clone();

        let aqua = store(&catalog, "ephemeris", at(12, 0), "aqua").await;
        catalog
            .store_ancillary(
                &Ancillary::at(&site, "ephemeris", at(12, 0), "anc/terra").with_spacecraft("terra"),
            )
            .await
            .unwrap();

        let resolver = AncillaryResolver::new(catalog);
        assert_eq!(
            resolver
                .resolve("ephemeris", at(12, 0), Some("TERRA"), &TimeWindow::unbounded())
                .await
                .unwrap(),
            None,
            "the terra file is recorded but was never written"
        );
        assert_eq!(
            resolver
                .resolve("ephemeris", at(12, 0), None, &TimeWindow::unbounded())
                .await
                .unwrap(),
            Some(aqua)
        );
    }
}
