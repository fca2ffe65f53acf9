//! Files tracked by the catalog and the sites they are present at.

use crate::{
    db,
    error::{Error, Result},
    product::ProductId,
    site::Site,
    time,
};
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

define_row_id! {
    /// Identifies a resource row.
    pub struct ResourceId;
}

/// Where a copy of a file lives. `directory` is relative to the site's data root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub site: String,
    pub directory: PathBuf,
    pub creation: DateTime<Utc>,
}

impl Location {
    pub fn new(site: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            site: site.into(),
            directory: directory.into(),
            creation: time::now(),
        }
    }
}

/// A named file belonging to a product, or a thumbnail/contributor without an owning product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub id: Option<ResourceId>,
    /// File name, without directory.
    pub name: String,
    pub description: Option<String>,
    /// Whether the file is present at the distribution site.
    pub published: bool,
    /// Location on the acting site, if any.
    pub local: Option<Location>,
    /// Locations on other sites.
    pub remote: Vec<Location>,
}

impl Resource {
    /// A resource not (yet) present anywhere.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            published: false,
            local: None,
            remote: Vec::new(),
        }
    }

    /// A resource for the file at `path` on `site`.
    pub fn at(site: &Site, path: impl AsRef<Path>) -> Self {
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
            local: Some(Location::new(site.name.clone(), directory)),
            ..Self::new(name)
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    /// Absolute path of the local copy.
    pub fn local_path(&self, site: &Site) -> Option<PathBuf> {
        self.local
            .as_ref()
            .map(|location| site.absolute(&location.directory).join(&self.name))
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.local.iter().chain(self.remote.iter())
    }

    pub fn location_at(&self, site: &str) -> Option<&Location> {
        self.locations().find(|location| location.site == site)
    }
}

/// Tables linking owner-less resources to products.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Link {
    Thumbnail,
    Contributor,
}

impl Link {
    fn table(self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnails",
            Self::Contributor => "contributors",
        }
    }
}

/// Inserts the resource row and all its locations. The local location is recorded under
/// `site`.
pub(crate) async fn insert(
    conn: &mut db::Connection,
    product: Option<ProductId>,
    key: Option<&str>,
    resource: &Resource,
    site: &str,
    published: bool,
) -> Result<ResourceId> {
    let id = ResourceId::new(
        sqlx::query(
            "INSERT INTO resources (product, rkey, path, description, published)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(product)
        .bind(key)
        .bind(&resource.name)
        .bind(&resource.description)
        .bind(published || resource.published)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid(),
    );

    if let Some(location) = &resource.local {
        insert_location(conn, id, site, &location.directory, location.creation).await?;
    }

    for location in &resource.remote {
        insert_location(
            conn,
            id,
            &location.site,
            &location.directory,
            location.creation,
        )
        .await?;
    }

    Ok(id)
}

pub(crate) async fn link(
    conn: &mut db::Connection,
    link: Link,
    product: ProductId,
    resource: ResourceId,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} (product, resource) VALUES (?, ?) ON CONFLICT DO NOTHING",
        link.table()
    ))
    .bind(product)
    .bind(resource)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Records that a copy of the resource exists at `site`, replacing any previous location there.
pub(crate) async fn insert_location(
    conn: &mut db::Connection,
    resource: ResourceId,
    site: &str,
    directory: &Path,
    creation: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO resource_sites (resource, site, directory, creation)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (resource, site) DO UPDATE SET
             directory = excluded.directory,
             creation = excluded.creation",
    )
    .bind(resource)
    .bind(site)
    .bind(directory_to_db(directory)?)
    .bind(time::to_millis(creation))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn set_published(conn: &mut db::Connection, resource: ResourceId) -> Result<()> {
    sqlx::query("UPDATE resources SET published = 1 WHERE id = ?")
        .bind(resource)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Loads the resources owned by `product`, keyed by their resource key.
pub(crate) async fn load_for_product(
    conn: &mut db::Connection,
    product: ProductId,
    site: &str,
) -> Result<BTreeMap<String, Resource>> {
    let rows: Vec<(ResourceId, Option<String>, String, Option<String>, bool)> = sqlx::query_as(
        "SELECT id, rkey, path, description, published
         FROM resources WHERE product = ? ORDER BY id",
    )
    .bind(product)
    .fetch_all(&mut *conn)
    .await?;

    let mut resources = BTreeMap::new();

    for (id, key, name, description, published) in rows {
        let resource = hydrate(conn, id, name, description, published, site).await?;
        resources.insert(key.unwrap_or_else(|| resource.name.clone()), resource);
    }

    Ok(resources)
}

/// Loads the thumbnails or contributors of `product`.
pub(crate) async fn load_linked(
    conn: &mut db::Connection,
    link: Link,
    product: ProductId,
    site: &str,
) -> Result<Vec<Resource>> {
    let rows: Vec<(ResourceId, String, Option<String>, bool)> = sqlx::query_as(&format!(
        "SELECT r.id, r.path, r.description, r.published
         FROM resources r
         JOIN {} l ON l.resource = r.id
         WHERE l.product = ?
         ORDER BY r.id",
        link.table()
    ))
    .bind(product)
    .fetch_all(&mut *conn)
    .await?;

    let mut resources = Vec::with_capacity(rows.len());

    for (id, name, description, published) in rows {
        resources.push(hydrate(conn, id, name, description, published, site).await?);
    }

    Ok(resources)
}

pub(crate) async fn load(
    conn: &mut db::Connection,
    id: ResourceId,
    site: &str,
) -> Result<Option<Resource>> {
    let row: Option<(String, Option<String>, bool)> =
        sqlx::query_as("SELECT path, description, published FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        Some((name, description, published)) => Ok(Some(
            hydrate(conn, id, name, description, published, site).await?,
        )),
        None => Ok(None),
    }
}

/// Ids of the resources that `remove_for_product` would delete: the owned ones, the thumbnails
/// and the contributors no other product links to.
pub(crate) async fn removable_ids_for_product(
    conn: &mut db::Connection,
    product: ProductId,
) -> Result<Vec<ResourceId>> {
    Ok(sqlx::query_scalar(
        "SELECT id FROM resources WHERE product = ?
         UNION SELECT resource FROM thumbnails WHERE product = ?
         UNION SELECT resource FROM contributors c
               WHERE product = ?
                 AND NOT EXISTS (
                     SELECT 0 FROM contributors o
                     WHERE o.resource = c.resource AND o.product <> c.product
                 )",
    )
    .bind(product)
    .bind(product)
    .bind(product)
    .fetch_all(&mut *conn)
    .await?)
}

pub(crate) async fn count_for_product(conn: &mut db::Connection, product: ProductId) -> Result<u64> {
    Ok(db::decode_u64(
        sqlx::query_scalar("SELECT COUNT(*) FROM resources WHERE product = ?")
            .bind(product)
            .fetch_one(&mut *conn)
            .await?,
    ))
}

/// Removes the resources owned by `product`, its thumbnails and its links to contributors.
/// Contributor resources no other product links to are removed too.
pub(crate) async fn remove_for_product(
    conn: &mut db::Connection,
    product: ProductId,
) -> Result<()> {
    let contributors: Vec<ResourceId> =
        sqlx::query_scalar("SELECT resource FROM contributors WHERE product = ?")
            .bind(product)
            .fetch_all(&mut *conn)
            .await?;

    sqlx::query(
        "DELETE FROM resource_sites
         WHERE resource IN (
             SELECT id FROM resources WHERE product = ?
             UNION SELECT resource FROM thumbnails WHERE product = ?
         )",
    )
    .bind(product)
    .bind(product)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "DELETE FROM resources
         WHERE product = ?
            OR id IN (SELECT resource FROM thumbnails WHERE product = ?)",
    )
    .bind(product)
    .bind(product)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM thumbnails WHERE product = ?")
        .bind(product)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM contributors WHERE product = ?")
        .bind(product)
        .execute(&mut *conn)
        .await?;

    for resource in contributors {
        let linked = sqlx::query("SELECT 0 FROM contributors WHERE resource = ?")
            .bind(resource)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        if !linked {
            remove(conn, resource).await?;
        }
    }

    Ok(())
}

pub(crate) async fn remove(conn: &mut db::Connection, id: ResourceId) -> Result<()> {
    sqlx::query("DELETE FROM resource_sites WHERE resource = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM resources WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn hydrate(
    conn: &mut db::Connection,
    id: ResourceId,
    name: String,
    description: Option<String>,
    published: bool,
    site: &str,
) -> Result<Resource> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT site, directory, creation FROM resource_sites WHERE resource = ? ORDER BY site",
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

    Ok(Resource {
        id: Some(id),
        name,
        description,
        published,
        local,
        remote,
    })
}

fn directory_to_db(directory: &Path) -> Result<&str> {
    directory.to_str().ok_or(Error::MalformedData)
}
