//! Entry point to the shared catalog.

use crate::{
    config::SiteConfig,
    db,
    error::{Error, Result},
    marker::{self, Marker, MarkerId},
    pass::{self, Pass, PassId},
    product::ProductId,
    registry::{self, ProductType},
    resource::{self, ResourceId},
    time,
};
use chrono::{DateTime, Utc};
use std::{path::Path, sync::Arc};
use tracing::instrument;

/// Handle to the catalog as seen from one site. Cheap to clone.
#[derive(Clone)]
pub struct Catalog {
    shared: Arc<Shared>,
}

struct Shared {
    pool: db::Pool,
    config: SiteConfig,
}

impl Catalog {
    /// Creates a new catalog database at `path`. Fails if it already exists.
    pub async fn create(path: impl AsRef<Path>, config: SiteConfig) -> Result<Self> {
        let pool = db::create(path).await?;
        Ok(Self::new(pool, config))
    }

    /// Opens an existing catalog database.
    pub async fn open(path: impl AsRef<Path>, config: SiteConfig) -> Result<Self> {
        let pool = db::open(path).await?;
        Ok(Self::new(pool, config))
    }

    fn new(pool: db::Pool, config: SiteConfig) -> Self {
        Self {
            shared: Arc::new(Shared { pool, config }),
        }
    }

    /// Handle to the same catalog acting as a different site.
    pub fn with_config(&self, config: SiteConfig) -> Self {
        Self::new(self.shared.pool.clone(), config)
    }

    pub fn config(&self) -> &SiteConfig {
        &self.shared.config
    }

    pub(crate) fn pool(&self) -> &db::Pool {
        &self.shared.pool
    }

    /// Name of the acting site.
    pub(crate) fn site_name(&self) -> &str {
        &self.shared.config.site.name
    }

    pub async fn close(&self) {
        self.shared.pool.close().await
    }

    pub async fn register_product_type(&self, product_type: &ProductType) -> Result<()> {
        let mut tx = self.pool().begin_write().await?;
        registry::register_product_type(&mut tx, product_type).await?;
        tx.commit().await?;

        Ok(())
    }

    pub async fn product_type(&self, name: &str) -> Result<Option<ProductType>> {
        let mut conn = self.pool().acquire().await?;
        registry::load_product_type(&mut conn, name).await
    }

    /// Maps `algorithm` to the claim group (colony) its products are produced under.
    pub async fn register_algorithm(&self, algorithm: &str, colony: &str) -> Result<()> {
        let mut tx = self.pool().begin_write().await?;
        registry::register_algorithm(&mut tx, algorithm, colony).await?;
        tx.commit().await?;

        Ok(())
    }

    pub async fn store_pass(&self, pass: &Pass) -> Result<PassId> {
        let mut tx = self.pool().begin_write().await?;
        let id = pass::store(&mut tx, pass).await?;
        tx.commit().await?;

        Ok(id)
    }

    pub async fn load_pass(&self, id: PassId) -> Result<Pass> {
        let mut conn = self.pool().acquire().await?;
        pass::load(&mut conn, id).await
    }

    pub async fn find_pass(
        &self,
        station: &str,
        spacecraft: &str,
        aos: DateTime<Utc>,
        los: DateTime<Utc>,
    ) -> Result<Option<Pass>> {
        let mut conn = self.pool().acquire().await?;
        pass::find(&mut conn, station, spacecraft, aos, los).await
    }

    pub async fn set_pass_protected(&self, id: PassId, protected: bool) -> Result<()> {
        let mut tx = self.pool().begin_write().await?;
        pass::set_protected(&mut tx, id, protected).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Removes the pass if no product references it any more. Returns whether it was removed.
    pub async fn remove_pass_if_orphaned(&self, id: PassId) -> Result<bool> {
        let mut tx = self.pool().begin_write().await?;
        let removed = pass::remove_if_orphaned(&mut tx, id).await?;
        tx.commit().await?;

        Ok(removed)
    }

    pub async fn set_product_protected(&self, id: ProductId, protected: bool) -> Result<()> {
        let mut tx = self.pool().begin_write().await?;

        let result = sqlx::query("UPDATE products SET delete_protected = ? WHERE id = ?")
            .bind(protected)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProductNotFound(id));
        }

        tx.commit().await?;

        Ok(())
    }

    /// Records that a copy of the resource now exists in `directory` (relative to the data root)
    /// of `site`. Adding a location on the distribution site publishes the resource.
    #[instrument(skip(self, directory), fields(directory = ?directory.as_ref()))]
    pub async fn add_resource_location(
        &self,
        resource: ResourceId,
        site: &str,
        directory: impl AsRef<Path>,
    ) -> Result<()> {
        let mut tx = self.pool().begin_write().await?;

        resource::insert_location(&mut tx, resource, site, directory.as_ref(), time::now())
            .await?;

        if site == self.config().distribution_site {
            resource::set_published(&mut tx, resource).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    pub async fn load_marker(&self, id: MarkerId) -> Result<Option<Marker>> {
        let mut conn = self.pool().acquire().await?;
        marker::load(&mut conn, id).await
    }

    pub async fn markers_for_product(&self, product: ProductId) -> Result<Vec<Marker>> {
        let mut conn = self.pool().acquire().await?;
        marker::load_for_product(&mut conn, product).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{site::Site, test_utils};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_open() {
        test_utils::init_log();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        let config = SiteConfig::new(Site::new("S1", "localhost", dir.path()));

        let catalog = Catalog::create(&path, config.clone()).await.unwrap();
        catalog
            .register_product_type(&ProductType::new("pds"))
            .await
            .unwrap();
        catalog.close().await;

        assert_matches!(
            Catalog::create(&path, config.clone()).await.err(),
            Some(Error::Db(db::Error::Exists))
        );

        let catalog = Catalog::open(&path, config).await.unwrap();
        assert!(catalog.product_type("pds").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_lifecycle() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;
        let pass = test_utils::pass();

        let id = catalog.store_pass(&pass).await.unwrap();
        assert_eq!(catalog.store_pass(&pass).await.unwrap(), id);

        let found = catalog
            .find_pass("gs-1", "Aqua", pass.aos, pass.los)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(id));

        catalog.set_pass_protected(id, true).await.unwrap();
        assert!(!catalog.remove_pass_if_orphaned(id).await.unwrap());

        catalog.set_pass_protected(id, false).await.unwrap();
        assert!(catalog.remove_pass_if_orphaned(id).await.unwrap());

        assert_matches!(catalog.load_pass(id).await, Err(Error::PassNotFound(_)));
        assert_matches!(
            catalog.set_pass_protected(id, true).await,
            Err(Error::PassNotFound(_))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn location_on_distribution_site_publishes() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;
        test_utils::register(&catalog, &["pds"]).await;

        let id = test_utils::store(&catalog, test_utils::product(&catalog, "pds", 0)).await;
        let resource_id = catalog.load_product(id).await.unwrap().resources["data"]
            .id
            .unwrap();

        catalog
            .add_resource_location(resource_id, "S2", "pds")
            .await
            .unwrap();
        let product = catalog.load_product(id).await.unwrap();
        let resource = &product.resources["data"];
        assert!(!resource.published);
        assert!(resource.location_at("S2").is_some());

        let distribution_site = catalog.config().distribution_site.clone();
        catalog
            .add_resource_location(resource_id, &distribution_site, "pub/pds")
            .await
            .unwrap();
        let product = catalog.load_product(id).await.unwrap();
        let resource = &product.resources["data"];
        assert!(resource.published);
        assert_eq!(
            resource
                .location_at(&distribution_site)
                .map(|location| location.directory.as_path()),
            Some(Path::new("pub/pds"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protect_missing_product() {
        let (_dir, catalog) = test_utils::create_catalog("S1").await;

        assert_matches!(
            catalog.set_product_protected(ProductId::new(42), true).await,
            Err(Error::ProductNotFound(_))
        );
    }
}
