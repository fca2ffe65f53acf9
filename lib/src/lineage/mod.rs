//! Storing, loading and removing products together with everything hanging off them.

mod load;
mod remove;
mod store;
#[cfg(test)]
mod tests;

pub(crate) use self::load::load;

use crate::{
    catalog::Catalog,
    error::Result,
    marker::MarkerId,
    pass::PassId,
    product::{Product, ProductId},
    transport::Mover,
};
use tracing::instrument;

impl Catalog {
    /// Stores the product with its resources, thumbnails, contributors, ancestry and attributes.
    /// The pass is stored as well unless it already exists. Resources are published when the
    /// acting site is the distribution site.
    #[instrument(skip_all, fields(product_type = %product.product_type))]
    pub async fn store_product(&self, product: &Product) -> Result<ProductId> {
        let mut tx = self.pool().begin_write().await?;
        let id = store::store(
            &mut tx,
            product,
            self.site_name(),
            self.config().is_distribution_site(),
        )
        .await?;
        tx.commit().await?;

        Ok(id)
    }

    pub async fn load_product(&self, id: ProductId) -> Result<Product> {
        let mut tx = self.pool().begin_read().await?;
        load::load(&mut tx, id, self.site_name()).await
    }

    /// Removes the given products and, transitively, every product derived from them.
    ///
    /// Refuses to remove anything if one of the affected products is delete protected. Passes
    /// left without products are removed as well. When a `mover` is given, the distribution site
    /// copies of the removed resources are deleted through it after the removal is committed. A
    /// failed file delete doesn't stop the remaining ones; the first such error is returned.
    /// Returns the removed ids, descendants before their ancestors.
    #[instrument(skip(self, mover))]
    pub async fn remove_products(
        &self,
        ids: &[ProductId],
        mover: Option<&dyn Mover>,
    ) -> Result<Vec<ProductId>> {
        let mut tx = self.pool().begin_write().await?;
        let removal = remove::remove(&mut tx, ids, &self.config().distribution_site).await?;
        tx.commit().await?;

        let Some(mover) = mover else {
            return Ok(removal.products);
        };

        let mut first_error = None;

        for path in &removal.published_files {
            match mover.delete(path).await {
                Ok(true) => tracing::debug!(?path, "deleted published file"),
                Ok(false) => (),
                Err(error) => {
                    tracing::warn!(?path, ?error, "failed to delete published file");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(removal.products),
        }
    }

    /// Marker of the claim group that owns `id`: the group its algorithm maps to, looked up on
    /// the product's ancestors.
    pub async fn find_controlling_marker(&self, id: ProductId) -> Result<Option<MarkerId>> {
        let mut conn = self.pool().acquire().await?;
        load::find_controlling_marker(&mut conn, id).await
    }

    /// Products of the pass that weren't derived from any other product. These are the
    /// starting points when a pass is reprocessed.
    pub async fn root_products_of_pass(&self, pass: PassId) -> Result<Vec<ProductId>> {
        let mut conn = self.pool().acquire().await?;

        Ok(sqlx::query_scalar(
            "SELECT id FROM products p
             WHERE pass = ?
               AND NOT EXISTS (SELECT 1 FROM ancestors a WHERE a.product = p.id)
             ORDER BY id",
        )
        .bind(pass)
        .fetch_all(&mut *conn)
        .await?)
    }

    /// Removes the product (and its descendants) if it has no resources left. Returns whether it
    /// was removed.
    pub async fn check_product_resources(&self, id: ProductId) -> Result<bool> {
        let mut tx = self.pool().begin_write().await?;

        if crate::resource::count_for_product(&mut tx, id).await? > 0 {
            return Ok(false);
        }

        tracing::debug!(product = %id, "removing product without resources");

        let removal = remove::remove(&mut tx, &[id], &self.config().distribution_site).await?;
        tx.commit().await?;

        Ok(!removal.products.is_empty())
    }
}
