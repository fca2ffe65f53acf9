//! Localizing catalog-tracked files through the pending-transfer queue.
//!
//! A site wanting a file it doesn't have submits a transfer command and waits until a
//! [`TransferAgent`] (usually running in another process) completes it. The queue lives in the
//! catalog, so requests survive crashes of either side.

mod agent;
mod queue;

pub use self::{
    agent::TransferAgent,
    queue::{TransferCommand, TransferId, TransferStatus, TransferTable},
};

use crate::{
    ancillary::{self, AncillaryId},
    catalog::Catalog,
    db,
    error::{Error, Result},
    product::Product,
    resource::{self, Location, Resource, ResourceId},
    time,
};
use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tracing::instrument;

/// Submits transfer commands and waits for their completion.
#[derive(Clone)]
pub struct TransferCoordinator {
    catalog: Catalog,
}

impl TransferCoordinator {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Requests the row's file to be copied to `site`.
    pub async fn submit(&self, table: TransferTable, row_id: i64, site: &str) -> Result<TransferId> {
        let mut tx = self.catalog.pool().begin_write().await?;
        let id = queue::submit(&mut tx, table, row_id, site).await?;
        tx.commit().await?;

        tracing::debug!(%id, table = table.as_str(), row_id, site, "transfer submitted");

        Ok(id)
    }

    pub async fn status(&self, id: TransferId) -> Result<Option<TransferStatus>> {
        let mut conn = self.catalog.pool().acquire().await?;
        queue::status(&mut conn, id).await
    }

    /// Polls the command until it's completed. There is no deadline; wrap in a timeout if
    /// needed.
    pub async fn wait(&self, id: TransferId) -> Result<TransferStatus> {
        loop {
            match self.status(id).await? {
                Some(TransferStatus::Pending) => {
                    sleep(self.catalog.config().transfer_poll_interval).await
                }
                Some(status) => return Ok(status),
                None => return Err(Error::TransferFailed(id)),
            }
        }
    }

    /// Makes the resource present on the acting site and returns its local path.
    #[instrument(skip(self))]
    pub async fn localize_resource(&self, id: ResourceId) -> Result<PathBuf> {
        let resource = self.localized_resource(id).await?;
        let site = &self.catalog.config().site;

        resource.local_path(site).ok_or(Error::MalformedData)
    }

    /// Localizes every resource of the product that isn't local yet and updates the product's
    /// locations accordingly.
    #[instrument(skip_all, fields(product = ?product.id))]
    pub async fn localize_product(&self, product: &mut Product) -> Result<()> {
        for resource in product.resources.values_mut() {
            if resource.is_local() {
                continue;
            }

            let id = resource.id.ok_or(Error::MalformedData)?;
            *resource = self.localized_resource(id).await?;
        }

        Ok(())
    }

    /// Makes the ancillary file present on the acting site and returns its local path.
    #[instrument(skip(self))]
    pub async fn localize_ancillary(&self, id: AncillaryId) -> Result<PathBuf> {
        let site = &self.catalog.config().site;

        if let Some(path) = self
            .load_ancillary(id)
            .await?
            .and_then(|ancillary| ancillary.local_path(site))
        {
            return Ok(path);
        }

        let transfer = self
            .submit(TransferTable::Ancillaries, id.get(), &site.name)
            .await?;
        self.expect_success(transfer).await?;

        self.load_ancillary(id)
            .await?
            .and_then(|ancillary| ancillary.local_path(site))
            .ok_or(Error::TransferFailed(transfer))
    }

    async fn localized_resource(&self, id: ResourceId) -> Result<Resource> {
        let resource = self.load_resource(id).await?.ok_or(Error::MalformedData)?;

        if resource.is_local() {
            return Ok(resource);
        }

        let site = self.catalog.site_name();
        let transfer = self
            .submit(TransferTable::Resources, id.get(), site)
            .await?;
        self.expect_success(transfer).await?;

        self.load_resource(id)
            .await?
            .filter(Resource::is_local)
            .ok_or(Error::TransferFailed(transfer))
    }

    async fn expect_success(&self, transfer: TransferId) -> Result<()> {
        match self.wait(transfer).await? {
            TransferStatus::Success => Ok(()),
            TransferStatus::Pending | TransferStatus::Failure => {
                Err(Error::TransferFailed(transfer))
            }
        }
    }

    async fn load_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        let mut conn = self.catalog.pool().acquire().await?;
        resource::load(&mut conn, id, self.catalog.site_name()).await
    }

    async fn load_ancillary(&self, id: AncillaryId) -> Result<Option<ancillary::Ancillary>> {
        let mut conn = self.catalog.pool().acquire().await?;
        ancillary::load(&mut conn, id, self.catalog.site_name()).await
    }
}

/// A file referred to by a transfer command, with every location it's known at.
struct TrackedFile {
    name: String,
    locations: Vec<Location>,
}

impl TrackedFile {
    fn location_at(&self, site: &str) -> Option<&Location> {
        self.locations.iter().find(|location| location.site == site)
    }
}

impl TransferTable {
    async fn load_file(
        self,
        conn: &mut db::Connection,
        row_id: i64,
        site: &str,
    ) -> Result<Option<TrackedFile>> {
        Ok(match self {
            Self::Resources => resource::load(conn, ResourceId::new(row_id), site)
                .await?
                .map(|resource| TrackedFile {
                    locations: resource.locations().cloned().collect(),
                    name: resource.name,
                }),
            Self::Ancillaries => ancillary::load(conn, AncillaryId::new(row_id), site)
                .await?
                .map(|ancillary| TrackedFile {
                    locations: ancillary.locations().cloned().collect(),
                    name: ancillary.name,
                }),
        })
    }

    async fn add_location(
        self,
        conn: &mut db::Connection,
        row_id: i64,
        site: &str,
        directory: &Path,
        publish: bool,
    ) -> Result<()> {
        match self {
            Self::Resources => {
                let id = ResourceId::new(row_id);
                resource::insert_location(conn, id, site, directory, time::now()).await?;

                if publish {
                    resource::set_published(conn, id).await?;
                }
            }
            Self::Ancillaries => {
                ancillary::insert_location(
                    conn,
                    AncillaryId::new(row_id),
                    site,
                    directory,
                    time::now(),
                )
                .await?;
            }
        }

        Ok(())
    }
}
