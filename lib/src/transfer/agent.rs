use super::{
    queue::{self, TransferCommand, TransferStatus},
    TrackedFile,
};
use crate::{
    catalog::Catalog,
    error::{Error, Result},
    transport::{self, FtpConnector, Mover, MoverKind, SuppaFtpConnector},
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::instrument;

/// Carries out transfer commands on behalf of one site.
///
/// Commands destined to the agent's own site are pulled from another site holding the file: the
/// distribution site if it has it, otherwise any site on the same host. An agent of a site other
/// than the distribution site also pushes files it holds to the distribution site when that
/// requires an FTP upload, which the distribution site can't do for itself.
pub struct TransferAgent {
    catalog: Catalog,
    connector: Arc<dyn FtpConnector>,
}

enum Outcome {
    Completed(TransferStatus),
    /// Not ours to handle.
    Skipped,
}

impl TransferAgent {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_connector(catalog, Arc::new(SuppaFtpConnector))
    }

    pub fn with_connector(catalog: Catalog, connector: Arc<dyn FtpConnector>) -> Self {
        Self { catalog, connector }
    }

    /// Handles every pending command this site can handle. Returns the number of commands
    /// completed.
    #[instrument(skip(self), fields(site = %self.catalog.site_name()))]
    pub async fn process_pending(&self) -> Result<usize> {
        let commands = {
            let mut conn = self.catalog.pool().acquire().await?;
            queue::pending(&mut conn, None).await?
        };

        let mut completed = 0;

        for command in commands {
            let outcome = match self.process(&command).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(
                        transfer = %command.id,
                        error = %error.verbose(),
                        "transfer failed"
                    );

                    self.complete(&command, TransferStatus::Failure, None).await?;
                    Outcome::Completed(TransferStatus::Failure)
                }
            };

            if let Outcome::Completed(_) = outcome {
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Processes pending commands every `interval`, forever.
    pub async fn run(&self, interval: Duration) {
        loop {
            match self.process_pending().await {
                Ok(0) => (),
                Ok(count) => tracing::debug!(count, "transfers completed"),
                Err(error) => tracing::error!(error = %error.verbose(), "transfer pass failed"),
            }

            sleep(interval).await;
        }
    }

    async fn process(&self, command: &TransferCommand) -> Result<Outcome> {
        let config = self.catalog.config();
        let own = &config.site;

        let pull = command.site == own.name;
        let push = !pull
            && command.site == config.distribution_site
            && !config.is_distribution_site();

        if !pull && !push {
            return Ok(Outcome::Skipped);
        }

        let file = {
            let mut conn = self.catalog.pool().acquire().await?;
            command
                .table
                .load_file(&mut conn, command.row_id, &own.name)
                .await?
        };

        let Some(file) = file else {
            tracing::warn!(
                transfer = %command.id,
                table = command.table.as_str(),
                row_id = command.row_id,
                "transfer of unknown row"
            );
            self.complete(command, TransferStatus::Failure, None).await?;
            return Ok(Outcome::Completed(TransferStatus::Failure));
        };

        if file.location_at(&command.site).is_some() {
            self.complete(command, TransferStatus::Success, None).await?;
            return Ok(Outcome::Completed(TransferStatus::Success));
        }

        if pull {
            self.pull(command, &file).await
        } else {
            self.push(command, &file).await
        }
    }

    async fn pull(&self, command: &TransferCommand, file: &TrackedFile) -> Result<Outcome> {
        let config = self.catalog.config();
        let own = &config.site;

        let mut sources: Vec<_> = file.locations.iter().collect();
        sources.sort_by_key(|location| location.site != config.distribution_site);

        for location in sources {
            let Some(source) = config.site_named(&location.site) else {
                tracing::debug!(site = %location.site, "location on unknown site");
                continue;
            };

            let mover = match transport::select_with(source, own, config, self.connector.clone())
                .await
            {
                // Uploads have to be done on the source's host.
                Ok(mover) if mover.kind() != MoverKind::FtpWrite => mover,
                Ok(_) | Err(_) => continue,
            };

            self.copy(command, file, &location.directory, mover.as_ref())
                .await?;

            return Ok(Outcome::Completed(TransferStatus::Success));
        }

        Err(Error::NoReachableSource(file.name.clone()))
    }

    async fn push(&self, command: &TransferCommand, file: &TrackedFile) -> Result<Outcome> {
        let config = self.catalog.config();
        let own = &config.site;

        let Some(location) = file.location_at(&own.name) else {
            return Ok(Outcome::Skipped);
        };

        let destination = config
            .site_named(&command.site)
            .ok_or_else(|| Error::UnknownSite(command.site.clone()))?;

        let mover =
            transport::select_with(own, destination, config, self.connector.clone()).await?;

        // Same host: the distribution site's own agent pulls it.
        if mover.kind() != MoverKind::FtpWrite {
            return Ok(Outcome::Skipped);
        }

        self.copy(command, file, &location.directory, mover.as_ref())
            .await?;

        Ok(Outcome::Completed(TransferStatus::Success))
    }

    /// Copies the file into the same directory (relative to the data root) on the destination
    /// and completes the command.
    async fn copy(
        &self,
        command: &TransferCommand,
        file: &TrackedFile,
        directory: &Path,
        mover: &dyn Mover,
    ) -> Result<()> {
        let path = directory.join(&file.name);

        tracing::debug!(
            transfer = %command.id,
            from = %mover.source().name,
            to = %mover.destination().name,
            path = ?path,
            "copying"
        );

        mover.copy_file(&path, &path).await?;

        self.complete(command, TransferStatus::Success, Some(directory))
            .await
    }

    /// Completes the command, recording the new location first on success.
    async fn complete(
        &self,
        command: &TransferCommand,
        status: TransferStatus,
        directory: Option<&Path>,
    ) -> Result<()> {
        let mut tx = self.catalog.pool().begin_write().await?;

        if let Some(directory) = directory {
            let publish = command.site == self.catalog.config().distribution_site;

            command
                .table
                .add_location(&mut tx, command.row_id, &command.site, directory, publish)
                .await?;
        }

        queue::complete(&mut tx, command.id, status).await?;
        tx.commit().await?;

        Ok(())
    }
}
