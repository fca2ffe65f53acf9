//! Moving files between sites.
//!
//! A [`Mover`] copies files from a source site to a destination site. Which implementation is
//! used depends on where the two sites live: sites on the same host copy through the local
//! filesystem, otherwise one of them has to be the distribution site and the files go over FTP.

mod ftp;
mod local;

pub use self::{
    ftp::{FtpConnector, FtpFailure, FtpReadMover, FtpSession, FtpWriteMover, SuppaFtpConnector},
    local::LocalMover,
};

#[cfg(test)]
pub(crate) use self::ftp::fake;

use crate::{config::SiteConfig, site::Site};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    io,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::net;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ftp error on {host}:{path} (code {code:?}): {message}")]
    Ftp {
        host: String,
        path: String,
        code: Option<u32>,
        message: String,
    },
    #[error("mover from {from} to {to} is read-only")]
    ReadOnly { from: String, to: String },
    #[error("no transport from {from} to {to}")]
    Unsupported { from: String, to: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MoverKind {
    /// Both sites share a filesystem.
    Local,
    /// Downloads from the distribution site.
    FtpRead,
    /// Uploads to the distribution site.
    FtpWrite,
}

/// Copies files from the source site to the destination site.
///
/// Paths are interpreted relative to the data root of the site they refer to; absolute paths
/// outside the data root are re-rooted into it. `exists`, `mkdirs` and `delete` act on the
/// remote side of the mover: the source of a download, the destination otherwise.
#[async_trait]
pub trait Mover: Send + Sync {
    fn kind(&self) -> MoverKind;

    fn source(&self) -> &Site;

    fn destination(&self) -> &Site;

    /// Copies a single file, creating the destination directories as needed.
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<(), Error>;

    /// Copies a directory tree, depth-first.
    async fn copy_directory(&self, from: &Path, to: &Path) -> Result<(), Error>;

    async fn exists(&self, path: &Path) -> Result<bool, Error>;

    async fn mkdirs(&self, path: &Path) -> Result<(), Error>;

    /// Deletes the file or directory tree. Returns whether it existed.
    async fn delete(&self, path: &Path) -> Result<bool, Error>;
}

/// Picks the mover for copying from `from` to `to`.
pub async fn select(from: &Site, to: &Site, config: &SiteConfig) -> Result<Box<dyn Mover>, Error> {
    select_with(from, to, config, Arc::new(SuppaFtpConnector)).await
}

/// Like [`select`] but the FTP movers open their sessions through `connector`.
pub async fn select_with(
    from: &Site,
    to: &Site,
    config: &SiteConfig,
    connector: Arc<dyn FtpConnector>,
) -> Result<Box<dyn Mover>, Error> {
    if same_host(&from.host, &to.host).await {
        return Ok(Box::new(LocalMover::new(from.clone(), to.clone())));
    }

    if from.name == config.distribution_site {
        Ok(Box::new(FtpReadMover::new(
            from.clone(),
            to.clone(),
            config.ftp.clone(),
            connector,
        )))
    } else if to.name == config.distribution_site {
        Ok(Box::new(FtpWriteMover::new(
            from.clone(),
            to.clone(),
            config.ftp.clone(),
            connector,
        )))
    } else {
        Err(Error::Unsupported {
            from: from.name.clone(),
            to: to.name.clone(),
        })
    }
}

/// Two host names are the same host if they are equal or resolve to a common address.
async fn same_host(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }

    let (Ok(a), Ok(b)) = (net::lookup_host((a, 0)).await, net::lookup_host((b, 0)).await) else {
        return false;
    };

    let a: HashSet<IpAddr> = a.map(|addr| addr.ip()).collect();
    b.map(|addr| addr.ip()).any(|addr| a.contains(&addr))
}
