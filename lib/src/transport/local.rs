use super::{Error, Mover, MoverKind};
use crate::site::Site;
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;

/// Copies between two sites sharing a filesystem.
pub struct LocalMover {
    source: Site,
    destination: Site,
}

impl LocalMover {
    pub fn new(source: Site, destination: Site) -> Self {
        Self {
            source,
            destination,
        }
    }
}

#[async_trait]
impl Mover for LocalMover {
    fn kind(&self) -> MoverKind {
        MoverKind::Local
    }

    fn source(&self) -> &Site {
        &self.source
    }

    fn destination(&self) -> &Site {
        &self.destination
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let from = self.source.absolute(from);
        let to = self.destination.absolute(to);

        copy_file(&from, &to).await
    }

    async fn copy_directory(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let from = self.source.absolute(from);
        let to = self.destination.absolute(to);

        copy_directory(from, to).await
    }

    async fn exists(&self, path: &Path) -> Result<bool, Error> {
        let path = self.destination.absolute(path);
        fs::try_exists(&path).await.map_err(Error::io(path))
    }

    async fn mkdirs(&self, path: &Path) -> Result<(), Error> {
        let path = self.destination.absolute(path);
        fs::create_dir_all(&path).await.map_err(Error::io(path))
    }

    async fn delete(&self, path: &Path) -> Result<bool, Error> {
        let path = self.destination.absolute(path);

        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(Error::Io { path, source: error }),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        result.map_err(Error::io(path))?;

        Ok(true)
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), Error> {
    if from == to {
        return Ok(());
    }

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await.map_err(Error::io(parent))?;
    }

    fs::copy(from, to).await.map_err(Error::io(from))?;

    Ok(())
}

#[async_recursion]
async fn copy_directory(from: PathBuf, to: PathBuf) -> Result<(), Error> {
    fs::create_dir_all(&to).await.map_err(Error::io(&to))?;

    let mut entries = fs::read_dir(&from).await.map_err(Error::io(&from))?;

    while let Some(entry) = entries.next_entry().await.map_err(Error::io(&from))? {
        let file_type = entry.file_type().await.map_err(Error::io(entry.path()))?;
        let target = to.join(entry.file_name());

        if file_type.is_dir() {
            copy_directory(entry.path(), target).await?;
        } else {
            copy_file(&entry.path(), &target).await?;
        }
    }

    Ok(())
}
