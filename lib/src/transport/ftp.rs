//! Movers talking FTP to the distribution site.

use super::{Error, Mover, MoverKind};
use crate::{config::FtpConfig, site::Site};
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use suppaftp::{types::FileType, FtpError, FtpStream};
use tokio::{fs, task};

/// Reply code of a request for a file or directory that doesn't exist (or can't be accessed).
const FILE_UNAVAILABLE: u32 = 550;

/// Failure reported by an FTP session: the server's reply code, if there was a reply.
#[derive(Debug)]
pub struct FtpFailure {
    pub code: Option<u32>,
    pub message: String,
}

impl FtpFailure {
    pub fn new(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn is_unavailable(&self) -> bool {
        self.code == Some(FILE_UNAVAILABLE)
    }
}

impl From<FtpError> for FtpFailure {
    fn from(error: FtpError) -> Self {
        let code = match &error {
            FtpError::UnexpectedResponse(response) => Some(response.status.code()),
            _ => None,
        };

        Self::new(code, error.to_string())
    }
}

impl From<io::Error> for FtpFailure {
    fn from(error: io::Error) -> Self {
        Self::new(None, error.to_string())
    }
}

impl fmt::Display for FtpFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Blocking FTP session. All paths are absolute.
pub trait FtpSession: Send {
    fn cwd(&mut self, path: &str) -> Result<(), FtpFailure>;

    fn mkdir(&mut self, path: &str) -> Result<(), FtpFailure>;

    /// Names of the entries of the directory.
    fn list(&mut self, path: &str) -> Result<Vec<String>, FtpFailure>;

    fn retrieve(&mut self, path: &str, to: &mut dyn Write) -> Result<u64, FtpFailure>;

    fn store(&mut self, path: &str, from: &mut dyn Read) -> Result<u64, FtpFailure>;

    fn remove_file(&mut self, path: &str) -> Result<(), FtpFailure>;

    fn remove_dir(&mut self, path: &str) -> Result<(), FtpFailure>;
}

/// Opens FTP sessions.
pub trait FtpConnector: Send + Sync {
    fn connect(&self, host: &str, config: &FtpConfig) -> Result<Box<dyn FtpSession>, FtpFailure>;
}

/// Connects with `suppaftp`, in binary mode.
pub struct SuppaFtpConnector;

impl FtpConnector for SuppaFtpConnector {
    fn connect(&self, host: &str, config: &FtpConfig) -> Result<Box<dyn FtpSession>, FtpFailure> {
        let mut stream = FtpStream::connect((host, config.port))?;
        stream.login(&config.user, &config.password)?;
        stream.transfer_type(FileType::Binary)?;

        Ok(Box::new(stream))
    }
}

impl FtpSession for FtpStream {
    fn cwd(&mut self, path: &str) -> Result<(), FtpFailure> {
        Ok(FtpStream::cwd(self, path)?)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FtpFailure> {
        Ok(FtpStream::mkdir(self, path)?)
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, FtpFailure> {
        Ok(self.nlst(Some(path))?)
    }

    fn retrieve(&mut self, path: &str, to: &mut dyn Write) -> Result<u64, FtpFailure> {
        Ok(self.retr(path, |reader| {
            io::copy(reader, &mut *to).map_err(FtpError::ConnectionError)
        })?)
    }

    fn store(&mut self, path: &str, mut from: &mut dyn Read) -> Result<u64, FtpFailure> {
        Ok(self.put_file(path, &mut from)?)
    }

    fn remove_file(&mut self, path: &str) -> Result<(), FtpFailure> {
        Ok(self.rm(path)?)
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), FtpFailure> {
        Ok(self.rmdir(path)?)
    }
}

/// A lazily connected session to the distribution site, shared by the operations of one mover.
/// Session calls run on the blocking thread pool.
#[derive(Clone)]
struct FtpClient {
    site: Site,
    config: FtpConfig,
    connector: Arc<dyn FtpConnector>,
    session: Arc<Mutex<Option<Box<dyn FtpSession>>>>,
}

impl FtpClient {
    fn new(site: Site, config: FtpConfig, connector: Arc<dyn FtpConnector>) -> Self {
        Self {
            site,
            config,
            connector,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Path on the server: absolute, relative to the site's data root, `/` separated.
    fn remote_path(&self, path: &Path) -> String {
        let parts: Vec<_> = self
            .site
            .absolute(path)
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        format!("/{}", parts.join("/"))
    }

    async fn run<T, F>(&self, path: &str, op: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn FtpSession) -> Result<T, FtpFailure> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.clone();

        let result = task::spawn_blocking(move || {
            let mut guard = client
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let session = match guard.take() {
                Some(session) => session,
                None => client.connector.connect(&client.site.host, &client.config)?,
            };
            let session = guard.insert(session);

            let result = op(session.as_mut());

            // No reply code means the connection itself failed. Reconnect next time.
            if matches!(&result, Err(failure) if failure.code.is_none()) {
                *guard = None;
            }

            result
        })
        .await
        .unwrap_or_else(|error| Err(FtpFailure::new(None, error.to_string())));

        result.map_err(|failure| Error::Ftp {
            host: self.site.host.clone(),
            path: path.to_owned(),
            code: failure.code,
            message: failure.message,
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool, Error> {
        let path = self.remote_path(path);
        let (parent, name) = split(&path);

        self.run(&path, move |session| {
            let entries = match session.list(&parent) {
                Ok(entries) => entries,
                Err(failure) if failure.is_unavailable() => return Ok(false),
                Err(failure) => return Err(failure),
            };

            Ok(entries.iter().any(|entry| entry_name(entry) == name))
        })
        .await
    }
}

/// Downloads from the distribution site into a site on another host. Can't modify the
/// distribution site.
pub struct FtpReadMover {
    destination: Site,
    client: FtpClient,
}

impl FtpReadMover {
    pub fn new(
        source: Site,
        destination: Site,
        config: FtpConfig,
        connector: Arc<dyn FtpConnector>,
    ) -> Self {
        Self {
            destination,
            client: FtpClient::new(source, config, connector),
        }
    }

    fn read_only(&self) -> Error {
        Error::ReadOnly {
            from: self.client.site.name.clone(),
            to: self.destination.name.clone(),
        }
    }
}

#[async_trait]
impl Mover for FtpReadMover {
    fn kind(&self) -> MoverKind {
        MoverKind::FtpRead
    }

    fn source(&self) -> &Site {
        &self.client.site
    }

    fn destination(&self) -> &Site {
        &self.destination
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let from = self.client.remote_path(from);
        let to = self.destination.absolute(to);

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await.map_err(Error::io(parent))?;
        }

        let mut file = fs::File::create(&to)
            .await
            .map_err(Error::io(&to))?
            .into_std()
            .await;

        let remote = from.clone();
        let result = self
            .client
            .run(&from, move |session| {
                session.retrieve(&remote, &mut file)?;
                file.flush()?;
                Ok(())
            })
            .await;

        if result.is_err() {
            // Don't leave a truncated file behind.
            fs::remove_file(&to).await.ok();
        }

        result
    }

    async fn copy_directory(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let from = self.client.remote_path(from);
        let to = self.destination.absolute(to);

        let remote = from.clone();
        self.client
            .run(&from, move |session| retrieve_tree(session, &remote, &to))
            .await
    }

    async fn exists(&self, path: &Path) -> Result<bool, Error> {
        self.client.exists(path).await
    }

    async fn mkdirs(&self, _path: &Path) -> Result<(), Error> {
        Err(self.read_only())
    }

    async fn delete(&self, _path: &Path) -> Result<bool, Error> {
        Err(self.read_only())
    }
}

/// Uploads from a site on another host to the distribution site.
pub struct FtpWriteMover {
    source: Site,
    client: FtpClient,
}

impl FtpWriteMover {
    pub fn new(
        source: Site,
        destination: Site,
        config: FtpConfig,
        connector: Arc<dyn FtpConnector>,
    ) -> Self {
        Self {
            source,
            client: FtpClient::new(destination, config, connector),
        }
    }

    async fn upload_file(&self, from: PathBuf, to: PathBuf) -> Result<(), Error> {
        if let Some(parent) = to.parent() {
            self.mkdirs(parent).await?;
        }

        let mut file = fs::File::open(&from)
            .await
            .map_err(Error::io(&from))?
            .into_std()
            .await;

        let remote = self.client.remote_path(&to);
        let path = remote.clone();

        self.client
            .run(&path, move |session| {
                session.store(&remote, &mut file)?;
                Ok(())
            })
            .await
    }

    #[async_recursion]
    async fn upload_tree(&self, from: PathBuf, to: PathBuf) -> Result<(), Error> {
        self.mkdirs(&to).await?;

        let mut entries = fs::read_dir(&from).await.map_err(Error::io(&from))?;

        while let Some(entry) = entries.next_entry().await.map_err(Error::io(&from))? {
            let file_type = entry.file_type().await.map_err(Error::io(entry.path()))?;
            let target = to.join(entry.file_name());

            if file_type.is_dir() {
                self.upload_tree(entry.path(), target).await?;
            } else {
                self.upload_file(entry.path(), target).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Mover for FtpWriteMover {
    fn kind(&self) -> MoverKind {
        MoverKind::FtpWrite
    }

    fn source(&self) -> &Site {
        &self.source
    }

    fn destination(&self) -> &Site {
        &self.client.site
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<(), Error> {
        self.upload_file(self.source.absolute(from), to.to_owned())
            .await
    }

    async fn copy_directory(&self, from: &Path, to: &Path) -> Result<(), Error> {
        self.upload_tree(self.source.absolute(from), to.to_owned())
            .await
    }

    async fn exists(&self, path: &Path) -> Result<bool, Error> {
        self.client.exists(path).await
    }

    async fn mkdirs(&self, path: &Path) -> Result<(), Error> {
        let path = self.client.remote_path(path);
        let target = path.clone();

        self.client
            .run(&path, move |session| {
                if session.cwd(&target).is_ok() {
                    return Ok(());
                }

                let mut prefix = String::new();

                for segment in target.split('/').filter(|segment| !segment.is_empty()) {
                    prefix.push('/');
                    prefix.push_str(segment);

                    if session.cwd(&prefix).is_err() {
                        session.mkdir(&prefix)?;
                    }
                }

                Ok(())
            })
            .await
    }

    async fn delete(&self, path: &Path) -> Result<bool, Error> {
        if !self.client.exists(path).await? {
            return Ok(false);
        }

        let path = self.client.remote_path(path);
        let target = path.clone();

        self.client
            .run(&path, move |session| {
                remove_tree(session, &target)?;
                Ok(true)
            })
            .await
    }
}

fn retrieve_tree(
    session: &mut dyn FtpSession,
    remote: &str,
    local: &Path,
) -> Result<(), FtpFailure> {
    std::fs::create_dir_all(local)?;

    for entry in session.list(remote)? {
        let name = entry_name(&entry).to_owned();
        let remote_entry = format!("{}/{}", remote.trim_end_matches('/'), name);
        let local_entry = local.join(&name);

        if session.cwd(&remote_entry).is_ok() {
            retrieve_tree(session, &remote_entry, &local_entry)?;
        } else {
            let mut file = File::create(&local_entry)?;
            session.retrieve(&remote_entry, &mut file)?;
            file.flush()?;
        }
    }

    Ok(())
}

fn remove_tree(session: &mut dyn FtpSession, remote: &str) -> Result<(), FtpFailure> {
    if session.cwd(remote).is_err() {
        return session.remove_file(remote);
    }

    for entry in session.list(remote)? {
        let entry = format!("{}/{}", remote.trim_end_matches('/'), entry_name(&entry));
        remove_tree(session, &entry)?;
    }

    // Can't remove the working directory on some servers.
    session.cwd("/")?;
    session.remove_dir(remote)
}

/// Splits an absolute remote path into its parent directory and the final name.
fn split(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_owned(), name.to_owned()),
        Some((parent, name)) => (parent.to_owned(), name.to_owned()),
        None => ("/".to_owned(), path.to_owned()),
    }
}

/// Servers differ in whether listings contain bare names or full paths.
fn entry_name(entry: &str) -> &str {
    entry.rsplit('/').next().unwrap_or(entry)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Session against a local directory standing in for the server's root.
    pub(crate) struct FakeSession {
        root: PathBuf,
    }

    impl FakeSession {
        fn local(&self, path: &str) -> PathBuf {
            self.root.join(path.trim_start_matches('/'))
        }
    }

    fn unavailable(error: io::Error) -> FtpFailure {
        FtpFailure::new(Some(FILE_UNAVAILABLE), error.to_string())
    }

    impl FtpSession for FakeSession {
        fn cwd(&mut self, path: &str) -> Result<(), FtpFailure> {
            if self.local(path).is_dir() {
                Ok(())
            } else {
                Err(FtpFailure::new(Some(FILE_UNAVAILABLE), "not a directory"))
            }
        }

        fn mkdir(&mut self, path: &str) -> Result<(), FtpFailure> {
            std::fs::create_dir(self.local(path)).map_err(unavailable)
        }

        fn list(&mut self, path: &str) -> Result<Vec<String>, FtpFailure> {
            let mut names: Vec<_> = std::fs::read_dir(self.local(path))
                .map_err(unavailable)?
                .filter_map(|entry| entry.ok())
                .map(|entry| format!("{}/{}", path, entry.file_name().to_string_lossy()))
                .collect();
            names.sort();

            Ok(names)
        }

        fn retrieve(&mut self, path: &str, to: &mut dyn Write) -> Result<u64, FtpFailure> {
            let mut file = File::open(self.local(path)).map_err(unavailable)?;
            Ok(io::copy(&mut file, to)?)
        }

        fn store(&mut self, path: &str, from: &mut dyn Read) -> Result<u64, FtpFailure> {
            let mut file = File::create(self.local(path)).map_err(unavailable)?;
            Ok(io::copy(from, &mut file)?)
        }

        fn remove_file(&mut self, path: &str) -> Result<(), FtpFailure> {
            std::fs::remove_file(self.local(path)).map_err(unavailable)
        }

        fn remove_dir(&mut self, path: &str) -> Result<(), FtpFailure> {
            std::fs::remove_dir(self.local(path)).map_err(unavailable)
        }
    }

    pub(crate) struct FakeConnector {
        pub root: PathBuf,
    }

    impl FtpConnector for FakeConnector {
        fn connect(
            &self,
            _host: &str,
            _config: &FtpConfig,
        ) -> Result<Box<dyn FtpSession>, FtpFailure> {
            Ok(Box::new(FakeSession {
                root: self.root.clone(),
            }))
        }
    }
}
