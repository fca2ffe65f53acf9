//! Sites participating in the catalog.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

/// A named machine/data-directory pair.
///
/// Site names are case-sensitive and must match exactly across every component sharing the
/// catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub host: String,
    pub data_root: PathBuf,
}

impl Site {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            data_root: data_root.into(),
        }
    }

    /// Makes `path` absolute relative to this site's data root. Paths already under the data
    /// root keep their place in it; anything else is re-rooted there. `..` components are
    /// resolved but never climb above the root.
    pub fn absolute(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let path = path.strip_prefix(&self.data_root).unwrap_or(path);

        let mut absolute = self.data_root.clone();
        let mut depth = 0usize;

        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    absolute.push(part);
                    depth += 1;
                }
                Component::ParentDir if depth > 0 => {
                    absolute.pop();
                    depth -= 1;
                }
                Component::ParentDir
                | Component::Prefix(_)
                | Component::RootDir
                | Component::CurDir => (),
            }
        }

        absolute
    }

    /// Inverse of `absolute`: the path relative to the data root, as stored in location rows.
    pub fn relative(&self, path: impl AsRef<Path>) -> PathBuf {
        let absolute = self.absolute(path);

        match absolute.strip_prefix(&self.data_root) {
            Ok(relative) => relative.to_owned(),
            Err(_) => absolute,
        }
    }
}

/// Known sites by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteMap(BTreeMap<String, Site>);

impl SiteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: Site) -> Option<Site> {
        self.0.insert(site.name.clone(), site)
    }

    pub fn get(&self, name: &str) -> Option<&Site> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.0.values()
    }
}

impl FromIterator<Site> for SiteMap {
    fn from_iter<I: IntoIterator<Item = Site>>(iter: I) -> Self {
        let mut map = Self::new();

        for site in iter {
            map.insert(site);
        }

        map
    }
}
