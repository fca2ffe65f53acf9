//! Configuration of a catalog participant.

mod keys;
mod store;

pub use self::store::{ConfigEntry, ConfigError, ConfigKey, ConfigStore};

use crate::site::{Site, SiteMap};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Site identifier of the distribution site unless configured otherwise.
pub const DEFAULT_DISTRIBUTION_SITE: &str = "IS";

pub const DEFAULT_CLAIM_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TRANSFER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// FTP access to the distribution site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpConfig {
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            port: 21,
            user: "anonymous".to_owned(),
            password: String::new(),
        }
    }
}

/// Everything a component needs to know about where it runs. Passed explicitly to every
/// component constructor.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// The acting site.
    pub site: Site,
    /// Name of the distribution site.
    pub distribution_site: String,
    /// Other known sites.
    pub sites: SiteMap,
    pub ftp: FtpConfig,
    pub claim_poll_interval: Duration,
    pub transfer_poll_interval: Duration,
}

impl SiteConfig {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            distribution_site: DEFAULT_DISTRIBUTION_SITE.to_owned(),
            sites: SiteMap::new(),
            ftp: FtpConfig::default(),
            claim_poll_interval: DEFAULT_CLAIM_POLL_INTERVAL,
            transfer_poll_interval: DEFAULT_TRANSFER_POLL_INTERVAL,
        }
    }

    pub fn with_distribution_site(self, name: impl Into<String>) -> Self {
        Self {
            distribution_site: name.into(),
            ..self
        }
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.sites.insert(site);
        self
    }

    pub fn with_claim_poll_interval(self, interval: Duration) -> Self {
        Self {
            claim_poll_interval: interval,
            ..self
        }
    }

    pub fn with_transfer_poll_interval(self, interval: Duration) -> Self {
        Self {
            transfer_poll_interval: interval,
            ..self
        }
    }

    pub fn with_ftp(self, ftp: FtpConfig) -> Self {
        Self { ftp, ..self }
    }

    /// Whether the acting site is the distribution site.
    pub fn is_distribution_site(&self) -> bool {
        self.site.name == self.distribution_site
    }

    /// Looks up a site by name, including the acting one.
    pub fn site_named(&self, name: &str) -> Option<&Site> {
        if self.site.name == name {
            Some(&self.site)
        } else {
            self.sites.get(name)
        }
    }

    /// Identity recorded in the markers this process claims.
    pub fn claimant(&self) -> String {
        format!(
            "{}@{}:{}",
            self.site.name,
            self.site.host,
            std::process::id()
        )
    }

    /// Loads the configuration from the store. Only the site identity is mandatory.
    pub async fn load(store: &ConfigStore) -> Result<Self, ConfigError> {
        let site = store.entry(keys::SITE_KEY).load().await?;
        let distribution_site = store.entry(keys::DISTRIBUTION_SITE_KEY).load().await?;
        let sites = store.entry(keys::SITES_KEY).load().await?;
        let ftp = store.entry(keys::FTP_KEY).load().await?;
        let claim_poll_interval = store.entry(keys::CLAIM_POLL_INTERVAL_KEY).load().await?;
        let transfer_poll_interval = store.entry(keys::TRANSFER_POLL_INTERVAL_KEY).load().await?;

        Ok(Self {
            site,
            distribution_site,
            sites: sites.into_iter().collect(),
            ftp,
            claim_poll_interval: Duration::from_millis(claim_poll_interval),
            transfer_poll_interval: Duration::from_millis(transfer_poll_interval),
        })
    }

    pub async fn save(&self, store: &ConfigStore) -> Result<(), ConfigError> {
        let sites: Vec<_> = self.sites.iter().cloned().collect();

        store.entry(keys::SITE_KEY).store(&self.site).await?;
        store
            .entry(keys::DISTRIBUTION_SITE_KEY)
            .store(&self.distribution_site)
            .await?;
        store.entry(keys::SITES_KEY).store(&sites).await?;
        store.entry(keys::FTP_KEY).store(&self.ftp).await?;
        store
            .entry(keys::CLAIM_POLL_INTERVAL_KEY)
            .store(&(self.claim_poll_interval.as_millis() as u64))
            .await?;
        store
            .entry(keys::TRANSFER_POLL_INTERVAL_KEY)
            .store(&(self.transfer_poll_interval.as_millis() as u64))
            .await?;

        Ok(())
    }
}
