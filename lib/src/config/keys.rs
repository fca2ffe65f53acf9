use super::{
    store::ConfigKey, FtpConfig, DEFAULT_CLAIM_POLL_INTERVAL, DEFAULT_DISTRIBUTION_SITE,
    DEFAULT_TRANSFER_POLL_INTERVAL,
};
use crate::site::Site;

pub(crate) const SITE_KEY: ConfigKey<Site> = ConfigKey::required(
    "site",
    "Identity of this site: its name in the catalog, the host it runs on and the root directory\n\
     all catalog paths of this site are relative to.",
);

pub(crate) const DISTRIBUTION_SITE_KEY: ConfigKey<String> = ConfigKey::with_default(
    "distribution_site",
    "Name of the central site from which published resources are served. Resources stored\n\
     while acting as this site are marked as published.",
    default_distribution_site,
);

pub(crate) const SITES_KEY: ConfigKey<Vec<Site>> = ConfigKey::with_default(
    "sites",
    "Other sites sharing the catalog. Needed to move files between sites.",
    Vec::new,
);

pub(crate) const FTP_KEY: ConfigKey<FtpConfig> = ConfigKey::with_default(
    "ftp",
    "Credentials for the FTP service of the distribution site.",
    FtpConfig::default,
);

pub(crate) const CLAIM_POLL_INTERVAL_KEY: ConfigKey<u64> = ConfigKey::with_default(
    "claim_poll_interval",
    "Milliseconds to sleep between scans when no work unit could be claimed.",
    default_claim_poll_interval,
);

pub(crate) const TRANSFER_POLL_INTERVAL_KEY: ConfigKey<u64> = ConfigKey::with_default(
    "transfer_poll_interval",
    "Milliseconds between checks of a pending file transfer.",
    default_transfer_poll_interval,
);

fn default_distribution_site() -> String {
    DEFAULT_DISTRIBUTION_SITE.to_owned()
}

fn default_claim_poll_interval() -> u64 {
    DEFAULT_CLAIM_POLL_INTERVAL.as_millis() as u64
}

fn default_transfer_poll_interval() -> u64 {
    DEFAULT_TRANSFER_POLL_INTERVAL.as_millis() as u64
}
