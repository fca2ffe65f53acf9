use chrono::{DateTime, TimeZone, Utc};
use granary::{Catalog, Pass, Product, ProductId, ProductType, Resource, Site, SiteConfig};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use tempfile::TempDir;
use tokio::{fs, sync::OnceCell};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the distribution site in every test environment.
pub(crate) const DISTRIBUTION_SITE: &str = "IS";

const SITES: &[&str] = &[DISTRIBUTION_SITE, "S1", "S2"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// Test environment: a single catalog shared by a few sites on the same host, each with its own
// data root.
pub(crate) struct Env {
    base_dir: TempDir,
    catalog: OnceCell<Catalog>,
    _span: tracing::span::EnteredSpan,
}

impl Env {
    pub fn new() -> Self {
        init_log();

        let span = tracing::info_span!("test", name = thread::current().name()).entered();

        Self {
            base_dir: TempDir::new().unwrap(),
            catalog: OnceCell::new(),
            _span: span,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.path().join("catalog.db")
    }

    pub fn site(&self, name: &str) -> Site {
        Site::new(name, "localhost", self.base_dir.path().join(name))
    }

    /// Catalog handle acting as the site `name`.
    pub async fn catalog(&self, name: &str) -> Catalog {
        let config = self.config(name);

        self.catalog
            .get_or_init(|| async {
                Catalog::create(self.db_path(), config.clone())
                    .await
                    .unwrap()
            })
            .await
            .with_config(config)
    }

    fn config(&self, name: &str) -> SiteConfig {
        SITES
            .iter()
            .filter(|other| **other != name)
            .fold(SiteConfig::new(self.site(name)), |config, other| {
                config.with_site(self.site(other))
            })
            .with_distribution_site(DISTRIBUTION_SITE)
            .with_claim_poll_interval(POLL_INTERVAL)
            .with_transfer_poll_interval(POLL_INTERVAL)
    }
}

/// 2024-05-01 at the given time.
pub(crate) fn at(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, min, 0).unwrap()
}

pub(crate) fn pass() -> Pass {
    Pass::new("gs-1", "aqua", at(10, 0), at(11, 0))
}

pub(crate) async fn register(catalog: &Catalog, names: &[&str]) {
    for name in names {
        catalog
            .register_product_type(&ProductType::new(*name))
            .await
            .unwrap();
    }
}

/// Writes a file under the site's data root and returns a resource pointing at it.
pub(crate) async fn write_resource(site: &Site, path: &str, content: &[u8]) -> Resource {
    write_file(site, path, content).await;
    Resource::at(site, path)
}

pub(crate) async fn write_file(site: &Site, path: impl AsRef<Path>, content: &[u8]) {
    let path = site.absolute(path);
    fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    fs::write(path, content).await.unwrap();
}

/// Stores a product of `product_type` starting at 10:`min` whose single resource is written to
/// the acting site.
pub(crate) async fn store_product(catalog: &Catalog, product_type: &str, min: u32) -> ProductId {
    let site = &catalog.config().site;
    let resource = write_resource(
        site,
        &format!("{product_type}/{product_type}.{min:02}.dat"),
        format!("{product_type} {min}").as_bytes(),
    )
    .await;

    catalog
        .store_product(
            &Product::new(product_type, pass(), at(10, min), at(10, min + 5))
                .with_resource("data", resource),
        )
        .await
        .unwrap()
}

pub(crate) fn init_log() {
    use tracing::metadata::LevelFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                // Only show the logs if explicitly enabled with the `RUST_LOG` env variable.
                .with_default_directive(LevelFilter::OFF.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .try_init()
        // error here most likely means the logger is already initialized. We can ignore that.
        .ok();
}
