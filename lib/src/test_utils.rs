use crate::{
    catalog::Catalog,
    config::SiteConfig,
    pass::Pass,
    product::{Product, ProductId},
    registry::ProductType,
    resource::Resource,
    site::Site,
};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tempfile::TempDir;

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

/// Creates a catalog in a temporary directory, acting as the site `name` whose data root is a
/// subdirectory of the same temporary directory.
pub(crate) async fn create_catalog(name: &str) -> (TempDir, Catalog) {
    init_log();

    let dir = TempDir::new().unwrap();
    let config = SiteConfig::new(Site::new(name, "localhost", dir.path().join(name)))
        .with_claim_poll_interval(Duration::from_millis(20))
        .with_transfer_poll_interval(Duration::from_millis(20));
    let catalog = Catalog::create(dir.path().join("catalog.db"), config)
        .await
        .unwrap();

    (dir, catalog)
}

/// 2024-05-01 at the given time.
pub(crate) fn at(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, min, 0).unwrap()
}

pub(crate) fn pass() -> Pass {
    Pass::new("gs-1", "aqua", at(10, 0), at(10, 12))
}

/// Product of `product_type` starting at 10:`min` with a single local resource named after it.
pub(crate) fn product(catalog: &Catalog, product_type: &str, min: u32) -> Product {
    let name = format!("{product_type}.{min:02}.dat");

    Product::new(product_type, pass(), at(10, min), at(10, min + 5)).with_resource(
        "data",
        Resource::at(&catalog.config().site, format!("{product_type}/{name}")),
    )
}

pub(crate) async fn register(catalog: &Catalog, names: &[&str]) {
    for name in names {
        catalog
            .register_product_type(&ProductType::new(*name))
            .await
            .unwrap();
    }
}

pub(crate) async fn store(catalog: &Catalog, product: Product) -> ProductId {
    catalog.store_product(&product).await.unwrap()
}
