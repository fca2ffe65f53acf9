use crate::{
    db,
    error::{Error, Result},
    geo::Footprint,
    marker::{self, MarkerId},
    pass::{self, PassId},
    product::{Product, ProductId},
    registry,
    resource::{self, Link},
    time,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(sqlx::FromRow)]
struct ProductRow {
    product_type: String,
    pass: PassId,
    start_time: i64,
    stop_time: i64,
    creation: i64,
    agent: Option<String>,
    #[sqlx(flatten)]
    footprint: Footprint,
    subproduct: Option<String>,
    algorithm: Option<String>,
    algorithm_version: Option<String>,
    has_thumbnails: bool,
    delete_protected: bool,
    marker_id: Option<MarkerId>,
}

/// Loads the product with everything hanging off it. Locations on `site` are reported as local.
pub(crate) async fn load(
    conn: &mut db::Connection,
    id: ProductId,
    site: &str,
) -> Result<Product> {
    let row: ProductRow = sqlx::query_as(
        "SELECT product_type, pass, start_time, stop_time, creation, agent,
                center_latitude, center_longitude, north_latitude,
                south_latitude, east_longitude, west_longitude,
                subproduct, algorithm, algorithm_version, has_thumbnails,
                delete_protected, marker_id
         FROM products WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(Error::ProductNotFound(id))?;

    let pass = pass::load(conn, row.pass).await?;
    let resources = resource::load_for_product(conn, id, site).await?;

    let thumbnails = if row.has_thumbnails {
        resource::load_linked(conn, Link::Thumbnail, id, site).await?
    } else {
        Vec::new()
    };

    let contributors = resource::load_linked(conn, Link::Contributor, id, site).await?;

    let ancestors: BTreeSet<ProductId> =
        sqlx::query_scalar::<_, ProductId>("SELECT ancestor FROM ancestors WHERE product = ?")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let attributes: BTreeMap<String, String> = if row.subproduct.is_some() {
        sqlx::query_as::<_, (String, String)>("SELECT name, value FROM attributes WHERE product = ?")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect()
    } else {
        BTreeMap::new()
    };

    let marker_id = match row.marker_id {
        Some(marker_id) => Some(marker_id),
        None => infer_marker(conn, id, row.algorithm.as_deref()).await?,
    };

    Ok(Product {
        id: Some(id),
        product_type: row.product_type,
        start_time: time::from_millis(row.start_time)?,
        stop_time: time::from_millis(row.stop_time)?,
        creation: time::from_millis(row.creation)?,
        pass,
        footprint: row.footprint,
        delete_protected: row.delete_protected,
        agent: row.agent,
        algorithm: row.algorithm,
        algorithm_version: row.algorithm_version,
        resources,
        thumbnails,
        contributors,
        ancestors,
        subproduct: row.subproduct,
        attributes,
        marker_id,
    })
}

// Products stored without an explicit marker inherit the marker their algorithm's claim group
// placed on one of their ancestors.
async fn infer_marker(
    conn: &mut db::Connection,
    id: ProductId,
    algorithm: Option<&str>,
) -> Result<Option<MarkerId>> {
    let Some(algorithm) = algorithm else {
        return Ok(None);
    };

    match registry::colony_for_algorithm(conn, algorithm).await? {
        Some(colony) => marker::find_in_ancestors(conn, id, &colony).await,
        None => {
            tracing::warn!(product = %id, algorithm, "no claim group mapped to algorithm");
            Ok(None)
        }
    }
}

pub(super) async fn find_controlling_marker(
    conn: &mut db::Connection,
    id: ProductId,
) -> Result<Option<MarkerId>> {
    let algorithm: Option<String> =
        sqlx::query_scalar::<_, Option<String>>("SELECT algorithm FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(Error::ProductNotFound(id))?;

    let colony = match &algorithm {
        Some(algorithm) => registry::colony_for_algorithm(conn, algorithm).await?,
        None => None,
    };

    if let Some(colony) = colony {
        return marker::find_in_ancestors(conn, id, &colony).await;
    }

    let has_ancestors = sqlx::query("SELECT 0 FROM ancestors WHERE product = ? LIMIT 1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();

    if has_ancestors {
        Err(Error::MissingGroupMapping {
            algorithm: algorithm.unwrap_or_default(),
            product: id,
        })
    } else {
        Ok(None)
    }
}
