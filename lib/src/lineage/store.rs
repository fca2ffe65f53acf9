use crate::{
    db,
    error::{Error, Result},
    pass,
    product::{Product, ProductId},
    registry,
    resource::{self, Link},
    time,
};

pub(super) async fn store(
    conn: &mut db::Connection,
    product: &Product,
    site: &str,
    published: bool,
) -> Result<ProductId> {
    if product.resources.is_empty() {
        return Err(Error::NoResources);
    }

    if !registry::product_type_exists(conn, &product.product_type).await? {
        return Err(Error::UnknownProductType(product.product_type.clone()));
    }

    let pass_id = pass::store(conn, &product.pass).await?;

    let id = ProductId::new(
        sqlx::query(
            "INSERT INTO products
                 (product_type, pass, start_time, stop_time, creation, agent,
                  center_latitude, center_longitude, north_latitude,
                  south_latitude, east_longitude, west_longitude,
                  subproduct, algorithm, algorithm_version, has_thumbnails,
                  delete_protected, marker_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&product.product_type)
        .bind(pass_id)
        .bind(time::to_millis(product.start_time))
        .bind(time::to_millis(product.stop_time))
        .bind(time::to_millis(product.creation))
        .bind(&product.agent)
        .bind(product.footprint.center_latitude)
        .bind(product.footprint.center_longitude)
        .bind(product.footprint.north_latitude)
        .bind(product.footprint.south_latitude)
        .bind(product.footprint.east_longitude)
        .bind(product.footprint.west_longitude)
        .bind(&product.subproduct)
        .bind(&product.algorithm)
        .bind(&product.algorithm_version)
        .bind(!product.thumbnails.is_empty())
        .bind(product.delete_protected)
        .bind(product.marker_id)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid(),
    );

    for (key, resource) in &product.resources {
        resource::insert(conn, Some(id), Some(key), resource, site, published).await?;
    }

    for thumbnail in &product.thumbnails {
        let resource_id = resource::insert(conn, None, None, thumbnail, site, published).await?;
        resource::link(conn, Link::Thumbnail, id, resource_id).await?;
    }

    // Contributors may already be tracked (shared by several products).
    for contributor in &product.contributors {
        let resource_id = match contributor.id {
            Some(resource_id) => resource_id,
            None => resource::insert(conn, None, None, contributor, site, published).await?,
        };

        resource::link(conn, Link::Contributor, id, resource_id).await?;
    }

    for ancestor in &product.ancestors {
        sqlx::query("INSERT INTO ancestors (product, ancestor) VALUES (?, ?)")
            .bind(id)
            .bind(ancestor)
            .execute(&mut *conn)
            .await?;
    }

    for (name, value) in &product.attributes {
        sqlx::query("INSERT INTO attributes (product, name, value) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }

    Ok(id)
}
