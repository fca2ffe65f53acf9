//! Catalog queries of the claim protocol.

use crate::{db, error::Result, product::ProductId};

/// A product has a ready resource if at least one of its resources is published or present on
/// the acting site. Expects the site bound at the single `?`.
fn ready(product: &str) -> String {
    format!(
        "EXISTS (
             SELECT 1 FROM resources r
             WHERE r.product = {product}
               AND (r.published = 1
                    OR EXISTS (SELECT 1 FROM resource_sites rs
                               WHERE rs.resource = r.id AND rs.site = ?))
         )"
    )
}

/// Products of `product_type` not claimed by `group` yet and with a ready resource, oldest
/// first.
pub(super) async fn candidates(
    conn: &mut db::Connection,
    product_type: &str,
    group: &str,
    site: &str,
) -> Result<Vec<(i64, ProductId)>> {
    Ok(sqlx::query_as(&format!(
        "SELECT p.start_time, p.id FROM products p
         WHERE p.product_type = ?
           AND NOT EXISTS (SELECT 1 FROM markers m WHERE m.product = p.id AND m.colony = ?)
           AND {}
         ORDER BY p.start_time, p.id",
        ready("p.id")
    ))
    .bind(product_type)
    .bind(group)
    .bind(site)
    .fetch_all(&mut *conn)
    .await?)
}

/// Product of `product_type` covering the same granule (same pass and start time) as `main`.
pub(super) async fn companion(
    conn: &mut db::Connection,
    main: ProductId,
    product_type: &str,
    site: &str,
) -> Result<Option<ProductId>> {
    Ok(sqlx::query_scalar(&format!(
        "SELECT c.id FROM products c
         JOIN products p ON p.id = ?
         WHERE c.product_type = ?
           AND c.pass = p.pass
           AND c.start_time = p.start_time
           AND c.id <> p.id
           AND {}
         ORDER BY c.id
         LIMIT 1",
        ready("c.id")
    ))
    .bind(main)
    .bind(product_type)
    .bind(site)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Time span and spacecraft of a product, in catalog milliseconds.
#[derive(sqlx::FromRow)]
pub(super) struct Granule {
    pub product_type: String,
    pub start_time: i64,
    pub stop_time: i64,
    pub spacecraft: String,
}

pub(super) async fn granule(conn: &mut db::Connection, id: ProductId) -> Result<Option<Granule>> {
    Ok(sqlx::query_as(
        "SELECT p.product_type, p.start_time, p.stop_time, ps.spacecraft
         FROM products p
         JOIN passes ps ON ps.id = p.pass
         WHERE p.id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?)
}

#[derive(Clone, Copy)]
pub(super) enum Direction {
    Previous,
    Next,
}

/// The neighbor `slot` granules before or after `main`. A previous neighbor's start time must
/// lie within half a granule of `start - slot * duration`, a next neighbor's stop time within
/// half a granule of `stop + slot * duration`.
pub(super) async fn neighbor(
    conn: &mut db::Connection,
    main: ProductId,
    granule: &Granule,
    direction: Direction,
    slot: u32,
    duration: i64,
    site: &str,
) -> Result<Option<ProductId>> {
    let column = match direction {
        Direction::Previous => "start_time",
        Direction::Next => "stop_time",
    };
    let (target, lower, upper) = neighbor_range(granule, direction, slot, duration);

    Ok(sqlx::query_scalar(&format!(
        "SELECT c.id FROM products c
         JOIN passes ps ON ps.id = c.pass
         WHERE c.product_type = ?
           AND ps.spacecraft = ?
           AND c.{column} BETWEEN ? AND ?
           AND c.id <> ?
           AND {}
         ORDER BY ABS(c.{column} - ?), c.id
         LIMIT 1",
        ready("c.id")
    ))
    .bind(&granule.product_type)
    .bind(&granule.spacecraft)
    .bind(lower)
    .bind(upper)
    .bind(main)
    .bind(site)
    .bind(target)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Target time of the neighbor `slot` granules away from `granule` and the inclusive range its
/// matching time must fall in. Saturates instead of overflowing for huge durations.
fn neighbor_range(
    granule: &Granule,
    direction: Direction,
    slot: u32,
    duration: i64,
) -> (i64, i64, i64) {
    let offset = i64::from(slot).saturating_mul(duration);
    let target = match direction {
        Direction::Previous => granule.start_time.saturating_sub(offset),
        Direction::Next => granule.stop_time.saturating_add(offset),
    };
    let half = duration / 2;

    (target, target.saturating_sub(half), target.saturating_add(half))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granule() -> Granule {
        Granule {
            product_type: "mod01".to_owned(),
            start_time: 1_000_000,
            stop_time: 1_300_000,
            spacecraft: "AQUA".to_owned(),
        }
    }

    #[test]
    fn neighbor_ranges() {
        assert_eq!(
            neighbor_range(&granule(), Direction::Previous, 1, 300_000),
            (700_000, 550_000, 850_000)
        );
        assert_eq!(
            neighbor_range(&granule(), Direction::Next, 2, 300_000),
            (1_900_000, 1_750_000, 2_050_000)
        );
    }

    #[test]
    fn huge_duration_saturates() {
        assert_eq!(
            neighbor_range(&granule(), Direction::Previous, 3, i64::MAX),
            (i64::MIN + 1_000_001, i64::MIN, i64::MIN / 2 + 1_000_000)
        );
        assert_eq!(
            neighbor_range(&granule(), Direction::Next, 3, i64::MAX).0,
            i64::MAX
        );
    }
}
