//! Registered product types and the algorithm → claim group mapping.

use crate::{db, error::Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductType {
    pub name: String,
    pub spacecraft: Option<String>,
    pub sensor: Option<String>,
    pub description: Option<String>,
    pub level: Option<String>,
    pub distribution_directory: Option<String>,
}

impl ProductType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Registers the product type, replacing the attributes of an already registered one.
pub(crate) async fn register_product_type(
    conn: &mut db::Connection,
    product_type: &ProductType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO product_types
             (name, spacecraft, sensor, description, level, distribution_directory)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (name) DO UPDATE SET
             spacecraft = excluded.spacecraft,
             sensor = excluded.sensor,
             description = excluded.description,
             level = excluded.level,
             distribution_directory = excluded.distribution_directory",
    )
    .bind(&product_type.name)
    .bind(&product_type.spacecraft)
    .bind(&product_type.sensor)
    .bind(&product_type.description)
    .bind(&product_type.level)
    .bind(&product_type.distribution_directory)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn load_product_type(
    conn: &mut db::Connection,
    name: &str,
) -> Result<Option<ProductType>> {
    Ok(sqlx::query_as(
        "SELECT name, spacecraft, sensor, description, level, distribution_directory
         FROM product_types WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?)
}

pub(crate) async fn product_type_exists(conn: &mut db::Connection, name: &str) -> Result<bool> {
    Ok(sqlx::query("SELECT 0 FROM product_types WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .is_some())
}

pub(crate) async fn product_type_names(conn: &mut db::Connection) -> Result<Vec<String>> {
    Ok(
        sqlx::query_scalar("SELECT name FROM product_types ORDER BY name")
            .fetch_all(&mut *conn)
            .await?,
    )
}

pub(crate) async fn register_algorithm(
    conn: &mut db::Connection,
    name: &str,
    colony: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO algorithms (name, colony) VALUES (?, ?)
         ON CONFLICT (name) DO UPDATE SET colony = excluded.colony",
    )
    .bind(name)
    .bind(colony)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Claim group the products of `algorithm` are produced under.
pub(crate) async fn colony_for_algorithm(
    conn: &mut db::Connection,
    algorithm: &str,
) -> Result<Option<String>> {
    Ok(
        sqlx::query_scalar("SELECT colony FROM algorithms WHERE name = ?")
            .bind(algorithm)
            .fetch_optional(&mut *conn)
            .await?,
    )
}
