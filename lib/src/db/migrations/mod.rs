use super::{get_pragma, set_pragma, Connection, Error, Pool};

const MIGRATIONS: &[&str] = &[include_str!("v1.sql")];

/// Gets the expected schema version. If the database's schema version is lower than this,
/// it's automatically migrated.
pub(super) fn schema_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Apply all pending migrations.
pub(super) async fn run(pool: &Pool) -> Result<(), Error> {
    for (index, sql) in MIGRATIONS.iter().enumerate() {
        apply(pool, index as u32 + 1, sql).await?;
    }

    Ok(())
}

async fn apply(pool: &Pool, dst_version: u32, sql: &'static str) -> Result<(), Error> {
    let mut tx = pool.begin_write().await?;

    let src_version = get_version(&mut tx).await?;
    if src_version >= dst_version {
        return Ok(());
    }

    assert_eq!(
        dst_version,
        src_version + 1,
        "migrations must be applied in order"
    );

    sqlx::raw_sql(sql).execute(&mut *tx).await?;
    set_version(&mut tx, dst_version).await?;

    tx.commit().await?;

    Ok(())
}

async fn get_version(conn: &mut Connection) -> Result<u32, Error> {
    get_pragma(conn, "user_version").await
}

async fn set_version(conn: &mut Connection, value: u32) -> Result<(), Error> {
    set_pragma(conn, "user_version", value).await
}
