//! Database module
//!
//! Connection and schema checks for the PostgreSQL record store.

use sqlx::PgPool;

/// Tables created by `migrations/001_records.sql`
const REQUIRED_TABLES: [&str; 2] = ["records", "sequences"];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                "Required table '{}' does not exist. Please apply migrations/001_records.sql.",
                table
            );
            return Ok(false);
        }
    }

    tracing::info!("Record store schema verified");
    Ok(true)
}
