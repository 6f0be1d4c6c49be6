//! Database module for PostgreSQL persistence
//!
//! Handles file records, IP bans, and the admin login attempt log.

mod files;
mod reputation;
mod schema;

pub use files::*;
pub use reputation::*;
pub use schema::*;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}
