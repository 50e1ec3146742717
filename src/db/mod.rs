//! Database module for the osTicket MySQL schema.
//!
//! The schema is owned by osTicket; this service never migrates it.

pub mod numbering;
pub mod query;
mod repository;

pub use repository::*;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use crate::config::DatabaseConfig;

/// Connection options for the configured database.
///
/// Every connection uses `utf8mb4` with a case- and accent-insensitive
/// collation so that email and custom-field searches match osTicket's own.
pub fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name)
        .charset("utf8mb4")
        .collation("utf8mb4_unicode_ci")
}

/// Pool builder with the configured size and acquire timeout.
pub fn pool_options(config: &DatabaseConfig) -> MySqlPoolOptions {
    MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
}

/// Open the connection pool and verify the database answers.
pub async fn init_pool(config: &DatabaseConfig) -> Result<MySqlPool, sqlx::Error> {
    let pool = pool_options(config)
        .connect_with(connect_options(config))
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
