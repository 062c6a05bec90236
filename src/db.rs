//! Chainquery connection / 链查询数据库连接
//!
//! The service reads chainquery, it never writes it.

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use searchlight_backend::config::ChainqueryConfig;

/// Open the read-only pool against chainquery / 打开只读连接池
pub async fn connect_chainquery(cfg: &ChainqueryConfig) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(&cfg.url)
        .await
        .context("could not connect to chainquery")?;
    // Fail at bootstrap rather than on the first sync run
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("chainquery connection check failed")?;
    Ok(pool)
}
