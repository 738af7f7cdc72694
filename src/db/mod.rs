pub mod campaigns;
pub mod conversations;
pub mod error;
pub mod exports;
pub mod leads;
pub mod metrics;
pub mod notifications;
pub mod password_resets;
pub mod seed;
pub mod suggestions;
pub mod tasks;
pub mod templates;
pub mod users;

#[cfg(test)]
mod test;

pub use error::{OrNotFound, RepoError, RepoResult};

use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// `limit`/`offset` query parameters shared by list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Paging {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Paging {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &PgPool) -> RepoResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        let p = Paging {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(p.limit(), MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
        assert_eq!(Paging::default().limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(Paging { limit: Some(0), offset: None }.limit(), 1);
    }
}
