use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

/// Opens a pool, creating the database file on first use. WAL journaling
/// only takes effect on file databases; `sqlite::memory:` ignores it.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use super::connect_with_settings;

    #[tokio::test]
    async fn file_database_is_created_on_first_connect() {
        let dir = std::env::temp_dir().join(format!("leadrelay-db-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("relay.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("connect");
        sqlx::query("SELECT 1").execute(&pool).await.expect("ping");
        pool.close().await;

        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
