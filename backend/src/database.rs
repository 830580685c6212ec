use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};
use std::time::Duration;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // executions run concurrently, each holding a connection only per statement
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl PoolConfig {
    /// Defaults overridden by `DB_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_number("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: env_number("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            acquire_timeout: env_number("DB_ACQUIRE_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env_number("DB_IDLE_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: env_number("DB_MAX_LIFETIME")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lifetime),
        }
    }
}

/// Connect to Postgres, creating the database first when it is missing.
pub async fn create_pool(database_url: &str, config: PoolConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        tracing::info!("Database created");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await?;

    tracing::info!(
        max = config.max_connections,
        min = config.min_connections,
        "Database pool ready"
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Round-trip a trivial statement to prove the pool can reach the server.
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
