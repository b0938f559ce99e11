use sqlx::{Pool, Postgres};
use sqlx::migrate::Migrator;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!();

static MAX_CONNECT_RETRIES: usize = 5;
static CONNECT_DELAY_MS: u64 = 100;

pub async fn setup_database(database_url: &str) -> Pool<Postgres> {
  let pool = Retry::spawn(
    ExponentialBackoff::from_millis(CONNECT_DELAY_MS).take(MAX_CONNECT_RETRIES),
    || Pool::<Postgres>::connect(database_url),
  )
  .await
  .expect("Failed to connect to database.");

  MIGRATOR.run(&pool)
    .await
    .expect("Failed to run database migrations.");
  info!("Database migrations complete");
  pool
}
