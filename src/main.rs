use std::sync::Arc;
use workflow_relay::{
  config::Config,
  coordinator::Coordinator,
  database::setup_database,
  notify::Notifier,
  routes::routes,
  store::PgTaskStore,
  upstream::RunningHubClient,
};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt::init();
  let config = Config::from_env();
  let db_pool = setup_database(&config.database_url).await;

  let store = Arc::new(PgTaskStore::new(db_pool));
  let upstream = Arc::new(
    RunningHubClient::new(config.upstream_url.clone(), config.upstream_timeout)
      .expect("Failed to build upstream HTTP client"),
  );
  let notifier = Arc::new(Notifier::new());
  let coordinator = Coordinator::new(store, upstream, notifier);

  let api = routes(coordinator);

  warp::serve(api)
    .run(([0, 0, 0, 0], config.server_port))
    .await;
}
