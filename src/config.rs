use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub upstream_url: String,
  pub upstream_timeout: Duration,
  pub server_port: u16,
}

impl Config {
  pub fn from_env() -> Self {
    Self {
      database_url: env::var("DATABASE_URL").unwrap(),
      upstream_url: env::var("UPSTREAM_URL")
        .unwrap_or_else(|_| "https://www.runninghub.cn".into()),
      upstream_timeout: Duration::from_secs(
        env::var("UPSTREAM_TIMEOUT_SECS")
          .unwrap_or_else(|_| "10".into())
          .parse()
          .unwrap_or(10),
      ),
      server_port: env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .unwrap_or(8080),
    }
  }
}
