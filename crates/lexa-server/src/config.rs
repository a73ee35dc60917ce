//! Server configuration, deserialised from `lexa.toml` and `LEXA_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, bail};
use lexa_engine::{EngineConfig, retry::RetryPolicy};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                     String,
  pub port:                     u16,
  pub store_path:               PathBuf,
  pub workers:                  usize,
  pub max_attempts:             u32,
  pub retry_initial_ms:         u64,
  pub retry_max_ms:             u64,
  pub explain_wait_ms:          u64,
  pub recompute_wait_ms:        u64,
  pub producer_timeout_ms:      u64,
  pub generator_timeout_ms:     u64,
  /// Base URL of the domain service that computes facts.
  pub upstream_url:             String,
  pub upstream_timeout_ms:      u64,
  pub explain_on_drift:         bool,
  /// Tenants refreshed by the nightly schedule.
  pub refresh_tenants:          Vec<String>,
  pub nightly_refresh_hour_utc: u32,
  pub refresh_top_n:            usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                     "127.0.0.1".to_owned(),
      port:                     8080,
      store_path:               PathBuf::from("lexa.db"),
      workers:                  4,
      max_attempts:             3,
      retry_initial_ms:         200,
      retry_max_ms:             5_000,
      explain_wait_ms:          10_000,
      recompute_wait_ms:        10_000,
      producer_timeout_ms:      15_000,
      generator_timeout_ms:     30_000,
      upstream_url:             "http://127.0.0.1:9000".to_owned(),
      upstream_timeout_ms:      10_000,
      explain_on_drift:         true,
      refresh_tenants:          Vec::new(),
      nightly_refresh_hour_utc: 2,
      refresh_top_n:            20,
    }
  }
}

impl ServerConfig {
  /// Layer the optional TOML file at `path` under `LEXA_*` environment
  /// variables. `LEXA_REFRESH_TENANTS` is a comma-separated list.
  pub fn load(path: PathBuf) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("LEXA")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("refresh_tenants"),
      )
      .build()
      .context("failed to read config file")?;

    let cfg: ServerConfig = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn validate(&self) -> anyhow::Result<()> {
    if self.nightly_refresh_hour_utc > 23 {
      bail!("nightly_refresh_hour_utc must be 0-23, got {}", self.nightly_refresh_hour_utc);
    }
    if self.workers == 0 {
      bail!("workers must be at least 1");
    }
    if self.max_attempts == 0 {
      bail!("max_attempts must be at least 1");
    }
    if self.refresh_tenants.iter().any(|t| t.trim().is_empty()) {
      bail!("refresh_tenants contains an empty tenant id");
    }
    Ok(())
  }

  pub fn upstream_timeout(&self) -> Duration { Duration::from_millis(self.upstream_timeout_ms) }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      workers:           self.workers,
      retry:             RetryPolicy::new(
        self.max_attempts,
        Duration::from_millis(self.retry_initial_ms),
        Duration::from_millis(self.retry_max_ms),
      ),
      explain_wait:      Duration::from_millis(self.explain_wait_ms),
      recompute_wait:    Duration::from_millis(self.recompute_wait_ms),
      producer_timeout:  Duration::from_millis(self.producer_timeout_ms),
      generator_timeout: Duration::from_millis(self.generator_timeout_ms),
      explain_on_drift:  self.explain_on_drift,
      refresh_top_n:     self.refresh_top_n,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  #[test]
  fn missing_file_uses_defaults() {
    let cfg = ServerConfig::load(PathBuf::from("/nonexistent/lexa.toml")).unwrap();
    assert_eq!(cfg.nightly_refresh_hour_utc, 2);
    assert_eq!(cfg.engine_config().retry.max_attempts, 3);
  }

  #[test]
  fn file_values_override_defaults() {
    let dir = std::env::temp_dir().join(format!("lexa-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("lexa.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
      file,
      "port = 9999\nexplain_wait_ms = 250\nrefresh_tenants = [\"t1\", \"t2\"]\nexplain_on_drift = false"
    )
    .unwrap();

    let cfg = ServerConfig::load(path).unwrap();
    assert_eq!(cfg.port, 9999);
    assert_eq!(cfg.refresh_tenants, ["t1", "t2"]);
    let engine = cfg.engine_config();
    assert_eq!(engine.explain_wait, Duration::from_millis(250));
    assert!(!engine.explain_on_drift);
    std::fs::remove_dir_all(dir).ok();
  }

  #[test]
  fn invalid_hours_are_rejected() {
    let cfg = ServerConfig { nightly_refresh_hour_utc: 24, ..ServerConfig::default() };
    assert!(cfg.validate().is_err());
  }
}
