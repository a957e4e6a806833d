/// Process configuration.
///
/// Layered TOML + environment loading, generalized from the teacher's
/// single-source `config.toml` loader to the options enumerated in the
/// indexer spec (database, RPC pool, batching, rate limiting, reorg
/// safety). Held behind a `OnceCell` the same way the teacher holds its
/// global `Config`, so any task can call `get_global_config()` without
/// threading a reference through every function signature.
pub use once_cell::sync::OnceCell;
use std::error::Error;
use std::time::Duration;

static GLOBAL_CONFIG: OnceCell<IndexerConfig> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub database_url: String,
    pub rpc_urls: Vec<String>,
    pub rpc_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub batch_size: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub confirmation_depth: u64,
    pub max_reorg_depth: u64,
    pub rate_limit_tokens: u32,
    pub rate_limit_interval_ms: u64,
    pub rate_limit_burst: Option<u32>,
    pub log_level: String,
    pub health_check_port: u16,
    pub instance_id: String,
}

impl IndexerConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn load_from(config: config::Config) -> Result<IndexerConfig, Box<dyn Error + Send + Sync>> {
    let rpc_urls: Vec<String> = config
        .get_array("rpc_urls")
        .map(|values| {
            values
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .collect()
        })
        .or_else(|_| config.get_string("rpc_urls").map(|s| vec![s]))
        .map_err(|e| format!("missing rpc_urls in config: {e}"))?;

    if rpc_urls.is_empty() {
        return Err("rpc_urls must contain at least one endpoint".into());
    }

    let instance_id = config
        .get_string("instance_id")
        .unwrap_or_else(|_| format!("indexer-{}", std::process::id()));

    Ok(IndexerConfig {
        database_url: config
            .get_string("database_url")
            .map_err(|e| format!("missing database_url in config: {e}"))?,
        rpc_urls,
        rpc_timeout_ms: config.get_int("rpc_timeout_ms").unwrap_or(30_000) as u64,
        poll_interval_ms: config.get_int("poll_interval_ms").unwrap_or(2_000) as u64,
        batch_size: config.get_int("batch_size").unwrap_or(50) as u64,
        concurrency: config.get_int("concurrency").unwrap_or(10) as usize,
        max_retries: config.get_int("max_retries").unwrap_or(3) as u32,
        retry_delay_ms: config.get_int("retry_delay_ms").unwrap_or(1_000) as u64,
        confirmation_depth: config.get_int("confirmation_depth").unwrap_or(0) as u64,
        max_reorg_depth: config.get_int("max_reorg_depth").unwrap_or(1_000) as u64,
        rate_limit_tokens: config.get_int("rate_limit_tokens").unwrap_or(20) as u32,
        rate_limit_interval_ms: config.get_int("rate_limit_interval_ms").unwrap_or(1_000) as u64,
        rate_limit_burst: config.get_int("rate_limit_burst").ok().map(|v| v as u32),
        log_level: config
            .get_string("log_level")
            .unwrap_or_else(|_| "info".to_string()),
        health_check_port: config.get_int("health_check_port").unwrap_or(9100) as u16,
        instance_id,
    })
}

pub fn init_global_config() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(config::Environment::default().separator("__"))
        .build()?;
    let indexer_config = load_from(config)?;
    GLOBAL_CONFIG
        .set(indexer_config)
        .map_err(|_| "config already initialized")?;
    Ok(())
}

pub fn get_global_config() -> &'static IndexerConfig {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities without touching the global cell.
pub fn load_config() -> Result<IndexerConfig, Box<dyn Error + Send + Sync>> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(config::Environment::default().separator("__"))
        .build()?;
    load_from(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> config::Config {
        config::Config::builder()
            .set_default("database_url", "postgres://localhost/test")
            .unwrap()
            .set_default("rpc_urls", vec!["http://localhost:8545"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_fill_in_when_unset() {
        let cfg = load_from(base_config()).unwrap();
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.concurrency, 10);
        assert_eq!(cfg.max_reorg_depth, 1_000);
        assert_eq!(cfg.confirmation_depth, 0);
    }

    #[test]
    fn rejects_missing_rpc_urls() {
        let config = config::Config::builder()
            .set_default("database_url", "postgres://localhost/test")
            .unwrap()
            .build()
            .unwrap();
        assert!(load_from(config).is_err());
    }

    /// Exercises the actual file-source path `init_global_config` uses
    /// (`config::File`), rather than only the programmatic builder above.
    #[test]
    fn loads_from_an_on_disk_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            database_url = "postgres://localhost/indexer"
            rpc_urls = ["http://localhost:8545", "http://localhost:8546"]
            batch_size = 25
            concurrency = 4
            "#,
        )
        .unwrap();

        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap();
        let cfg = load_from(config).unwrap();

        assert_eq!(cfg.database_url, "postgres://localhost/indexer");
        assert_eq!(cfg.rpc_urls, vec!["http://localhost:8545", "http://localhost:8546"]);
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.concurrency, 4);
    }
}
