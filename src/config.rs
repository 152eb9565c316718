use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modqueue::scheduler::{SortStrategy, StalenessConfig};
use modqueue::votes::LeaderboardPeriod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
    pub leaderboard: LeaderboardConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("modqueue")
                .join("modqueue.db"),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub review_staleness_secs: u64,
    pub rescan_staleness_secs: u64,
    pub ban_check_staleness_secs: u64,
    pub history_size: usize,
    pub default_sort: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            review_staleness_secs: 600,
            rescan_staleness_secs: 86400,
            ban_check_staleness_secs: 86400,
            history_size: 100,
            default_sort: "random".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn staleness(&self) -> StalenessConfig {
        StalenessConfig {
            review: Duration::from_secs(self.review_staleness_secs),
            rescan: Duration::from_secs(self.rescan_staleness_secs),
            ban_check: Duration::from_secs(self.ban_check_staleness_secs),
        }
    }

    pub fn sort(&self) -> SortStrategy {
        SortStrategy::parse(&self.default_sort).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Memory,
    Sqlite,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub requests_per_second: u32,
    pub retry_interval_ms: u64,
    pub redis_url: Option<String>,
    /// Defaults to the main database file
    pub sqlite_path: Option<PathBuf>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Sqlite,
            requests_per_second: 10,
            retry_interval_ms: 50,
            redis_url: None,
            sqlite_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub refresh_lease_secs: u64,
    /// Per-period staleness overrides, keyed by period name
    pub staleness_secs: HashMap<String, u64>,
    pub page_size: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            refresh_lease_secs: 30,
            staleness_secs: HashMap::new(),
            page_size: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub platform_url: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub interval_secs: u64,
    pub verify_queue: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            platform_url: "http://127.0.0.1:8080/api".to_string(),
            api_key_env: "MODQUEUE_PLATFORM_KEY".to_string(),
            timeout_ms: 10000,
            batch_size: 100,
            interval_secs: 60,
            verify_queue: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.history_size == 0 {
            bail!("scheduler.history_size must be at least 1");
        }
        if SortStrategy::parse(&self.scheduler.default_sort).is_none() {
            bail!("scheduler.default_sort '{}' is not a known strategy", self.scheduler.default_sort);
        }
        if self.rate_limit.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be at least 1");
        }
        if self.rate_limit.backend == RateLimitBackend::Redis && self.rate_limit.redis_url.is_none() {
            bail!("rate_limit.redis_url is required for the redis backend");
        }
        for name in self.leaderboard.staleness_secs.keys() {
            if LeaderboardPeriod::parse(name).is_none() {
                bail!("leaderboard.staleness_secs has unknown period '{}'", name);
            }
        }
        if self.leaderboard.page_size == 0 {
            bail!("leaderboard.page_size must be at least 1");
        }
        if self.sweep.batch_size == 0 || self.sweep.verify_queue == 0 {
            bail!("sweep.batch_size and sweep.verify_queue must be at least 1");
        }
        Ok(())
    }

    pub fn rate_limit_db(&self) -> PathBuf {
        self.rate_limit
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.database.path.clone())
    }

    pub fn leaderboard_staleness(&self) -> Vec<(LeaderboardPeriod, Duration)> {
        self.leaderboard
            .staleness_secs
            .iter()
            .filter_map(|(name, secs)| LeaderboardPeriod::parse(name).map(|p| (p, Duration::from_secs(*secs))))
            .collect()
    }
}
