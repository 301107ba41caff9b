//! Configuration management with validation and defaults
//!
//! Sections mirror the engine's components. Values load from an optional TOML
//! file, then `ROUNDBET_*` environment overrides, then validation.

use crate::errors::{ConfigurationError, EngineResult};
use crate::games::types::{BetType, GameKind};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub settlement: SettlementConfig,
    pub recovery: RecoveryConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// Round and payout parameters shared by all games
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub wingo_rooms: Vec<BetType>,
    pub nine_rooms: Vec<BetType>,
    /// House fee in basis points of the stake
    pub fee_bps: u32,
    pub min_stake: i64,
    pub max_stake: i64,
    /// Betting closes this many seconds before a period ends
    pub bet_close_secs: u32,
    pub tick_interval_ms: u64,
    /// Offset used to derive the period date from UTC
    pub utc_offset_secs: i32,
    /// Secret mixed into the per-day preset seed
    pub preset_seed: String,
    pub preset_cache_capacity: usize,
    pub price_prefix: String,
    pub wingo_payouts: WingoPayouts,
    /// Nine profit ratio (bps of stake) indexed by exclusion-set length - 1
    pub nine_ratios_bps: Vec<u32>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            wingo_rooms: vec![BetType::Wingo1, BetType::Wingo3, BetType::Wingo5, BetType::Wingo10],
            nine_rooms: vec![BetType::Nine1, BetType::Nine3, BetType::Nine5],
            fee_bps: 200,
            min_stake: 100,
            max_stake: 10_000_000,
            bet_close_secs: 5,
            tick_interval_ms: 500,
            utc_offset_secs: 0,
            preset_seed: "roundbet-dev-seed".to_string(),
            preset_cache_capacity: 64,
            price_prefix: "84".to_string(),
            wingo_payouts: WingoPayouts::default(),
            // Indexed by set length; a larger exclusion set wins less often and so pays more
            nine_ratios_bps: vec![1_000, 2_300, 4_000, 6_200, 9_500, 14_000, 22_000, 38_000, 85_000],
        }
    }
}

/// Wingo multipliers in basis points of the stake (stake included)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WingoPayouts {
    pub digit_bps: u32,
    pub color_bps: u32,
    /// Green on 5 and red on 0 share the draw with violet
    pub color_half_bps: u32,
    pub violet_bps: u32,
    pub size_bps: u32,
}

impl Default for WingoPayouts {
    fn default() -> Self {
        Self {
            digit_bps: 90_000,
            color_bps: 20_000,
            color_half_bps: 15_000,
            violet_bps: 45_000,
            size_bps: 20_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub debounce_ms: u64,
    pub batch_size: usize,
    pub ledger_max_retry: u32,
    pub ledger_retry_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            batch_size: 100,
            ledger_max_retry: 5,
            ledger_retry_delay_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    /// Periods are only re-driven once they are this far past their end
    pub grace_secs: u64,
    pub max_periods_per_scan: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            grace_secs: 5,
            max_periods_per_scan: 50,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
    pub lock_retry_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 10_000,
            lock_wait_ms: 3_000,
            lock_retry_ms: 10,
            cache_ttl_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: usize,
    pub compression_type: CompressionType,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/roundbet_data".to_string(),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            compression_type: CompressionType::Lz4,
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub log_filter: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "roundbet=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Local development: in-memory store, verbose logs
    pub fn development() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "roundbet=debug,tower_http=debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Persistent deployment
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::RocksDb,
                data_directory: "./DB/roundbet_data".to_string(),
                write_buffer_size_mb: 128,
                max_write_buffer_number: 6,
                clear_on_start: false,
                ..Default::default()
            },
            recovery: RecoveryConfig {
                scan_interval_secs: 15,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Fast timings for tests
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                tick_interval_ms: 20,
                ..Default::default()
            },
            settlement: SettlementConfig {
                debounce_ms: 10,
                batch_size: 100,
                ledger_max_retry: 3,
                ledger_retry_delay_ms: 5,
            },
            recovery: RecoveryConfig {
                enabled: false,
                scan_interval_secs: 1,
                grace_secs: 0,
                max_periods_per_scan: 50,
            },
            wallet: WalletConfig {
                lock_ttl_ms: 5_000,
                lock_wait_ms: 2_000,
                lock_retry_ms: 1,
                cache_ttl_secs: 60,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            api: ApiConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn rooms_for(&self, game: GameKind) -> &[BetType] {
        match game {
            GameKind::Wingo => &self.game.wingo_rooms,
            GameKind::Nine => &self.game.nine_rooms,
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> EngineResult<()> {
        let game = &self.game;

        if game.bet_close_secs == 0 {
            return Err(invalid(
                "game.bet_close_secs",
                "0",
                "bets must close before the round ends",
            ));
        }

        for (kind, rooms) in [(GameKind::Wingo, &game.wingo_rooms), (GameKind::Nine, &game.nine_rooms)] {
            if let Some(bad) = rooms.iter().find(|b| b.game() != kind) {
                return Err(invalid(
                    "game.rooms",
                    bad.code(),
                    &format!("room does not belong to {}", kind),
                ));
            }
            if let Some(short) = rooms
                .iter()
                .find(|b| b.interval_secs() <= game.bet_close_secs)
            {
                return Err(invalid(
                    "game.bet_close_secs",
                    &game.bet_close_secs.to_string(),
                    &format!("must be shorter than the {} interval", short.code()),
                ));
            }
        }

        if game.fee_bps >= 10_000 {
            return Err(invalid("game.fee_bps", &game.fee_bps.to_string(), "fee must be below 100%"));
        }
        if game.min_stake <= 0 || game.max_stake < game.min_stake {
            return Err(invalid(
                "game.min_stake",
                &format!("{}..{}", game.min_stake, game.max_stake),
                "stake bounds must be positive and ordered",
            ));
        }
        if game.tick_interval_ms == 0 {
            return Err(invalid("game.tick_interval_ms", "0", "tick interval cannot be zero"));
        }
        if game.preset_cache_capacity == 0 {
            return Err(invalid("game.preset_cache_capacity", "0", "cache capacity cannot be zero"));
        }
        if game.nine_ratios_bps.len() != 9 {
            return Err(invalid(
                "game.nine_ratios_bps",
                &game.nine_ratios_bps.len().to_string(),
                "exactly 9 ratios are required (set sizes 1..=9)",
            ));
        }
        if game.utc_offset_secs.abs() >= 86_400 {
            return Err(invalid("game.utc_offset_secs", &game.utc_offset_secs.to_string(), "offset out of range"));
        }

        if self.settlement.batch_size == 0 {
            return Err(invalid("settlement.batch_size", "0", "batch size cannot be zero"));
        }
        if self.settlement.debounce_ms == 0 {
            return Err(invalid("settlement.debounce_ms", "0", "debounce window cannot be zero"));
        }

        if self.wallet.lock_ttl_ms == 0 || self.wallet.lock_wait_ms == 0 {
            return Err(invalid("wallet.lock_ttl_ms", "0", "lock timings cannot be zero"));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "storage.data_directory is required for the rocksdb backend".to_string(),
            )
            .into());
        }

        if self.api.enabled && self.api.port == 0 {
            return Err(invalid("api.port", "0", "API port cannot be zero when API is enabled"));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.game.tick_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.settlement.debounce_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery.scan_interval_secs)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::EngineError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<EngineConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Start from a preset instead of `EngineConfig::default()`
    pub fn with_base(mut self, base: EngineConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => self.base.clone().unwrap_or_default(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(host) = env::var("ROUNDBET_API_HOST") {
            config.api.host = host;
        }
        if let Ok(port) = env::var("ROUNDBET_API_PORT") {
            config.api.port = parse_env("ROUNDBET_API_PORT", port)?;
        }
        if let Ok(dir) = env::var("ROUNDBET_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Ok(backend) = env::var("ROUNDBET_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => {
                    return Err(invalid(
                        "ROUNDBET_STORAGE_BACKEND",
                        &backend,
                        "expected memory or rocksdb",
                    ))
                }
            };
        }
        if let Ok(seed) = env::var("ROUNDBET_PRESET_SEED") {
            config.game.preset_seed = seed;
        }
        if let Ok(fee) = env::var("ROUNDBET_FEE_BPS") {
            config.game.fee_bps = parse_env("ROUNDBET_FEE_BPS", fee)?;
        }
        if let Ok(filter) = env::var("ROUNDBET_LOG") {
            config.monitoring.log_filter = filter;
        }
        Ok(())
    }

    /// Serialize a configuration to TOML
    pub fn save(config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> EngineResult<T> {
    value.parse().map_err(|_| {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value,
            reason: "could not parse value".to_string(),
        }
        .into()
    })
}
