use augur_domain::services::validator::DeclaredSchema;
use augur_domain::services::vocabulary::{EventDef, SessionDef, Vocabulary, VocabularyTables};
use augur_domain::value_objects::clock::DatasetClock;
use augur_domain::value_objects::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "AUGUR_CONFIG";
pub const DB_URL_ENV: &str = "AUGUR_DB_URL";
pub const DEFAULT_CONFIG_PATH: &str = "configs/augur.toml";

const DEFAULT_TABLE: &str = "ohlcv_candles";
const DEFAULT_COLUMNS: [&str; 10] = [
    "exchange",
    "market",
    "symbol",
    "timeframe",
    "timestamp_utc",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Csv,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub store: StoreConfig,
    pub db: Option<DbConfig>,
    pub schema: Option<SchemaConfig>,
    pub retry: Option<RetryConfig>,
    pub timeouts: Option<TimeoutsConfig>,
    pub plausibility: Option<PlausibilityConfig>,
    pub verifier: Option<VerifierConfig>,
    pub llm: Option<LlmConfig>,
    pub vocabulary: Option<VocabularyConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub symbol: String,
    /// Granularity the store holds, e.g. "5min" or "1day".
    pub timeframe: String,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub csv_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    pub url: Option<String>,
    pub ohlcv_table: String,
    pub exchange: String,
    pub market: String,
    pub pool_max_size: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    pub relations: Vec<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub store_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub query_ms: Option<u64>,
    pub request_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PlausibilityConfig {
    pub max_rows: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    pub tolerance: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub url: String,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct VocabularyConfig {
    #[serde(default)]
    pub sessions: Vec<SessionDef>,
    #[serde(default)]
    pub events: Vec<EventDef>,
    /// alias -> canonical candle pattern
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
    /// alias -> canonical metric
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total generation attempts per stage, the first one included.
    pub max_attempts: u32,
    /// Extra tries per query after a transient store failure.
    pub store_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            store_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub query: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_millis(10_000),
            request: Duration::from_millis(60_000),
        }
    }
}

/// Immutable values the pipeline runs on, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub symbol: String,
    pub base_timeframe: Timeframe,
    pub clock: DatasetClock,
    pub vocabulary: Vocabulary,
    pub schema: DeclaredSchema,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    pub max_rows: u64,
    pub tolerance: f64,
}

impl Settings {
    /// Standard vocabulary on a UTC clock; handy for embedding and tests.
    pub fn standard(symbol: &str, base_timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_timeframe,
            clock: DatasetClock::utc(),
            vocabulary: Vocabulary::standard(),
            schema: default_schema(DEFAULT_TABLE),
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
            max_rows: 100_000,
            tolerance: 1e-6,
        }
    }
}

impl Config {
    pub fn resolve(&self) -> Result<Settings, String> {
        let base_timeframe = Timeframe::parse(&self.dataset.timeframe)
            .map_err(|err| format!("dataset.timeframe: {err}"))?;
        let clock = match self.dataset.utc_offset_minutes {
            Some(minutes) => DatasetClock::from_offset_minutes(minutes)
                .map_err(|err| format!("dataset.utc_offset_minutes: {err}"))?,
            None => DatasetClock::utc(),
        };

        let vocabulary = match &self.vocabulary {
            Some(cfg) => Vocabulary::new(&VocabularyTables {
                sessions: cfg.sessions.clone(),
                events: cfg.events.clone(),
                pattern_aliases: cfg.patterns.clone(),
                metric_aliases: cfg.metrics.clone(),
            })
            .map_err(|err| format!("vocabulary: {err}"))?,
            None => Vocabulary::standard(),
        };

        let table = self
            .db
            .as_ref()
            .map(|db| db.ohlcv_table.as_str())
            .unwrap_or(DEFAULT_TABLE);
        let schema = match &self.schema {
            Some(cfg) => {
                if cfg.relations.is_empty() {
                    return Err("schema.relations must not be empty".to_string());
                }
                DeclaredSchema::new(cfg.relations.clone(), cfg.columns.clone())
            }
            None => default_schema(table),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: self
                .retry
                .as_ref()
                .and_then(|r| r.max_attempts)
                .unwrap_or(defaults.max_attempts),
            store_retries: self
                .retry
                .as_ref()
                .and_then(|r| r.store_retries)
                .unwrap_or(defaults.store_retries),
        };
        if retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }

        let default_timeouts = Timeouts::default();
        let timeouts = Timeouts {
            query: self
                .timeouts
                .as_ref()
                .and_then(|t| t.query_ms)
                .map(Duration::from_millis)
                .unwrap_or(default_timeouts.query),
            request: self
                .timeouts
                .as_ref()
                .and_then(|t| t.request_ms)
                .map(Duration::from_millis)
                .unwrap_or(default_timeouts.request),
        };
        if timeouts.query.is_zero() || timeouts.request.is_zero() {
            return Err("timeouts must be > 0 ms".to_string());
        }

        let tolerance = self
            .verifier
            .as_ref()
            .and_then(|v| v.tolerance)
            .unwrap_or(1e-6);
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err("verifier.tolerance must be a non-negative number".to_string());
        }

        Ok(Settings {
            symbol: self.dataset.symbol.clone(),
            base_timeframe,
            clock,
            vocabulary,
            schema,
            retry,
            timeouts,
            max_rows: self
                .plausibility
                .as_ref()
                .and_then(|p| p.max_rows)
                .unwrap_or(100_000),
            tolerance,
        })
    }
}

fn default_schema(table: &str) -> DeclaredSchema {
    DeclaredSchema::new(
        vec![table.to_string()],
        DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
    )
}

/// `--config` wins, then `AUGUR_CONFIG`, then the repository default.
pub fn config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// `AUGUR_DB_URL` overrides `db.url` so credentials can stay out of the file.
pub fn resolve_db_url(db: &DbConfig) -> Result<String, String> {
    match env::var(DB_URL_ENV) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => db
            .url
            .clone()
            .ok_or_else(|| format!("db.url is not set (or set {DB_URL_ENV})")),
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}
