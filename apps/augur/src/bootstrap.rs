use augur_application::config::{self, Config, Settings, StoreKind};
use augur_domain::repositories::row_store::RowStore;
use augur_infrastructure::collaborators::{
    HttpCollaboratorConfig, HttpIntentClient, HttpSummaryClient,
};
use augur_infrastructure::persistence::memory::InMemoryRowStore;
use augur_infrastructure::persistence::postgres_rows::{PostgresRowStore, PostgresStoreConfig};
use std::path::{Path, PathBuf};

const DEFAULT_POOL_MAX_SIZE: u32 = 8;
const DEFAULT_LLM_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LLM_RETRIES: u32 = 1;

/// A parsed config plus the settings it resolves to.
pub struct Loaded {
    pub path: PathBuf,
    pub config: Config,
    pub settings: Settings,
}

pub fn load(cli_path: Option<&Path>) -> Result<Loaded, String> {
    let path = config::config_path(cli_path);
    let config = config::load_config(&path)?;
    let settings = config
        .resolve()
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    Ok(Loaded {
        path,
        config,
        settings,
    })
}

pub fn build_store(loaded: &Loaded) -> Result<Box<dyn RowStore>, String> {
    let config = &loaded.config;
    match config.store.kind {
        StoreKind::Csv => {
            let raw = config
                .store
                .csv_path
                .as_deref()
                .ok_or_else(|| "store.kind = \"csv\" requires store.csv_path".to_string())?;
            let path = relative_to_config(&loaded.path, Path::new(raw));
            let store = InMemoryRowStore::from_csv(&path)?;
            tracing::info!(path = %path.display(), bars = store.len(), "loaded csv row store");
            Ok(Box::new(store))
        }
        StoreKind::Postgres => {
            let db = config
                .db
                .as_ref()
                .ok_or_else(|| "store.kind = \"postgres\" requires a [db] table".to_string())?;
            let db_url = config::resolve_db_url(db)?;
            let store = PostgresRowStore::new(PostgresStoreConfig {
                db_url,
                ohlcv_table: db.ohlcv_table.clone(),
                exchange: db.exchange.clone(),
                market: db.market.clone(),
                symbol: loaded.settings.symbol.clone(),
                timeframe: config.dataset.timeframe.clone(),
                pool_max_size: db.pool_max_size.unwrap_or(DEFAULT_POOL_MAX_SIZE),
                query_timeout: loaded.settings.timeouts.query,
            })
            .map_err(|err| format!("failed to init postgres row store: {err}"))?;
            Ok(Box::new(store))
        }
    }
}

pub fn build_collaborators(config: &Config) -> Result<(HttpIntentClient, HttpSummaryClient), String> {
    let llm = config
        .llm
        .as_ref()
        .ok_or_else(|| "asking questions requires an [llm] table".to_string())?;
    let http = HttpCollaboratorConfig {
        url: llm.url.clone(),
        timeout_ms: llm.timeout_ms.unwrap_or(DEFAULT_LLM_TIMEOUT_MS),
        retries: llm.retries.unwrap_or(DEFAULT_LLM_RETRIES),
        model: llm.model.clone(),
    };
    let intent = HttpIntentClient::new(&http)
        .map_err(|err| format!("failed to init intent client (url={}): {err}", llm.url))?;
    let summary = HttpSummaryClient::new(&http)
        .map_err(|err| format!("failed to init summary client (url={}): {err}", llm.url))?;
    Ok((intent, summary))
}

/// Relative data paths are read from the config file's directory.
fn relative_to_config(config_path: &Path, raw: &Path) -> PathBuf {
    if raw.is_absolute() {
        return raw.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(raw),
        _ => raw.to_path_buf(),
    }
}
