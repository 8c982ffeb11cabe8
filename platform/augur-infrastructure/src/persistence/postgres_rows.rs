use super::canonicalize_bars;
use augur_domain::errors::StoreError;
use augur_domain::repositories::row_store::{
    ArtifactRows, BarQuery, CancelToken, KnownRange, RowStore,
};
use augur_domain::services::validator::sql::strip_terminator;
use augur_domain::value_objects::bar::Bar;
use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{NoTls, Transaction};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    pub db_url: String,
    pub ohlcv_table: String,
    pub exchange: String,
    pub market: String,
    pub symbol: String,
    pub timeframe: String,
    pub pool_max_size: u32,
    pub query_timeout: Duration,
}

/// Read-only row store over an OHLCV table. Every call runs in its own
/// `READ ONLY` transaction with `statement_timeout` set to the per-query
/// timeout, so a validated artifact still cannot write or run unbounded.
#[derive(Debug, Clone)]
pub struct PostgresRowStore {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    table: String,
    exchange: String,
    market: String,
    symbol: String,
    timeframe: String,
    query_timeout: Duration,
}

impl PostgresRowStore {
    pub fn new(config: PostgresStoreConfig) -> Result<Self, String> {
        if let Err(err) = validate_table_name(&config.ohlcv_table) {
            return Err(format!(
                "invalid ohlcv_table '{}': {}",
                config.ohlcv_table, err
            ));
        }

        let pg_config = config
            .db_url
            .parse::<postgres::Config>()
            .map_err(|err| format!("invalid postgres db url: {err}"))?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.pool_max_size.max(1))
            .build(manager)
            .map_err(|err| format!("failed to build postgres pool: {err}"))?;

        Ok(Self::with_pool(pool, config))
    }

    fn with_pool(pool: Pool<PostgresConnectionManager<NoTls>>, config: PostgresStoreConfig) -> Self {
        Self {
            pool,
            table: config.ohlcv_table,
            exchange: config.exchange,
            market: config.market,
            symbol: config.symbol,
            timeframe: config.timeframe,
            query_timeout: config.query_timeout,
        }
    }

    /// Checks out a connection and runs `op` inside a read-only transaction.
    /// The transaction is always rolled back.
    fn read_only<T>(
        &self,
        call: &'static str,
        op: impl FnOnce(&mut Transaction<'_>) -> Result<T, postgres::Error>,
    ) -> Result<T, StoreError> {
        let started = Instant::now();
        let span = tracing::info_span!("infra.postgres.read_only", call, table = %self.table);
        let _enter = span.enter();

        let result = self.run_read_only(op, started);
        let label = if result.is_ok() { "ok" } else { "err" };
        metrics::counter!("augur.infra.postgres.calls_total", "call" => call, "result" => label)
            .increment(1);
        metrics::histogram!("augur.infra.postgres.call_ms", "call" => call)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "postgres call failed");
        }
        result
    }

    fn run_read_only<T>(
        &self,
        op: impl FnOnce(&mut Transaction<'_>) -> Result<T, postgres::Error>,
        started: Instant,
    ) -> Result<T, StoreError> {
        validate_table_name(&self.table).map_err(StoreError::Config)?;

        let get_start = Instant::now();
        let mut client = self.pool.get().map_err(|err| {
            metrics::counter!("augur.infra.postgres.pool.get.errors_total").increment(1);
            StoreError::Unavailable(format!("failed to checkout postgres connection: {err}"))
        })?;
        metrics::histogram!("augur.infra.postgres.pool.get_ms")
            .record(get_start.elapsed().as_secs_f64() * 1000.0);

        let classify = |err: postgres::Error| classify_error(err, started);
        let mut tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .map_err(classify)?;
        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            self.query_timeout.as_millis().max(1)
        ))
        .map_err(classify)?;
        let value = op(&mut tx).map_err(classify)?;
        tx.rollback().map_err(classify)?;
        Ok(value)
    }
}

impl RowStore for PostgresRowStore {
    fn known_range(&self) -> Result<Option<KnownRange>, StoreError> {
        let sql = format!(
            "SELECT min(timestamp_utc), max(timestamp_utc) FROM {} \
             WHERE exchange=$1 AND market=$2 AND symbol=$3 AND timeframe=$4",
            self.table
        );
        let row = self.read_only("known_range", |tx| {
            tx.query_one(
                &sql,
                &[&self.exchange, &self.market, &self.symbol, &self.timeframe],
            )
        })?;
        let first: Option<DateTime<Utc>> = row.get(0);
        let last: Option<DateTime<Utc>> = row.get(1);
        Ok(match (first, last) {
            (Some(first), Some(last)) => Some(KnownRange {
                first: first.timestamp(),
                last: last.timestamp(),
            }),
            _ => None,
        })
    }

    fn load_bars(&self, query: &BarQuery, cancel: &CancelToken) -> Result<Vec<Bar>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let start = to_datetime(query.start)?;
        let end = to_datetime(query.end)?;
        let sql = format!(
            "SELECT timestamp_utc, open, high, low, close, volume FROM {} \
             WHERE exchange=$1 AND market=$2 AND symbol=$3 AND timeframe=$4 \
             AND timestamp_utc >= $5 AND timestamp_utc < $6 \
             ORDER BY timestamp_utc ASC",
            self.table
        );
        let rows = self.read_only("load_bars", |tx| {
            tx.query(
                &sql,
                &[
                    &self.exchange,
                    &self.market,
                    &self.symbol,
                    &self.timeframe,
                    &start,
                    &end,
                ],
            )
        })?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let rows_len = rows.len();
        let mut bars: Vec<Bar> = rows
            .iter()
            .map(|row| {
                let timestamp: DateTime<Utc> = row.get(0);
                Bar {
                    timestamp: timestamp.timestamp(),
                    open: row.get(1),
                    high: row.get(2),
                    low: row.get(3),
                    close: row.get(4),
                    volume: row.get(5),
                }
            })
            .collect();
        let dropped = canonicalize_bars(&mut bars);

        metrics::counter!("augur.infra.postgres.load_bars.rows_returned_total")
            .increment(rows_len as u64);
        metrics::gauge!("augur.infra.postgres.load_bars.bars_loaded").set(bars.len() as f64);
        tracing::debug!(rows = rows_len, bars = bars.len(), dropped, "loaded bars");
        Ok(bars)
    }

    fn dry_run(&self, artifact: &str) -> Result<(), StoreError> {
        let sql = probe_sql(artifact);
        self.read_only("dry_run", |tx| tx.prepare(&sql).map(|_| ()))
    }

    fn count_rows(&self, artifact: &str) -> Result<u64, StoreError> {
        let sql = count_sql(artifact);
        let row = self.read_only("count_rows", |tx| tx.query_one(&sql, &[]))?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn fetch(
        &self,
        artifact: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<ArtifactRows, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let probe = probe_sql(artifact);
        let sql = fetch_sql(artifact, limit);
        let (columns, lines) = self.read_only("fetch", |tx| {
            let statement = tx.prepare(&probe)?;
            let columns: Vec<String> = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let rows = tx.query(&sql, &[])?;
            let lines: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
            Ok((columns, lines))
        })?;

        let mut out = ArtifactRows {
            columns,
            rows: Vec::with_capacity(lines.len()),
        };
        for line in lines {
            let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
                .map_err(|err| StoreError::Query(format!("undecodable row: {err}")))?;
            out.rows.push(
                out.columns
                    .iter()
                    .map(|c| object.get(c).cloned().unwrap_or(serde_json::Value::Null))
                    .collect(),
            );
        }
        metrics::counter!("augur.infra.postgres.fetch.rows_total").increment(out.rows.len() as u64);
        Ok(out)
    }
}

fn probe_sql(artifact: &str) -> String {
    format!("SELECT * FROM ({}) AS probe LIMIT 0", strip_terminator(artifact))
}

fn count_sql(artifact: &str) -> String {
    format!("SELECT count(*) FROM ({}) AS probe", strip_terminator(artifact))
}

/// Each row comes back as one JSON object so every column type decodes the
/// same way; column order is taken from the prepared probe.
fn fetch_sql(artifact: &str, limit: usize) -> String {
    format!(
        "SELECT row_to_json(probe)::text FROM (SELECT * FROM ({}) AS inner_probe LIMIT {}) AS probe",
        strip_terminator(artifact),
        limit
    )
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| StoreError::Query(format!("timestamp out of range: {timestamp}")))
}

fn classify_error(err: postgres::Error, started: Instant) -> StoreError {
    if err.code() == Some(&SqlState::QUERY_CANCELED) {
        return StoreError::Timeout {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
    }
    match err.as_db_error() {
        Some(db) => StoreError::Query(db.message().to_string()),
        None => StoreError::Unavailable(err.to_string()),
    }
}

fn validate_table_name(table: &str) -> Result<(), String> {
    if table.is_empty() {
        return Err("table name is empty".to_string());
    }
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("invalid table name: {table}"));
    }
    for part in parts {
        let mut chars = part.chars();
        let first = match chars.next() {
            Some(ch) => ch,
            None => return Err(format!("invalid table name: {table}")),
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(format!("invalid table name: {table}"));
        }
        if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(format!("invalid table name: {table}"));
        }
    }
    Ok(())
}
