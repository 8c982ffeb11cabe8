use augur_application::config::{LogFormat, LoggingConfig};
use std::net::SocketAddr;

pub const LOG_ENV: &str = "AUGUR_LOG";

/// `AUGUR_LOG` wins over `[logging].level`; logs go to stderr so stdout
/// stays machine-readable.
pub fn init_tracing(logging: Option<&LoggingConfig>) -> Result<(), String> {
    let configured = logging
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = match std::env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => configured,
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let format = logging.and_then(|l| l.format).unwrap_or_default();
    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = addr.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid --metrics-addr (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    if addr.is_some_and(|raw| !raw.trim().is_empty()) {
        return Err("metrics exporter requires augur feature `prometheus`".to_string());
    }
    Ok(None)
}

#[cfg(all(test, feature = "prometheus"))]
mod tests {
    use super::init_metrics;

    #[test]
    fn blank_or_missing_addr_disables_exporter() {
        assert_eq!(init_metrics(None).expect("none"), None);
        assert_eq!(init_metrics(Some("  ")).expect("blank"), None);
    }

    #[test]
    fn malformed_addr_is_rejected_before_install() {
        let err = init_metrics(Some("not-an-addr")).expect_err("bad addr");
        assert!(err.contains("--metrics-addr"));
    }
}
