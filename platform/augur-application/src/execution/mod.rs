//! Plan execution: materializes each query's rows (fresh store scan or an
//! upstream step's output), runs the operation engine, and publishes
//! lifecycle events. Steps of one dependency wave run on scoped threads;
//! a request-level watchdog enforces the request timeout and cancellation.

use crate::config::Settings;
use crate::errors::ExecutionError;
use augur_domain::entities::query::{Plan, PlannedStep, Query, QueryInput};
use augur_domain::entities::result::OpResult;
use augur_domain::errors::{PlanError, StoreError};
use augur_domain::events::pipeline_event::PipelineEvent;
use augur_domain::repositories::events::EventSink;
use augur_domain::repositories::row_store::{ArtifactRows, BarQuery, CancelToken, RowStore};
use augur_domain::services::operations;
use augur_domain::services::rows::{derive_rows, lookback_seconds, resample_bars, trim_to_interval};
use augur_domain::value_objects::bar::Bar;
use augur_domain::value_objects::row::Row;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const WATCHDOG_POLL: Duration = Duration::from_millis(20);

/// Bars loaded during one request, keyed by the exact range. Steps that scan
/// the same range share one load: a caller finding a load in flight waits on
/// that range's slot instead of scanning again. Failed loads are not kept.
#[derive(Default)]
struct BarCache {
    slots: Mutex<HashMap<BarQuery, Arc<Mutex<Option<Arc<Vec<Bar>>>>>>>,
}

impl BarCache {
    fn get_or_load(
        &self,
        query: BarQuery,
        load: impl FnOnce() -> Result<Vec<Bar>, StoreError>,
    ) -> Result<Arc<Vec<Bar>>, StoreError> {
        let cell = Arc::clone(
            self.slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(query)
                .or_default(),
        );
        let mut slot = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bars) = slot.as_ref() {
            return Ok(Arc::clone(bars));
        }
        let bars = Arc::new(load()?);
        *slot = Some(Arc::clone(&bars));
        Ok(bars)
    }
}

/// Per-request state shared by every step thread.
struct RequestScope<'r> {
    token: CancelToken,
    caller: &'r CancelToken,
    timed_out: AtomicBool,
    started: Instant,
    cache: BarCache,
}

impl RequestScope<'_> {
    fn interrupted(&self) -> Option<ExecutionError> {
        if self.timed_out.load(Ordering::Relaxed) {
            Some(ExecutionError::TimedOut {
                elapsed_ms: elapsed_ms(self.started),
            })
        } else if self.caller.is_cancelled() {
            Some(ExecutionError::Cancelled)
        } else {
            None
        }
    }
}

pub struct PlanExecutor<'a> {
    store: &'a dyn RowStore,
    settings: &'a Settings,
    events: &'a dyn EventSink,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(store: &'a dyn RowStore, settings: &'a Settings, events: &'a dyn EventSink) -> Self {
        Self {
            store,
            settings,
            events,
        }
    }

    /// Runs every step and returns their results in plan order. The first
    /// failing step cancels its siblings and ends the request.
    pub fn execute(&self, plan: &Plan, cancel: &CancelToken) -> Result<Vec<OpResult>, ExecutionError> {
        let span = tracing::info_span!("plan.execute", steps = plan.len());
        let _guard = span.enter();

        let scope = RequestScope {
            token: CancelToken::new(),
            caller: cancel,
            timed_out: AtomicBool::new(false),
            started: Instant::now(),
            cache: BarCache::default(),
        };
        let deadline = scope.started + self.settings.timeouts.request;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let outcome = thread::scope(|threads| {
            let watched = &scope;
            threads.spawn(move || watchdog(stop_rx, watched, deadline));
            let outcome = self.run_layers(plan, watched);
            drop(stop_tx);
            outcome
        });

        let elapsed = elapsed_ms(scope.started);
        metrics::histogram!("augur.app.executor.request_ms").record(elapsed as f64);
        match &outcome {
            Ok(results) => {
                metrics::counter!("augur.app.executor.requests_total", "result" => "ok").increment(1);
                tracing::info!(steps = results.len(), elapsed_ms = elapsed, "plan executed");
                self.events.emit(&PipelineEvent::ResultReady {
                    steps: results.len(),
                    elapsed_ms: elapsed,
                });
            }
            Err(err) => {
                metrics::counter!("augur.app.executor.requests_total", "result" => "error").increment(1);
                tracing::warn!(error = %err, elapsed_ms = elapsed, "plan execution failed");
            }
        }
        outcome
    }

    /// Runs a validated raw query artifact with the same store retry policy
    /// as step scans.
    pub fn fetch_artifact(
        &self,
        artifact: &str,
        cancel: &CancelToken,
    ) -> Result<ArtifactRows, StoreError> {
        let limit = usize::try_from(self.settings.max_rows).unwrap_or(usize::MAX);
        self.with_store_retries("fetch", cancel, || {
            self.store.fetch(artifact, limit, cancel)
        })
    }

    fn run_layers(&self, plan: &Plan, scope: &RequestScope<'_>) -> Result<Vec<OpResult>, ExecutionError> {
        let mut done: HashMap<String, OpResult> = HashMap::with_capacity(plan.len());

        for layer in plan.layers() {
            if let Some(err) = scope.interrupted() {
                return Err(err);
            }
            let finished = &done;
            let outputs: Vec<Result<OpResult, ExecutionError>> = if layer.len() == 1 {
                layer
                    .iter()
                    .map(|&i| self.run_step(&plan.steps()[i], finished, scope))
                    .collect()
            } else {
                thread::scope(|threads| {
                    let handles: Vec<_> = layer
                        .iter()
                        .map(|&i| {
                            let step = &plan.steps()[i];
                            threads.spawn(move || self.run_step(step, finished, scope))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| {
                            handle
                                .join()
                                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                        })
                        .collect()
                })
            };

            let mut first_error: Option<ExecutionError> = None;
            let mut results = Vec::with_capacity(outputs.len());
            for output in outputs {
                match output {
                    Ok(result) => results.push(result),
                    // A sibling cancelled by the failing step is not the cause.
                    Err(err) => {
                        let replace = first_error
                            .as_ref()
                            .is_none_or(|kept| is_cancellation(kept) && !is_cancellation(&err));
                        if replace {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(scope.interrupted().unwrap_or(err));
            }
            for result in results {
                done.insert(result.step_id.clone(), result);
            }
        }

        Ok(plan
            .steps()
            .iter()
            .filter_map(|step| done.remove(&step.id))
            .collect())
    }

    fn run_step(
        &self,
        step: &PlannedStep,
        done: &HashMap<String, OpResult>,
        scope: &RequestScope<'_>,
    ) -> Result<OpResult, ExecutionError> {
        let operation = step.kind();
        let span = tracing::info_span!("plan.step", step = %step.id, operation = operation.name());
        let _guard = span.enter();
        self.events.emit(&PipelineEvent::StepStarted {
            step_id: step.id.clone(),
            operation,
        });
        let started = Instant::now();

        let result = self.materialize(step, done, scope).and_then(|inputs| {
            operations::execute(&step.id, &step.operation, &inputs).map_err(|source| {
                ExecutionError::Engine {
                    step: step.id.clone(),
                    source,
                }
            })
        });

        let elapsed = elapsed_ms(started);
        metrics::histogram!("augur.app.executor.step_ms", "operation" => operation.name())
            .record(elapsed as f64);
        match &result {
            Ok(output) => {
                metrics::counter!(
                    "augur.app.executor.steps_total",
                    "operation" => operation.name(),
                    "result" => "ok"
                )
                .increment(1);
                tracing::debug!(
                    rows = output.rows.len(),
                    records = output.records.len(),
                    status = ?output.status,
                    elapsed_ms = elapsed,
                    "step finished"
                );
                self.events.emit(&PipelineEvent::StepFinished {
                    step_id: step.id.clone(),
                    operation,
                    status: output.status,
                    rows: output.rows.len(),
                    records: output.records.len(),
                    elapsed_ms: elapsed,
                });
            }
            Err(err) => {
                scope.token.cancel();
                metrics::counter!(
                    "augur.app.executor.steps_total",
                    "operation" => operation.name(),
                    "result" => "error"
                )
                .increment(1);
                tracing::warn!(error = %err, "step failed");
                self.events.emit(&PipelineEvent::StepFailed {
                    step_id: step.id.clone(),
                    operation,
                    error: err.to_string(),
                });
            }
        }
        result
    }

    /// One input relation per query, in query order.
    fn materialize(
        &self,
        step: &PlannedStep,
        done: &HashMap<String, OpResult>,
        scope: &RequestScope<'_>,
    ) -> Result<Vec<Vec<Row>>, ExecutionError> {
        step.operation
            .queries()
            .into_iter()
            .map(|query| match &query.input {
                QueryInput::Scan => self.scan(&step.id, query, scope),
                QueryInput::Upstream(from) => {
                    let upstream = done.get(from).ok_or_else(|| PlanError::UpstreamMissing {
                        step: step.id.clone(),
                        from: from.clone(),
                    })?;
                    Ok(trim_to_interval(upstream.rows.clone(), &query.interval))
                }
            })
            .collect()
    }

    fn scan(&self, step: &str, query: &Query, scope: &RequestScope<'_>) -> Result<Vec<Row>, ExecutionError> {
        let clock = self.settings.clock;
        let range = BarQuery {
            start: clock.to_utc(query.interval.start) - lookback_seconds(&query.timeframe),
            end: clock.to_utc(query.interval.end),
        };
        let store_error = |source| ExecutionError::Store {
            step: step.to_string(),
            source,
        };

        let bars = scope
            .cache
            .get_or_load(range, || {
                self.with_store_retries("load_bars", &scope.token, || {
                    self.store.load_bars(&range, &scope.token)
                })
            })
            .map_err(store_error)?;
        tracing::debug!(bars = bars.len(), start = range.start, end = range.end, "loaded bars");

        let bars = if query.timeframe == self.settings.base_timeframe {
            bars
        } else {
            Arc::new(
                resample_bars(&bars, &query.timeframe, &clock).map_err(|message| {
                    ExecutionError::Resample {
                        step: step.to_string(),
                        message,
                    }
                })?,
            )
        };
        let rows = derive_rows(&bars, &query.timeframe, &clock, &self.settings.vocabulary);
        Ok(trim_to_interval(rows, &query.interval))
    }

    /// Retries transient failures up to `store_retries` times. A call that
    /// returns after the per-query timeout is discarded as timed out.
    fn with_store_retries<T>(
        &self,
        call: &'static str,
        cancel: &CancelToken,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let limit = self.settings.timeouts.query;
        let mut retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let started = Instant::now();
            let result = match op() {
                Ok(_) if started.elapsed() > limit => Err(StoreError::Timeout {
                    elapsed_ms: elapsed_ms(started),
                }),
                other => other,
            };
            metrics::histogram!("augur.app.executor.store_ms", "call" => call)
                .record(started.elapsed().as_secs_f64() * 1000.0);

            match result {
                Err(err) if err.is_transient() && retries < self.settings.retry.store_retries => {
                    retries += 1;
                    metrics::counter!("augur.app.executor.store_retries_total", "call" => call)
                        .increment(1);
                    tracing::warn!(call, retry = retries, error = %err, "transient store failure");
                }
                other => {
                    let label = if other.is_ok() { "ok" } else { "error" };
                    metrics::counter!(
                        "augur.app.executor.store_calls_total",
                        "call" => call,
                        "result" => label
                    )
                    .increment(1);
                    return other;
                }
            }
        }
    }
}

/// Cancels the request token when the deadline passes or the caller cancels.
/// Exits as soon as the run hangs up its end of `stop`.
fn watchdog(stop: Receiver<()>, scope: &RequestScope<'_>, deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            scope.timed_out.store(true, Ordering::Relaxed);
            scope.token.cancel();
            tracing::warn!("request deadline reached; cancelling in-flight queries");
            return;
        }
        match stop.recv_timeout((deadline - now).min(WATCHDOG_POLL)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                if scope.caller.is_cancelled() {
                    scope.token.cancel();
                    return;
                }
            }
        }
    }
}

fn is_cancellation(err: &ExecutionError) -> bool {
    matches!(
        err,
        ExecutionError::Store {
            source: StoreError::Cancelled,
            ..
        }
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::BarCache;
    use augur_domain::errors::StoreError;
    use augur_domain::repositories::row_store::BarQuery;
    use augur_domain::value_objects::bar::Bar;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn bar(timestamp: i64) -> Bar {
        Bar {
            timestamp,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn concurrent_callers_share_one_load() {
        let cache = BarCache::default();
        let loads = AtomicUsize::new(0);
        let barrier = Barrier::new(4);
        let query = BarQuery { start: 0, end: 60 };

        let shared: Vec<Arc<Vec<Bar>>> = thread::scope(|threads| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    threads.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_load(query, || {
                                loads.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                Ok(vec![bar(0)])
                            })
                            .expect("bars")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("join")).collect()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(shared.iter().all(|bars| Arc::ptr_eq(bars, &shared[0])));
    }

    #[test]
    fn failed_load_is_retried_and_ranges_stay_apart() {
        let cache = BarCache::default();
        let query = BarQuery { start: 0, end: 60 };

        let err = cache
            .get_or_load(query, || Err(StoreError::Unavailable("reset".to_string())))
            .expect_err("first load fails");
        assert!(matches!(err, StoreError::Unavailable(_)));

        let bars = cache.get_or_load(query, || Ok(vec![bar(0)])).expect("second load");
        assert_eq!(bars.len(), 1);
        let other = cache
            .get_or_load(BarQuery { start: 60, end: 120 }, || Ok(vec![bar(60), bar(90)]))
            .expect("other range");
        assert_eq!(other.len(), 2);
    }
}
