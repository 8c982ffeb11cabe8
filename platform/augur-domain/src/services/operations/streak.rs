use super::{row_label, selected, Outcome};
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::value_objects::predicate::Predicate;
use crate::value_objects::row::Row;

/// A maximal run of consecutive items satisfying a condition; `end` is
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub end: usize,
    pub length: usize,
}

/// Incremental run detector: one `push` per item in order, O(1) state.
/// Runs shorter than `min_len` are dropped when they close.
#[derive(Debug, Clone)]
pub struct RunScanner {
    min_len: usize,
    position: usize,
    run_start: Option<usize>,
}

impl RunScanner {
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len: min_len.max(1),
            position: 0,
            run_start: None,
        }
    }

    /// Feeds the next item; returns the run this item closed, if any.
    pub fn push(&mut self, holds: bool) -> Option<Run> {
        let at = self.position;
        self.position += 1;
        match (holds, self.run_start) {
            (true, None) => {
                self.run_start = Some(at);
                None
            }
            (false, Some(start)) => {
                self.run_start = None;
                self.close(start, at)
            }
            _ => None,
        }
    }

    /// Closes a run still open at the end of the sequence.
    pub fn finish(&mut self) -> Option<Run> {
        let start = self.run_start.take()?;
        self.close(start, self.position)
    }

    fn close(&self, start: usize, end_exclusive: usize) -> Option<Run> {
        let length = end_exclusive - start;
        (length >= self.min_len).then_some(Run {
            start,
            end: end_exclusive - 1,
            length,
        })
    }
}

pub fn find_runs<T>(items: &[T], condition: impl Fn(&T) -> bool, min_len: usize) -> Vec<Run> {
    let mut scanner = RunScanner::new(min_len);
    let mut runs: Vec<Run> = items
        .iter()
        .filter_map(|item| scanner.push(condition(item)))
        .collect();
    runs.extend(scanner.finish());
    runs
}

pub(super) fn run(query: &Query, condition: &Predicate, min_len: usize, rows: &[Row]) -> Outcome {
    let picked = selected(query, rows);
    let runs = find_runs(&picked, |row| condition.matches(row), min_len);

    let mut outcome = Outcome::new(Shape::Series, picked.len()).insufficient_if(picked.is_empty());
    for run in &runs {
        let members = &picked[run.start..=run.end];
        let total: f64 = members.iter().filter_map(|row| query.metric.value(row)).sum();
        outcome.records.push(
            AggregateRecord::new(format!(
                "{}..{}",
                row_label(picked[run.start]),
                row_label(picked[run.end])
            ))
            // Positions within the filtered rows, counted from 1.
            .with("first_row", (run.start + 1) as f64)
            .with("last_row", (run.end + 1) as f64)
            .with("length", run.length as f64)
            .with("total", total),
        );
        outcome.rows.extend(members.iter().map(|row| (*row).clone()));
    }
    outcome.records.push(
        AggregateRecord::new("summary")
            .with("runs", runs.len() as f64)
            .with("longest", runs.iter().map(|r| r.length).max().unwrap_or(0) as f64),
    );
    outcome
}
