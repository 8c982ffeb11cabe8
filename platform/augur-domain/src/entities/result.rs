use crate::entities::operation::OperationKind;
use crate::value_objects::interval::Interval;
use crate::value_objects::row::Row;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Scalar,
    Series,
    Pairs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    /// Valid result with no sample to compute the statistic from ("no data").
    InsufficientSample,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRecord {
    pub key: String,
    pub values: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AggregateRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: BTreeMap::new(),
            note: None,
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        if value.is_finite() {
            self.values.insert(name.to_string(), value);
        }
        self
    }

    pub fn with_opt(self, name: &str, value: Option<f64>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub input_rows: usize,
    pub filtered_rows: usize,
    pub filters_applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    pub timeframe: String,
}

/// Output of one step. `rows` is the step's output relation, the universe a
/// downstream `from` step reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpResult {
    pub step_id: String,
    pub operation: OperationKind,
    pub shape: Shape,
    pub status: ResultStatus,
    pub rows: Vec<Row>,
    pub records: Vec<AggregateRecord>,
    pub metadata: ResultMetadata,
}

impl OpResult {
    pub fn is_insufficient(&self) -> bool {
        self.status == ResultStatus::InsufficientSample
    }

    pub fn record(&self, key: &str) -> Option<&AggregateRecord> {
        self.records.iter().find(|r| r.key == key)
    }
}
