use crate::entities::operation::{OperationKind, OperationSpec};
use crate::errors::PlanError;
use crate::value_objects::group::GroupKey;
use crate::value_objects::interval::Interval;
use crate::value_objects::metric::Metric;
use crate::value_objects::predicate::Predicate;
use crate::value_objects::row::Row;
use crate::value_objects::timeframe::Timeframe;
use std::collections::{BTreeSet, HashMap};

/// Where a query's rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryInput {
    /// Fresh read from the row store.
    Scan,
    /// The materialized output relation of an earlier step.
    Upstream(String),
}

/// One resolved atom: everything needed to produce and filter its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub label: String,
    pub interval: Interval,
    pub metric: Metric,
    pub predicate: Option<Predicate>,
    pub group: Option<GroupKey>,
    pub timeframe: Timeframe,
    pub input: QueryInput,
}

impl Query {
    pub fn selects(&self, row: &Row) -> bool {
        self.predicate.as_ref().is_none_or(|p| p.matches(row))
    }

    pub fn filters_applied(&self) -> Vec<String> {
        self.predicate.iter().map(|p| p.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub id: String,
    pub from: Option<String>,
    pub operation: OperationSpec,
}

impl PlannedStep {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

/// Steps of one request in dependency order. Built per request and dropped
/// after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    steps: Vec<PlannedStep>,
}

impl Plan {
    /// Orders steps so every `from` precedes its consumer; among ready steps
    /// the original order is kept.
    pub fn new(steps: Vec<PlannedStep>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.as_str(), i).is_some() {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }
        let mut upstream: Vec<Option<usize>> = Vec::with_capacity(steps.len());
        for step in &steps {
            let dep = match &step.from {
                Some(from) => Some(*index.get(from.as_str()).ok_or_else(|| {
                    PlanError::UnknownStep {
                        step: step.id.clone(),
                        from: from.clone(),
                    }
                })?),
                None => None,
            };
            upstream.push(dep);
        }

        let mut placed = vec![false; steps.len()];
        let mut order = Vec::with_capacity(steps.len());
        while order.len() < steps.len() {
            let ready = (0..steps.len()).find(|&i| {
                !placed[i] && upstream[i].is_none_or(|dep| placed[dep])
            });
            match ready {
                Some(i) => {
                    placed[i] = true;
                    order.push(i);
                }
                None => {
                    let stuck = (0..steps.len()).find(|&i| !placed[i]).unwrap_or(0);
                    return Err(PlanError::Cycle(steps[stuck].id.clone()));
                }
            }
        }

        let mut slots: Vec<Option<PlannedStep>> = steps.into_iter().map(Some).collect();
        let steps = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Waves of step indices: every step in a wave depends only on earlier waves,
    /// so a wave's steps may run concurrently.
    pub fn layers(&self) -> Vec<Vec<usize>> {
        let position: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut depth = vec![0usize; self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(dep) = step.from.as_deref().and_then(|f| position.get(f)) {
                depth[i] = depth[*dep] + 1;
            }
        }
        let levels: BTreeSet<usize> = depth.iter().copied().collect();
        levels
            .into_iter()
            .map(|level| (0..self.steps.len()).filter(|&i| depth[i] == level).collect())
            .collect()
    }
}
