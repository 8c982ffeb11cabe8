use crate::entities::query::Query;
use crate::entities::step::RawParams;
use crate::errors::PlanError;
use crate::value_objects::metric::Metric;
use crate::value_objects::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_BUCKETS: usize = 10;
pub const MAX_BUCKETS: usize = 100;
pub const DEFAULT_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];
pub const DEFAULT_STREAK_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    Count,
    Compare,
    Correlation,
    Around,
    Streak,
    Distribution,
    Probability,
    Formation,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        OperationKind::List,
        OperationKind::Count,
        OperationKind::Compare,
        OperationKind::Correlation,
        OperationKind::Around,
        OperationKind::Streak,
        OperationKind::Distribution,
        OperationKind::Probability,
        OperationKind::Formation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::Count => "count",
            OperationKind::Compare => "compare",
            OperationKind::Correlation => "correlation",
            OperationKind::Around => "around",
            OperationKind::Streak => "streak",
            OperationKind::Distribution => "distribution",
            OperationKind::Probability => "probability",
            OperationKind::Formation => "formation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnit {
    #[default]
    Bars,
    Days,
    Hours,
    Minutes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extreme {
    #[default]
    Max,
    Min,
}

/// One analytical operation with exactly the inputs it uses. Required
/// fields are enforced by [`OperationSpec::from_raw`]; nothing downstream
/// re-checks them.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationSpec {
    List {
        query: Query,
        n: Option<usize>,
        sort: Option<SortOrder>,
        by: Metric,
    },
    Count {
        query: Query,
    },
    Compare {
        queries: Vec<Query>,
    },
    Correlation {
        left: Query,
        right: Query,
    },
    Around {
        trigger: Query,
        offset: i64,
        unit: OffsetUnit,
    },
    Streak {
        query: Query,
        condition: Predicate,
        min_len: usize,
    },
    Distribution {
        query: Query,
        buckets: usize,
        percentiles: Vec<f64>,
    },
    Probability {
        query: Query,
        condition: Predicate,
        outcome: Predicate,
        offset: i64,
    },
    Formation {
        query: Query,
        extreme: Extreme,
    },
}

/// Params already resolved against the vocabulary by the plan builder.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    pub by: Option<Metric>,
    pub condition: Option<Predicate>,
    pub outcome: Option<Predicate>,
}

impl OperationSpec {
    pub fn from_raw(
        step_id: &str,
        kind: OperationKind,
        queries: Vec<Query>,
        raw: &RawParams,
        resolved: ResolvedParams,
    ) -> Result<Self, PlanError> {
        let invalid = |message: String| PlanError::InvalidStep {
            step: step_id.to_string(),
            message,
        };
        let count = queries.len();
        let arity = |expected: &str| {
            invalid(format!("{kind} takes {expected} atom(s), got {count}"))
        };

        let spec = match kind {
            OperationKind::Compare => {
                if count < 2 {
                    return Err(arity("at least 2"));
                }
                OperationSpec::Compare { queries }
            }
            OperationKind::Correlation => {
                let Ok([left, right]) = <[Query; 2]>::try_from(queries) else {
                    return Err(arity("exactly 2"));
                };
                OperationSpec::Correlation { left, right }
            }
            _ => {
                let Ok([mut query]) = <[Query; 1]>::try_from(queries) else {
                    return Err(arity("exactly 1"));
                };
                match kind {
                    OperationKind::List => {
                        if raw.n == Some(0) {
                            return Err(invalid("list n must be at least 1".to_string()));
                        }
                        OperationSpec::List {
                            by: resolved.by.unwrap_or(query.metric),
                            query,
                            n: raw.n,
                            sort: raw.sort,
                        }
                    }
                    OperationKind::Count => OperationSpec::Count { query },
                    OperationKind::Around => {
                        let offset = raw.offset.unwrap_or(0);
                        if offset == 0 {
                            return Err(invalid(
                                "around needs a non-zero params.offset".to_string(),
                            ));
                        }
                        OperationSpec::Around {
                            trigger: query,
                            offset,
                            unit: raw.unit.unwrap_or_default(),
                        }
                    }
                    OperationKind::Streak => {
                        let condition = match resolved.condition {
                            Some(condition) => condition,
                            None => query.predicate.take().ok_or_else(|| {
                                invalid(
                                    "streak needs params.condition or an atom filter"
                                        .to_string(),
                                )
                            })?,
                        };
                        let min_len = raw.n.unwrap_or(DEFAULT_STREAK_LEN);
                        if min_len == 0 {
                            return Err(invalid("streak n must be at least 1".to_string()));
                        }
                        OperationSpec::Streak {
                            query,
                            condition,
                            min_len,
                        }
                    }
                    OperationKind::Distribution => {
                        let buckets = raw.buckets.unwrap_or(DEFAULT_BUCKETS);
                        if buckets == 0 || buckets > MAX_BUCKETS {
                            return Err(invalid(format!(
                                "distribution buckets must be within 1..={MAX_BUCKETS}"
                            )));
                        }
                        let percentiles = raw
                            .percentiles
                            .clone()
                            .unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec());
                        if let Some(bad) = percentiles
                            .iter()
                            .find(|p| !p.is_finite() || !(0.0..=100.0).contains(*p))
                        {
                            return Err(invalid(format!(
                                "percentile {bad} is outside 0..=100"
                            )));
                        }
                        OperationSpec::Distribution {
                            query,
                            buckets,
                            percentiles,
                        }
                    }
                    OperationKind::Probability => {
                        let outcome = resolved.outcome.ok_or_else(|| {
                            invalid("probability needs params.outcome".to_string())
                        })?;
                        let condition = query.predicate.take().unwrap_or_else(Predicate::always);
                        OperationSpec::Probability {
                            query,
                            condition,
                            outcome,
                            offset: raw.offset.unwrap_or(0),
                        }
                    }
                    OperationKind::Formation => OperationSpec::Formation {
                        query,
                        extreme: raw.extreme.unwrap_or_default(),
                    },
                    OperationKind::Compare | OperationKind::Correlation => {
                        unreachable_kind(step_id, kind)?
                    }
                }
            }
        };
        Ok(spec)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationSpec::List { .. } => OperationKind::List,
            OperationSpec::Count { .. } => OperationKind::Count,
            OperationSpec::Compare { .. } => OperationKind::Compare,
            OperationSpec::Correlation { .. } => OperationKind::Correlation,
            OperationSpec::Around { .. } => OperationKind::Around,
            OperationSpec::Streak { .. } => OperationKind::Streak,
            OperationSpec::Distribution { .. } => OperationKind::Distribution,
            OperationSpec::Probability { .. } => OperationKind::Probability,
            OperationSpec::Formation { .. } => OperationKind::Formation,
        }
    }

    pub fn queries(&self) -> Vec<&Query> {
        match self {
            OperationSpec::Compare { queries } => queries.iter().collect(),
            OperationSpec::Correlation { left, right } => vec![left, right],
            OperationSpec::List { query, .. }
            | OperationSpec::Count { query }
            | OperationSpec::Streak { query, .. }
            | OperationSpec::Distribution { query, .. }
            | OperationSpec::Probability { query, .. }
            | OperationSpec::Formation { query, .. } => vec![query],
            OperationSpec::Around { trigger, .. } => vec![trigger],
        }
    }
}

fn unreachable_kind(step_id: &str, kind: OperationKind) -> Result<OperationSpec, PlanError> {
    Err(PlanError::InvalidStep {
        step: step_id.to_string(),
        message: format!("{kind} is not a single-atom operation"),
    })
}
