use crate::value_objects::metric::Metric;
use crate::value_objects::pattern::CandlePattern;
use crate::value_objects::row::Row;
use crate::value_objects::tag::Tag;
use chrono::{NaiveTime, Timelike, Weekday};
use std::fmt;

const EQ_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn parse(op: &str) -> Option<Self> {
        let op = match op.trim().to_lowercase().as_str() {
            "<" | "lt" => CmpOp::Lt,
            "<=" | "lte" | "le" => CmpOp::Le,
            ">" | "gt" => CmpOp::Gt,
            ">=" | "gte" | "ge" => CmpOp::Ge,
            "=" | "==" | "eq" => CmpOp::Eq,
            "!=" | "<>" | "ne" => CmpOp::Ne,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Eq => (lhs - rhs).abs() <= EQ_EPSILON,
            CmpOp::Ne => (lhs - rhs).abs() > EQ_EPSILON,
        }
    }
}

/// Executable row predicate. Built only from registry-resolved values, never
/// from free text, so evaluating it cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare { metric: Metric, op: CmpOp, value: f64 },
    Weekday(Weekday),
    Session(Tag),
    Pattern(CandlePattern),
    Event(Tag),
    TimeBetween { from: NaiveTime, to: NaiveTime },
}

impl Predicate {
    pub fn always() -> Self {
        Predicate::All(Vec::new())
    }

    pub fn metric(metric: Metric) -> MetricCondition {
        MetricCondition { metric }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::All(mut parts) => {
                parts.push(other);
                Predicate::All(parts)
            }
            first => Predicate::All(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// True when the predicate reads sub-day fields (session, time of day).
    pub fn is_intraday(&self) -> bool {
        match self {
            Predicate::All(parts) | Predicate::Any(parts) => parts.iter().any(Predicate::is_intraday),
            Predicate::Not(inner) => inner.is_intraday(),
            Predicate::Session(_) | Predicate::TimeBetween { .. } => true,
            _ => false,
        }
    }

    /// Metric comparisons are false when the metric is undefined for the row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Any(parts) => parts.iter().any(|p| p.matches(row)),
            Predicate::Not(inner) => !inner.matches(row),
            Predicate::Compare { metric, op, value } => metric
                .value(row)
                .is_some_and(|actual| op.apply(actual, *value)),
            Predicate::Weekday(day) => row.weekday == *day,
            Predicate::Session(tag) => row.session.as_ref() == Some(tag),
            Predicate::Pattern(pattern) => row.patterns.contains(*pattern),
            Predicate::Event(tag) => row.events.contains(tag),
            Predicate::TimeBetween { from, to } => {
                let t = row.time.time();
                let t = NaiveTime::from_hms_opt(t.hour(), t.minute(), t.second()).unwrap_or(t);
                if from <= to {
                    *from <= t && t < *to
                } else {
                    t >= *from || t < *to
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All(parts) if parts.is_empty() => f.write_str("true"),
            Predicate::All(parts) => write_joined(f, parts, " AND "),
            Predicate::Any(parts) if parts.is_empty() => f.write_str("false"),
            Predicate::Any(parts) => write_joined(f, parts, " OR "),
            Predicate::Not(inner) => write!(f, "NOT {inner}"),
            Predicate::Compare { metric, op, value } => {
                write!(f, "{metric} {} {value}", op.symbol())
            }
            Predicate::Weekday(day) => write!(f, "weekday = {day}"),
            Predicate::Session(tag) => write!(f, "session = {tag}"),
            Predicate::Pattern(pattern) => write!(f, "pattern = {pattern}"),
            Predicate::Event(tag) => write!(f, "event = {tag}"),
            Predicate::TimeBetween { from, to } => {
                write!(f, "time in [{}, {})", from.format("%H:%M"), to.format("%H:%M"))
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

/// Typed builder: `Predicate::metric(Metric::ChangePct).lt(0.0)`.
#[derive(Debug, Clone, Copy)]
pub struct MetricCondition {
    metric: Metric,
}

impl MetricCondition {
    pub fn cmp(self, op: CmpOp, value: f64) -> Predicate {
        Predicate::Compare {
            metric: self.metric,
            op,
            value,
        }
    }

    pub fn lt(self, value: f64) -> Predicate {
        self.cmp(CmpOp::Lt, value)
    }

    pub fn le(self, value: f64) -> Predicate {
        self.cmp(CmpOp::Le, value)
    }

    pub fn gt(self, value: f64) -> Predicate {
        self.cmp(CmpOp::Gt, value)
    }

    pub fn ge(self, value: f64) -> Predicate {
        self.cmp(CmpOp::Ge, value)
    }

    pub fn eq(self, value: f64) -> Predicate {
        self.cmp(CmpOp::Eq, value)
    }
}

#[cfg(test)]
mod tests {
    use super::{CmpOp, Predicate};
    use crate::value_objects::metric::Metric;

    #[test]
    fn builder_and_display() {
        let p = Predicate::metric(Metric::ChangePct)
            .lt(0.0)
            .and(Predicate::Weekday(chrono::Weekday::Mon));
        assert_eq!(p.to_string(), "(change_pct < 0 AND weekday = Mon)");
        assert_eq!(Predicate::always().to_string(), "true");
    }

    #[test]
    fn operator_aliases() {
        assert_eq!(CmpOp::parse("gte"), Some(CmpOp::Ge));
        assert_eq!(CmpOp::parse("<>"), Some(CmpOp::Ne));
        assert_eq!(CmpOp::parse("~"), None);
        assert!(CmpOp::Eq.apply(0.1 + 0.2, 0.3));
    }

    #[test]
    fn double_negation_collapses() {
        let p = Predicate::metric(Metric::Volume).gt(10.0);
        assert_eq!(p.clone().negate().negate(), p);
    }
}
