//! Wire form of the analytical intent a language model emits. Everything here
//! is untrusted: the plan builder turns it into typed queries or rejects it.

use crate::entities::operation::{Extreme, OffsetUnit, SortOrder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub atoms: Vec<RawAtom>,
    #[serde(default, skip_serializing_if = "RawParams::is_empty")]
    pub params: RawParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// `when` and `what` are optional on the wire so their absence surfaces as an
/// incomplete-spec error from the plan builder instead of a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAtom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<OffsetUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extreme: Option<Extreme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Vec<f64>>,
}

impl RawParams {
    pub fn is_empty(&self) -> bool {
        *self == RawParams::default()
    }
}

/// Filter expression: either a bare vocabulary term or an explicit node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Term(String),
    Node(Box<FilterNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    All(Vec<FilterSpec>),
    Any(Vec<FilterSpec>),
    Not(FilterSpec),
    Compare(CompareSpec),
    Weekday(String),
    Session(String),
    Pattern(String),
    Event(String),
    TimeBetween(TimeBetweenSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareSpec {
    pub metric: String,
    pub op: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeBetweenSpec {
    pub from: String,
    pub to: String,
}

/// Accepts either a single step object or an array of steps.
pub fn parse_steps(json: &str) -> Result<Vec<RawStep>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<RawStep>),
        One(RawStep),
    }

    Ok(match serde_json::from_str::<OneOrMany>(json)? {
        OneOrMany::Many(steps) => steps,
        OneOrMany::One(step) => vec![step],
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_steps, FilterNode, FilterSpec};

    #[test]
    fn parses_nested_filters_and_missing_when() {
        let steps = parse_steps(
            r#"{"id":"s1","operation":"count","atoms":[{"what":"change_pct",
                "filter":{"all":["monday",{"compare":{"metric":"gap_pct","op":">","value":0.5}}]}}]}"#,
        )
        .expect("parse");
        assert_eq!(steps.len(), 1);
        let atom = &steps[0].atoms[0];
        assert!(atom.when.is_none());
        match atom.filter.as_ref().expect("filter") {
            FilterSpec::Node(node) => match node.as_ref() {
                FilterNode::All(children) => {
                    assert_eq!(children[0], FilterSpec::Term("monday".to_string()));
                    assert_eq!(children.len(), 2);
                }
                other => panic!("unexpected node {other:?}"),
            },
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_params() {
        let err = parse_steps(
            r#"[{"id":"s1","operation":"list","atoms":[],"params":{"limit":3}}]"#,
        );
        assert!(err.is_err());
    }
}
