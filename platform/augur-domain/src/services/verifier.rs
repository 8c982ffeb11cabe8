//! Result verifier: every number a generated summary asserts must be found
//! in the result it summarizes. Mismatches are issues for the summary's
//! author; the result itself is never adjusted.

use crate::entities::result::OpResult;
use crate::entities::validation::{Issue, IssueCategory, ValidationResult};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static DATE_OR_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d{4}-\d{2}-\d{2}(?:[ T]\d{2}:\d{2}(?::\d{2})?)?\b|\b\d{1,2}:\d{2}(?::\d{2})?\b|\b\d{4}-q[1-4]\b",
    )
    .expect("hardcoded date regex must compile")
});
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([+\-\u{2212}]?)(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)(\s?%)?")
        .expect("hardcoded number regex must compile")
});

/// Keys whose values are fractions a summary usually states as percentages.
const FRACTION_KEYS: [&str; 3] = ["probability", "share", "rate"];

/// A number asserted in text.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub text: String,
    pub value: f64,
    pub decimals: u32,
    pub signed: bool,
    pub percent: bool,
}

/// Every numeric value a result exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSheet {
    values: Vec<f64>,
}

impl FactSheet {
    pub fn from_json(value: &Value) -> Self {
        let mut sheet = Self::default();
        sheet.collect(None, value);
        sheet
    }

    /// Facts are the aggregate records and the row counts. Output rows are
    /// left out: a long series holds nearly any figure somewhere.
    pub fn from_results(results: &[OpResult]) -> Self {
        let mut sheet = Self::default();
        for result in results {
            for record in &result.records {
                for (name, value) in &record.values {
                    sheet.push(Some(name.as_str()), *value);
                }
            }
            sheet.values.extend([
                result.rows.len() as f64,
                result.records.len() as f64,
                result.metadata.input_rows as f64,
                result.metadata.filtered_rows as f64,
            ]);
        }
        sheet
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn collect(&mut self, key: Option<&str>, value: &Value) {
        match value {
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    self.push(key, v);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| self.collect(key, item)),
            // A serialized step result: same facts as `from_results`.
            Value::Object(map) if map.contains_key("step_id") && map.contains_key("records") => {
                if let Some(records) = map.get("records") {
                    self.collect(None, records);
                }
                let metadata = map.get("metadata");
                for count in ["input_rows", "filtered_rows"] {
                    if let Some(v) = metadata.and_then(|m| m[count].as_f64()) {
                        self.push(None, v);
                    }
                }
                for part in ["rows", "records"] {
                    if let Some(items) = map.get(part).and_then(Value::as_array) {
                        self.values.push(items.len() as f64);
                    }
                }
            }
            Value::Object(map) => map.iter().for_each(|(k, v)| self.collect(Some(k), v)),
            _ => {}
        }
    }

    fn push(&mut self, key: Option<&str>, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.values.push(value);
        if key.is_some_and(|k| FRACTION_KEYS.iter().any(|f| k.contains(f))) {
            self.values.push(value * 100.0);
        }
    }

    fn nearest(&self, target: f64) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
    }
}

/// Numeric claims in `text`. Dates, clock times, years and numbers glued to
/// letters (`p95`, `5min`, `Q4`) are not claims.
pub fn extract_claims(text: &str) -> Vec<Claim> {
    let masked = DATE_OR_TIME.replace_all(text, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()));
    let mut claims = Vec::new();

    for caps in NUMBER.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let before = masked[..whole.start()].chars().next_back();
        let after = masked[whole.end()..].chars().next();
        if before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
            || after.is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            continue;
        }

        let sign = caps.get(1).map_or("", |m| m.as_str());
        let digits = caps.get(2).map_or("", |m| m.as_str());
        let percent = caps.get(3).is_some();
        let Ok(magnitude) = digits.replace(',', "").parse::<f64>() else {
            continue;
        };
        let decimals = digits
            .split_once('.')
            .map_or(0, |(_, frac)| frac.len() as u32);
        let signed = !sign.is_empty();
        let looks_like_year = !signed
            && !percent
            && decimals == 0
            && !digits.contains(',')
            && (1900.0..=2100.0).contains(&magnitude);
        if looks_like_year {
            continue;
        }

        claims.push(Claim {
            text: whole.as_str().trim().to_string(),
            value: if sign == "+" || sign.is_empty() {
                magnitude
            } else {
                -magnitude
            },
            decimals,
            signed,
            percent,
        });
    }
    claims
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultVerifier {
    tolerance: f64,
}

impl ResultVerifier {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn verify(&self, summary: &str, facts: &FactSheet) -> ValidationResult {
        let issues = extract_claims(summary)
            .into_iter()
            .filter(|claim| !self.supported(claim, facts))
            .map(|claim| {
                let suggestion = facts
                    .nearest(claim.value)
                    .map(|v| format!("{v:.prec$}", prec = claim.decimals.max(2) as usize));
                Issue::hard(
                    IssueCategory::ClaimMismatch,
                    format!("'{}' does not match any value in the result", claim.text),
                )
                .with_suggestion(suggestion)
            })
            .collect();
        ValidationResult::from_issues(issues)
    }

    fn supported(&self, claim: &Claim, facts: &FactSheet) -> bool {
        // Rounding to the stated precision is not a mismatch.
        let rounding = 0.5 * 10f64.powi(-(claim.decimals.min(12) as i32));
        let tolerance = self.tolerance.max(rounding).max(claim.value.abs() * 1e-9);
        facts.values.iter().any(|fact| {
            if claim.signed {
                (fact - claim.value).abs() <= tolerance
            } else {
                (fact.abs() - claim.value).abs() <= tolerance
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_claims, FactSheet, ResultVerifier};
    use crate::entities::operation::OperationSpec;
    use crate::entities::validation::{IssueCategory, ValidationStatus};
    use crate::services::operations::execute;
    use crate::services::operations::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::value_objects::metric::Metric;
    use serde_json::json;

    fn facts() -> FactSheet {
        FactSheet::from_json(&json!({
            "records": [
                {"key": "all", "values": {"avg": 2.53, "count": 12.0, "min": -1.75}},
                {"key": "probability", "values": {"probability": 0.625}}
            ]
        }))
    }

    #[test]
    fn extracts_signed_and_percent_claims() {
        let claims = extract_claims("On 2024-03-01 at 09:30 the p95 move was +5.00%, in 2023 about 1,250 bars, \u{2212}3.5 avg.");
        let values: Vec<f64> = claims.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![5.0, 1250.0, -3.5]);
        assert!(claims[0].signed && claims[0].percent);
        assert_eq!(claims[0].decimals, 2);
        assert!(!claims[1].signed);
    }

    #[test]
    fn flags_a_wrong_number() {
        let verifier = ResultVerifier::new(0.01);
        let result = verifier.verify("The average move was +5.00%.", &facts());
        assert_eq!(result.status, ValidationStatus::Rewrite);
        assert_eq!(result.issues[0].category, IssueCategory::ClaimMismatch);
        assert_eq!(result.issues[0].suggestion.as_deref(), Some("2.53"));
    }

    #[test]
    fn accepts_values_within_tolerance_and_rounding() {
        let verifier = ResultVerifier::new(0.01);
        for text in [
            "The average move was 2.53%.",
            "The average move was +2.5%.",
            "Across 12 days the worst day fell 1.75%.",
            "It rose the next day 62.5% of the time.",
            "The worst day was -1.75%, in 2024.",
        ] {
            let result = verifier.verify(text, &facts());
            assert!(result.is_ok(), "{text}: {:?}", result.issues);
        }
    }

    #[test]
    fn output_rows_are_not_facts() {
        let rows = rows_from_changes(MONDAY, DAY, &[5.0, 1.0, 2.0, 3.0, 2.0, 2.3, 2.0, 2.0, 3.0, 3.0]);
        let spec = OperationSpec::Count {
            query: query(Metric::Change, None, None),
        };
        let counted = execute("s1", &spec, &[rows]).expect("count");
        assert_eq!(counted.rows.len(), 10);
        let facts = FactSheet::from_results(std::slice::from_ref(&counted));
        // count/avg/min/max plus row, record, input and filtered counts.
        assert_eq!(facts.len(), 8);

        let verifier = ResultVerifier::new(0.01);
        assert!(verifier.verify("Over 10 days the average change was +2.53.", &facts).is_ok());
        // 125.30 is the last row's close, never an aggregate.
        let result = verifier.verify("The average close was 125.30.", &facts);
        assert_eq!(result.status, ValidationStatus::Rewrite);

        // A `run` document on disk yields the same facts.
        let document = json!({ "status": "ok", "results": [counted] });
        assert_eq!(FactSheet::from_json(&document).len(), facts.len());
        assert!(!verifier.verify("The average close was 125.30.", &FactSheet::from_json(&document)).is_ok());
    }

    #[test]
    fn explicit_sign_must_match() {
        let verifier = ResultVerifier::new(0.01);
        let result = verifier.verify("The average was -2.53.", &facts());
        assert_eq!(result.status, ValidationStatus::Rewrite);
    }
}
