use crate::entities::step::RawStep;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Ok,
    Rewrite,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Safety,
    Schema,
    Syntax,
    Plausibility,
    Execution,
    ClaimMismatch,
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueCategory::Safety => "safety",
            IssueCategory::Schema => "schema",
            IssueCategory::Syntax => "syntax",
            IssueCategory::Plausibility => "plausibility",
            IssueCategory::Execution => "execution",
            IssueCategory::ClaimMismatch => "claim mismatch",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Soft issues are reported but never block execution.
    pub soft: bool,
}

impl Issue {
    pub fn hard(category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            suggestion: None,
            soft: false,
        }
    }

    pub fn soft(category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            soft: true,
            ..Self::hard(category, message)
        }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        if self.soft {
            f.write_str(" (warning)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub issues: Vec<Issue>,
    pub feedback: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::from_issues(Vec::new())
    }

    /// Any safety issue fails the artifact outright; any other hard issue asks
    /// for a rewrite; soft issues alone still pass.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let status = if issues
            .iter()
            .any(|i| !i.soft && i.category == IssueCategory::Safety)
        {
            ValidationStatus::Failed
        } else if issues.iter().any(|i| !i.soft) {
            ValidationStatus::Rewrite
        } else {
            ValidationStatus::Ok
        };
        let feedback = render_feedback(status, &issues);
        Self {
            status,
            issues,
            feedback,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }

    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

fn render_feedback(status: ValidationStatus, issues: &[Issue]) -> String {
    if issues.is_empty() {
        return String::new();
    }
    let headline = match status {
        ValidationStatus::Ok => "Accepted with warnings:",
        ValidationStatus::Rewrite => "Rejected; fix every issue below and resend:",
        ValidationStatus::Failed => "Rejected as unsafe; produce a new read-only artifact:",
    };
    let mut out = String::from(headline);
    for issue in issues {
        out.push_str("\n- ");
        out.push_str(&issue.to_string());
    }
    out
}

/// A generated, not yet trusted, executable representation of a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Artifact {
    Steps(Vec<RawStep>),
    Query(String),
}

impl Artifact {
    /// Canonical text sent back to the generator and fingerprinted on retries.
    pub fn render(&self) -> String {
        match self {
            Artifact::Steps(steps) => {
                serde_json::to_string(steps).unwrap_or_else(|err| format!("<unrenderable: {err}>"))
            }
            Artifact::Query(sql) => sql.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Issue, IssueCategory, ValidationResult, ValidationStatus};

    #[test]
    fn status_follows_worst_issue() {
        let soft_only = ValidationResult::from_issues(vec![Issue::soft(
            IssueCategory::Plausibility,
            "1e6 rows",
        )]);
        assert_eq!(soft_only.status, ValidationStatus::Ok);
        assert!(soft_only.feedback.contains("warning"));

        let schema = ValidationResult::from_issues(vec![Issue::hard(
            IssueCategory::Schema,
            "unknown column 'clos'",
        )
        .with_suggestion(Some("close".to_string()))]);
        assert_eq!(schema.status, ValidationStatus::Rewrite);
        assert!(schema.feedback.contains("did you mean 'close'"));

        let unsafe_sql = ValidationResult::from_issues(vec![
            Issue::hard(IssueCategory::Schema, "x"),
            Issue::hard(IssueCategory::Safety, "DROP is not allowed"),
        ]);
        assert_eq!(unsafe_sql.status, ValidationStatus::Failed);
    }

    #[test]
    fn ok_has_empty_feedback() {
        let ok = ValidationResult::ok();
        assert!(ok.is_ok());
        assert!(ok.feedback.is_empty());
    }
}
