use serde::Serialize;

/// Immutable view of one generation attempt. The retry orchestrator builds a
/// fresh context per attempt; collaborators only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptContext {
    /// 1-based number of the attempt this context is for.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Rendered artifact of the previous attempt, if any.
    pub previous: Option<String>,
    /// Validator feedback of every earlier attempt, oldest first.
    pub feedback: Vec<String>,
}

impl AttemptContext {
    pub fn first(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            previous: None,
            feedback: Vec::new(),
        }
    }

    pub fn next(&self, previous: Option<String>, feedback: String) -> Self {
        let mut history = self.feedback.clone();
        history.push(feedback);
        Self {
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            previous,
            feedback: history,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }

    pub fn latest_feedback(&self) -> Option<&str> {
        self.feedback.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::AttemptContext;

    #[test]
    fn next_accumulates_without_mutating() {
        let first = AttemptContext::first(3);
        let second = first.next(Some("SELECT 1".to_string()), "bad column".to_string());
        let third = second.next(None, "still bad".to_string());
        assert_eq!(first.feedback.len(), 0);
        assert_eq!(second.attempt, 2);
        assert_eq!(third.feedback, vec!["bad column", "still bad"]);
        assert_eq!(third.remaining(), 0);
        assert_eq!(third.latest_feedback(), Some("still bad"));
    }
}
