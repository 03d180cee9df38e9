//! Notebook: the aggregated result record of one execution pass
//!
//! Defines test states, per-test records, and the notebook consumed by
//! reporters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Test lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestState {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestState::Pending => "·",
            TestState::Running => "…",
            TestState::Passed => "✓",
            TestState::Failed => "✗",
            TestState::Skipped => "○",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestState::Passed | TestState::Failed | TestState::Skipped
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Pending => write!(f, "PENDING"),
            TestState::Running => write!(f, "RUNNING"),
            TestState::Passed => write!(f, "PASS"),
            TestState::Failed => write!(f, "FAIL"),
            TestState::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Result of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: u32,
    pub path: String,
    pub state: TestState,
    pub err: Option<String>,
    pub duration_ms: u64,
}

impl TestRecord {
    /// A record for a test that has been admitted but not yet started.
    pub fn pending(id: u32, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            state: TestState::Pending,
            err: None,
            duration_ms: 0,
        }
    }

    pub fn passed(id: u32, path: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id,
            path: path.into(),
            state: TestState::Passed,
            err: None,
            duration_ms,
        }
    }

    pub fn failed(
        id: u32,
        path: impl Into<String>,
        err: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            state: TestState::Failed,
            err: Some(err.into()),
            duration_ms,
        }
    }

    /// Skipped records carry an error only when a hook failure caused the
    /// skip; an ordinary skip or todo has none.
    pub fn skipped(id: u32, path: impl Into<String>, err: Option<String>) -> Self {
        Self {
            id,
            path: path.into(),
            state: TestState::Skipped,
            err,
            duration_ms: 0,
        }
    }

    /// A record counts as a failure whenever it carries an error, including
    /// skips produced by a failed hook.
    pub fn is_failure(&self) -> bool {
        self.err.is_some()
    }
}

impl fmt::Display for TestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.state.symbol(),
            self.path,
            self.duration_ms
        )?;
        if let Some(err) = &self.err {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Aggregated result record of one execution pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notebook {
    pub tests: Vec<TestRecord>,
    pub failures: usize,
    /// Out-of-band errors: stray signals with no active boundary (debug
    /// mode) and failed `after` hooks.
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Set when a duplicate-completion signal was attributed during the run.
    pub fatal: bool,
}

impl Notebook {
    pub fn new(tests: Vec<TestRecord>, errors: Vec<String>, fatal: bool, duration_ms: u64) -> Self {
        let failures = tests.iter().filter(|t| t.is_failure()).count();
        Self {
            tests,
            failures,
            errors,
            duration_ms,
            fatal,
        }
    }

    pub fn passed(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.state == TestState::Passed)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.state == TestState::Skipped)
            .count()
    }

    /// True when nothing went wrong anywhere in the run.
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.errors.is_empty() && !self.fatal
    }
}

impl fmt::Display for Notebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.tests {
            writeln!(f, "  {record}")?;
        }
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {}",
            self.tests.len(),
            self.passed(),
            self.failures,
            self.skipped()
        )?;
        write!(f, "Duration: {}ms", self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_terminal() {
        assert!(!TestState::Pending.is_terminal());
        assert!(!TestState::Running.is_terminal());
        assert!(TestState::Passed.is_terminal());
        assert!(TestState::Failed.is_terminal());
        assert!(TestState::Skipped.is_terminal());
    }

    #[test]
    fn test_record_failure_accounting() {
        assert!(!TestRecord::passed(1, "a", 5).is_failure());
        assert!(TestRecord::failed(2, "b", "boom", 5).is_failure());
        assert!(!TestRecord::skipped(3, "c", None).is_failure());
        assert!(TestRecord::skipped(4, "d", Some("'before' action failed".into())).is_failure());
    }

    #[test]
    fn test_notebook_counts() {
        let notebook = Notebook::new(
            vec![
                TestRecord::passed(1, "t.1", 10),
                TestRecord::failed(2, "t.2", "boom", 4),
                TestRecord::skipped(3, "t.3", None),
            ],
            Vec::new(),
            false,
            14,
        );
        assert_eq!(notebook.failures, 1);
        assert_eq!(notebook.passed(), 1);
        assert_eq!(notebook.skipped(), 1);
        assert!(!notebook.is_clean());
    }

    #[test]
    fn test_notebook_serialization() {
        let notebook = Notebook::new(vec![TestRecord::passed(1, "t.1", 10)], Vec::new(), false, 10);
        let json = serde_json::to_string(&notebook).unwrap();
        let back: Notebook = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tests.len(), 1);
        assert_eq!(back.tests[0].state, TestState::Passed);
    }
}
