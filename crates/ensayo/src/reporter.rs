//! Test outcome collection and JSON export.
//!
//! Every case moves through `Pending -> Running -> {Passed, Failed, Skipped}`
//! (or straight from `Pending` to `Skipped`). Terminal states never change;
//! an attempt to move out of one is logged and ignored.

use crate::harness::ParamRow;
use crate::result::{EnsayoError, EnsayoResult, ErrorKind};
use crate::session::Diagnostics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle state of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Declared, not started
    Pending,
    /// Body executing
    Running,
    /// Body returned `Ok`
    Passed,
    /// Body failed, panicked, or timed out
    Failed,
    /// Not run
    Skipped,
}

impl TestStatus {
    /// Check if status is passing
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Check if status is failing
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether no further transition is allowed
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Skipped)
                | (Self::Running, Self::Passed | Self::Failed)
        )
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Why a case failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Error classification
    pub kind: ErrorKind,
    /// Error message, naming the selector or timeout involved
    pub message: String,
}

impl From<&EnsayoError> for TestFailure {
    fn from(err: &EnsayoError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Individual test result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultEntry {
    /// Test name, interpolated for parameterized cases
    pub name: String,
    /// Parameter row, for data-driven cases
    pub row: Option<ParamRow>,
    /// Lifecycle state
    pub status: TestStatus,
    /// Time spent in the body
    pub duration: Duration,
    /// Failure details
    pub error: Option<TestFailure>,
    /// Why the case was skipped
    pub skip_reason: Option<String>,
    /// Browser state captured at failure time
    pub diagnostics: Option<Diagnostics>,
    /// When the body started
    pub started_at: Option<DateTime<Utc>>,
    /// When the case reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestResultEntry {
    /// A case that has not started
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row: None,
            status: TestStatus::Pending,
            duration: Duration::ZERO,
            error: None,
            skip_reason: None,
            diagnostics: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Create a passing test result
    #[must_use]
    pub fn passed(name: impl Into<String>, duration: Duration) -> Self {
        let mut entry = Self::pending(name);
        entry.start();
        entry.pass(duration);
        entry
    }

    /// Create a failing test result
    #[must_use]
    pub fn failed(name: impl Into<String>, duration: Duration, error: &EnsayoError) -> Self {
        let mut entry = Self::pending(name);
        entry.start();
        entry.fail(duration, error, None);
        entry
    }

    /// Create a skipped test result
    #[must_use]
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut entry = Self::pending(name);
        entry.skip(reason);
        entry
    }

    /// Attach the parameter row
    #[must_use]
    pub fn with_row(mut self, row: ParamRow) -> Self {
        self.row = Some(row);
        self
    }

    fn transition(&mut self, next: TestStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(test = %self.name, from = %self.status, to = %next, "ignored status transition");
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// `Pending -> Running`
    pub fn start(&mut self) -> bool {
        let moved = self.transition(TestStatus::Running);
        if moved {
            self.started_at = Some(Utc::now());
        }
        moved
    }

    /// `Running -> Passed`
    pub fn pass(&mut self, duration: Duration) -> bool {
        let moved = self.transition(TestStatus::Passed);
        if moved {
            self.duration = duration;
        }
        moved
    }

    /// `Running -> Failed`
    pub fn fail(
        &mut self,
        duration: Duration,
        error: &EnsayoError,
        diagnostics: Option<Diagnostics>,
    ) -> bool {
        let moved = self.transition(TestStatus::Failed);
        if moved {
            self.duration = duration;
            self.error = Some(TestFailure::from(error));
            self.diagnostics = diagnostics;
        }
        moved
    }

    /// `Pending -> Skipped`
    pub fn skip(&mut self, reason: impl Into<String>) -> bool {
        let moved = self.transition(TestStatus::Skipped);
        if moved {
            self.skip_reason = Some(reason.into());
        }
        moved
    }
}

/// A failed `before_all`/`after_all` hook or artifact step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    /// Hook description
    pub hook: String,
    /// Failure details
    pub error: TestFailure,
}

/// Collected results of one suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reporter {
    /// Unique id of this run
    run_id: Uuid,
    /// Suite name
    suite_name: String,
    /// Test results, in declaration order
    results: Vec<TestResultEntry>,
    /// Setup and teardown failures
    hook_failures: Vec<HookFailure>,
    /// Start time
    started_at: Option<DateTime<Utc>>,
    /// End time
    finished_at: Option<DateTime<Utc>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new("Test Suite")
    }
}

impl Reporter {
    /// Empty report for `suite_name`
    #[must_use]
    pub fn new(suite_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            suite_name: suite_name.into(),
            results: Vec::new(),
            hook_failures: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark the run started
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Mark the run finished
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Record a test result
    pub fn record(&mut self, result: TestResultEntry) {
        self.results.push(result);
    }

    /// Record a hook failure
    pub fn record_hook_failure(&mut self, hook: impl Into<String>, error: &EnsayoError) {
        self.hook_failures.push(HookFailure {
            hook: hook.into(),
            error: TestFailure::from(error),
        });
    }

    /// Run identifier
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Suite name
    #[must_use]
    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    /// Get number of passed tests
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    /// Get number of failed tests
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    /// Get number of skipped tests
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Get total test count
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.results.len()
    }

    /// Passed share of the cases that ran (0.0 to 1.0)
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        let ran = self.passed_count() + self.failed_count();
        if ran == 0 {
            return 1.0;
        }
        self.passed_count() as f64 / ran as f64
    }

    /// No failed case and no failed hook
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0 && self.hook_failures.is_empty()
    }

    /// Sum of body durations
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }

    /// Get test results
    #[must_use]
    pub fn results(&self) -> &[TestResultEntry] {
        &self.results
    }

    /// Result by case name
    #[must_use]
    pub fn result(&self, name: &str) -> Option<&TestResultEntry> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Get failing tests
    #[must_use]
    pub fn failures(&self) -> Vec<&TestResultEntry> {
        self.results
            .iter()
            .filter(|r| r.status.is_failed())
            .collect()
    }

    /// Setup and teardown failures
    #[must_use]
    pub fn hook_failures(&self) -> &[HookFailure] {
        &self.hook_failures
    }

    /// Generate summary string
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}: {}/{} passed, {} failed, {} skipped ({:.1}%)",
            self.suite_name,
            self.passed_count(),
            self.total_count(),
            self.failed_count(),
            self.skipped_count(),
            self.pass_rate() * 100.0
        );
        for failure in self.failures() {
            if let Some(error) = &failure.error {
                summary.push_str(&format!(
                    "\n  FAILED {} [{:?}] {}",
                    failure.name, error.kind, error.message
                ));
            }
        }
        for hook in &self.hook_failures {
            summary.push_str(&format!(
                "\n  HOOK {} [{:?}] {}",
                hook.hook, hook.error.kind, hook.error.message
            ));
        }
        summary
    }

    /// Serialize the report
    pub fn to_json(&self) -> EnsayoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> EnsayoResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
