//! Test harness for running test suites.
//!
//! A [`TestSuite`] declares cases, data-driven case families, suite-scoped
//! artifacts and `before_all`/`after_all` hooks. [`TestRunner::run`]
//! executes it:
//!
//! 1. artifacts are written and `before_all` hooks run, once;
//! 2. every case gets its own browser [`Session`] and runs on its own task,
//!    at most `workers` at a time, under the per-case timeout;
//! 3. `after_all` finalizers run exactly once, whatever happened above;
//! 4. artifacts are removed exactly once.
//!
//! The runner is the only place errors are recovered: a failing, panicking
//! or timed-out body marks its own case `Failed` and nothing else.

use crate::config::RunnerConfig;
use crate::fixture::{ArtifactStore, LocalArtifactStore};
use crate::network::{HttpClient, StubHttpClient};
use crate::page::Page;
use crate::reporter::{Reporter, TestResultEntry};
use crate::result::{EnsayoError, EnsayoResult};
use crate::session::{BrowserLauncher, Session, SessionOptions};
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Upper bound on diagnostics capture after a failure
const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// PARAMETER ROWS
// =============================================================================

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// One row of a data-driven table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamRow(BTreeMap<String, String>);

impl ParamRow {
    /// Empty row
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value by key, failing the case if absent
    pub fn require(&self, key: &str) -> EnsayoResult<&str> {
        self.get(key).ok_or_else(|| EnsayoError::Fixture {
            message: format!("parameter '{key}' missing from row"),
        })
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Replace `{key}` placeholders with row values; unknown keys stay as-is
    #[must_use]
    pub fn interpolate(&self, template: &str) -> String {
        let Some(re) = placeholder() else {
            return template.to_string();
        };
        re.replace_all(template, |caps: &regex::Captures<'_>| {
            self.get(&caps[1])
                .map_or_else(|| caps[0].to_string(), str::to_string)
        })
        .into_owned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Ordered rows driving a parameterized case family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamTable {
    rows: Vec<ParamRow>,
}

impl ParamTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row
    #[must_use]
    pub fn row(mut self, row: ParamRow) -> Self {
        self.rows.push(row);
        self
    }

    /// Parse a YAML sequence of flat mappings. Scalars become strings,
    /// `null` becomes the empty string.
    pub fn from_yaml(yaml: &str) -> EnsayoResult<Self> {
        let raw: Vec<BTreeMap<String, serde_yaml_ng::Value>> = serde_yaml_ng::from_str(yaml)?;
        let mut rows = Vec::with_capacity(raw.len());
        for (index, map) in raw.into_iter().enumerate() {
            let mut row = BTreeMap::new();
            for (key, value) in map {
                let text = match value {
                    serde_yaml_ng::Value::Null => String::new(),
                    serde_yaml_ng::Value::Bool(b) => b.to_string(),
                    serde_yaml_ng::Value::Number(n) => n.to_string(),
                    serde_yaml_ng::Value::String(s) => s,
                    _ => {
                        return Err(EnsayoError::Config {
                            message: format!("row {index}: '{key}' must be a scalar"),
                        })
                    }
                };
                row.insert(key, text);
            }
            rows.push(ParamRow(row));
        }
        Ok(Self { rows })
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> EnsayoResult<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Rows in order
    #[must_use]
    pub fn rows(&self) -> &[ParamRow] {
        &self.rows
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<Vec<ParamRow>> for ParamTable {
    fn from(rows: Vec<ParamRow>) -> Self {
        Self { rows }
    }
}

// =============================================================================
// CONTEXTS
// =============================================================================

/// Capabilities shared by the whole suite, handed to hooks
#[derive(Debug, Clone)]
pub struct SuiteContext {
    artifacts: Arc<dyn ArtifactStore>,
    http: Arc<dyn HttpClient>,
    config: Arc<RunnerConfig>,
}

impl SuiteContext {
    /// Suite-scoped files
    #[must_use]
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// HTTP capability
    #[must_use]
    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    /// Runner configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

/// Everything a test body can reach
#[derive(Debug, Clone)]
pub struct TestContext {
    name: String,
    row: Option<ParamRow>,
    session: Arc<Session>,
    suite: SuiteContext,
}

impl TestContext {
    /// Case name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter row, for data-driven cases
    #[must_use]
    pub const fn row(&self) -> Option<&ParamRow> {
        self.row.as_ref()
    }

    /// Parameter value, failing the case if absent
    pub fn param(&self, key: &str) -> EnsayoResult<&str> {
        match &self.row {
            Some(row) => row.require(key),
            None => Err(EnsayoError::Fixture {
                message: format!("'{}' is not parameterized", self.name),
            }),
        }
    }

    /// This case's browser session
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Open a fresh page in this case's session
    pub async fn new_page(&self) -> EnsayoResult<Page> {
        self.session.new_page().await
    }

    /// Path of a suite artifact
    pub fn artifact(&self, name: &str) -> EnsayoResult<PathBuf> {
        self.suite.artifacts.path(name).ok_or_else(|| EnsayoError::Fixture {
            message: format!("no artifact named '{name}'"),
        })
    }

    /// HTTP capability
    #[must_use]
    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.suite.http
    }

    /// Runner configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.suite.config
    }
}

// =============================================================================
// SUITE DECLARATION
// =============================================================================

/// Shared, re-invocable test body
pub type TestBody = Arc<dyn Fn(TestContext) -> BoxFuture<'static, EnsayoResult<()>> + Send + Sync>;

/// One-shot suite hook
pub type HookFn = Box<dyn FnOnce(SuiteContext) -> BoxFuture<'static, EnsayoResult<()>> + Send>;

/// A single test case
#[derive(Clone)]
pub struct TestCase {
    /// Test name
    pub name: String,
    /// Parameter row, for data-driven cases
    pub row: Option<ParamRow>,
    /// Timeout override in milliseconds
    pub timeout_ms: Option<u64>,
    /// Skip reason; skipped cases never start
    pub skip: Option<String>,
    body: TestBody,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("row", &self.row)
            .field("timeout_ms", &self.timeout_ms)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

fn boxed_body<F, Fut>(body: F) -> TestBody
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| body(ctx).boxed())
}

/// A test suite containing multiple tests
pub struct TestSuite {
    /// Suite name
    pub name: String,
    /// Tests in this suite, in declaration order
    pub tests: Vec<TestCase>,
    before_all: Vec<HookFn>,
    after_all: Vec<HookFn>,
    artifacts: Vec<(String, Vec<u8>)>,
}

impl std::fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("tests", &self.tests)
            .field("before_all", &self.before_all.len())
            .field("after_all", &self.after_all.len())
            .field("artifacts", &self.artifacts.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl TestSuite {
    /// Create a new test suite
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Declare a case
    #[must_use]
    pub fn test<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.tests.push(TestCase {
            name: name.into(),
            row: None,
            timeout_ms: None,
            skip: None,
            body: boxed_body(body),
        });
        self
    }

    /// Declare one case per row. `{key}` placeholders in `name_template`
    /// are filled from the row; a template without placeholders gets the
    /// row index appended.
    #[must_use]
    pub fn parameterized<F, Fut>(mut self, name_template: &str, table: ParamTable, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        let body = boxed_body(body);
        for (index, row) in table.rows.into_iter().enumerate() {
            let mut name = row.interpolate(name_template);
            if name == name_template {
                name = format!("{name_template} [{index}]");
            }
            self.tests.push(TestCase {
                name,
                row: Some(row),
                timeout_ms: None,
                skip: None,
                body: Arc::clone(&body),
            });
        }
        self
    }

    /// Skip every case named `name`
    #[must_use]
    pub fn skip(mut self, name: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        for case in self.tests.iter_mut().filter(|c| c.name == name) {
            case.skip = Some(reason.clone());
        }
        self
    }

    /// Override the timeout of every case named `name`
    #[must_use]
    pub fn timeout(mut self, name: &str, ms: u64) -> Self {
        for case in self.tests.iter_mut().filter(|c| c.name == name) {
            case.timeout_ms = Some(ms);
        }
        self
    }

    /// Run `hook` once before any case
    #[must_use]
    pub fn before_all<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(SuiteContext) -> Fut + Send + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.before_all.push(Box::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Run `hook` exactly once after every case has finished
    #[must_use]
    pub fn after_all<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(SuiteContext) -> Fut + Send + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.after_all.push(Box::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Create a file before any case; removed after the finalizers
    #[must_use]
    pub fn artifact(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((name.into(), bytes.into()));
        self
    }

    /// Get the number of tests
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Case names in declaration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tests.iter().map(|c| c.name.as_str()).collect()
    }
}

// =============================================================================
// RUNNER
// =============================================================================

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn run_hook(hook: HookFn, ctx: SuiteContext) -> EnsayoResult<()> {
    match AssertUnwindSafe(hook(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(EnsayoError::Panic {
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Executes suites against a browser launcher
#[derive(Debug, Clone)]
pub struct TestRunner {
    config: Arc<RunnerConfig>,
    launcher: Arc<dyn BrowserLauncher>,
    http: Arc<dyn HttpClient>,
}

impl TestRunner {
    /// Runner with a stub HTTP capability
    #[must_use]
    pub fn new(config: RunnerConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            http: Arc::new(StubHttpClient::new()),
        }
    }

    /// Replace the HTTP capability
    #[must_use]
    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    /// Runner configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run every case of `suite` and report the outcomes
    pub async fn run(&self, suite: TestSuite) -> Reporter {
        let TestSuite {
            name,
            tests,
            before_all,
            after_all,
            artifacts,
        } = suite;
        let mut reporter = Reporter::new(name.clone());
        reporter.start();
        info!(suite = %name, cases = tests.len(), workers = self.config.workers, "suite started");

        let store: Arc<dyn ArtifactStore> = match LocalArtifactStore::new() {
            Ok(store) => Arc::new(store),
            Err(err) => {
                reporter.record_hook_failure("artifacts", &err);
                for case in &tests {
                    reporter.record(
                        TestResultEntry::skipped(&case.name, "artifact store unavailable")
                            .with_optional_row(case.row.clone()),
                    );
                }
                reporter.finish();
                return reporter;
            }
        };
        let suite_ctx = SuiteContext {
            artifacts: Arc::clone(&store),
            http: Arc::clone(&self.http),
            config: Arc::clone(&self.config),
        };

        let mut setup_failed = false;
        for (artifact, bytes) in &artifacts {
            if let Err(err) = store.create(artifact, bytes) {
                reporter.record_hook_failure(format!("artifact {artifact}"), &err);
                setup_failed = true;
            }
        }
        if !setup_failed {
            for (index, hook) in before_all.into_iter().enumerate() {
                if let Err(err) = run_hook(hook, suite_ctx.clone()).await {
                    warn!(suite = %name, hook = index, error = %err, "before_all failed");
                    reporter.record_hook_failure(format!("before_all #{index}"), &err);
                    setup_failed = true;
                    break;
                }
            }
        }

        let entries = if setup_failed {
            tests
                .iter()
                .map(|case| {
                    TestResultEntry::skipped(&case.name, "suite setup failed")
                        .with_optional_row(case.row.clone())
                })
                .collect()
        } else {
            self.run_cases(tests, &suite_ctx).await
        };
        for entry in entries {
            reporter.record(entry);
        }

        for (index, hook) in after_all.into_iter().enumerate() {
            if let Err(err) = run_hook(hook, suite_ctx.clone()).await {
                warn!(suite = %name, hook = index, error = %err, "after_all failed");
                reporter.record_hook_failure(format!("after_all #{index}"), &err);
            }
        }
        if let Err(err) = store.remove_all() {
            reporter.record_hook_failure("artifact removal", &err);
        }

        reporter.finish();
        info!(suite = %name, summary = %reporter.summary(), "suite finished");
        reporter
    }

    async fn run_cases(&self, tests: Vec<TestCase>, suite: &SuiteContext) -> Vec<TestResultEntry> {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let mut slots: Vec<Option<TestResultEntry>> = Vec::with_capacity(tests.len());
        let mut names = Vec::with_capacity(tests.len());
        let mut set = JoinSet::new();

        for (index, case) in tests.into_iter().enumerate() {
            names.push((case.name.clone(), case.row.clone()));
            let mut entry = TestResultEntry::pending(&case.name).with_optional_row(case.row.clone());
            if let Some(reason) = &case.skip {
                entry.skip(reason.clone());
                slots.push(Some(entry));
                continue;
            }
            slots.push(None);

            let permits = Arc::clone(&permits);
            let stop = Arc::clone(&stop);
            let runner = self.clone();
            let suite = suite.clone();
            let span = info_span!("test", name = %case.name);
            set.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        entry.skip("runner shut down");
                        return (index, entry);
                    };
                    if stop.load(Ordering::SeqCst) {
                        entry.skip("fail-fast: an earlier case failed");
                        return (index, entry);
                    }
                    runner.run_case(case, suite, &mut entry).await;
                    if entry.status.is_failed() && runner.config.fail_fast {
                        stop.store(true, Ordering::SeqCst);
                    }
                    (index, entry)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, entry)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(entry);
                    }
                }
                Err(err) => warn!(error = %err, "case task ended abnormally"),
            }
        }

        slots
            .into_iter()
            .zip(names)
            .map(|(slot, (name, row))| {
                slot.unwrap_or_else(|| {
                    let mut entry = TestResultEntry::pending(name).with_optional_row(row);
                    entry.start();
                    entry.fail(
                        Duration::ZERO,
                        &EnsayoError::Panic {
                            message: "case task ended abnormally".to_string(),
                        },
                        None,
                    );
                    entry
                })
            })
            .collect()
    }

    async fn run_case(&self, case: TestCase, suite: SuiteContext, entry: &mut TestResultEntry) {
        entry.start();
        let start = Instant::now();
        let cancel = CancellationToken::new();
        let options = SessionOptions::from_config(&self.config);

        let session = match Session::launch(self.launcher.as_ref(), options, cancel.clone()).await {
            Ok(session) => session,
            Err(err) => {
                warn!(test = %case.name, error = %err, "browser launch failed");
                entry.fail(start.elapsed(), &err, None);
                return;
            }
        };

        let timeout_ms = case.timeout_ms.unwrap_or(self.config.test_timeout_ms);
        let ctx = TestContext {
            name: case.name.clone(),
            row: case.row.clone(),
            session: Arc::clone(&session),
            suite,
        };
        let mut body = tokio::spawn((case.body)(ctx));
        let outcome = match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut body).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => Err(EnsayoError::Panic {
                message: panic_message(join.into_panic().as_ref()),
            }),
            Ok(Err(join)) => Err(EnsayoError::Cancelled {
                reason: join.to_string(),
            }),
            Err(_) => {
                cancel.cancel();
                body.abort();
                let _ = body.await;
                Err(EnsayoError::TestTimeout {
                    name: case.name.clone(),
                    ms: timeout_ms,
                })
            }
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                entry.pass(elapsed);
                info!(test = %case.name, elapsed_ms = elapsed.as_millis() as u64, "passed");
            }
            Err(err) => {
                let diagnostics = tokio::time::timeout(DIAGNOSTICS_TIMEOUT, session.diagnostics())
                    .await
                    .ok();
                info!(
                    test = %case.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    kind = ?err.kind(),
                    error = %err,
                    "failed"
                );
                entry.fail(elapsed, &err, diagnostics);
            }
        }

        cancel.cancel();
        if let Err(err) = session.close().await {
            warn!(test = %case.name, error = %err, "session close failed");
        }
    }
}

impl TestResultEntry {
    fn with_optional_row(self, row: Option<ParamRow>) -> Self {
        match row {
            Some(row) => self.with_row(row),
            None => self,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reporter::TestStatus;
    use crate::result::ErrorKind;
    use crate::simulated::{the_internet, SimulatedLauncher};
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn failing(message: &str) -> EnsayoResult<()> {
        Err(EnsayoError::AssertionFailed {
            message: message.to_string(),
        })
    }

    fn explode() -> EnsayoResult<()> {
        panic!("boom")
    }

    fn runner(config: RunnerConfig) -> TestRunner {
        TestRunner::new(config, Arc::new(SimulatedLauncher::new(the_internet::site())))
    }

    mod param_tests {
        use super::*;

        #[test]
        fn test_interpolate() {
            let row = ParamRow::new().with("user", "tomsmith").with("expect", "ok");
            assert_eq!(row.interpolate("login as {user} -> {expect}"), "login as tomsmith -> ok");
            assert_eq!(row.interpolate("{missing} stays"), "{missing} stays");
        }

        #[test]
        fn test_table_from_yaml() {
            let table = ParamTable::from_yaml(
                "- {username: tomsmith, password: SuperSecretPassword!, valid: true}\n\
                 - {username: wrong, password: null, attempts: 3}\n",
            )
            .unwrap();
            assert_eq!(table.len(), 2);
            assert_eq!(table.rows()[0].get("valid"), Some("true"));
            assert_eq!(table.rows()[1].get("password"), Some(""));
            assert_eq!(table.rows()[1].get("attempts"), Some("3"));
        }

        #[test]
        fn test_table_rejects_nested_values() {
            let err = ParamTable::from_yaml("- {a: [1, 2]}").unwrap_err();
            assert!(matches!(err, EnsayoError::Config { .. }));
        }

        #[test]
        fn test_require_missing() {
            assert!(ParamRow::new().require("x").is_err());
        }
    }

    mod suite_tests {
        use super::*;

        #[test]
        fn test_parameterized_names() {
            let table = ParamTable::from(vec![
                ParamRow::new().with("user", "a"),
                ParamRow::new().with("user", "b"),
            ]);
            let suite = TestSuite::new("s")
                .parameterized("login {user}", table.clone(), |_| async { Ok(()) })
                .parameterized("plain", table, |_| async { Ok(()) });
            assert_eq!(
                suite.names(),
                vec!["login a", "login b", "plain [0]", "plain [1]"]
            );
        }
    }

    mod runner_tests {
        use super::*;

        #[tokio::test]
        async fn test_failures_are_isolated() {
            let suite = TestSuite::new("isolation")
                .test("passes", |_| async { Ok(()) })
                .test("fails", |_| async { failing("nope") })
                .test("panics", |_| async { explode() })
                .test("after", |_| async { Ok(()) });
            let report = runner(RunnerConfig::default()).run(suite).await;
            let status = |n: &str| report.result(n).unwrap().status;
            assert_eq!(status("passes"), TestStatus::Passed);
            assert_eq!(status("fails"), TestStatus::Failed);
            assert_eq!(status("panics"), TestStatus::Failed);
            assert_eq!(status("after"), TestStatus::Passed);
            let panic = report.result("panics").unwrap().error.clone().unwrap();
            assert_eq!(panic.kind, ErrorKind::Panic);
            assert!(panic.message.contains("boom"));
        }

        #[tokio::test]
        async fn test_timeout_fails_case_and_cancels_waits() {
            let suite = TestSuite::new("timeouts")
                .test("slow", |ctx| async move {
                    let page = ctx.new_page().await?;
                    page.goto(&the_internet::url("/login")).await?;
                    page.locator("#never")?.with_timeout(60_000).click().await
                })
                .timeout("slow", 200);
            let report = runner(RunnerConfig::default()).run(suite).await;
            let entry = report.result("slow").unwrap();
            assert_eq!(entry.status, TestStatus::Failed);
            let error = entry.error.clone().unwrap();
            assert_eq!(error.kind, ErrorKind::TestTimeout);
            assert!(entry.duration < Duration::from_secs(5));
            assert!(entry.diagnostics.is_some());
        }

        #[tokio::test]
        async fn test_fail_fast_skips_rest() {
            let suite = TestSuite::new("ff")
                .test("first", |_| async { failing("x") })
                .test("second", |_| async { Ok(()) })
                .test("third", |_| async { Ok(()) });
            let config = RunnerConfig::default().with_fail_fast(true);
            let report = runner(config).run(suite).await;
            assert_eq!(report.failed_count(), 1);
            assert_eq!(report.skipped_count(), 2);
        }

        #[tokio::test]
        async fn test_skip_never_starts() {
            let started = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&started);
            let suite = TestSuite::new("skip")
                .test("skipped", move |_| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .skip("skipped", "flaky upstream");
            let report = runner(RunnerConfig::default()).run(suite).await;
            assert_eq!(report.result("skipped").unwrap().status, TestStatus::Skipped);
            assert_eq!(started.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_hooks_and_artifacts_lifecycle() {
            let finalized = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&finalized);
            let root = Arc::new(std::sync::Mutex::new(None::<PathBuf>));
            let root_in = Arc::clone(&root);
            let suite = TestSuite::new("hooks")
                .artifact("upload.txt", "payload")
                .before_all(move |ctx| async move {
                    let path = ctx.artifacts().path("upload.txt").unwrap();
                    *root_in.lock().unwrap() = Some(path);
                    Ok(())
                })
                .test("reads artifact", |ctx| async move {
                    let path = ctx.artifact("upload.txt")?;
                    let bytes = tokio::fs::read(path).await?;
                    assert_eq!(bytes, b"payload");
                    Ok(())
                })
                .test("fails", |_| async { failing("x") })
                .after_all(move |ctx| async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    // Artifacts outlive the finalizers.
                    assert!(ctx.artifacts().path("upload.txt").unwrap().exists());
                    Ok(())
                });
            let report = runner(RunnerConfig::default()).run(suite).await;
            assert_eq!(finalized.load(Ordering::SeqCst), 1);
            assert_eq!(report.passed_count(), 1);
            assert!(report.hook_failures().is_empty());
            let path = root.lock().unwrap().clone().unwrap();
            assert!(!path.exists());
        }

        #[tokio::test]
        async fn test_before_all_failure_skips_cases_but_runs_finalizer() {
            let finalized = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&finalized);
            let suite = TestSuite::new("setup")
                .before_all(|_| async { failing("no data") })
                .test("a", |_| async { Ok(()) })
                .after_all(move |_| async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            let report = runner(RunnerConfig::default()).run(suite).await;
            assert_eq!(report.skipped_count(), 1);
            assert_eq!(report.hook_failures().len(), 1);
            assert_eq!(finalized.load(Ordering::SeqCst), 1);
            assert!(!report.all_passed());
        }

        #[tokio::test]
        async fn test_parallel_workers() {
            let table = ParamTable::from(
                (0..6)
                    .map(|i| ParamRow::new().with("i", i.to_string()))
                    .collect::<Vec<_>>(),
            );
            let suite = TestSuite::new("parallel").parameterized("case {i}", table, |ctx| async move {
                let i: u64 = ctx.param("i")?.parse().unwrap();
                tokio::time::sleep(Duration::from_millis(20 * (6 - i))).await;
                Ok(())
            });
            let report = runner(RunnerConfig::default().with_workers(3)).run(suite).await;
            assert_eq!(report.passed_count(), 6);
            let names: Vec<_> = report.results().iter().map(|r| r.name.clone()).collect();
            assert_eq!(names[0], "case 0");
            assert_eq!(names[5], "case 5");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_rows_produce_independent_outcomes(fails in proptest::collection::vec(any::<bool>(), 0..6)) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let table = ParamTable::from(
                fails
                    .iter()
                    .enumerate()
                    .map(|(i, f)| ParamRow::new().with("i", i.to_string()).with("fail", f.to_string()))
                    .collect::<Vec<_>>(),
            );
            let finalized = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&finalized);
            let suite = TestSuite::new("rows")
                .parameterized("row {i}", table, |ctx| async move {
                    if ctx.param("fail")? == "true" {
                        return failing("row");
                    }
                    Ok(())
                })
                .after_all(move |_| async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            let report = rt.block_on(runner(RunnerConfig::default().with_workers(2)).run(suite));
            prop_assert_eq!(report.total_count(), fails.len());
            for (i, failed) in fails.iter().enumerate() {
                let entry = report.result(&format!("row {i}")).unwrap();
                prop_assert_eq!(entry.status.is_failed(), *failed);
            }
            prop_assert_eq!(finalized.load(Ordering::SeqCst), 1);
        }
    }
}
