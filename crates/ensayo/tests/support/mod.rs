//! Shared helpers for the end-to-end suites.

#![allow(dead_code)]

use ensayo::simulated::{the_internet, SimulatedBrowser, SimulatedLauncher, Site};
use ensayo::{Page, Reporter, RunnerConfig, Session, SessionOptions, TestRunner, TestSuite};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Locator timeout used by the suites
pub const EXPECT_TIMEOUT_MS: u64 = 2_000;

/// Runner settings with short, test-friendly timeouts
pub fn config() -> RunnerConfig {
    RunnerConfig::default()
        .with_test_timeout(10_000)
        .with_expect_timeout(EXPECT_TIMEOUT_MS)
        .with_dialog_grace(1_000)
}

/// Launcher serving the practice site
pub fn launcher() -> Arc<SimulatedLauncher> {
    Arc::new(SimulatedLauncher::new(the_internet::site()))
}

/// Run `suite` against the practice site
pub async fn run(suite: TestSuite) -> Reporter {
    run_with(config(), suite).await
}

/// Run `suite` against the practice site with `config`
pub async fn run_with(config: RunnerConfig, suite: TestSuite) -> Reporter {
    let _ = ensayo::logging::init_for_tests();
    TestRunner::new(config, launcher()).run(suite).await
}

/// Fail with the report summary unless every case passed
pub fn assert_all_passed(report: &Reporter) {
    assert!(report.all_passed(), "{}", report.summary());
}

/// A fresh session on `site`, outside the runner
pub fn session_on(site: Site, timeout_ms: u64) -> Arc<Session> {
    Session::start(
        Arc::new(SimulatedBrowser::new(Arc::new(site))),
        SessionOptions::default().with_timeout(timeout_ms),
        CancellationToken::new(),
    )
}

/// A loaded page at `path` on the practice site
pub async fn open(path: &str) -> (Arc<Session>, Page) {
    let session = session_on(the_internet::site(), EXPECT_TIMEOUT_MS);
    let page = session.new_page().await.unwrap();
    page.goto(&the_internet::url(path)).await.unwrap();
    (session, page)
}
