//! Ensayo: browser-interaction test orchestration
//!
//! Ensayo (Spanish: "rehearsal") drives a browser through a command channel
//! and gives test code auto-waiting locators, frame-aware context routing,
//! native dialog interception and a data-driven runner with one isolated
//! session per case.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ENSAYO Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ TestSuite  │    │ Locator /  │    │ Command    │            │
//! │   │ + rows     │───►│ Page /     │───►│ Channel    │──► browser │
//! │   │ (runner)   │    │ Expect     │    │ + events   │            │
//! │   └────────────┘    └────────────┘    └─────┬──────┘            │
//! │                                             │                   │
//! │                     ┌────────────┐    ┌─────▼──────┐            │
//! │                     │ Dialog     │◄───│ Context    │            │
//! │                     │ Interceptor│    │ Tree       │            │
//! │                     └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ensayo::simulated::{the_internet, SimulatedLauncher};
//! use ensayo::{expect, RunnerConfig, TestRunner, TestSuite};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let suite = TestSuite::new("smoke").test("heading", |ctx| async move {
//!     let page = ctx.new_page().await?;
//!     page.goto(&the_internet::url("/login")).await?;
//!     expect(page.locator("h2")?).to_have_text("Login Page").await
//! });
//! let runner = TestRunner::new(
//!     RunnerConfig::default(),
//!     Arc::new(SimulatedLauncher::new(the_internet::site())),
//! );
//! let report = runner.run(suite).await;
//! assert!(report.all_passed());
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod channel;
mod config;
mod context;
mod dialog;
mod fixture;
mod harness;
mod locator;
pub mod logging;
mod network;
mod page;
mod reporter;
mod result;
mod selector;
mod session;
mod wait;

/// In-memory browser and demo sites
pub mod simulated;

/// Chromium transport (requires the `browser` feature)
#[cfg(feature = "browser")]
pub mod cdp;

pub use channel::{
    BrowserEvent, Command, CommandChannel, ContextId, DialogId, ElementAction, ElementId,
    ElementInfo, EventBus, EventHandler, EventKind, ReadyState, Response, SubscriptionHandle,
    Transport, EVENT_BUFFER,
};
pub use config::{BrowserConfig, RunnerConfig, ENV_PREFIX};
pub use context::{
    lock_tree, BrowsingContext, ContextKind, ContextManager, ContextState, ContextTree, SharedTree,
};
pub use dialog::{
    AutoDialogBehavior, Dialog, DialogAction, DialogExpectation, DialogHandlerFn,
    DialogInterceptor, DialogRecord, DialogType, HandledBy, OnceDialogFn, PendingEvent,
};
pub use fixture::{ArtifactState, ArtifactStore, LocalArtifactStore};
pub use harness::{
    HookFn, ParamRow, ParamTable, SuiteContext, TestBody, TestCase, TestContext, TestRunner,
    TestSuite,
};
pub use locator::{
    expect, ElementHandle, Expect, ExpectAssertion, Locator, MatchCount, Nth, WaitState,
};
pub use logging::LogFormat;
#[cfg(feature = "http")]
pub use network::ReqwestClient;
pub use network::{ApiResponse, HttpClient, HttpMethod, StubHttpClient, UrlPattern};
pub use page::{FrameLocator, Page};
pub use reporter::{HookFailure, Reporter, TestFailure, TestResultEntry, TestStatus};
pub use result::{EnsayoError, EnsayoResult, ErrorKind};
pub use selector::{normalize_text, query_all, CssSelector, Element, Selector, MAX_SELECTOR_LEN};
pub use session::{
    BrowserLauncher, ConsoleEntry, Diagnostics, PageDiagnostics, Session, SessionOptions,
    CONSOLE_LIMIT,
};
pub use wait::{
    wait_until, Backoff, FnCondition, LoadState, Probe, WaitCondition, WaitOptions, WaitResult,
    Waiter, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS, MIN_POLL_INTERVAL_MS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        expect, EnsayoError, EnsayoResult, ErrorKind, Page, ParamRow, ParamTable, Reporter,
        RunnerConfig, TestContext, TestRunner, TestStatus, TestSuite,
    };
}
