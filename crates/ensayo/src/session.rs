//! Browser session.
//!
//! One [`Session`] per test case: it owns the command channel, the context
//! tree, the dialog interceptor and the case's cancellation-aware waiter.
//! Nothing is shared between sessions, so cases cannot leak state.

use crate::channel::{BrowserEvent, Command, CommandChannel, ContextId, EventKind, Transport};
use crate::config::RunnerConfig;
use crate::context::{lock_tree, ContextManager, ContextTree, SharedTree};
use crate::dialog::{AutoDialogBehavior, DialogInterceptor, DialogRecord};
use crate::page::Page;
use crate::result::{EnsayoError, EnsayoResult};
use crate::wait::{WaitOptions, Waiter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Console lines kept per session
pub const CONSOLE_LIMIT: usize = 500;

/// Starts browsers; one launch per test case
#[async_trait]
pub trait BrowserLauncher: Send + Sync + std::fmt::Debug {
    /// Start a fresh browser and return its transport
    async fn launch(&self) -> EnsayoResult<Arc<dyn Transport>>;
}

/// Per-session timing and dialog settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Default wait options for locators and assertions
    pub wait: WaitOptions,
    /// How long an action waits for its dialogs to be answered
    pub dialog_grace: Duration,
    /// Answer for dialogs no handler claimed
    pub dialog_policy: AutoDialogBehavior,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl SessionOptions {
    /// Options derived from runner configuration
    #[must_use]
    pub const fn from_config(config: &RunnerConfig) -> Self {
        Self {
            wait: config.wait_options(),
            dialog_grace: config.dialog_grace(),
            dialog_policy: config.dialog_policy,
        }
    }

    /// Set the default wait timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.wait.timeout_ms = timeout_ms;
        self
    }
}

/// One console message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Emitting context
    pub context: ContextId,
    /// log, warn, error
    pub level: String,
    /// Message text
    pub text: String,
}

/// State of one top-level context at failure time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDiagnostics {
    /// Context id
    pub context: ContextId,
    /// URL at capture time
    pub url: String,
    /// Serialized DOM, if the browser could still produce it
    pub dom: Option<String>,
}

/// Everything captured about a session for a failure report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Live top-level contexts
    pub pages: Vec<PageDiagnostics>,
    /// Console output, oldest first
    pub console: Vec<ConsoleEntry>,
    /// Dialogs intercepted, in order
    pub dialogs: Vec<DialogRecord>,
    /// Why the channel closed, if it did
    pub channel_closed: Option<String>,
}

/// A connected browser plus the bookkeeping for one test case
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    channel: Arc<CommandChannel>,
    tree: SharedTree,
    interceptor: Arc<DialogInterceptor>,
    contexts: ContextManager,
    waiter: Waiter,
    options: SessionOptions,
    console: Arc<Mutex<VecDeque<ConsoleEntry>>>,
}

impl Session {
    /// Wrap a transport. The tree subscribes before the interceptor so dialog
    /// and popup routing always sees up-to-date contexts.
    #[must_use]
    pub fn start(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let channel = Arc::new(CommandChannel::new(transport));
        let tree = ContextTree::attach(&channel);
        let interceptor =
            DialogInterceptor::attach(&channel, Arc::clone(&tree), options.dialog_policy);
        let waiter = Waiter::with_cancellation(cancel);
        let contexts = ContextManager::new(
            Arc::clone(&channel),
            Arc::clone(&tree),
            Arc::clone(&interceptor),
            waiter.clone(),
        );

        let console: Arc<Mutex<VecDeque<ConsoleEntry>>> =
            Arc::new(Mutex::new(VecDeque::with_capacity(CONSOLE_LIMIT)));
        let sink = Arc::clone(&console);
        channel.subscribe(
            EventKind::Console,
            Arc::new(move |event: &BrowserEvent| {
                if let BrowserEvent::Console {
                    context,
                    level,
                    text,
                } = event
                {
                    if let Ok(mut lines) = sink.lock() {
                        if lines.len() >= CONSOLE_LIMIT {
                            lines.pop_front();
                        }
                        lines.push_back(ConsoleEntry {
                            context: *context,
                            level: level.clone(),
                            text: text.clone(),
                        });
                    }
                }
            }),
        );

        let id = Uuid::new_v4();
        debug!(session = %id, "session started");
        Arc::new(Self {
            id,
            channel,
            tree,
            interceptor,
            contexts,
            waiter,
            options,
            console,
        })
    }

    /// Launch a browser and start a session on it
    pub async fn launch(
        launcher: &dyn BrowserLauncher,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> EnsayoResult<Arc<Self>> {
        let transport = launcher.launch().await?;
        Ok(Self::start(transport, options, cancel))
    }

    /// Open a new top-level page
    pub async fn new_page(self: &Arc<Self>) -> EnsayoResult<Page> {
        let context = self
            .channel
            .send(Command::NewPage)
            .await?
            .into_context()?
            .ok_or_else(|| EnsayoError::Protocol {
                message: "browser did not return a page context".to_string(),
            })?;
        self.contexts.wait_for_loaded(context, &self.options.wait).await?;
        debug!(session = %self.id, %context, "page opened");
        Ok(Page::new(Arc::clone(self), context))
    }

    /// Handle on an existing top-level context
    #[must_use]
    pub fn page(self: &Arc<Self>, context: ContextId) -> Page {
        Page::new(Arc::clone(self), context)
    }

    /// Live top-level contexts (pages and popups)
    #[must_use]
    pub fn pages(self: &Arc<Self>) -> Vec<Page> {
        let roots = lock_tree(&self.tree).roots();
        roots.into_iter().map(|id| self.page(id)).collect()
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The command channel
    #[must_use]
    pub const fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    /// The context tree
    #[must_use]
    pub const fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// Frame and popup routing
    #[must_use]
    pub const fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// The dialog interceptor
    #[must_use]
    pub const fn interceptor(&self) -> &Arc<DialogInterceptor> {
        &self.interceptor
    }

    /// This case's waiter
    #[must_use]
    pub const fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// Default wait options
    #[must_use]
    pub const fn wait_options(&self) -> &WaitOptions {
        &self.options.wait
    }

    /// Session options
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Wait for dialogs raised by the last action to be answered
    pub async fn settle(&self) -> EnsayoResult<()> {
        self.interceptor
            .settle(&self.channel, self.options.dialog_grace)
            .await
    }

    /// Console output so far
    #[must_use]
    pub fn console(&self) -> Vec<ConsoleEntry> {
        self.console
            .lock()
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Capture URLs, DOM snapshots, console and dialog logs.
    ///
    /// Best effort: a dead browser still yields the logs.
    pub async fn diagnostics(&self) -> Diagnostics {
        self.channel.drain_events().await;
        let roots = lock_tree(&self.tree).roots();
        let mut pages = Vec::with_capacity(roots.len());
        for context in roots {
            let url = match self.channel.send(Command::Url { context }).await {
                Ok(response) => response.into_text().unwrap_or_default(),
                Err(_) => self
                    .contexts
                    .context(context)
                    .map(|c| c.url)
                    .unwrap_or_default(),
            };
            let dom = match self.channel.send(Command::Snapshot { context }).await {
                Ok(response) => response.into_text().ok(),
                Err(_) => None,
            };
            pages.push(PageDiagnostics { context, url, dom });
        }
        Diagnostics {
            pages,
            console: self.console(),
            dialogs: self.interceptor.records(),
            channel_closed: self.channel.closed_reason(),
        }
    }

    /// Shut the browser down; safe to call more than once
    pub async fn close(&self) -> EnsayoResult<()> {
        debug!(session = %self.id, "session closing");
        self.channel.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::simulated::{Node, PageSpec, SimulatedBrowser, Site};

    fn chatty_site() -> Site {
        Site::new().page(
            "https://console.test/",
            PageSpec::new(
                "Console",
                Node::new("body").child(Node::new("button").text("Log")),
            )
            .on_click("button", |_, fx| {
                for i in 0..CONSOLE_LIMIT + 5 {
                    fx.console("log", &format!("line {i}"));
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_console_keeps_the_newest_lines() {
        let session = Session::start(
            Arc::new(SimulatedBrowser::new(Arc::new(chatty_site()))),
            SessionOptions::default().with_timeout(2_000),
            CancellationToken::new(),
        );
        let page = session.new_page().await.unwrap();
        page.goto("https://console.test/").await.unwrap();
        page.click("button").await.unwrap();

        let console = session.console();
        assert_eq!(console.len(), CONSOLE_LIMIT);
        assert_eq!(console[0].text, "line 5");
        assert_eq!(
            console.last().unwrap().text,
            format!("line {}", CONSOLE_LIMIT + 4)
        );
        assert_eq!(console[0].level, "log");
    }
}
