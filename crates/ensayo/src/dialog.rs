//! Dialog and new-window interception.
//!
//! Native dialogs (alert, confirm, prompt, beforeunload) block their page
//! until answered. [`DialogInterceptor`] answers every dialog the moment it
//! opens: a one-shot handler registered for the page wins, then a persistent
//! handler, then the session's [`AutoDialogBehavior`]. Handlers must be
//! registered before the action that raises the dialog.
//!
//! The same interceptor hands popup windows to whoever registered
//! [`DialogInterceptor::once_new_window`] for the opener.

use crate::channel::{BrowserEvent, Command, CommandChannel, ContextId, DialogId, EventKind};
use crate::context::{lock_tree, SharedTree};
use crate::result::{EnsayoError, EnsayoResult};
use crate::wait::Waiter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Type of browser dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogType {
    /// Alert dialog (OK button only)
    Alert,
    /// Confirm dialog (OK/Cancel buttons)
    Confirm,
    /// Prompt dialog (text input + OK/Cancel)
    Prompt,
    /// Before unload dialog (Leave/Stay buttons)
    BeforeUnload,
}

impl std::fmt::Display for DialogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alert => write!(f, "alert"),
            Self::Confirm => write!(f, "confirm"),
            Self::Prompt => write!(f, "prompt"),
            Self::BeforeUnload => write!(f, "beforeunload"),
        }
    }
}

/// Action taken on a dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogAction {
    /// Dialog was accepted (OK/Yes/Leave)
    Accept,
    /// Dialog was accepted with input text (for prompts)
    AcceptWith(String),
    /// Dialog was dismissed (Cancel/No/Stay)
    Dismiss,
    /// Dialog is pending (not yet handled)
    Pending,
}

impl DialogAction {
    /// Wire answer: accept flag and prompt text
    #[must_use]
    pub fn answer(&self) -> (bool, Option<String>) {
        match self {
            Self::Accept => (true, None),
            Self::AcceptWith(text) => (true, Some(text.clone())),
            Self::Dismiss | Self::Pending => (false, None),
        }
    }
}

/// Represents a browser dialog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    /// Browser-assigned id
    id: DialogId,
    /// Type of dialog
    dialog_type: DialogType,
    /// Message displayed in the dialog
    message: String,
    /// Default value (for prompt dialogs)
    default_value: Option<String>,
    /// Action taken
    action: DialogAction,
}

impl Dialog {
    /// Create a new dialog
    #[must_use]
    pub fn new(dialog_type: DialogType, message: impl Into<String>) -> Self {
        Self {
            id: DialogId::default(),
            dialog_type,
            message: message.into(),
            default_value: None,
            action: DialogAction::Pending,
        }
    }

    /// Create an alert dialog
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::new(DialogType::Alert, message)
    }

    /// Create a confirm dialog
    #[must_use]
    pub fn confirm(message: impl Into<String>) -> Self {
        Self::new(DialogType::Confirm, message)
    }

    /// Create a prompt dialog
    #[must_use]
    pub fn prompt(message: impl Into<String>, default: Option<String>) -> Self {
        let mut dialog = Self::new(DialogType::Prompt, message);
        dialog.default_value = default;
        dialog
    }

    /// Create a beforeunload dialog
    #[must_use]
    pub fn before_unload(message: impl Into<String>) -> Self {
        Self::new(DialogType::BeforeUnload, message)
    }

    /// Attach the browser-assigned id
    #[must_use]
    pub const fn with_id(mut self, id: DialogId) -> Self {
        self.id = id;
        self
    }

    /// Browser-assigned id
    #[must_use]
    pub const fn id(&self) -> DialogId {
        self.id
    }

    /// Get dialog type
    #[must_use]
    pub const fn dialog_type(&self) -> DialogType {
        self.dialog_type
    }

    /// Get dialog message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get default value (for prompts)
    #[must_use]
    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    /// Get action taken
    #[must_use]
    pub const fn action(&self) -> &DialogAction {
        &self.action
    }

    /// Check if dialog was handled
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        !matches!(self.action, DialogAction::Pending)
    }

    /// Accept the dialog
    pub fn accept(&mut self) {
        self.action = DialogAction::Accept;
    }

    /// Accept the dialog with input text (for prompts)
    pub fn accept_with(&mut self, text: impl Into<String>) {
        self.action = DialogAction::AcceptWith(text.into());
    }

    /// Dismiss the dialog
    pub fn dismiss(&mut self) {
        self.action = DialogAction::Dismiss;
    }
}

/// Configuration for automatic dialog handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoDialogBehavior {
    /// Accept all dialogs automatically
    AcceptAll,
    /// Dismiss all dialogs automatically
    #[default]
    DismissAll,
    /// Accept with empty string (for prompts)
    AcceptEmpty,
    /// Use default value (for prompts)
    UseDefault,
}

impl AutoDialogBehavior {
    /// Decide a dialog nobody handled
    pub fn apply(self, dialog: &mut Dialog) {
        match self {
            Self::AcceptAll => dialog.accept(),
            Self::DismissAll => dialog.dismiss(),
            Self::AcceptEmpty => {
                if dialog.dialog_type() == DialogType::Prompt {
                    dialog.accept_with("");
                } else {
                    dialog.accept();
                }
            }
            Self::UseDefault => {
                if let Some(default) = dialog.default_value.clone() {
                    dialog.accept_with(default);
                } else {
                    dialog.accept();
                }
            }
        }
    }
}

impl std::str::FromStr for AutoDialogBehavior {
    type Err = EnsayoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" | "accept_all" => Ok(Self::AcceptAll),
            "dismiss" | "dismiss_all" => Ok(Self::DismissAll),
            "accept_empty" => Ok(Self::AcceptEmpty),
            "use_default" | "default" => Ok(Self::UseDefault),
            other => Err(EnsayoError::Config {
                message: format!("unknown dialog policy '{other}'"),
            }),
        }
    }
}

// =============================================================================
// PENDING EVENTS
// =============================================================================

/// One-shot result of an event subscription.
///
/// Resolves when the event arrives. Use [`PendingEvent::wait`] to bound it
/// by a timeout and the test's cancellation.
#[derive(Debug)]
pub struct PendingEvent<T> {
    receiver: oneshot::Receiver<T>,
    description: String,
}

impl<T> PendingEvent<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<T>, description: impl Into<String>) -> Self {
        Self {
            receiver,
            description: description.into(),
        }
    }

    /// What this is waiting for
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The value, if it already arrived
    pub fn try_take(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Wait at most `timeout_ms`, abandoning early if `waiter` is cancelled
    pub async fn wait(self, waiter: &Waiter, timeout_ms: u64) -> EnsayoResult<T> {
        let description = self.description.clone();
        tokio::select! {
            () = waiter.cancellation().cancelled() => Err(EnsayoError::Cancelled {
                reason: format!("cancelled while waiting for {description}"),
            }),
            () = tokio::time::sleep(Duration::from_millis(timeout_ms)) => Err(EnsayoError::Timeout {
                ms: timeout_ms,
                waited_for: description,
            }),
            result = self => result,
        }
    }
}

impl<T> Future for PendingEvent<T> {
    type Output = EnsayoResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.receiver).poll(cx);
        polled.map(|result| {
            result.map_err(|_| EnsayoError::ChannelClosed {
                reason: format!("{} was abandoned", self.description),
            })
        })
    }
}

// =============================================================================
// INTERCEPTOR
// =============================================================================

/// One-shot dialog handler
pub type OnceDialogFn = Box<dyn FnOnce(&mut Dialog) + Send>;

/// Persistent dialog handler
pub type DialogHandlerFn = Arc<dyn Fn(&mut Dialog) + Send + Sync>;

/// Which rule decided a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandledBy {
    /// One-shot handler
    Once,
    /// Persistent handler
    Persistent,
    /// Session-wide automatic behavior
    Default,
}

/// Log entry for one intercepted dialog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogRecord {
    /// The dialog and its final action
    pub dialog: Dialog,
    /// Context that raised it
    pub context: ContextId,
    /// Page whose handlers were consulted
    pub page: ContextId,
    /// Which rule decided it
    pub handled_by: HandledBy,
}

struct OnceHandler {
    handler: Option<OnceDialogFn>,
    notify: Option<oneshot::Sender<Dialog>>,
}

/// A dialog waiting for its handler to decide
struct DialogJob {
    dialog: Dialog,
    context: ContextId,
    page: ContextId,
    once: Option<OnceHandler>,
    persistent: Option<DialogHandlerFn>,
    behavior: AutoDialogBehavior,
}

#[derive(Default)]
struct InterceptorState {
    behavior: AutoDialogBehavior,
    once: HashMap<ContextId, VecDeque<OnceHandler>>,
    persistent: HashMap<ContextId, DialogHandlerFn>,
    windows: HashMap<ContextId, VecDeque<oneshot::Sender<ContextId>>>,
    open: HashMap<DialogId, ContextId>,
    log: Vec<DialogRecord>,
    failures: Vec<String>,
}

/// Answers dialogs and routes popups as their events arrive
pub struct DialogInterceptor {
    channel: Weak<CommandChannel>,
    tree: SharedTree,
    state: Mutex<InterceptorState>,
    pending: watch::Sender<usize>,
    answered: AtomicU64,
    jobs: mpsc::UnboundedSender<DialogJob>,
}

impl std::fmt::Debug for DialogInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogInterceptor")
            .field("behavior", &self.behavior())
            .field("dialog_count", &self.dialog_count())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl DialogInterceptor {
    /// Create an interceptor and subscribe it to `channel`.
    ///
    /// `tree` must already be attached so dialogs can be mapped to pages.
    /// Handlers run on a blocking worker, one dialog at a time in the order
    /// the dialogs opened, so a slow handler never stalls event delivery.
    #[must_use]
    pub fn attach(
        channel: &Arc<CommandChannel>,
        tree: SharedTree,
        behavior: AutoDialogBehavior,
    ) -> Arc<Self> {
        let (pending, _) = watch::channel(0);
        let (jobs, queue) = mpsc::unbounded_channel();
        let interceptor = Arc::new(Self {
            channel: Arc::downgrade(channel),
            tree,
            state: Mutex::new(InterceptorState {
                behavior,
                ..InterceptorState::default()
            }),
            pending,
            answered: AtomicU64::new(0),
            jobs,
        });
        tokio::spawn(decide_dialogs(Arc::downgrade(&interceptor), queue));
        let sink = Arc::clone(&interceptor);
        channel.subscribe(
            EventKind::Any,
            Arc::new(move |event: &BrowserEvent| sink.on_event(event)),
        );
        interceptor
    }

    fn on_event(self: &Arc<Self>, event: &BrowserEvent) {
        match event {
            BrowserEvent::DialogOpened {
                dialog,
                context,
                kind,
                message,
                default_value,
            } => {
                let mut opened = Dialog::new(*kind, message.clone()).with_id(*dialog);
                opened.default_value.clone_from(default_value);
                self.on_dialog_opened(*context, opened);
            }
            // Open entries are cleared when the answer command returns, after
            // every event its transaction raised was emitted.
            BrowserEvent::DialogClosed { dialog, accepted } => {
                debug!(%dialog, accepted, "dialog closed");
            }
            BrowserEvent::ContextCreated {
                context,
                opener: Some(opener),
                ..
            } => self.on_window_opened(*opener, *context),
            _ => {}
        }
    }

    fn on_dialog_opened(self: &Arc<Self>, context: ContextId, dialog: Dialog) {
        let page = lock_tree(&self.tree).root_of(context);
        let (once, persistent, behavior) = match self.state.lock() {
            Ok(mut state) => {
                state.open.insert(dialog.id(), context);
                let once = state.once.get_mut(&page).and_then(VecDeque::pop_front);
                let persistent = if once.is_none() {
                    state.persistent.get(&page).cloned()
                } else {
                    None
                };
                (once, persistent, state.behavior)
            }
            Err(_) => (None, None, AutoDialogBehavior::default()),
        };
        self.publish_pending();

        let id = dialog.id();
        let job = DialogJob {
            dialog,
            context,
            page,
            once,
            persistent,
            behavior,
        };
        if self.jobs.send(job).is_err() {
            warn!(dialog = %id, "dialog worker gone, dismissing");
            self.answer(id, false, None);
        }
    }

    async fn decide(self: &Arc<Self>, job: DialogJob) {
        let DialogJob {
            mut dialog,
            context,
            page,
            once,
            persistent,
            behavior,
        } = job;
        let (handled_by, handler, notify) = match (once, persistent) {
            (Some(mut once), _) => (HandledBy::Once, once.handler.take(), once.notify.take()),
            (None, Some(handler)) => (
                HandledBy::Persistent,
                Some(Box::new(move |d: &mut Dialog| handler(d)) as OnceDialogFn),
                None,
            ),
            (None, None) => {
                warn!(
                    kind = %dialog.dialog_type(),
                    message = dialog.message(),
                    ?behavior,
                    "unhandled dialog, applying default behavior"
                );
                (HandledBy::Default, None, None)
            }
        };
        if let Some(handler) = handler {
            dialog = self.run_handler(dialog, handler).await;
        }
        if !dialog.is_handled() {
            behavior.apply(&mut dialog);
        }
        info!(
            dialog = %dialog.id(),
            kind = %dialog.dialog_type(),
            action = ?dialog.action(),
            ?handled_by,
            "dialog intercepted"
        );

        if let Ok(mut state) = self.state.lock() {
            state.log.push(DialogRecord {
                dialog: dialog.clone(),
                context,
                page,
                handled_by,
            });
        }
        let (accept, prompt_text) = dialog.action().answer();
        let id = dialog.id();
        if let Some(notify) = notify {
            // The waiter may have given up; the dialog is still answered.
            let _ = notify.send(dialog);
        }
        self.answer(id, accept, prompt_text);
    }

    async fn run_handler(&self, dialog: Dialog, handler: OnceDialogFn) -> Dialog {
        let untouched = dialog.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut dialog = dialog;
            handler(&mut dialog);
            dialog
        })
        .await;
        match outcome {
            Ok(dialog) => dialog,
            Err(err) => {
                let reason = if err.is_panic() {
                    let panic = err.into_panic();
                    panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string())
                } else {
                    "handler was cancelled".to_string()
                };
                warn!(dialog = %untouched.id(), %reason, "dialog handler panicked");
                if let Ok(mut state) = self.state.lock() {
                    state.failures.push(format!(
                        "{} handler panicked: {reason}",
                        untouched.dialog_type()
                    ));
                }
                untouched
            }
        }
    }

    fn answer(self: &Arc<Self>, dialog: DialogId, accept: bool, prompt_text: Option<String>) {
        let Some(channel) = self.channel.upgrade() else {
            self.clear_open(|id, _| id == dialog);
            return;
        };
        let interceptor = Arc::clone(self);
        tokio::spawn(async move {
            let result = channel
                .send(Command::AnswerDialog {
                    dialog,
                    accept,
                    prompt_text,
                })
                .await;
            match result {
                Ok(_) => {
                    interceptor.answered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => debug!(%dialog, error = %err, "dialog answer failed"),
            }
            interceptor.clear_open(|id, _| id == dialog);
        });
    }

    fn on_window_opened(&self, opener: ContextId, popup: ContextId) {
        let page = lock_tree(&self.tree).root_of(opener);
        let delivered = self.state.lock().is_ok_and(|mut state| {
            let Some(queue) = state.windows.get_mut(&page) else {
                return false;
            };
            while let Some(sender) = queue.pop_front() {
                if sender.send(popup).is_ok() {
                    return true;
                }
            }
            false
        });
        if !delivered {
            debug!(%opener, %popup, "window opened with no waiter");
        }
    }

    fn clear_open(&self, remove: impl Fn(DialogId, ContextId) -> bool) {
        if let Ok(mut state) = self.state.lock() {
            state.open.retain(|id, ctx| !remove(*id, *ctx));
        }
        self.publish_pending();
    }

    fn publish_pending(&self) {
        let count = self.pending_count();
        self.pending.send_replace(count);
    }

    fn page_of(&self, context: ContextId) -> ContextId {
        lock_tree(&self.tree).root_of(context)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Handle the next dialog raised on `page` with `handler`.
    ///
    /// The returned event resolves to the dialog as answered.
    pub fn once_dialog<F>(&self, page: ContextId, handler: F) -> PendingEvent<Dialog>
    where
        F: FnOnce(&mut Dialog) + Send + 'static,
    {
        let page = self.page_of(page);
        let (sender, receiver) = oneshot::channel();
        if let Ok(mut state) = self.state.lock() {
            state.once.entry(page).or_default().push_back(OnceHandler {
                handler: Some(Box::new(handler)),
                notify: Some(sender),
            });
        }
        PendingEvent::new(receiver, format!("dialog on {page}"))
    }

    /// Handle every dialog on `page` not claimed by a one-shot handler
    pub fn on_dialog<F>(&self, page: ContextId, handler: F)
    where
        F: Fn(&mut Dialog) + Send + Sync + 'static,
    {
        let page = self.page_of(page);
        if let Ok(mut state) = self.state.lock() {
            state.persistent.insert(page, Arc::new(handler));
        }
    }

    /// Remove the persistent handler. Returns false if none was set.
    pub fn remove_dialog_handler(&self, page: ContextId) -> bool {
        let page = self.page_of(page);
        self.state
            .lock()
            .is_ok_and(|mut state| state.persistent.remove(&page).is_some())
    }

    /// Receive the next popup opened from `opener`'s page
    pub fn once_new_window(&self, opener: ContextId) -> PendingEvent<ContextId> {
        let page = self.page_of(opener);
        let (sender, receiver) = oneshot::channel();
        if let Ok(mut state) = self.state.lock() {
            state.windows.entry(page).or_default().push_back(sender);
        }
        PendingEvent::new(receiver, format!("new window from {page}"))
    }

    /// Change the fallback for unhandled dialogs
    pub fn set_behavior(&self, behavior: AutoDialogBehavior) {
        if let Ok(mut state) = self.state.lock() {
            state.behavior = behavior;
        }
    }

    /// Current fallback
    #[must_use]
    pub fn behavior(&self) -> AutoDialogBehavior {
        self.state.lock().map(|s| s.behavior).unwrap_or_default()
    }

    // =========================================================================
    // Settling
    // =========================================================================

    /// Dialogs opened but not yet closed
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.open.len()).unwrap_or(0)
    }

    /// Wait until every dialog raised so far is answered.
    ///
    /// Fails with [`EnsayoError::HandlerTimeout`] if one is still open after
    /// `grace`, or with [`EnsayoError::AssertionFailed`] if a handler panicked.
    pub async fn settle(&self, channel: &CommandChannel, grace: Duration) -> EnsayoResult<()> {
        let mut pending = self.pending.subscribe();
        let quiet = async {
            loop {
                // Answering one dialog may raise the next; re-drain until quiet.
                channel.drain_events().await;
                if self.pending_count() == 0 {
                    break;
                }
                if pending.wait_for(|n| *n == 0).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(grace, quiet).await.is_err() {
            return Err(EnsayoError::HandlerTimeout {
                event: "dialog".to_string(),
                ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            });
        }
        let failures = self
            .state
            .lock()
            .map(|mut s| std::mem::take(&mut s.failures))
            .unwrap_or_default();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EnsayoError::AssertionFailed {
                message: failures.join("; "),
            })
        }
    }

    // =========================================================================
    // Log
    // =========================================================================

    /// Every dialog intercepted, in order
    #[must_use]
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.records().into_iter().map(|r| r.dialog).collect()
    }

    /// Full log entries
    #[must_use]
    pub fn records(&self) -> Vec<DialogRecord> {
        self.state.lock().map(|s| s.log.clone()).unwrap_or_default()
    }

    /// Get count of dialogs
    #[must_use]
    pub fn dialog_count(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or(0)
    }

    /// Get last dialog
    #[must_use]
    pub fn last_dialog(&self) -> Option<Dialog> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.log.last().map(|r| r.dialog.clone()))
    }

    /// Dialogs whose answer reached the browser
    #[must_use]
    pub fn answered_count(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    /// Expectation over the log for a specific dialog type
    #[must_use]
    pub fn expect_dialog(self: &Arc<Self>, dialog_type: DialogType) -> DialogExpectation {
        DialogExpectation {
            expected_type: dialog_type,
            interceptor: Arc::clone(self),
        }
    }
}

/// Decide queued dialogs in the order they opened
async fn decide_dialogs(
    interceptor: Weak<DialogInterceptor>,
    mut queue: mpsc::UnboundedReceiver<DialogJob>,
) {
    while let Some(job) = queue.recv().await {
        let Some(interceptor) = interceptor.upgrade() else {
            break;
        };
        interceptor.decide(job).await;
    }
}

/// Expectation for a specific dialog type
#[derive(Debug)]
pub struct DialogExpectation {
    expected_type: DialogType,
    interceptor: Arc<DialogInterceptor>,
}

impl DialogExpectation {
    /// Verify the expected dialog was encountered
    #[must_use]
    pub fn verify(&self) -> bool {
        self.interceptor
            .dialogs()
            .iter()
            .any(|d| d.dialog_type() == self.expected_type)
    }

    /// Get the dialog if it matches
    #[must_use]
    pub fn dialog(&self) -> Option<Dialog> {
        self.interceptor
            .dialogs()
            .into_iter()
            .find(|d| d.dialog_type() == self.expected_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::channel::{ElementAction, Response, Transport};
    use crate::context::ContextTree;
    use crate::selector::Selector;
    use crate::simulated::{Node, PageSpec, SimulatedBrowser, Site};

    // =========================================================================
    // H₀-DIALOG-01: Dialog creation
    // =========================================================================

    #[test]
    fn h0_dialog_01_new() {
        let dialog = Dialog::new(DialogType::Alert, "Hello");
        assert_eq!(dialog.dialog_type(), DialogType::Alert);
        assert_eq!(dialog.message(), "Hello");
        assert!(!dialog.is_handled());
    }

    #[test]
    fn h0_dialog_02_prompt_default() {
        let dialog = Dialog::prompt("Enter name:", Some("default".to_string()));
        assert_eq!(dialog.dialog_type(), DialogType::Prompt);
        assert_eq!(dialog.default_value(), Some("default"));
    }

    #[test]
    fn h0_dialog_03_constructors() {
        assert_eq!(Dialog::alert("a").dialog_type(), DialogType::Alert);
        assert_eq!(Dialog::confirm("c").dialog_type(), DialogType::Confirm);
        assert_eq!(
            Dialog::before_unload("b").dialog_type(),
            DialogType::BeforeUnload
        );
        assert_eq!(Dialog::alert("a").with_id(DialogId(4)).id(), DialogId(4));
    }

    // =========================================================================
    // H₀-DIALOG-04: Dialog actions
    // =========================================================================

    #[test]
    fn h0_dialog_04_accept_with() {
        let mut dialog = Dialog::prompt("Name?", None);
        dialog.accept_with("John");
        assert!(dialog.is_handled());
        assert_eq!(
            dialog.action().answer(),
            (true, Some("John".to_string()))
        );
    }

    #[test]
    fn h0_dialog_05_dismiss() {
        let mut dialog = Dialog::confirm("Continue?");
        dialog.dismiss();
        assert_eq!(dialog.action(), &DialogAction::Dismiss);
        assert_eq!(dialog.action().answer(), (false, None));
    }

    #[test]
    fn h0_dialog_06_type_display() {
        assert_eq!(DialogType::Alert.to_string(), "alert");
        assert_eq!(DialogType::BeforeUnload.to_string(), "beforeunload");
    }

    // =========================================================================
    // H₀-DIALOG-07: Automatic behavior
    // =========================================================================

    #[test]
    fn h0_dialog_07_default_dismisses() {
        let mut dialog = Dialog::confirm("Sure?");
        AutoDialogBehavior::default().apply(&mut dialog);
        assert_eq!(dialog.action(), &DialogAction::Dismiss);
    }

    #[test]
    fn h0_dialog_08_accept_empty_only_fills_prompts() {
        let mut prompt = Dialog::prompt("Name?", Some("x".to_string()));
        AutoDialogBehavior::AcceptEmpty.apply(&mut prompt);
        assert_eq!(prompt.action(), &DialogAction::AcceptWith(String::new()));
        let mut alert = Dialog::alert("hi");
        AutoDialogBehavior::AcceptEmpty.apply(&mut alert);
        assert_eq!(alert.action(), &DialogAction::Accept);
    }

    #[test]
    fn h0_dialog_09_use_default() {
        let mut dialog = Dialog::prompt("Name?", Some("Ada".to_string()));
        AutoDialogBehavior::UseDefault.apply(&mut dialog);
        assert_eq!(dialog.action(), &DialogAction::AcceptWith("Ada".to_string()));
    }

    #[test]
    fn h0_dialog_10_behavior_from_str() {
        assert_eq!(
            "accept".parse::<AutoDialogBehavior>().unwrap(),
            AutoDialogBehavior::AcceptAll
        );
        assert_eq!(
            " Dismiss ".parse::<AutoDialogBehavior>().unwrap(),
            AutoDialogBehavior::DismissAll
        );
        assert!("sometimes".parse::<AutoDialogBehavior>().is_err());
    }

    // =========================================================================
    // H₀-DIALOG-11: Pending events
    // =========================================================================

    #[tokio::test]
    async fn h0_dialog_11_pending_event_resolves() {
        let (tx, rx) = oneshot::channel();
        let mut pending = PendingEvent::new(rx, "number");
        assert!(pending.try_take().is_none());
        tx.send(7).unwrap();
        assert_eq!(pending.wait(&Waiter::new(), 1_000).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn h0_dialog_12_pending_event_times_out() {
        let (_tx, rx) = oneshot::channel::<u8>();
        let err = PendingEvent::new(rx, "nothing")
            .wait(&Waiter::new(), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, EnsayoError::Timeout { ms: 30, .. }));
    }

    #[tokio::test]
    async fn h0_dialog_13_dropped_sender_closes() {
        let (tx, rx) = oneshot::channel::<u8>();
        drop(tx);
        let err = PendingEvent::new(rx, "gone").await.unwrap_err();
        assert!(matches!(err, EnsayoError::ChannelClosed { .. }));
    }

    // =========================================================================
    // H₀-DIALOG-14: Interception against a live browser
    // =========================================================================

    struct Harness {
        channel: Arc<CommandChannel>,
        interceptor: Arc<DialogInterceptor>,
        page: ContextId,
    }

    fn site() -> Site {
        Site::new().page(
            "https://dialogs.test/",
            PageSpec::new(
                "Dialogs",
                Node::new("body").children([
                    Node::new("button").id("confirm").text("Confirm"),
                    Node::new("button").id("twice").text("Twice"),
                    Node::new("p").id("out"),
                ]),
            )
            .on_click("#confirm", |_, fx| {
                fx.dialog(DialogType::Confirm, "Sure?", None, |answer, fx| {
                    let text = if answer.accepted { "yes" } else { "no" };
                    fx.set_text("#out", text);
                });
            })
            .on_click("#twice", |_, fx| {
                fx.alert("one").alert("two");
            }),
        )
    }

    async fn harness() -> Harness {
        let browser = SimulatedBrowser::new(Arc::new(site()));
        let transport: Arc<dyn Transport> = Arc::new(browser);
        let channel = Arc::new(CommandChannel::new(transport));
        let tree = ContextTree::attach(&channel);
        let interceptor =
            DialogInterceptor::attach(&channel, tree, AutoDialogBehavior::DismissAll);
        let page = channel
            .send(Command::NewPage)
            .await
            .unwrap()
            .into_context()
            .unwrap()
            .unwrap();
        channel
            .send(Command::Navigate {
                context: page,
                url: "https://dialogs.test/".to_string(),
            })
            .await
            .unwrap();
        Harness {
            channel,
            interceptor,
            page,
        }
    }

    impl Harness {
        async fn click(&self, css: &str) {
            self.dispatch(css).await;
            self.interceptor
                .settle(&self.channel, Duration::from_secs(2))
                .await
                .unwrap();
        }

        async fn dispatch(&self, css: &str) {
            let elements = self
                .channel
                .send(Command::Query {
                    context: self.page,
                    selector: Selector::css(css).unwrap(),
                })
                .await
                .unwrap()
                .into_elements()
                .unwrap();
            self.channel
                .send(Command::Perform {
                    context: self.page,
                    element: elements[0].id,
                    action: ElementAction::Click,
                })
                .await
                .unwrap();
        }

        async fn text(&self, css: &str) -> String {
            match self
                .channel
                .send(Command::Query {
                    context: self.page,
                    selector: Selector::css(css).unwrap(),
                })
                .await
                .unwrap()
            {
                Response::Elements(elements) => elements[0].text.clone(),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn h0_dialog_14_once_handler_accepts() {
        let h = harness().await;
        let pending = h.interceptor.once_dialog(h.page, |d| d.accept());
        h.click("#confirm").await;
        let dialog = pending.await.unwrap();
        assert_eq!(dialog.message(), "Sure?");
        assert_eq!(h.text("#out").await, "yes");
        assert_eq!(h.interceptor.records()[0].handled_by, HandledBy::Once);
    }

    #[tokio::test]
    async fn h0_dialog_15_unhandled_dialog_dismissed() {
        let h = harness().await;
        h.click("#confirm").await;
        assert_eq!(h.text("#out").await, "no");
        assert_eq!(h.interceptor.records()[0].handled_by, HandledBy::Default);
        assert_eq!(h.interceptor.pending_count(), 0);
    }

    #[tokio::test]
    async fn h0_dialog_16_once_handler_consumed() {
        let h = harness().await;
        let _first = h.interceptor.once_dialog(h.page, |d| d.accept());
        h.click("#confirm").await;
        h.click("#confirm").await;
        assert_eq!(h.text("#out").await, "no");
        assert_eq!(h.interceptor.dialog_count(), 2);
    }

    #[tokio::test]
    async fn h0_dialog_17_persistent_handler_until_removed() {
        let h = harness().await;
        h.interceptor.on_dialog(h.page, |d| d.accept());
        h.click("#twice").await;
        assert_eq!(h.interceptor.dialog_count(), 2);
        assert!(h
            .interceptor
            .records()
            .iter()
            .all(|r| r.handled_by == HandledBy::Persistent));
        assert!(h.interceptor.remove_dialog_handler(h.page));
        assert!(!h.interceptor.remove_dialog_handler(h.page));
        h.click("#confirm").await;
        assert_eq!(h.text("#out").await, "no");
    }

    #[tokio::test]
    async fn h0_dialog_18_panicking_handler_reported() {
        let h = harness().await;
        h.interceptor.on_dialog(h.page, |_| panic!("boom"));
        let element = h
            .channel
            .send(Command::Query {
                context: h.page,
                selector: Selector::css("#confirm").unwrap(),
            })
            .await
            .unwrap()
            .into_elements()
            .unwrap()[0]
            .id;
        h.channel
            .send(Command::Perform {
                context: h.page,
                element,
                action: ElementAction::Click,
            })
            .await
            .unwrap();
        let err = h
            .interceptor
            .settle(&h.channel, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EnsayoError::AssertionFailed { .. }));
        // Still answered, so the page is not left blocked.
        assert_eq!(h.interceptor.pending_count(), 0);
    }

    #[tokio::test]
    async fn h0_dialog_20_slow_handler_exceeds_grace() {
        let h = harness().await;
        let _pending = h.interceptor.once_dialog(h.page, |d| {
            std::thread::sleep(Duration::from_millis(600));
            d.accept();
        });
        h.dispatch("#confirm").await;

        let started = std::time::Instant::now();
        let err = h
            .interceptor
            .settle(&h.channel, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EnsayoError::HandlerTimeout { ms: 100, .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(h.interceptor.pending_count(), 1);

        // The handler still finishes and its answer still lands.
        h.interceptor
            .settle(&h.channel, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(h.text("#out").await, "yes");
        assert_eq!(h.interceptor.records()[0].handled_by, HandledBy::Once);
    }

    #[tokio::test]
    async fn h0_dialog_21_slow_handler_does_not_block_events() {
        let h = harness().await;
        h.interceptor.on_dialog(h.page, |d| {
            std::thread::sleep(Duration::from_millis(300));
            d.dismiss();
        });
        h.dispatch("#confirm").await;
        let started = std::time::Instant::now();
        h.channel.drain_events().await;
        assert!(started.elapsed() < Duration::from_millis(250));
        h.interceptor
            .settle(&h.channel, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(h.text("#out").await, "no");
    }

    #[tokio::test]
    async fn h0_dialog_19_expectation_over_log() {
        let h = harness().await;
        h.click("#confirm").await;
        assert!(h.interceptor.expect_dialog(DialogType::Confirm).verify());
        assert!(h.interceptor.expect_dialog(DialogType::Prompt).dialog().is_none());
        assert_eq!(
            h.interceptor.last_dialog().unwrap().action(),
            &DialogAction::Dismiss
        );
    }
}
