//! Command channel to a browser process.
//!
//! Every other component talks to the browser through [`CommandChannel`]:
//! `send` a [`Command`] and await its [`Response`], or `subscribe` to the
//! [`BrowserEvent`] stream. The browser side is abstracted by [`Transport`]
//! so the same orchestration runs against Chromium (`cdp` feature) and the
//! in-memory [`crate::simulated`] browser.
//!
//! Events are fanned out by a pump task owned by the channel. The pump keeps
//! a processed counter so callers can [`CommandChannel::drain_events`]: wait
//! until every event the browser emitted so far has reached its subscribers.

use crate::context::ContextKind;
use crate::dialog::DialogType;
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::Selector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the broadcast buffer between transport and pump
pub const EVENT_BUFFER: usize = 1024;

// =============================================================================
// WIRE IDENTIFIERS
// =============================================================================

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

wire_id!(
    /// Browser-assigned browsing context identifier
    ContextId,
    "ctx"
);
wire_id!(
    /// Browser-assigned element identifier, unique within a session
    ElementId,
    "el"
);
wire_id!(
    /// Browser-assigned native dialog identifier
    DialogId,
    "dlg"
);

// =============================================================================
// ELEMENT STATE
// =============================================================================

/// Snapshot of one element as reported by the browser
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Element identifier
    pub id: ElementId,
    /// Lowercase tag name
    pub tag: String,
    /// Text content
    pub text: String,
    /// Attributes
    pub attributes: BTreeMap<String, String>,
    /// Rendered and not hidden by CSS
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Accepts text input
    pub editable: bool,
    /// Still in the document
    pub attached: bool,
    /// Covered by another element at its click point
    pub obscured: bool,
    /// Checkbox or radio state
    pub checked: bool,
    /// Current form value
    pub value: Option<String>,
}

impl ElementInfo {
    /// Attribute value by name
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First failed actionability check, if any
    #[must_use]
    pub const fn blocking_reason(&self, needs_editable: bool) -> Option<&'static str> {
        if !self.attached {
            Some("element is detached")
        } else if !self.visible {
            Some("element is not visible")
        } else if self.obscured {
            Some("element is obscured by another element")
        } else if !self.enabled {
            Some("element is disabled")
        } else if needs_editable && !self.editable {
            Some("element is not editable")
        } else {
            None
        }
    }
}

/// Document readiness of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    /// Still parsing
    Loading,
    /// DOM parsed, subresources pending
    Interactive,
    /// Load event fired
    Complete,
}

// =============================================================================
// COMMANDS AND RESPONSES
// =============================================================================

/// Input dispatched to a single element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementAction {
    /// Mouse click at the element center
    Click,
    /// Replace the value of an editable element
    Fill(String),
    /// Ensure a checkbox is checked
    Check,
    /// Ensure a checkbox is unchecked
    Uncheck,
    /// Attach files to a file input
    SetInputFiles(Vec<PathBuf>),
}

impl ElementAction {
    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Fill(_) => "fill",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::SetInputFiles(_) => "set_input_files",
        }
    }

    /// Whether the target must accept text input
    #[must_use]
    pub const fn needs_editable(&self) -> bool {
        matches!(self, Self::Fill(_))
    }
}

/// Request sent over the channel
#[derive(Debug, Clone)]
pub enum Command {
    /// Open a new top-level page
    NewPage,
    /// Navigate a context to a URL
    Navigate {
        /// Target context
        context: ContextId,
        /// Destination
        url: String,
    },
    /// Find all elements matching a selector
    Query {
        /// Context to search
        context: ContextId,
        /// What to match
        selector: Selector,
    },
    /// Re-read the state of one element
    Describe {
        /// Owning context
        context: ContextId,
        /// Element to describe
        element: ElementId,
    },
    /// Dispatch an input action
    Perform {
        /// Owning context
        context: ContextId,
        /// Target element
        element: ElementId,
        /// Input to dispatch
        action: ElementAction,
    },
    /// Context hosted by a frame element
    ContentFrame {
        /// Owning context
        context: ContextId,
        /// `frame` or `iframe` element
        element: ElementId,
    },
    /// Current document readiness
    ReadyState {
        /// Context to inspect
        context: ContextId,
    },
    /// Current URL
    Url {
        /// Context to inspect
        context: ContextId,
    },
    /// Serialized DOM for diagnostics
    Snapshot {
        /// Context to serialize
        context: ContextId,
    },
    /// Accept or dismiss a native dialog
    AnswerDialog {
        /// Dialog to answer
        dialog: DialogId,
        /// Accept (`true`) or dismiss
        accept: bool,
        /// Text for prompt dialogs
        prompt_text: Option<String>,
    },
    /// Close a top-level context
    Close {
        /// Context to close
        context: ContextId,
    },
}

impl Command {
    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewPage => "new_page",
            Self::Navigate { .. } => "navigate",
            Self::Query { .. } => "query",
            Self::Describe { .. } => "describe",
            Self::Perform { .. } => "perform",
            Self::ContentFrame { .. } => "content_frame",
            Self::ReadyState { .. } => "ready_state",
            Self::Url { .. } => "url",
            Self::Snapshot { .. } => "snapshot",
            Self::AnswerDialog { .. } => "answer_dialog",
            Self::Close { .. } => "close",
        }
    }
}

/// Reply to a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command applied
    Ack,
    /// Query result
    Elements(Vec<ElementInfo>),
    /// Describe result
    Element(ElementInfo),
    /// NewPage or ContentFrame result
    Context(Option<ContextId>),
    /// Url or Snapshot result
    Text(String),
    /// ReadyState result
    ReadyState(ReadyState),
}

impl Response {
    fn unexpected(&self, wanted: &str) -> EnsayoError {
        EnsayoError::Protocol {
            message: format!("expected {wanted} response, got {self:?}"),
        }
    }

    /// Unwrap a query result
    pub fn into_elements(self) -> EnsayoResult<Vec<ElementInfo>> {
        match self {
            Self::Elements(elements) => Ok(elements),
            other => Err(other.unexpected("elements")),
        }
    }

    /// Unwrap a describe result
    pub fn into_element(self) -> EnsayoResult<ElementInfo> {
        match self {
            Self::Element(info) => Ok(info),
            other => Err(other.unexpected("element")),
        }
    }

    /// Unwrap a context result
    pub fn into_context(self) -> EnsayoResult<Option<ContextId>> {
        match self {
            Self::Context(context) => Ok(context),
            other => Err(other.unexpected("context")),
        }
    }

    /// Unwrap a text result
    pub fn into_text(self) -> EnsayoResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(other.unexpected("text")),
        }
    }

    /// Unwrap a ready-state result
    pub fn into_ready_state(self) -> EnsayoResult<ReadyState> {
        match self {
            Self::ReadyState(state) => Ok(state),
            other => Err(other.unexpected("ready state")),
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Asynchronous notification from the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEvent {
    /// A page, frame, or popup came into existence
    ContextCreated {
        /// New context
        context: ContextId,
        /// Hosting context for frames
        parent: Option<ContextId>,
        /// Page, frame, or popup
        kind: ContextKind,
        /// Frame `name` attribute
        name: Option<String>,
        /// Initial URL
        url: String,
        /// Context that opened a popup
        opener: Option<ContextId>,
    },
    /// Load event fired
    ContextLoaded {
        /// Loaded context
        context: ContextId,
        /// Final URL
        url: String,
    },
    /// Context started loading a new document
    ContextNavigated {
        /// Navigating context
        context: ContextId,
        /// New URL
        url: String,
    },
    /// Context closed or frame detached
    ContextDestroyed {
        /// Destroyed context
        context: ContextId,
    },
    /// Native dialog opened and is blocking its context
    DialogOpened {
        /// Dialog identifier
        dialog: DialogId,
        /// Context that raised it
        context: ContextId,
        /// Alert, confirm, prompt, or beforeunload
        kind: DialogType,
        /// Dialog message
        message: String,
        /// Prompt default value
        default_value: Option<String>,
    },
    /// Native dialog answered
    DialogClosed {
        /// Dialog identifier
        dialog: DialogId,
        /// Whether it was accepted
        accepted: bool,
    },
    /// Console output
    Console {
        /// Emitting context
        context: ContextId,
        /// log, warn, error
        level: String,
        /// Message text
        text: String,
    },
}

/// Event filter for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Every event
    Any,
    /// [`BrowserEvent::ContextCreated`]
    ContextCreated,
    /// [`BrowserEvent::ContextLoaded`]
    ContextLoaded,
    /// [`BrowserEvent::ContextNavigated`]
    ContextNavigated,
    /// [`BrowserEvent::ContextDestroyed`]
    ContextDestroyed,
    /// [`BrowserEvent::DialogOpened`]
    DialogOpened,
    /// [`BrowserEvent::DialogClosed`]
    DialogClosed,
    /// [`BrowserEvent::Console`]
    Console,
}

impl EventKind {
    /// Whether an event passes this filter
    #[must_use]
    pub fn accepts(self, event: &BrowserEvent) -> bool {
        self == Self::Any || self == event.kind()
    }
}

impl BrowserEvent {
    /// Filter kind of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ContextCreated { .. } => EventKind::ContextCreated,
            Self::ContextLoaded { .. } => EventKind::ContextLoaded,
            Self::ContextNavigated { .. } => EventKind::ContextNavigated,
            Self::ContextDestroyed { .. } => EventKind::ContextDestroyed,
            Self::DialogOpened { .. } => EventKind::DialogOpened,
            Self::DialogClosed { .. } => EventKind::DialogClosed,
            Self::Console { .. } => EventKind::Console,
        }
    }
}

/// Broadcast source owned by a [`Transport`].
///
/// Counts emitted events so the consuming channel knows when it has caught
/// up. Emission and subscription are serialized so a subscriber's baseline is
/// exact.
#[derive(Debug)]
pub struct EventBus {
    sender: Mutex<Option<broadcast::Sender<BrowserEvent>>>,
    emitted: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

impl EventBus {
    /// Create a bus with the given buffer capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            emitted: AtomicU64::new(0),
        }
    }

    /// Publish an event. Returns false once the bus is closed.
    pub fn emit(&self, event: BrowserEvent) -> bool {
        if let Ok(guard) = self.sender.lock() {
            if let Some(sender) = guard.as_ref() {
                self.emitted.fetch_add(1, Ordering::SeqCst);
                // No receivers is fine: nobody is listening yet.
                let _ = sender.send(event);
                return true;
            }
        }
        false
    }

    /// Subscribe, returning the receiver and the emitted count at that point
    pub fn subscribe(&self) -> Option<(broadcast::Receiver<BrowserEvent>, u64)> {
        let guard = self.sender.lock().ok()?;
        let sender = guard.as_ref()?;
        Some((sender.subscribe(), self.emitted.load(Ordering::SeqCst)))
    }

    /// Total events emitted since creation
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Close the bus; receivers see the end of the stream after draining
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    /// Whether [`EventBus::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Browser capability: executes commands and publishes events
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Execute one command
    async fn execute(&self, command: Command) -> EnsayoResult<Response>;

    /// Event source
    fn events(&self) -> &EventBus;

    /// Terminate the browser side
    async fn shutdown(&self) -> EnsayoResult<()>;
}

// =============================================================================
// COMMAND CHANNEL
// =============================================================================

/// Synchronous event callback
pub type EventHandler = Arc<dyn Fn(&BrowserEvent) + Send + Sync>;

/// Token returned by [`CommandChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    id: u64,
    kind: EventKind,
    handler: EventHandler,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;
type ClosedReason = Arc<Mutex<Option<String>>>;

/// Ordered command/response channel plus event fan-out
pub struct CommandChannel {
    transport: Arc<dyn Transport>,
    subscribers: Subscribers,
    closed: ClosedReason,
    next_subscription: AtomicU64,
    next_seq: AtomicU64,
    baseline: u64,
    processed: watch::Receiver<u64>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("transport", &self.transport)
            .field("closed", &self.closed_reason())
            .finish_non_exhaustive()
    }
}

impl CommandChannel {
    /// Wrap a transport and start the event pump.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let closed: ClosedReason = Arc::new(Mutex::new(None));
        let (processed_tx, processed) = watch::channel(0_u64);

        let (pump, baseline) = match transport.events().subscribe() {
            Some((receiver, baseline)) => (
                tokio::spawn(pump_events(
                    receiver,
                    Arc::clone(&subscribers),
                    Arc::clone(&closed),
                    processed_tx,
                )),
                baseline,
            ),
            None => {
                if let Ok(mut reason) = closed.lock() {
                    *reason = Some("event stream already closed".to_string());
                }
                (tokio::spawn(async {}), 0)
            }
        };

        Self {
            transport,
            subscribers,
            closed,
            next_subscription: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            baseline,
            processed,
            pump,
        }
    }

    /// Send a command and await its response.
    ///
    /// Commands awaited in sequence by one caller reach the browser in that
    /// order.
    pub async fn send(&self, command: Command) -> EnsayoResult<Response> {
        if let Some(reason) = self.closed_reason() {
            return Err(EnsayoError::ChannelClosed { reason });
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        debug!(seq, command = name, "send");
        match self.transport.execute(command).await {
            Err(EnsayoError::ChannelClosed { reason }) => {
                self.mark_closed(&reason);
                Err(EnsayoError::ChannelClosed { reason })
            }
            Err(err) => {
                debug!(seq, command = name, error = %err, "command failed");
                Err(err)
            }
            Ok(response) => Ok(response),
        }
    }

    /// Register a synchronous handler for events of `kind`
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionHandle {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { id, kind, handler });
        }
        SubscriptionHandle(id)
    }

    /// Remove a handler. Returns false if it was already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        if let Ok(mut subs) = self.subscribers.lock() {
            let before = subs.len();
            subs.retain(|s| s.id != handle.0);
            return subs.len() != before;
        }
        false
    }

    /// Number of registered handlers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Wait until every event emitted so far has been dispatched
    pub async fn drain_events(&self) {
        let target = self
            .transport
            .events()
            .emitted()
            .saturating_sub(self.baseline);
        let mut processed = self.processed.clone();
        let closed = Arc::clone(&self.closed);
        // Err means the pump ended; nothing further will be dispatched.
        let _ = processed
            .wait_for(|count| {
                *count >= target || closed.lock().map(|c| c.is_some()).unwrap_or(true)
            })
            .await;
    }

    /// Reason the channel closed, if it has
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.closed.lock().ok().and_then(|c| c.clone())
    }

    /// Whether the channel can still send
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_reason().is_some()
    }

    /// Close the channel and shut the browser side down
    pub async fn close(&self) -> EnsayoResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.mark_closed("channel closed by client");
        let result = self.transport.shutdown().await;
        self.pump.abort();
        result
    }

    fn mark_closed(&self, reason: &str) {
        if let Ok(mut closed) = self.closed.lock() {
            if closed.is_none() {
                *closed = Some(reason.to_string());
            }
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_events(
    mut receiver: broadcast::Receiver<BrowserEvent>,
    subscribers: Subscribers,
    closed: ClosedReason,
    processed: watch::Sender<u64>,
) {
    let mut count = 0_u64;
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let handlers: Vec<EventHandler> = subscribers
                    .lock()
                    .map(|subs| {
                        subs.iter()
                            .filter(|s| s.kind.accepts(&event))
                            .map(|s| Arc::clone(&s.handler))
                            .collect()
                    })
                    .unwrap_or_default();
                for handler in handlers {
                    handler(&event);
                }
                count += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, events dropped");
                count += skipped;
            }
            Err(broadcast::error::RecvError::Closed) => {
                if let Ok(mut reason) = closed.lock() {
                    if reason.is_none() {
                        *reason = Some("browser event stream ended".to_string());
                    }
                }
                processed.send_replace(count);
                break;
            }
        }
        processed.send_replace(count);
    }
}
