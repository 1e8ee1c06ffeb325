//! Chromium transport over the DevTools protocol.
//!
//! [`CdpLauncher`] starts a browser through `chromiumoxide` and hands the
//! session a [`CdpTransport`]. Commands are executed as small scripts in the
//! page: a per-window registry gives every element a stable numeric id until
//! the document is replaced, after which lookups report the element stale.
//!
//! Same-origin frames are reached through their host element's
//! `contentDocument`. Selectors the browser cannot evaluate natively
//! (`text=` and `:has-text`) are matched in Rust against a mirror of the
//! element tree.

use crate::channel::{
    BrowserEvent, Command, ContextId, DialogId, ElementAction, ElementId, ElementInfo, EventBus,
    ReadyState, Response, Transport,
};
use crate::config::BrowserConfig;
use crate::context::ContextKind;
use crate::dialog::DialogType;
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::{query_all, Element, Selector};
use crate::session::BrowserLauncher;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::{
    DialogType as CdpDialogType, EventFrameNavigated, EventJavascriptDialogClosed,
    EventJavascriptDialogOpening, EventLoadEventFired, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, EventConsoleApiCalled};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on a single protocol round trip
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts made to find the page behind a new popup target
const POPUP_LOOKUPS: usize = 20;

// =============================================================================
// PAGE SCRIPTS
// =============================================================================

const PRELUDE: &str = r"
const reg = window.__ensayo || (window.__ensayo = { next: 1, nodes: new Map(), ids: new WeakMap() });
const idOf = (el) => {
  let id = reg.ids.get(el);
  if (id === undefined) { id = reg.next++; reg.ids.set(el, id); reg.nodes.set(id, el); }
  return id;
};
const nodeOf = (id) => { const el = reg.nodes.get(id); return el && el.isConnected ? el : null; };
const docOf = (frame) => {
  if (frame === null) return document;
  const host = nodeOf(frame);
  try { return host ? host.contentDocument : null; } catch (e) { return null; }
};
const TEXT_INPUTS = ['', 'text', 'search', 'email', 'password', 'tel', 'url', 'number',
  'date', 'time', 'datetime-local', 'month', 'week'];
const describe = (el) => {
  const view = el.ownerDocument.defaultView;
  const style = view ? view.getComputedStyle(el) : null;
  const rect = el.getBoundingClientRect();
  const visible = el.isConnected && rect.width > 0 && rect.height > 0 && style !== null
    && style.visibility !== 'hidden' && style.display !== 'none';
  let obscured = false;
  if (visible) {
    const hit = el.ownerDocument.elementFromPoint(rect.left + rect.width / 2, rect.top + rect.height / 2);
    obscured = hit !== null && hit !== el && !el.contains(hit);
  }
  const tag = el.tagName.toLowerCase();
  const type = (el.getAttribute('type') || '').toLowerCase();
  const editable = !el.readOnly && (tag === 'textarea' || el.isContentEditable
    || (tag === 'input' && TEXT_INPUTS.includes(type)));
  return {
    id: idOf(el),
    tag,
    text: el.textContent || '',
    attributes: Object.fromEntries(Array.from(el.attributes, (a) => [a.name, a.value])),
    visible,
    enabled: !el.disabled,
    editable,
    attached: el.isConnected,
    obscured,
    checked: !!el.checked,
    value: typeof el.value === 'string' ? el.value : null,
  };
};
";

/// Wrap `body` so it runs with the registry helpers and `ARGS` in scope
fn script(args: &serde_json::Value, body: &str) -> String {
    format!("(() => {{ const ARGS = {args};\n{PRELUDE}\n{body}\n}})()")
}

const QUERY_NATIVE: &str = r"
const doc = docOf(ARGS.frame);
if (!doc) return { stale_context: 'frame document is gone' };
let found;
try {
  if (ARGS.xpath !== null) {
    const snap = doc.evaluate(ARGS.xpath, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    found = [];
    for (let i = 0; i < snap.snapshotLength; i++) {
      const node = snap.snapshotItem(i);
      if (node.nodeType === 1) found.push(node);
    }
  } else if (ARGS.test_id !== null) {
    found = Array.from(doc.querySelectorAll('[data-testid]'))
      .filter((el) => el.getAttribute('data-testid') === ARGS.test_id);
  } else {
    found = Array.from(doc.querySelectorAll(ARGS.css));
  }
} catch (e) {
  return { invalid: String(e) };
}
return { ok: found.map(describe) };
";

const MIRROR: &str = r"
const doc = docOf(ARGS.frame);
if (!doc) return { stale_context: 'frame document is gone' };
if (!doc.documentElement) return { ok: [] };
const all = [doc.documentElement, ...doc.documentElement.querySelectorAll('*')];
const index = new Map(all.map((el, i) => [el, i]));
return { ok: all.map((el) => ({
  id: idOf(el),
  tag: el.tagName.toLowerCase(),
  attributes: Object.fromEntries(Array.from(el.attributes, (a) => [a.name, a.value])),
  text: Array.from(el.childNodes).filter((n) => n.nodeType === 3).map((n) => n.data).join(''),
  parent: el.parentElement && index.has(el.parentElement) ? index.get(el.parentElement) : null,
})) };
";

const DESCRIBE_MANY: &str = r"
const out = [];
for (const id of ARGS.ids) {
  const el = nodeOf(id);
  if (el) out.push(describe(el));
}
return { ok: out };
";

const DESCRIBE_ONE: &str = r"
const el = nodeOf(ARGS.id);
if (!el) return { stale_element: ARGS.id };
return { ok: describe(el) };
";

const PERFORM: &str = r"
const el = nodeOf(ARGS.id);
if (!el) return { stale_element: ARGS.id };
el.scrollIntoView({ block: 'center', inline: 'center' });
switch (ARGS.action) {
  case 'click':
    setTimeout(() => el.click(), 0);
    break;
  case 'fill':
    el.focus();
    if (el.isContentEditable) { el.textContent = ARGS.value; } else { el.value = ARGS.value; }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    break;
  case 'check':
  case 'uncheck': {
    const type = (el.getAttribute('type') || '').toLowerCase();
    if (el.tagName.toLowerCase() !== 'input' || (type !== 'checkbox' && type !== 'radio')) {
      return { invalid: 'element is not a checkbox or radio input' };
    }
    const want = ARGS.action === 'check';
    if (!want && type === 'radio') return { invalid: 'a radio input cannot be unchecked' };
    if (el.checked !== want) el.click();
    break;
  }
  default:
    return { invalid: 'unsupported action ' + ARGS.action };
}
return { ok: null };
";

const FILE_TARGET: &str = r"
const el = nodeOf(ARGS.id);
if (!el) return null;
if (el.tagName.toLowerCase() !== 'input' || (el.getAttribute('type') || '').toLowerCase() !== 'file') {
  return null;
}
return el;
";

const CONTENT_FRAME: &str = r"
const el = nodeOf(ARGS.id);
if (!el) return { stale_element: ARGS.id };
let doc = null;
try { doc = el.contentDocument; } catch (e) { doc = null; }
if (!doc) return { ok: null };
return { ok: { name: el.getAttribute('name'), url: doc.URL, ready: doc.readyState } };
";

const DOCUMENT_INFO: &str = r"
const doc = docOf(ARGS.frame);
if (!doc) return { stale_context: 'frame document is gone' };
return { ok: {
  url: doc.URL,
  ready: doc.readyState,
  html: doc.documentElement ? doc.documentElement.outerHTML : '',
} };
";

/// Script outcome; stale and invalid outcomes become errors
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Reply<T> {
    Ok(T),
    StaleElement(u64),
    StaleContext(String),
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct RawElement {
    id: u64,
    tag: String,
    text: String,
    attributes: BTreeMap<String, String>,
    visible: bool,
    enabled: bool,
    editable: bool,
    attached: bool,
    obscured: bool,
    checked: bool,
    value: Option<String>,
}

impl RawElement {
    fn into_info(self, slot: u64) -> ElementInfo {
        ElementInfo {
            id: element_id(slot, self.id),
            tag: self.tag,
            text: self.text,
            attributes: self.attributes,
            visible: self.visible,
            enabled: self.enabled,
            editable: self.editable,
            attached: self.attached,
            obscured: self.obscured,
            checked: self.checked,
            value: self.value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameInfo {
    name: Option<String>,
    url: String,
    ready: String,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    url: String,
    ready: String,
    html: String,
}

fn ready_state(raw: &str) -> ReadyState {
    match raw {
        "complete" => ReadyState::Complete,
        "interactive" => ReadyState::Interactive,
        _ => ReadyState::Loading,
    }
}

/// Element ids carry the owning page slot in the high half
const fn element_id(slot: u64, local: u64) -> ElementId {
    ElementId((slot << 32) | (local & 0xffff_ffff))
}

const fn split_element(id: ElementId) -> (u64, u64) {
    (id.0 >> 32, id.0 & 0xffff_ffff)
}

// =============================================================================
// ELEMENT MIRROR
// =============================================================================

#[derive(Debug, Deserialize)]
struct MirrorNode {
    id: u64,
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    parent: Option<usize>,
}

/// Read-only copy of a document's element tree
#[derive(Debug)]
struct Mirror {
    nodes: Vec<MirrorNode>,
    children: Vec<Vec<usize>>,
}

impl Mirror {
    fn new(nodes: Vec<MirrorNode>) -> Self {
        let mut children = vec![Vec::new(); nodes.len()];
        for (index, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent.filter(|p| *p < nodes.len()) {
                children[parent].push(index);
            }
        }
        Self { nodes, children }
    }

    /// Registry ids of elements matching `selector`, in document order
    fn select(&self, selector: &Selector) -> Vec<u64> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let root = MirrorRef {
            mirror: self,
            index: 0,
        };
        query_all(&root, selector)
            .into_iter()
            .map(|el| self.nodes[el.index].id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct MirrorRef<'a> {
    mirror: &'a Mirror,
    index: usize,
}

impl Element for MirrorRef<'_> {
    fn local_name(&self) -> String {
        self.mirror.nodes[self.index].tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.mirror.nodes[self.index].attributes.get(name).cloned()
    }

    fn text_content(&self) -> String {
        let mut out = self.mirror.nodes[self.index].text.clone();
        for child in self.children() {
            out.push_str(&child.text_content());
        }
        out
    }

    fn parent_element(&self) -> Option<Self> {
        self.mirror.nodes[self.index].parent.map(|index| MirrorRef {
            mirror: self.mirror,
            index,
        })
    }

    fn children(&self) -> Vec<Self> {
        self.mirror.children[self.index]
            .iter()
            .map(|&index| MirrorRef {
                mirror: self.mirror,
                index,
            })
            .collect()
    }
}

// =============================================================================
// QUERY PLANS
// =============================================================================

/// How a selector is evaluated against a real document
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryPlan {
    Css(String),
    TestId(String),
    XPath(String),
    Mirror,
}

impl QueryPlan {
    fn for_selector(selector: &Selector) -> Self {
        match selector {
            Selector::Css(css) if !css.needs_text_engine() => Self::Css(css.source().to_string()),
            Selector::TestId(id) => Self::TestId(id.clone()),
            Selector::XPath(expr) => Self::XPath(expr.clone()),
            Selector::Css(_) | Selector::Text(_) => Self::Mirror,
        }
    }

    fn args(&self, frame: Option<u64>) -> serde_json::Value {
        let (css, test_id, xpath) = match self {
            Self::Css(css) => (Some(css.as_str()), None, None),
            Self::TestId(id) => (None, Some(id.as_str()), None),
            Self::XPath(expr) => (None, None, Some(expr.as_str())),
            Self::Mirror => (None, None, None),
        };
        serde_json::json!({ "frame": frame, "css": css, "test_id": test_id, "xpath": xpath })
    }
}

// =============================================================================
// BROWSER STATE
// =============================================================================

#[derive(Debug)]
struct PageSlot {
    page: CdpPage,
    context: ContextId,
    target: TargetId,
    dialog: Option<DialogId>,
    tasks: Vec<JoinHandle<()>>,
}

/// Where a context's document lives
#[derive(Debug, Clone, Copy)]
struct Route {
    slot: u64,
    /// Registry id of the hosting frame element; `None` for the top document
    frame: Option<u64>,
    loaded: bool,
}

#[derive(Debug, Default)]
struct State {
    pages: BTreeMap<u64, PageSlot>,
    routes: BTreeMap<ContextId, Route>,
    frames: BTreeMap<(u64, u64), ContextId>,
    dialogs: BTreeMap<DialogId, u64>,
}

#[derive(Debug)]
struct Inner {
    browser: tokio::sync::Mutex<CdpBrowser>,
    bus: EventBus,
    state: Mutex<State>,
    closed: AtomicBool,
    next_context: AtomicU64,
    next_slot: AtomicU64,
    next_dialog: AtomicU64,
}

fn protocol(err: impl std::fmt::Display) -> EnsayoError {
    EnsayoError::Protocol {
        message: err.to_string(),
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cdp_error(&self, err: CdpError) -> EnsayoError {
        if self.closed.load(Ordering::SeqCst)
            || matches!(
                err,
                CdpError::Ws(..) | CdpError::ChannelSendError(..) | CdpError::NoResponse
            )
        {
            self.closed.store(true, Ordering::SeqCst);
            return EnsayoError::ChannelClosed {
                reason: err.to_string(),
            };
        }
        protocol(err)
    }

    fn route(&self, context: ContextId) -> EnsayoResult<(Route, CdpPage)> {
        let state = self.state();
        let stale = || EnsayoError::StaleContext {
            context: context.to_string(),
            reason: "context is not open".to_string(),
        };
        let route = *state.routes.get(&context).ok_or_else(stale)?;
        let page = state
            .pages
            .get(&route.slot)
            .map(|p| p.page.clone())
            .ok_or_else(stale)?;
        Ok((route, page))
    }

    fn blocked(&self, slot: u64) -> bool {
        self.state()
            .pages
            .get(&slot)
            .is_some_and(|p| p.dialog.is_some())
    }

    async fn eval<T: DeserializeOwned>(
        &self,
        page: &CdpPage,
        context: ContextId,
        slot: u64,
        js: String,
    ) -> EnsayoResult<T> {
        let params = EvaluateParams::builder()
            .expression(js)
            .return_by_value(true)
            .build()
            .map_err(protocol)?;
        let evaluation = tokio::time::timeout(COMMAND_TIMEOUT, page.evaluate_expression(params))
            .await
            .map_err(|_| EnsayoError::Protocol {
                message: format!(
                    "browser did not answer within {}ms",
                    COMMAND_TIMEOUT.as_millis()
                ),
            })?
            .map_err(|e| self.cdp_error(e))?;
        let reply: Reply<T> = evaluation.into_value().map_err(EnsayoError::from)?;
        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::StaleElement(local) => Err(EnsayoError::StaleElement {
                element: element_id(slot, local).to_string(),
            }),
            Reply::StaleContext(reason) => Err(EnsayoError::StaleContext {
                context: context.to_string(),
                reason,
            }),
            Reply::Invalid(message) => Err(EnsayoError::Protocol { message }),
        }
    }

    // -------------------------------------------------------------------------
    // Context bookkeeping
    // -------------------------------------------------------------------------

    /// Drop every frame context of a page, deepest last
    fn drop_frames(&self, slot: u64) {
        let dropped: Vec<ContextId> = {
            let mut state = self.state();
            let frames: Vec<ContextId> = state
                .routes
                .iter()
                .filter(|(_, r)| r.slot == slot && r.frame.is_some())
                .map(|(id, _)| *id)
                .collect();
            for id in &frames {
                state.routes.remove(id);
            }
            state.frames.retain(|(s, _), _| *s != slot);
            frames
        };
        for context in dropped {
            self.bus.emit(BrowserEvent::ContextDestroyed { context });
        }
    }

    fn page_context(&self, slot: u64) -> Option<ContextId> {
        self.state().pages.get(&slot).map(|p| p.context)
    }

    async fn register_page(
        self: &Arc<Self>,
        page: CdpPage,
        kind: ContextKind,
        opener: Option<ContextId>,
    ) -> EnsayoResult<ContextId> {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let context = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        let target = page.target_id().clone();
        {
            let mut state = self.state();
            state.pages.insert(
                slot,
                PageSlot {
                    page: page.clone(),
                    context,
                    target,
                    dialog: None,
                    tasks: Vec::new(),
                },
            );
            state.routes.insert(
                context,
                Route {
                    slot,
                    frame: None,
                    loaded: false,
                },
            );
        }
        let url = page.url().await.ok().flatten().unwrap_or_default();
        self.bus.emit(BrowserEvent::ContextCreated {
            context,
            parent: None,
            kind,
            name: None,
            url: url.clone(),
            opener,
        });

        let tasks = self.listen(slot, context, &page).await?;
        if let Some(entry) = self.state().pages.get_mut(&slot) {
            entry.tasks = tasks;
        }

        let info: DocumentInfo = self
            .eval(&page, context, slot, script(&serde_json::json!({ "frame": null }), DOCUMENT_INFO))
            .await?;
        if ready_state(&info.ready) == ReadyState::Complete {
            self.mark_loaded(context, info.url);
        }
        debug!(%context, ?kind, "page registered");
        Ok(context)
    }

    fn mark_loaded(&self, context: ContextId, url: String) {
        let first = {
            let mut state = self.state();
            match state.routes.get_mut(&context) {
                Some(route) if !route.loaded => {
                    route.loaded = true;
                    true
                }
                _ => false,
            }
        };
        if first {
            self.bus.emit(BrowserEvent::ContextLoaded { context, url });
        }
    }

    /// Forward page events onto the bus
    async fn listen(
        self: &Arc<Self>,
        slot: u64,
        context: ContextId,
        page: &CdpPage,
    ) -> EnsayoResult<Vec<JoinHandle<()>>> {
        macro_rules! listen {
            ($event:ty, |$ev:ident| $body:block) => {{
                let mut stream = page.event_listener::<$event>().await.map_err(protocol)?;
                tokio::spawn(async move {
                    while let Some($ev) = stream.next().await {
                        $body
                    }
                })
            }};
        }

        let mut tasks = Vec::with_capacity(5);

        let inner = Arc::clone(self);
        tasks.push(listen!(EventFrameNavigated, |event| {
            if event.frame.parent_id.is_none() {
                inner.drop_frames(slot);
                if let Some(route) = inner.state().routes.get_mut(&context) {
                    route.loaded = false;
                }
                inner.bus.emit(BrowserEvent::ContextNavigated {
                    context,
                    url: event.frame.url.clone(),
                });
            }
        }));

        let inner = Arc::clone(self);
        let loaded_page = page.clone();
        tasks.push(listen!(EventLoadEventFired, |_event| {
            let url = loaded_page.url().await.ok().flatten().unwrap_or_default();
            inner.mark_loaded(context, url);
        }));

        let inner = Arc::clone(self);
        tasks.push(listen!(EventJavascriptDialogOpening, |event| {
            let dialog = DialogId(inner.next_dialog.fetch_add(1, Ordering::Relaxed));
            {
                let mut state = inner.state();
                if let Some(entry) = state.pages.get_mut(&slot) {
                    entry.dialog = Some(dialog);
                }
                state.dialogs.insert(dialog, slot);
            }
            let kind = match &event.r#type {
                CdpDialogType::Alert => DialogType::Alert,
                CdpDialogType::Confirm => DialogType::Confirm,
                CdpDialogType::Prompt => DialogType::Prompt,
                CdpDialogType::Beforeunload => DialogType::BeforeUnload,
            };
            inner.bus.emit(BrowserEvent::DialogOpened {
                dialog,
                context,
                kind,
                message: event.message.clone(),
                default_value: event.default_prompt.clone(),
            });
        }));

        let inner = Arc::clone(self);
        tasks.push(listen!(EventJavascriptDialogClosed, |event| {
            if let Some(dialog) = inner.clear_dialog(slot) {
                inner.bus.emit(BrowserEvent::DialogClosed {
                    dialog,
                    accepted: event.result,
                });
            }
        }));

        let inner = Arc::clone(self);
        tasks.push(listen!(EventConsoleApiCalled, |event| {
            let level = serde_json::to_value(&event.r#type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "log".to_string());
            let text = event
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(value), _) => value.to_string(),
                    (None, Some(description)) => description.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            inner.bus.emit(BrowserEvent::Console {
                context,
                level,
                text,
            });
        }));

        Ok(tasks)
    }

    /// Forget the open dialog of a page, returning it if there was one
    fn clear_dialog(&self, slot: u64) -> Option<DialogId> {
        let mut state = self.state();
        let dialog = state.pages.get_mut(&slot).and_then(|p| p.dialog.take())?;
        state.dialogs.remove(&dialog);
        Some(dialog)
    }

    async fn adopt_popup(self: &Arc<Self>, target: TargetId, opener: TargetId) {
        let opener_context = {
            let state = self.state();
            state
                .pages
                .values()
                .find(|p| p.target == opener)
                .map(|p| p.context)
        };
        let Some(opener_context) = opener_context else {
            return;
        };
        for _ in 0..POPUP_LOOKUPS {
            let pages = {
                let browser = self.browser.lock().await;
                browser.pages().await
            };
            match pages {
                Ok(pages) => {
                    if let Some(page) = pages.into_iter().find(|p| p.target_id() == &target) {
                        if let Err(err) = self
                            .register_page(page, ContextKind::Popup, Some(opener_context))
                            .await
                        {
                            warn!(error = %err, "popup registration failed");
                        }
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "listing pages failed");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        warn!(?target, "popup target never became a page");
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// [`Transport`] backed by a Chromium process
#[derive(Debug)]
pub struct CdpTransport {
    inner: Arc<Inner>,
    handler: JoinHandle<()>,
    popups: JoinHandle<()>,
}

impl CdpTransport {
    /// Launch Chromium with `config`
    pub async fn launch(config: &BrowserConfig) -> EnsayoResult<Self> {
        let mut builder = CdpConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.executable {
            builder = builder.chrome_executable(path);
        }
        builder = builder.window_size(config.viewport_width, config.viewport_height);

        let cdp_config = builder.build().map_err(|e| EnsayoError::Protocol {
            message: format!("browser launch failed: {e}"),
        })?;
        let (browser, mut handler) =
            CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| EnsayoError::Protocol {
                    message: format!("browser launch failed: {e}"),
                })?;

        let mut targets = browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(protocol)?;

        let inner = Arc::new(Inner {
            browser: tokio::sync::Mutex::new(browser),
            bus: EventBus::default(),
            state: Mutex::new(State::default()),
            closed: AtomicBool::new(false),
            next_context: AtomicU64::new(1),
            next_slot: AtomicU64::new(1),
            next_dialog: AtomicU64::new(1),
        });

        let handler_inner = Arc::clone(&inner);
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
            handler_inner.closed.store(true, Ordering::SeqCst);
            handler_inner.bus.close();
        });

        let popup_inner = Arc::clone(&inner);
        let popups = tokio::spawn(async move {
            while let Some(event) = targets.next().await {
                let info = &event.target_info;
                if info.r#type != "page" {
                    continue;
                }
                if let Some(opener) = info.opener_id.clone() {
                    let inner = Arc::clone(&popup_inner);
                    let target = info.target_id.clone();
                    tokio::spawn(async move { inner.adopt_popup(target, opener).await });
                }
            }
        });

        debug!(headless = config.headless, "chromium launched");
        Ok(Self {
            inner,
            handler,
            popups,
        })
    }

    async fn query(&self, context: ContextId, selector: &Selector) -> EnsayoResult<Response> {
        let (route, page) = self.inner.route(context)?;
        let plan = QueryPlan::for_selector(selector);
        let raw: Vec<RawElement> = if plan == QueryPlan::Mirror {
            let nodes: Vec<MirrorNode> = self
                .inner
                .eval(
                    &page,
                    context,
                    route.slot,
                    script(&serde_json::json!({ "frame": route.frame }), MIRROR),
                )
                .await?;
            let ids = Mirror::new(nodes).select(selector);
            self.inner
                .eval(
                    &page,
                    context,
                    route.slot,
                    script(&serde_json::json!({ "ids": ids }), DESCRIBE_MANY),
                )
                .await?
        } else {
            self.inner
                .eval(&page, context, route.slot, script(&plan.args(route.frame), QUERY_NATIVE))
                .await?
        };
        Ok(Response::Elements(
            raw.into_iter().map(|r| r.into_info(route.slot)).collect(),
        ))
    }

    async fn describe(&self, context: ContextId, element: ElementId) -> EnsayoResult<ElementInfo> {
        let (route, page) = self.inner.route(context)?;
        let (slot, local) = split_element(element);
        if slot != route.slot {
            return Err(EnsayoError::StaleElement {
                element: element.to_string(),
            });
        }
        let raw: RawElement = self
            .inner
            .eval(
                &page,
                context,
                slot,
                script(&serde_json::json!({ "id": local }), DESCRIBE_ONE),
            )
            .await?;
        Ok(raw.into_info(slot))
    }

    async fn perform(
        &self,
        context: ContextId,
        element: ElementId,
        action: ElementAction,
    ) -> EnsayoResult<()> {
        let info = self.describe(context, element).await?;
        let not_actionable = |reason: &str| EnsayoError::NotActionable {
            selector: element.to_string(),
            reason: reason.to_string(),
        };
        let (route, page) = self.inner.route(context)?;
        if self.inner.blocked(route.slot) {
            return Err(not_actionable("page is blocked by a dialog"));
        }
        if let Some(reason) = info.blocking_reason(action.needs_editable()) {
            return Err(not_actionable(reason));
        }
        let (_, local) = split_element(element);

        let (name, value) = match action {
            ElementAction::Click => ("click", None),
            ElementAction::Fill(value) => ("fill", Some(value)),
            ElementAction::Check => ("check", None),
            ElementAction::Uncheck => ("uncheck", None),
            ElementAction::SetInputFiles(files) => {
                return self.set_files(&page, context, route.slot, local, files).await;
            }
        };
        let args = serde_json::json!({ "id": local, "action": name, "value": value });
        self.inner
            .eval::<Option<()>>(&page, context, route.slot, script(&args, PERFORM))
            .await?;
        Ok(())
    }

    async fn set_files(
        &self,
        page: &CdpPage,
        context: ContextId,
        slot: u64,
        local: u64,
        files: Vec<std::path::PathBuf>,
    ) -> EnsayoResult<()> {
        let params = EvaluateParams::builder()
            .expression(script(&serde_json::json!({ "id": local }), FILE_TARGET))
            .return_by_value(false)
            .build()
            .map_err(protocol)?;
        let evaluation = page
            .evaluate_expression(params)
            .await
            .map_err(|e| self.inner.cdp_error(e))?;
        let Some(object_id) = evaluation.object().object_id.clone() else {
            return Err(EnsayoError::Protocol {
                message: format!(
                    "{} in {context} is not a file input",
                    element_id(slot, local)
                ),
            });
        };
        let files = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut upload = SetFileInputFilesParams::new(files);
        upload.object_id = Some(object_id);
        page.execute(upload)
            .await
            .map_err(|e| self.inner.cdp_error(e))?;
        Ok(())
    }

    async fn content_frame(
        &self,
        context: ContextId,
        element: ElementId,
    ) -> EnsayoResult<Option<ContextId>> {
        let (route, page) = self.inner.route(context)?;
        let (slot, local) = split_element(element);
        if slot != route.slot {
            return Err(EnsayoError::StaleElement {
                element: element.to_string(),
            });
        }
        let frame: Option<FrameInfo> = self
            .inner
            .eval(
                &page,
                context,
                slot,
                script(&serde_json::json!({ "id": local }), CONTENT_FRAME),
            )
            .await?;
        let Some(frame) = frame else {
            return Ok(None);
        };

        let existing = self.inner.state().frames.get(&(slot, local)).copied();
        let child = if let Some(child) = existing {
            child
        } else {
            let child = ContextId(self.inner.next_context.fetch_add(1, Ordering::Relaxed));
            {
                let mut state = self.inner.state();
                state.frames.insert((slot, local), child);
                state.routes.insert(
                    child,
                    Route {
                        slot,
                        frame: Some(local),
                        loaded: false,
                    },
                );
            }
            self.inner.bus.emit(BrowserEvent::ContextCreated {
                context: child,
                parent: Some(context),
                kind: ContextKind::Frame,
                name: frame.name.clone(),
                url: frame.url.clone(),
                opener: None,
            });
            child
        };
        if ready_state(&frame.ready) == ReadyState::Complete {
            self.inner.mark_loaded(child, frame.url);
        }
        Ok(Some(child))
    }

    async fn document(&self, context: ContextId) -> EnsayoResult<DocumentInfo> {
        let (route, page) = self.inner.route(context)?;
        self.inner
            .eval(
                &page,
                context,
                route.slot,
                script(&serde_json::json!({ "frame": route.frame }), DOCUMENT_INFO),
            )
            .await
    }

    async fn answer_dialog(
        &self,
        dialog: DialogId,
        accept: bool,
        prompt_text: Option<String>,
    ) -> EnsayoResult<()> {
        let slot = self.inner.state().dialogs.get(&dialog).copied().ok_or_else(|| {
            EnsayoError::Protocol {
                message: format!("{dialog} is not open"),
            }
        })?;
        let page = self
            .inner
            .state()
            .pages
            .get(&slot)
            .map(|p| p.page.clone())
            .ok_or_else(|| EnsayoError::Protocol {
                message: format!("{dialog} belongs to a closed page"),
            })?;
        let mut params = HandleJavaScriptDialogParams::new(accept);
        params.prompt_text = prompt_text;
        page.execute(params)
            .await
            .map_err(|e| self.inner.cdp_error(e))?;
        if self.inner.clear_dialog(slot).is_some() {
            self.inner.bus.emit(BrowserEvent::DialogClosed {
                dialog,
                accepted: accept,
            });
        }
        Ok(())
    }

    async fn close_page(&self, context: ContextId) -> EnsayoResult<()> {
        let (route, _) = self.inner.route(context)?;
        if route.frame.is_some() {
            return Err(EnsayoError::Protocol {
                message: format!("{context} is a frame; only pages can be closed"),
            });
        }
        self.inner.drop_frames(route.slot);
        let slot = {
            let mut state = self.inner.state();
            state.routes.remove(&context);
            state.dialogs.retain(|_, s| *s != route.slot);
            state.pages.remove(&route.slot)
        };
        if let Some(slot) = slot {
            for task in &slot.tasks {
                task.abort();
            }
            slot.page
                .close()
                .await
                .map_err(|e| self.inner.cdp_error(e))?;
        }
        self.inner
            .bus
            .emit(BrowserEvent::ContextDestroyed { context });
        Ok(())
    }
}

#[async_trait]
impl Transport for CdpTransport {
    async fn execute(&self, command: Command) -> EnsayoResult<Response> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EnsayoError::ChannelClosed {
                reason: "browser connection ended".to_string(),
            });
        }
        match command {
            Command::NewPage => {
                let page = {
                    let browser = self.inner.browser.lock().await;
                    browser
                        .new_page("about:blank")
                        .await
                        .map_err(|e| self.inner.cdp_error(e))?
                };
                let context = self
                    .inner
                    .register_page(page, ContextKind::Page, None)
                    .await?;
                Ok(Response::Context(Some(context)))
            }
            Command::Navigate { context, url } => {
                let (route, page) = self.inner.route(context)?;
                if route.frame.is_some() {
                    return Err(EnsayoError::Navigation {
                        url,
                        message: "frames navigate through their host page".to_string(),
                    });
                }
                page.goto(url.as_str())
                    .await
                    .map_err(|e| match self.inner.cdp_error(e) {
                        closed @ EnsayoError::ChannelClosed { .. } => closed,
                        other => EnsayoError::Navigation {
                            url: url.clone(),
                            message: other.to_string(),
                        },
                    })?;
                Ok(Response::Ack)
            }
            Command::Query { context, selector } => self.query(context, &selector).await,
            Command::Describe { context, element } => {
                Ok(Response::Element(self.describe(context, element).await?))
            }
            Command::Perform {
                context,
                element,
                action,
            } => {
                self.perform(context, element, action).await?;
                Ok(Response::Ack)
            }
            Command::ContentFrame { context, element } => Ok(Response::Context(
                self.content_frame(context, element).await?,
            )),
            Command::ReadyState { context } => Ok(Response::ReadyState(ready_state(
                &self.document(context).await?.ready,
            ))),
            Command::Url { context } => Ok(Response::Text(self.document(context).await?.url)),
            Command::Snapshot { context } => {
                Ok(Response::Text(self.document(context).await?.html))
            }
            Command::AnswerDialog {
                dialog,
                accept,
                prompt_text,
            } => {
                self.answer_dialog(dialog, accept, prompt_text).await?;
                Ok(Response::Ack)
            }
            Command::Close { context } => {
                self.close_page(context).await?;
                Ok(Response::Ack)
            }
        }
    }

    fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    async fn shutdown(&self) -> EnsayoResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.popups.abort();
        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.inner.state();
            state
                .pages
                .values_mut()
                .flat_map(|p| std::mem::take(&mut p.tasks))
                .collect()
        };
        for task in tasks {
            task.abort();
        }
        let result = {
            let mut browser = self.inner.browser.lock().await;
            browser.close().await.map(|_| ()).map_err(protocol)
        };
        self.inner.bus.close();
        self.handler.abort();
        debug!("chromium closed");
        result
    }
}

// =============================================================================
// LAUNCHER
// =============================================================================

/// Starts one Chromium per test case
#[derive(Debug, Clone, Default)]
pub struct CdpLauncher {
    config: BrowserConfig,
}

impl CdpLauncher {
    /// Launcher with the given browser settings
    #[must_use]
    pub const fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    /// Browser settings
    #[must_use]
    pub const fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(&self) -> EnsayoResult<Arc<dyn Transport>> {
        Ok(Arc::new(CdpTransport::launch(&self.config).await?))
    }
}
