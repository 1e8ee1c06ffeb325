//! Deterministic in-memory browser.
//!
//! [`SimulatedBrowser`] implements [`Transport`] over a [`Site`]: documents
//! are built from [`PageSpec`]s, frames get their own contexts, links and
//! reactions navigate or open popups, native dialogs block their context
//! until answered, and delayed effects model asynchronous pages. It lets the
//! orchestration layer be exercised without a browser binary.

mod dom;
mod site;
pub mod the_internet;

pub use dom::{Document, NodeRef};
pub use site::{
    origin, resolve_url, ClickReaction, DialogAnswer, DialogReaction, Effects, LoadReaction,
    Node, PageSpec, Site,
};

use crate::channel::{
    BrowserEvent, Command, ContextId, DialogId, ElementAction, ElementId, EventBus, ReadyState,
    Response, Transport,
};
use crate::context::ContextKind;
use crate::dialog::DialogType;
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::Element;
use crate::session::BrowserLauncher;
use async_trait::async_trait;
use site::Effect;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// URL of a fresh page
pub const BLANK_URL: &str = "about:blank";

// =============================================================================
// BROWSER STATE
// =============================================================================

#[derive(Debug)]
struct SimContext {
    parent: Option<ContextId>,
    url: String,
    document: Document,
    ready: ReadyState,
    frames: BTreeMap<ElementId, ContextId>,
    nav_seq: u64,
    blocked_by: Option<DialogId>,
}

impl SimContext {
    fn blank(parent: Option<ContextId>) -> Self {
        Self {
            parent,
            url: BLANK_URL.to_string(),
            document: Document::build(&Node::new("html"), &mut || ElementId(0)),
            ready: ReadyState::Loading,
            frames: BTreeMap::new(),
            nav_seq: 0,
            blocked_by: None,
        }
    }
}

struct OpenDialog {
    context: ContextId,
    kind: DialogType,
    default_value: Option<String>,
    on_answer: Option<DialogReaction>,
    continuation: Vec<Effect>,
}

enum Work {
    Load,
    Effects(Vec<Effect>),
}

struct Deferred {
    context: ContextId,
    nav_seq: u64,
    delay: Duration,
    work: Work,
}

#[derive(Default)]
struct Outcome {
    events: Vec<BrowserEvent>,
    deferred: Vec<Deferred>,
    crash: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    contexts: BTreeMap<ContextId, SimContext>,
    dialogs: BTreeMap<DialogId, OpenDialog>,
}

fn stale(context: ContextId) -> EnsayoError {
    EnsayoError::StaleContext {
        context: context.to_string(),
        reason: "context does not exist".to_string(),
    }
}

fn page_for(site: &Site, url: &str) -> PageSpec {
    if url == BLANK_URL {
        return PageSpec::new("", Node::new("body"));
    }
    site.lookup(url).cloned().unwrap_or_else(|| {
        PageSpec::new(
            "Not Found",
            Node::new("body").child(Node::new("h1").text("Not Found")),
        )
    })
}

impl State {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn context(&self, id: ContextId) -> EnsayoResult<&SimContext> {
        self.contexts.get(&id).ok_or_else(|| stale(id))
    }

    fn element_index(&self, context: ContextId, element: ElementId) -> EnsayoResult<usize> {
        self.context(context)?
            .document
            .index_of(element)
            .ok_or_else(|| EnsayoError::StaleElement {
                element: element.to_string(),
            })
    }

    fn new_page(&mut self, out: &mut Outcome) -> ContextId {
        let id = ContextId(self.alloc());
        let mut ctx = SimContext::blank(None);
        ctx.ready = ReadyState::Complete;
        self.contexts.insert(id, ctx);
        out.events.push(BrowserEvent::ContextCreated {
            context: id,
            parent: None,
            kind: ContextKind::Page,
            name: None,
            url: BLANK_URL.to_string(),
            opener: None,
        });
        out.events.push(BrowserEvent::ContextLoaded {
            context: id,
            url: BLANK_URL.to_string(),
        });
        id
    }

    fn navigate(
        &mut self,
        site: &Site,
        context: ContextId,
        url: &str,
        out: &mut Outcome,
    ) -> EnsayoResult<()> {
        self.context(context)?;
        self.destroy_frames(context, out);
        self.dialogs.retain(|_, d| d.context != context);

        let spec = page_for(site, url);
        let mut next = self.next_id;
        let document = Document::build(&spec.document_root(), &mut || {
            next += 1;
            ElementId(next)
        });
        self.next_id = next;
        let frames = document.frames();

        let ctx = self.contexts.get_mut(&context).ok_or_else(|| stale(context))?;
        ctx.nav_seq += 1;
        ctx.url = url.to_string();
        ctx.ready = ReadyState::Interactive;
        ctx.document = document;
        ctx.blocked_by = None;
        let nav_seq = ctx.nav_seq;
        out.events.push(BrowserEvent::ContextNavigated {
            context,
            url: url.to_string(),
        });

        for (_, element, name, src) in frames {
            let child = ContextId(self.alloc());
            let child_url = resolve_url(url, &src);
            self.contexts.insert(child, SimContext::blank(Some(context)));
            if let Some(ctx) = self.contexts.get_mut(&context) {
                ctx.frames.insert(element, child);
            }
            out.events.push(BrowserEvent::ContextCreated {
                context: child,
                parent: Some(context),
                kind: ContextKind::Frame,
                name,
                url: child_url.clone(),
                opener: None,
            });
            self.navigate(site, child, &child_url, out)?;
        }

        if spec.load_delay.is_zero() {
            self.finish_load(site, context, out);
        } else {
            out.deferred.push(Deferred {
                context,
                nav_seq,
                delay: spec.load_delay,
                work: Work::Load,
            });
        }
        Ok(())
    }

    fn finish_load(&mut self, site: &Site, context: ContextId, out: &mut Outcome) {
        let Some(ctx) = self.contexts.get_mut(&context) else {
            return;
        };
        ctx.ready = ReadyState::Complete;
        let url = ctx.url.clone();
        out.events.push(BrowserEvent::ContextLoaded {
            context,
            url: url.clone(),
        });
        let mut effects = Effects::new();
        for reaction in &page_for(site, &url).on_load {
            reaction(&mut effects);
        }
        self.apply(site, context, effects.queue, out);
    }

    fn open_window(&mut self, site: &Site, opener: ContextId, url: &str, out: &mut Outcome) {
        let id = ContextId(self.alloc());
        self.contexts.insert(id, SimContext::blank(None));
        out.events.push(BrowserEvent::ContextCreated {
            context: id,
            parent: None,
            kind: ContextKind::Popup,
            name: None,
            url: BLANK_URL.to_string(),
            opener: Some(opener),
        });
        if let Err(err) = self.navigate(site, id, url, out) {
            warn!(%err, url, "popup navigation failed");
        }
    }

    fn destroy_frames(&mut self, context: ContextId, out: &mut Outcome) {
        let frames = self
            .contexts
            .get_mut(&context)
            .map(|ctx| std::mem::take(&mut ctx.frames))
            .unwrap_or_default();
        for child in frames.into_values() {
            self.destroy_context(child, out);
        }
    }

    fn destroy_context(&mut self, context: ContextId, out: &mut Outcome) {
        let Some(ctx) = self.contexts.remove(&context) else {
            return;
        };
        for child in ctx.frames.into_values() {
            self.destroy_context(child, out);
        }
        if let Some(parent) = ctx.parent.and_then(|p| self.contexts.get_mut(&p)) {
            parent.frames.retain(|_, c| *c != context);
        }
        self.dialogs.retain(|_, d| d.context != context);
        out.events.push(BrowserEvent::ContextDestroyed { context });
    }

    fn perform(
        &mut self,
        site: &Site,
        context: ContextId,
        element: ElementId,
        action: ElementAction,
        out: &mut Outcome,
    ) -> EnsayoResult<()> {
        let index = self.element_index(context, element)?;
        let ctx = self.context(context)?;
        let info = ctx.document.info(index);
        if !info.attached {
            return Err(EnsayoError::StaleElement {
                element: element.to_string(),
            });
        }
        let not_actionable = |reason: &str| EnsayoError::NotActionable {
            selector: element.to_string(),
            reason: reason.to_string(),
        };
        if ctx.blocked_by.is_some() {
            return Err(not_actionable("page is blocked by a dialog"));
        }
        if let Some(reason) = info.blocking_reason(action.needs_editable()) {
            return Err(not_actionable(reason));
        }
        let input_type = info.attribute("type").unwrap_or_default().to_lowercase();
        let want_checked = matches!(action, ElementAction::Check);

        match action {
            ElementAction::Click => self.click(site, context, index, out),
            ElementAction::Fill(value) => {
                if let Some(ctx) = self.contexts.get_mut(&context) {
                    ctx.document.set_attr(index, "value", &value);
                }
                Ok(())
            }
            ElementAction::Check | ElementAction::Uncheck => {
                if info.tag != "input" || !matches!(input_type.as_str(), "checkbox" | "radio") {
                    return Err(EnsayoError::Protocol {
                        message: format!("{element} is not a checkbox or radio"),
                    });
                }
                if info.checked != want_checked {
                    self.click(site, context, index, out)?;
                }
                Ok(())
            }
            ElementAction::SetInputFiles(paths) => {
                if info.tag != "input" || input_type != "file" {
                    return Err(EnsayoError::Protocol {
                        message: format!("{element} is not a file input"),
                    });
                }
                let mut names = Vec::with_capacity(paths.len());
                for path in &paths {
                    if !path.is_file() {
                        return Err(EnsayoError::Protocol {
                            message: format!("file not found: {}", path.display()),
                        });
                    }
                    names.push(
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    );
                }
                if let Some(ctx) = self.contexts.get_mut(&context) {
                    ctx.document.set_attr(index, "value", &names.join(", "));
                }
                Ok(())
            }
        }
    }

    fn click(
        &mut self,
        site: &Site,
        context: ContextId,
        index: usize,
        out: &mut Outcome,
    ) -> EnsayoResult<()> {
        let ctx = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| stale(context))?;
        let info = ctx.document.info(index);
        let input_type = info.attribute("type").unwrap_or_default().to_lowercase();
        if info.tag == "input" && input_type == "checkbox" {
            ctx.document.toggle_checked(index);
        } else if info.tag == "input" && input_type == "radio" && !info.checked {
            ctx.document.set_attr(index, "checked", "");
        }

        let spec = page_for(site, &ctx.url);
        let mut effects = Effects::new();
        {
            let target = ctx
                .document
                .find(info.id)
                .ok_or_else(|| EnsayoError::StaleElement {
                    element: info.id.to_string(),
                })?;
            for (selector, reaction) in &spec.on_click {
                match crate::selector::Selector::parse(selector) {
                    Ok(parsed) if parsed.matches(&target) => reaction(&ctx.document, &mut effects),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "site reaction has an invalid selector"),
                }
            }
            if target.local_name() == "a" {
                if let Some(href) = target.attribute("href") {
                    if target.attribute("target").as_deref() == Some("_blank") {
                        effects.after(0).open_window(&href);
                    } else {
                        effects.after(0).navigate(&href);
                    }
                }
            }
        }
        self.apply(site, context, effects.queue, out);
        Ok(())
    }

    fn apply(
        &mut self,
        site: &Site,
        context: ContextId,
        queue: Vec<(Duration, Effect)>,
        out: &mut Outcome,
    ) {
        let Some(nav_seq) = self.contexts.get(&context).map(|c| c.nav_seq) else {
            return;
        };
        let mut immediate = Vec::new();
        let mut delayed: BTreeMap<Duration, Vec<Effect>> = BTreeMap::new();
        for (delay, effect) in queue {
            if delay.is_zero() {
                immediate.push(effect);
            } else {
                delayed.entry(delay).or_default().push(effect);
            }
        }
        self.run_effects(site, context, immediate, out);
        for (delay, effects) in delayed {
            out.deferred.push(Deferred {
                context,
                nav_seq,
                delay,
                work: Work::Effects(effects),
            });
        }
    }

    fn run_effects(
        &mut self,
        site: &Site,
        context: ContextId,
        effects: Vec<Effect>,
        out: &mut Outcome,
    ) {
        let mut remaining = effects.into_iter();
        while let Some(effect) = remaining.next() {
            debug!(?effect, %context, "effect");
            let Some(ctx) = self.contexts.get_mut(&context) else {
                return;
            };
            let doc = &mut ctx.document;
            match effect {
                Effect::SetText { target, text } => {
                    for index in doc.indices(&target) {
                        doc.set_text(index, &text);
                    }
                }
                Effect::SetAttr {
                    target,
                    name,
                    value,
                } => {
                    for index in doc.indices(&target) {
                        doc.set_attr(index, &name, &value);
                    }
                }
                Effect::RemoveAttr { target, name } => {
                    for index in doc.indices(&target) {
                        doc.remove_attr(index, &name);
                    }
                }
                Effect::Show(target) => {
                    for index in doc.indices(&target) {
                        doc.set_hidden(index, false);
                    }
                }
                Effect::Hide(target) => {
                    for index in doc.indices(&target) {
                        doc.set_hidden(index, true);
                    }
                }
                Effect::Remove(target) => {
                    for index in doc.indices(&target) {
                        doc.detach(index);
                    }
                }
                Effect::Obscure { target, obscured } => {
                    for index in doc.indices(&target) {
                        doc.set_obscured(index, obscured);
                    }
                }
                Effect::Append { target, node } => {
                    if let Some(index) = doc.indices(&target).first().copied() {
                        let mut next = self.next_id;
                        doc.append(index, &node, &mut || {
                            next += 1;
                            ElementId(next)
                        });
                        self.next_id = next;
                    }
                }
                Effect::Console { level, text } => {
                    out.events.push(BrowserEvent::Console {
                        context,
                        level,
                        text,
                    });
                }
                Effect::Navigate(href) => {
                    let url = resolve_url(&ctx.url, &href);
                    if let Err(err) = self.navigate(site, context, &url, out) {
                        warn!(%err, url, "navigation effect failed");
                    }
                    return;
                }
                Effect::OpenWindow(href) => {
                    let url = resolve_url(&ctx.url, &href);
                    self.open_window(site, context, &url, out);
                }
                Effect::Dialog {
                    kind,
                    message,
                    default_value,
                    on_answer,
                } => {
                    if ctx.blocked_by.is_some() {
                        warn!(%context, "dialog raised while another is open, dropped");
                        continue;
                    }
                    let dialog = DialogId(self.alloc());
                    if let Some(ctx) = self.contexts.get_mut(&context) {
                        ctx.blocked_by = Some(dialog);
                    }
                    self.dialogs.insert(
                        dialog,
                        OpenDialog {
                            context,
                            kind,
                            default_value: default_value.clone(),
                            on_answer,
                            continuation: remaining.by_ref().collect(),
                        },
                    );
                    out.events.push(BrowserEvent::DialogOpened {
                        dialog,
                        context,
                        kind,
                        message,
                        default_value,
                    });
                    return;
                }
                Effect::CloseWindow => {
                    self.destroy_context(context, out);
                    return;
                }
                Effect::Crash => {
                    out.crash = true;
                    return;
                }
            }
        }
    }

    fn answer_dialog(
        &mut self,
        site: &Site,
        dialog: DialogId,
        accept: bool,
        prompt_text: Option<String>,
        out: &mut Outcome,
    ) -> EnsayoResult<()> {
        let open = self
            .dialogs
            .remove(&dialog)
            .ok_or_else(|| EnsayoError::Protocol {
                message: format!("no open dialog {dialog}"),
            })?;
        if let Some(ctx) = self.contexts.get_mut(&open.context) {
            ctx.blocked_by = None;
        }
        out.events.push(BrowserEvent::DialogClosed {
            dialog,
            accepted: accept,
        });
        let answer = DialogAnswer {
            accepted: accept,
            text: (accept && open.kind == DialogType::Prompt)
                .then(|| prompt_text.or(open.default_value).unwrap_or_default()),
        };
        let mut effects = Effects::new();
        if let Some(on_answer) = &open.on_answer {
            on_answer(&answer, &mut effects);
        }
        self.apply(site, open.context, effects.queue, out);

        let blocked = self
            .contexts
            .get(&open.context)
            .and_then(|ctx| ctx.blocked_by);
        match blocked {
            Some(next) => {
                if let Some(next) = self.dialogs.get_mut(&next) {
                    next.continuation.extend(open.continuation);
                }
            }
            None => self.run_effects(site, open.context, open.continuation, out),
        }
        Ok(())
    }

    fn run_deferred(&mut self, site: &Site, deferred: Deferred, out: &mut Outcome) {
        let current = self.contexts.get(&deferred.context).map(|c| c.nav_seq);
        if current != Some(deferred.nav_seq) {
            return;
        }
        match deferred.work {
            Work::Load => self.finish_load(site, deferred.context, out),
            Work::Effects(effects) => self.run_effects(site, deferred.context, effects, out),
        }
    }

    fn execute(
        &mut self,
        site: &Site,
        command: Command,
        out: &mut Outcome,
    ) -> EnsayoResult<Response> {
        match command {
            Command::NewPage => Ok(Response::Context(Some(self.new_page(out)))),
            Command::Navigate { context, url } => {
                self.navigate(site, context, &url, out)?;
                Ok(Response::Ack)
            }
            Command::Query { context, selector } => {
                if !selector.is_portable() {
                    return Err(EnsayoError::Protocol {
                        message: format!("{selector} is not supported by the simulated browser"),
                    });
                }
                let doc = &self.context(context)?.document;
                Ok(Response::Elements(
                    doc.query(&selector)
                        .iter()
                        .map(|node| doc.info(node.index()))
                        .collect(),
                ))
            }
            Command::Describe { context, element } => {
                let index = self.element_index(context, element)?;
                Ok(Response::Element(self.context(context)?.document.info(index)))
            }
            Command::Perform {
                context,
                element,
                action,
            } => {
                self.perform(site, context, element, action, out)?;
                Ok(Response::Ack)
            }
            Command::ContentFrame { context, element } => {
                self.element_index(context, element)?;
                Ok(Response::Context(
                    self.context(context)?.frames.get(&element).copied(),
                ))
            }
            Command::ReadyState { context } => {
                Ok(Response::ReadyState(self.context(context)?.ready))
            }
            Command::Url { context } => Ok(Response::Text(self.context(context)?.url.clone())),
            Command::Snapshot { context } => Ok(Response::Text(
                self.context(context)?.document.snapshot(),
            )),
            Command::AnswerDialog {
                dialog,
                accept,
                prompt_text,
            } => {
                self.answer_dialog(site, dialog, accept, prompt_text, out)?;
                Ok(Response::Ack)
            }
            Command::Close { context } => {
                self.destroy_context(context, out);
                Ok(Response::Ack)
            }
        }
    }
}

// =============================================================================
// SIMULATED BROWSER
// =============================================================================

struct Inner {
    site: Arc<Site>,
    state: Mutex<State>,
    bus: EventBus,
    crashed: AtomicBool,
    commands: AtomicU64,
}

impl Inner {
    fn closed_error() -> EnsayoError {
        EnsayoError::ChannelClosed {
            reason: "browser process exited".to_string(),
        }
    }

    /// Run `f` under the state lock, publish its events, schedule its
    /// deferred work
    fn transact<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut State, &Site, &mut Outcome) -> EnsayoResult<R>,
    ) -> EnsayoResult<R> {
        let (result, deferred) = {
            let mut state = self.state.lock().map_err(|_| EnsayoError::Protocol {
                message: "simulated browser state poisoned".to_string(),
            })?;
            let mut out = Outcome::default();
            let result = f(&mut state, &self.site, &mut out);
            for event in out.events.drain(..) {
                self.bus.emit(event);
            }
            if out.crash {
                self.crash();
            }
            (result, out.deferred)
        };
        self.schedule(deferred);
        result
    }

    /// Run each deferred job after its delay, as its own transaction
    fn schedule(self: &Arc<Self>, deferred: Vec<Deferred>) {
        for job in deferred {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(job.delay).await;
                if inner.crashed.load(Ordering::SeqCst) {
                    return;
                }
                inner.run_job(job);
            });
        }
    }

    fn run_job(self: &Arc<Self>, job: Deferred) {
        let deferred = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let mut out = Outcome::default();
            state.run_deferred(&self.site, job, &mut out);
            for event in out.events.drain(..) {
                self.bus.emit(event);
            }
            if out.crash {
                self.crash();
            }
            out.deferred
        };
        self.schedule(deferred);
    }

    fn crash(&self) {
        if !self.crashed.swap(true, Ordering::SeqCst) {
            warn!("simulated browser crashed");
            self.bus.close();
        }
    }
}

/// In-memory browser serving a [`Site`]
#[derive(Clone)]
pub struct SimulatedBrowser {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBrowser")
            .field("crashed", &self.is_crashed())
            .field("commands", &self.command_count())
            .finish_non_exhaustive()
    }
}

impl SimulatedBrowser {
    /// Browser serving `site`
    #[must_use]
    pub fn new(site: Arc<Site>) -> Self {
        Self {
            inner: Arc::new(Inner {
                site,
                state: Mutex::new(State::default()),
                bus: EventBus::default(),
                crashed: AtomicBool::new(false),
                commands: AtomicU64::new(0),
            }),
        }
    }

    /// Kill the browser: pending and future commands fail with
    /// [`EnsayoError::ChannelClosed`]
    pub fn crash(&self) {
        self.inner.crash();
    }

    /// Whether the browser has exited
    #[must_use]
    pub fn is_crashed(&self) -> bool {
        self.inner.crashed.load(Ordering::SeqCst)
    }

    /// Commands executed so far
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.inner.commands.load(Ordering::SeqCst)
    }

    /// Live contexts
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|s| s.contexts.len())
            .unwrap_or(0)
    }

    /// Dialogs waiting for an answer
    #[must_use]
    pub fn open_dialogs(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|s| s.dialogs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for SimulatedBrowser {
    async fn execute(&self, command: Command) -> EnsayoResult<Response> {
        if self.is_crashed() {
            return Err(Inner::closed_error());
        }
        let latency = self.inner.site.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.inner.commands.fetch_add(1, Ordering::Relaxed);
        let result = self
            .inner
            .transact(|state, site, out| state.execute(site, command, out));
        if self.is_crashed() {
            return Err(Inner::closed_error());
        }
        result
    }

    fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    async fn shutdown(&self) -> EnsayoResult<()> {
        self.inner.bus.close();
        if let Ok(mut state) = self.inner.state.lock() {
            state.contexts.clear();
            state.dialogs.clear();
        }
        Ok(())
    }
}

/// Launches one [`SimulatedBrowser`] per session, all serving the same site
#[derive(Debug)]
pub struct SimulatedLauncher {
    site: Arc<Site>,
    launched: Mutex<Vec<SimulatedBrowser>>,
}

impl SimulatedLauncher {
    /// Launcher for `site`
    #[must_use]
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Browsers launched so far
    #[must_use]
    pub fn browsers(&self) -> Vec<SimulatedBrowser> {
        self.launched.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Number of launches
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.launched.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BrowserLauncher for SimulatedLauncher {
    async fn launch(&self) -> EnsayoResult<Arc<dyn Transport>> {
        let browser = SimulatedBrowser::new(Arc::clone(&self.site));
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(browser.clone());
        }
        Ok(Arc::new(browser))
    }
}
