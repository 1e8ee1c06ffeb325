//! Declarative site model served by the simulated browser.
//!
//! A [`Site`] maps URLs to [`PageSpec`]s. Pages are trees of [`Node`]s plus
//! click reactions that queue [`Effects`]: DOM edits, navigation, windows,
//! native dialogs, console output, optionally delayed to model asynchronous
//! pages.

use super::dom::Document;
use crate::dialog::DialogType;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Click handler: reads the document, queues effects
pub type ClickReaction = Arc<dyn Fn(&Document, &mut Effects) + Send + Sync>;

/// Load handler
pub type LoadReaction = Arc<dyn Fn(&mut Effects) + Send + Sync>;

/// Runs after a dialog is answered
pub type DialogReaction = Arc<dyn Fn(&DialogAnswer, &mut Effects) + Send + Sync>;

// =============================================================================
// NODES
// =============================================================================

/// Element template
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub(crate) tag: String,
    pub(crate) attrs: BTreeMap<String, String>,
    pub(crate) text: String,
    pub(crate) children: Vec<Node>,
    pub(crate) hidden: bool,
    pub(crate) obscured: bool,
}

impl Node {
    /// Element with the given tag
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// Set the `id` attribute
    #[must_use]
    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Set the `class` attribute
    #[must_use]
    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Append children
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.children.extend(children);
        self
    }

    /// Start hidden (`display: none`)
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Start covered by an overlay
    #[must_use]
    pub const fn obscured(mut self) -> Self {
        self.obscured = true;
        self
    }
}

// =============================================================================
// EFFECTS
// =============================================================================

/// How a dialog was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogAnswer {
    /// Accepted (`true`) or dismissed
    pub accepted: bool,
    /// Prompt text, when accepted with one
    pub text: Option<String>,
}

#[derive(Clone)]
pub(crate) enum Effect {
    SetText { target: String, text: String },
    SetAttr { target: String, name: String, value: String },
    RemoveAttr { target: String, name: String },
    Show(String),
    Hide(String),
    Remove(String),
    Obscure { target: String, obscured: bool },
    Append { target: String, node: Node },
    Navigate(String),
    OpenWindow(String),
    Dialog {
        kind: DialogType,
        message: String,
        default_value: Option<String>,
        on_answer: Option<DialogReaction>,
    },
    Console { level: String, text: String },
    CloseWindow,
    Crash,
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetText { target, text } => write!(f, "SetText({target}, {text:?})"),
            Self::SetAttr { target, name, value } => {
                write!(f, "SetAttr({target}, {name}={value:?})")
            }
            Self::RemoveAttr { target, name } => write!(f, "RemoveAttr({target}, {name})"),
            Self::Show(target) => write!(f, "Show({target})"),
            Self::Hide(target) => write!(f, "Hide({target})"),
            Self::Remove(target) => write!(f, "Remove({target})"),
            Self::Obscure { target, obscured } => write!(f, "Obscure({target}, {obscured})"),
            Self::Append { target, node } => write!(f, "Append({target}, <{}>)", node.tag),
            Self::Navigate(url) => write!(f, "Navigate({url})"),
            Self::OpenWindow(url) => write!(f, "OpenWindow({url})"),
            Self::Dialog { kind, message, .. } => write!(f, "Dialog({kind}, {message:?})"),
            Self::Console { level, text } => write!(f, "Console({level}, {text:?})"),
            Self::CloseWindow => write!(f, "CloseWindow"),
            Self::Crash => write!(f, "Crash"),
        }
    }
}

/// Effects queued by a reaction.
///
/// Effects run in order. [`Effects::after`] delays everything queued after
/// it; a dialog suspends the effects queued after it until it is answered.
#[derive(Debug, Default)]
pub struct Effects {
    pub(crate) queue: Vec<(Duration, Effect)>,
    delay: Duration,
}

impl Effects {
    /// Empty effect list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, effect: Effect) -> &mut Self {
        self.queue.push((self.delay, effect));
        self
    }

    /// Delay subsequent effects by `ms` from the triggering event
    pub fn after(&mut self, ms: u64) -> &mut Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    /// Replace the text of matching elements
    pub fn set_text(&mut self, target: &str, text: &str) -> &mut Self {
        self.push(Effect::SetText {
            target: target.to_string(),
            text: text.to_string(),
        })
    }

    /// Set an attribute on matching elements
    pub fn set_attr(&mut self, target: &str, name: &str, value: &str) -> &mut Self {
        self.push(Effect::SetAttr {
            target: target.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Remove an attribute from matching elements
    pub fn remove_attr(&mut self, target: &str, name: &str) -> &mut Self {
        self.push(Effect::RemoveAttr {
            target: target.to_string(),
            name: name.to_string(),
        })
    }

    /// Make matching elements visible
    pub fn show(&mut self, target: &str) -> &mut Self {
        self.push(Effect::Show(target.to_string()))
    }

    /// Hide matching elements
    pub fn hide(&mut self, target: &str) -> &mut Self {
        self.push(Effect::Hide(target.to_string()))
    }

    /// Detach matching elements
    pub fn remove(&mut self, target: &str) -> &mut Self {
        self.push(Effect::Remove(target.to_string()))
    }

    /// Cover or uncover matching elements with an overlay
    pub fn obscure(&mut self, target: &str, obscured: bool) -> &mut Self {
        self.push(Effect::Obscure {
            target: target.to_string(),
            obscured,
        })
    }

    /// Append a subtree under the first match
    pub fn append(&mut self, target: &str, node: Node) -> &mut Self {
        self.push(Effect::Append {
            target: target.to_string(),
            node,
        })
    }

    /// Navigate the current context
    pub fn navigate(&mut self, url: &str) -> &mut Self {
        self.push(Effect::Navigate(url.to_string()))
    }

    /// Open a popup window
    pub fn open_window(&mut self, url: &str) -> &mut Self {
        self.push(Effect::OpenWindow(url.to_string()))
    }

    /// Close the current window
    pub fn close_window(&mut self) -> &mut Self {
        self.push(Effect::CloseWindow)
    }

    /// Raise a native dialog; `on_answer` runs once it is answered
    pub fn dialog<F>(
        &mut self,
        kind: DialogType,
        message: &str,
        default_value: Option<&str>,
        on_answer: F,
    ) -> &mut Self
    where
        F: Fn(&DialogAnswer, &mut Self) + Send + Sync + 'static,
    {
        self.push(Effect::Dialog {
            kind,
            message: message.to_string(),
            default_value: default_value.map(str::to_string),
            on_answer: Some(Arc::new(on_answer)),
        })
    }

    /// `alert(message)` with no follow-up
    pub fn alert(&mut self, message: &str) -> &mut Self {
        self.push(Effect::Dialog {
            kind: DialogType::Alert,
            message: message.to_string(),
            default_value: None,
            on_answer: None,
        })
    }

    /// Console output
    pub fn console(&mut self, level: &str, text: &str) -> &mut Self {
        self.push(Effect::Console {
            level: level.to_string(),
            text: text.to_string(),
        })
    }

    /// Kill the browser process
    pub fn crash(&mut self) -> &mut Self {
        self.push(Effect::Crash)
    }
}

// =============================================================================
// PAGES AND SITES
// =============================================================================

/// One page: its markup, load timing, and reactions
#[derive(Clone)]
pub struct PageSpec {
    pub(crate) title: String,
    pub(crate) body: Node,
    pub(crate) load_delay: Duration,
    pub(crate) on_click: Vec<(String, ClickReaction)>,
    pub(crate) on_load: Vec<LoadReaction>,
}

impl std::fmt::Debug for PageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSpec")
            .field("title", &self.title)
            .field("load_delay", &self.load_delay)
            .field("reactions", &self.on_click.len())
            .finish_non_exhaustive()
    }
}

impl PageSpec {
    /// Page with the given `<body>` contents
    #[must_use]
    pub fn new(title: &str, body: Node) -> Self {
        Self {
            title: title.to_string(),
            body,
            load_delay: Duration::ZERO,
            on_click: Vec::new(),
            on_load: Vec::new(),
        }
    }

    /// Delay between DOM ready and the load event
    #[must_use]
    pub const fn load_delay_ms(mut self, ms: u64) -> Self {
        self.load_delay = Duration::from_millis(ms);
        self
    }

    /// React to clicks on elements matching `selector`
    #[must_use]
    pub fn on_click<F>(mut self, selector: &str, reaction: F) -> Self
    where
        F: Fn(&Document, &mut Effects) + Send + Sync + 'static,
    {
        self.on_click.push((selector.to_string(), Arc::new(reaction)));
        self
    }

    /// Queue effects when the page finishes loading
    #[must_use]
    pub fn on_load<F>(mut self, reaction: F) -> Self
    where
        F: Fn(&mut Effects) + Send + Sync + 'static,
    {
        self.on_load.push(Arc::new(reaction));
        self
    }

    /// Full document tree: `html > (head > title), body`
    pub(crate) fn document_root(&self) -> Node {
        Node::new("html").children([
            Node::new("head").child(Node::new("title").text(&self.title)),
            Node {
                tag: "body".to_string(),
                ..self.body.clone()
            },
        ])
    }
}

/// URL-addressed collection of pages
#[derive(Debug, Clone, Default)]
pub struct Site {
    pages: HashMap<String, PageSpec>,
    latency: Duration,
}

impl Site {
    /// Empty site
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` at absolute `url`
    #[must_use]
    pub fn page(mut self, url: &str, page: PageSpec) -> Self {
        self.pages.insert(strip_suffixes(url).to_string(), page);
        self
    }

    /// Delay every command by `ms`
    #[must_use]
    pub const fn latency_ms(mut self, ms: u64) -> Self {
        self.latency = Duration::from_millis(ms);
        self
    }

    /// Per-command latency
    #[must_use]
    pub const fn latency(&self) -> Duration {
        self.latency
    }

    /// Page served at `url`, ignoring query, fragment and trailing slash
    #[must_use]
    pub fn lookup(&self, url: &str) -> Option<&PageSpec> {
        self.pages.get(strip_suffixes(url))
    }
}

fn strip_suffixes(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let url = &url[..end];
    if url.ends_with('/') && !url.ends_with("://") && url.matches('/').count() > 3 {
        &url[..url.len() - 1]
    } else {
        url
    }
}

/// `scheme://host` of an absolute URL
#[must_use]
pub fn origin(url: &str) -> &str {
    url.find("://")
        .and_then(|scheme_end| {
            let host_start = scheme_end + 3;
            url[host_start..]
                .find('/')
                .map(|slash| &url[..host_start + slash])
        })
        .unwrap_or(url)
}

/// Resolve `href` against the document at `base`
#[must_use]
pub fn resolve_url(base: &str, href: &str) -> String {
    if href.contains("://") || href.starts_with("about:") {
        return href.to_string();
    }
    if href.starts_with('/') {
        return format!("{}{href}", origin(base));
    }
    let base = strip_suffixes(base);
    match base.rfind('/') {
        Some(slash) if slash >= origin(base).len() => format!("{}/{href}", &base[..slash]),
        _ => format!("{}/{href}", origin(base)),
    }
}
