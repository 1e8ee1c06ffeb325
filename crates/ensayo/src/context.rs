//! Browsing context tree.
//!
//! Pages, frames and popup windows form a tree that mirrors the browser.
//! [`ContextTree`] is mutated only by browser events (created, navigated,
//! loaded, destroyed); every navigation bumps the context's generation and
//! destroys its frames, which is how stale handles are detected.
//!
//! [`ContextManager`] routes queries: it walks frame chains hop by hop with
//! waiting, and waits for popup windows opened by a trigger action.

use crate::channel::{BrowserEvent, Command, CommandChannel, ContextId, EventKind};
use crate::dialog::DialogInterceptor;
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::Selector;
use crate::wait::{LoadState, Probe, WaitOptions, Waiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Tree shared between the event pump and the session
pub type SharedTree = Arc<Mutex<ContextTree>>;

/// Lock a shared tree; a poisoned lock still holds consistent event state
pub fn lock_tree(tree: &SharedTree) -> MutexGuard<'_, ContextTree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// CONTEXT STATE
// =============================================================================

/// What kind of browsing context this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Top-level page
    Page,
    /// `frame` or `iframe`
    Frame,
    /// Window opened by another context
    Popup,
}

/// Lifecycle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Document loading
    Loading,
    /// Load event fired
    Loaded,
    /// Closed or detached; handles into it are stale
    Destroyed,
}

/// One node of the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsingContext {
    /// Identifier
    pub id: ContextId,
    /// Hosting context for frames
    pub parent: Option<ContextId>,
    /// Context that opened this popup
    pub opener: Option<ContextId>,
    /// Page, frame, or popup
    pub kind: ContextKind,
    /// Frame name
    pub name: Option<String>,
    /// Current URL
    pub url: String,
    /// Lifecycle state
    pub state: ContextState,
    /// Bumped on every navigation
    pub generation: u64,
    /// Live child frames
    pub children: Vec<ContextId>,
}

impl BrowsingContext {
    /// Whether this context can still be used
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state != ContextState::Destroyed
    }
}

/// Live model of the browser's contexts
#[derive(Debug, Default)]
pub struct ContextTree {
    contexts: HashMap<ContextId, BrowsingContext>,
}

impl ContextTree {
    /// Empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared tree kept current by `channel`'s events
    #[must_use]
    pub fn attach(channel: &CommandChannel) -> SharedTree {
        let tree: SharedTree = Arc::new(Mutex::new(Self::new()));
        let sink = Arc::clone(&tree);
        channel.subscribe(
            EventKind::Any,
            Arc::new(move |event: &BrowserEvent| lock_tree(&sink).apply(event)),
        );
        tree
    }

    /// Apply one browser event
    pub fn apply(&mut self, event: &BrowserEvent) {
        match event {
            BrowserEvent::ContextCreated {
                context,
                parent,
                kind,
                name,
                url,
                opener,
            } => {
                if self.contexts.contains_key(context) {
                    return;
                }
                self.contexts.insert(
                    *context,
                    BrowsingContext {
                        id: *context,
                        parent: *parent,
                        opener: *opener,
                        kind: *kind,
                        name: name.clone(),
                        url: url.clone(),
                        state: ContextState::Loading,
                        generation: 0,
                        children: Vec::new(),
                    },
                );
                if let Some(parent) = parent.and_then(|p| self.contexts.get_mut(&p)) {
                    parent.children.push(*context);
                }
            }
            BrowserEvent::ContextNavigated { context, url } => {
                let children = match self.contexts.get_mut(context) {
                    Some(ctx) if ctx.is_live() => {
                        ctx.generation += 1;
                        ctx.url = url.clone();
                        ctx.state = ContextState::Loading;
                        std::mem::take(&mut ctx.children)
                    }
                    _ => return,
                };
                for child in children {
                    self.destroy(child);
                }
            }
            BrowserEvent::ContextLoaded { context, url } => {
                if let Some(ctx) = self.contexts.get_mut(context) {
                    if ctx.is_live() {
                        ctx.state = ContextState::Loaded;
                        ctx.url = url.clone();
                    }
                }
            }
            BrowserEvent::ContextDestroyed { context } => self.destroy(*context),
            _ => {}
        }
    }

    fn destroy(&mut self, id: ContextId) {
        let (parent, children) = match self.contexts.get_mut(&id) {
            Some(ctx) if ctx.is_live() => {
                ctx.state = ContextState::Destroyed;
                (ctx.parent, std::mem::take(&mut ctx.children))
            }
            _ => return,
        };
        if let Some(parent) = parent.and_then(|p| self.contexts.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in children {
            self.destroy(child);
        }
    }

    /// Context by id, live or destroyed
    #[must_use]
    pub fn get(&self, id: ContextId) -> Option<&BrowsingContext> {
        self.contexts.get(&id)
    }

    /// Live child frames of `id`
    #[must_use]
    pub fn children(&self, id: ContextId) -> Vec<ContextId> {
        self.get(id).map(|c| c.children.clone()).unwrap_or_default()
    }

    /// Live child frame of `parent` with the given name
    #[must_use]
    pub fn child_named(&self, parent: ContextId, name: &str) -> Option<ContextId> {
        self.children(parent)
            .into_iter()
            .find(|c| self.get(*c).and_then(|c| c.name.as_deref()) == Some(name))
    }

    /// Live popups opened by `opener`
    #[must_use]
    pub fn popups(&self, opener: ContextId) -> Vec<ContextId> {
        let mut popups: Vec<ContextId> = self
            .contexts
            .values()
            .filter(|c| c.is_live() && c.opener == Some(opener))
            .map(|c| c.id)
            .collect();
        popups.sort();
        popups
    }

    /// Live top-level contexts, pages and popups alike
    #[must_use]
    pub fn roots(&self) -> Vec<ContextId> {
        let mut roots: Vec<ContextId> = self
            .contexts
            .values()
            .filter(|c| c.is_live() && c.parent.is_none())
            .map(|c| c.id)
            .collect();
        roots.sort();
        roots
    }

    /// Number of live contexts
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.contexts.values().filter(|c| c.is_live()).count()
    }

    /// Top-level context containing `id`
    #[must_use]
    pub fn root_of(&self, id: ContextId) -> ContextId {
        let mut current = id;
        while let Some(parent) = self.get(current).and_then(|c| c.parent) {
            current = parent;
        }
        current
    }

    /// The context, if it is live and (when given) still at `generation`
    pub fn ensure_live(
        &self,
        id: ContextId,
        generation: Option<u64>,
    ) -> EnsayoResult<&BrowsingContext> {
        let stale = |reason: &str| EnsayoError::StaleContext {
            context: id.to_string(),
            reason: reason.to_string(),
        };
        match self.get(id) {
            None => Err(stale("unknown context")),
            Some(ctx) if !ctx.is_live() => Err(stale("context was destroyed")),
            Some(ctx) if generation.is_some_and(|g| g != ctx.generation) => {
                Err(stale("context navigated since the handle was taken"))
            }
            Some(ctx) => Ok(ctx),
        }
    }
}

// =============================================================================
// CONTEXT MANAGER
// =============================================================================

/// Routes work to the right context and waits for contexts to appear
#[derive(Debug, Clone)]
pub struct ContextManager {
    channel: Arc<CommandChannel>,
    tree: SharedTree,
    interceptor: Arc<DialogInterceptor>,
    waiter: Waiter,
}

impl ContextManager {
    /// Manager over an attached tree
    #[must_use]
    pub fn new(
        channel: Arc<CommandChannel>,
        tree: SharedTree,
        interceptor: Arc<DialogInterceptor>,
        waiter: Waiter,
    ) -> Self {
        Self {
            channel,
            tree,
            interceptor,
            waiter,
        }
    }

    /// The shared tree
    #[must_use]
    pub const fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// Copy of one context's state
    #[must_use]
    pub fn context(&self, id: ContextId) -> Option<BrowsingContext> {
        lock_tree(&self.tree).get(id).cloned()
    }

    /// Copy of the context if it is live at `generation`
    pub fn ensure_live(&self, id: ContextId, generation: Option<u64>) -> EnsayoResult<BrowsingContext> {
        lock_tree(&self.tree).ensure_live(id, generation).cloned()
    }

    /// One attempt at walking `path` from `root`.
    ///
    /// Each hop needs exactly one frame element whose content context is
    /// loaded. Missing, ambiguous, or still-loading hops are retryable; a
    /// destroyed root is not.
    pub async fn try_resolve_chain(
        &self,
        root: ContextId,
        path: &[Selector],
    ) -> EnsayoResult<Probe<ContextId>> {
        if path.is_empty() {
            self.ensure_live(root, None)?;
            return Ok(Probe::Ready(root));
        }
        self.channel.drain_events().await;
        self.ensure_live(root, None)?;

        let mut current = root;
        for selector in path {
            let elements = match self
                .channel
                .send(Command::Query {
                    context: current,
                    selector: selector.clone(),
                })
                .await
            {
                Ok(response) => response.into_elements()?,
                Err(err @ (EnsayoError::StaleContext { .. } | EnsayoError::StaleElement { .. })) => {
                    return Ok(Probe::Retry(err))
                }
                Err(err) => return Err(err),
            };
            let frames: Vec<_> = elements
                .into_iter()
                .filter(|e| e.tag == "frame" || e.tag == "iframe")
                .collect();
            let frame = match frames.as_slice() {
                [] => {
                    return Ok(Probe::Retry(EnsayoError::ElementNotFound {
                        selector: format!("frame {selector}"),
                        timeout_ms: 0,
                    }))
                }
                [one] => one,
                many => {
                    return Ok(Probe::Retry(EnsayoError::AmbiguousMatch {
                        selector: format!("frame {selector}"),
                        count: many.len(),
                    }))
                }
            };
            let child = match self
                .channel
                .send(Command::ContentFrame {
                    context: current,
                    element: frame.id,
                })
                .await
            {
                Ok(response) => response.into_context()?,
                Err(err @ (EnsayoError::StaleContext { .. } | EnsayoError::StaleElement { .. })) => {
                    return Ok(Probe::Retry(err))
                }
                Err(err) => return Err(err),
            };
            let Some(child) = child else {
                return Ok(Probe::waiting(format!("content of frame {selector}")));
            };
            let loaded = lock_tree(&self.tree)
                .get(child)
                .is_some_and(|c| c.state == ContextState::Loaded);
            if !loaded {
                return Ok(Probe::waiting(format!("frame {selector} to load")));
            }
            current = child;
        }
        Ok(Probe::Ready(current))
    }

    /// Walk nested frame selectors from `root`, waiting at every hop
    pub async fn resolve_frame_chain(
        &self,
        root: ContextId,
        path: &[Selector],
        options: &WaitOptions,
    ) -> EnsayoResult<ContextId> {
        let resolved = self
            .waiter
            .until(options, || self.try_resolve_chain(root, path))
            .await?;
        debug!(%root, hops = path.len(), %resolved, "frame chain resolved");
        Ok(resolved)
    }

    /// Wait until `id` exists in the tree and has loaded
    pub async fn wait_for_loaded(
        &self,
        id: ContextId,
        options: &WaitOptions,
    ) -> EnsayoResult<BrowsingContext> {
        self.waiter
            .until(options, || async move {
                self.channel.drain_events().await;
                let tree = lock_tree(&self.tree);
                Ok(match tree.get(id) {
                    None => Probe::waiting(format!("context {id} to appear")),
                    Some(ctx) if !ctx.is_live() => {
                        return Err(EnsayoError::StaleContext {
                            context: id.to_string(),
                            reason: "context was destroyed while loading".to_string(),
                        })
                    }
                    Some(ctx) if ctx.state == ContextState::Loaded => Probe::Ready(ctx.clone()),
                    Some(_) => Probe::waiting(format!("context {id} to load")),
                })
            })
            .await
    }

    /// Wait until the document in `id` reaches `state`
    pub async fn wait_for_load_state(
        &self,
        id: ContextId,
        state: LoadState,
        options: &WaitOptions,
    ) -> EnsayoResult<()> {
        self.waiter
            .until(options, || async move {
                let ready = match self.channel.send(Command::ReadyState { context: id }).await {
                    Ok(response) => response.into_ready_state()?,
                    // A navigation can briefly swap the document out.
                    Err(err @ EnsayoError::StaleContext { .. }) => return Ok(Probe::Retry(err)),
                    Err(err) => return Err(err),
                };
                Ok(if state.is_reached(ready) {
                    Probe::Ready(())
                } else {
                    Probe::waiting(format!("{id} to reach {state}"))
                })
            })
            .await
    }

    /// Run `trigger` and return the popup it opens, once loaded.
    ///
    /// The one-shot subscription is registered before the trigger runs, so
    /// a window opened synchronously by the trigger is not missed.
    pub async fn wait_for_new_context<F, Fut>(
        &self,
        opener: ContextId,
        options: &WaitOptions,
        trigger: F,
    ) -> EnsayoResult<ContextId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EnsayoResult<()>>,
    {
        let pending = self.interceptor.once_new_window(opener);
        trigger().await?;
        let id = pending.wait(&self.waiter, options.timeout_ms).await?;
        self.wait_for_loaded(id, options).await?;
        debug!(%opener, popup = %id, "new context loaded");
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn created(id: u64, parent: Option<u64>, kind: ContextKind) -> BrowserEvent {
        BrowserEvent::ContextCreated {
            context: ContextId(id),
            parent: parent.map(ContextId),
            kind,
            name: Some(format!("f{id}")),
            url: "about:blank".to_string(),
            opener: None,
        }
    }

    fn tree() -> ContextTree {
        let mut tree = ContextTree::new();
        tree.apply(&created(1, None, ContextKind::Page));
        tree.apply(&created(2, Some(1), ContextKind::Frame));
        tree.apply(&created(3, Some(2), ContextKind::Frame));
        tree.apply(&created(4, Some(1), ContextKind::Frame));
        tree
    }

    mod tree_tests {
        use super::*;

        #[test]
        fn test_children_and_names() {
            let tree = tree();
            assert_eq!(tree.children(ContextId(1)), vec![ContextId(2), ContextId(4)]);
            assert_eq!(tree.child_named(ContextId(1), "f4"), Some(ContextId(4)));
            assert_eq!(tree.root_of(ContextId(3)), ContextId(1));
            assert_eq!(tree.live_count(), 4);
        }

        #[test]
        fn test_navigation_bumps_generation_and_destroys_frames() {
            let mut tree = tree();
            tree.apply(&BrowserEvent::ContextNavigated {
                context: ContextId(1),
                url: "https://example.com".to_string(),
            });
            let root = tree.get(ContextId(1)).unwrap();
            assert_eq!(root.generation, 1);
            assert_eq!(root.state, ContextState::Loading);
            assert!(root.children.is_empty());
            for id in [2, 3, 4] {
                assert!(!tree.get(ContextId(id)).unwrap().is_live());
            }
            assert!(tree.ensure_live(ContextId(1), Some(0)).is_err());
            assert!(tree.ensure_live(ContextId(1), Some(1)).is_ok());
        }

        #[test]
        fn test_destroy_is_recursive_and_idempotent() {
            let mut tree = tree();
            let destroy = BrowserEvent::ContextDestroyed {
                context: ContextId(2),
            };
            tree.apply(&destroy);
            tree.apply(&destroy);
            assert!(!tree.get(ContextId(3)).unwrap().is_live());
            assert_eq!(tree.children(ContextId(1)), vec![ContextId(4)]);
            let err = tree.ensure_live(ContextId(3), None).unwrap_err();
            assert!(matches!(err, EnsayoError::StaleContext { .. }));
        }

        #[test]
        fn test_loaded_after_destroy_ignored() {
            let mut tree = tree();
            tree.apply(&BrowserEvent::ContextDestroyed {
                context: ContextId(4),
            });
            tree.apply(&BrowserEvent::ContextLoaded {
                context: ContextId(4),
                url: "x".to_string(),
            });
            assert_eq!(tree.get(ContextId(4)).unwrap().state, ContextState::Destroyed);
        }

        #[test]
        fn test_popups_tracked_by_opener() {
            let mut tree = tree();
            tree.apply(&BrowserEvent::ContextCreated {
                context: ContextId(9),
                parent: None,
                kind: ContextKind::Popup,
                name: None,
                url: "about:blank".to_string(),
                opener: Some(ContextId(1)),
            });
            assert_eq!(tree.popups(ContextId(1)), vec![ContextId(9)]);
            assert_eq!(tree.roots(), vec![ContextId(1), ContextId(9)]);
            assert_eq!(tree.root_of(ContextId(9)), ContextId(9));
            // Opener navigation leaves popups alone.
            tree.apply(&BrowserEvent::ContextNavigated {
                context: ContextId(1),
                url: "x".to_string(),
            });
            assert!(tree.get(ContextId(9)).unwrap().is_live());
        }

        #[test]
        fn test_unknown_context_is_stale() {
            let tree = ContextTree::new();
            assert!(tree.ensure_live(ContextId(42), None).is_err());
        }
    }
}
