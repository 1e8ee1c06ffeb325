//! Page handle used by test bodies.
//!
//! A [`Page`] is a top-level browsing context inside a [`Session`]. It is
//! cheap to clone; every method goes back through the session's channel, so
//! a `Page` never caches DOM state.

use crate::channel::{Command, ContextId};
use crate::dialog::{Dialog, PendingEvent};
use crate::locator::{ElementHandle, Locator, WaitState};
use crate::network::UrlPattern;
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::Selector;
use crate::session::Session;
use crate::wait::{LoadState, Probe, WaitOptions};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// A top-level browsing context (page or popup window)
#[derive(Debug, Clone)]
pub struct Page {
    session: Arc<Session>,
    context: ContextId,
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.session.id() == other.session.id()
    }
}

impl Eq for Page {}

impl Page {
    pub(crate) fn new(session: Arc<Session>, context: ContextId) -> Self {
        Self { session, context }
    }

    /// Context id of this page
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Owning session
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn wait_options(&self) -> &WaitOptions {
        self.session.wait_options()
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    /// Navigate and wait for the load event
    pub async fn goto(&self, url: &str) -> EnsayoResult<()> {
        self.session.contexts().ensure_live(self.context, None)?;
        let sent = self
            .session
            .channel()
            .send(Command::Navigate {
                context: self.context,
                url: url.to_string(),
            })
            .await;
        match sent {
            Ok(_) => {}
            Err(err @ (EnsayoError::ChannelClosed { .. } | EnsayoError::Cancelled { .. })) => {
                return Err(err)
            }
            Err(err) => {
                return Err(EnsayoError::Navigation {
                    url: url.to_string(),
                    message: err.to_string(),
                })
            }
        }
        self.session.channel().drain_events().await;
        self.wait_for_load_state(LoadState::Load).await?;
        info!(context = %self.context, url, "navigated");
        self.session.settle().await
    }

    /// Current URL
    pub async fn url(&self) -> EnsayoResult<String> {
        self.session
            .channel()
            .send(Command::Url {
                context: self.context,
            })
            .await?
            .into_text()
    }

    /// Document title, empty when the page has none
    pub async fn title(&self) -> EnsayoResult<String> {
        let titles = self
            .session
            .channel()
            .send(Command::Query {
                context: self.context,
                selector: Selector::css("title")?,
            })
            .await?
            .into_elements()?;
        Ok(titles
            .into_iter()
            .next()
            .map(|t| t.text.trim().to_string())
            .unwrap_or_default())
    }

    /// Serialized DOM
    pub async fn content(&self) -> EnsayoResult<String> {
        self.session
            .channel()
            .send(Command::Snapshot {
                context: self.context,
            })
            .await?
            .into_text()
    }

    /// Wait until the document reaches `state`
    pub async fn wait_for_load_state(&self, state: LoadState) -> EnsayoResult<()> {
        self.session
            .contexts()
            .wait_for_load_state(self.context, state, self.wait_options())
            .await
    }

    /// Wait until the URL matches `pattern` and the new document has loaded
    pub async fn wait_for_url(&self, pattern: impl Into<UrlPattern>) -> EnsayoResult<()> {
        let pattern = pattern.into();
        let channel = self.session.channel();
        let context = self.context;
        let pattern_ref = &pattern;
        self.session
            .waiter()
            .until(self.wait_options(), || async move {
                let url = match channel.send(Command::Url { context }).await {
                    Ok(response) => response.into_text()?,
                    Err(err @ EnsayoError::StaleContext { .. }) => return Ok(Probe::Retry(err)),
                    Err(err) => return Err(err),
                };
                Ok(if pattern_ref.matches(&url) {
                    Probe::Ready(())
                } else {
                    Probe::waiting(format!("URL matching {pattern_ref} (at {url})"))
                })
            })
            .await?;
        self.wait_for_load_state(LoadState::Load).await
    }

    // =========================================================================
    // LOCATORS
    // =========================================================================

    /// Locator for a selector in this page's own document
    pub fn locator(&self, selector: &str) -> EnsayoResult<Locator> {
        Ok(Locator::new(
            Arc::clone(&self.session),
            self.context,
            Vec::new(),
            Selector::parse(selector)?,
        ))
    }

    /// Locator for the deepest elements containing `text`
    pub fn get_by_text(&self, text: &str) -> EnsayoResult<Locator> {
        Ok(Locator::new(
            Arc::clone(&self.session),
            self.context,
            Vec::new(),
            Selector::text(text)?,
        ))
    }

    /// Locator by `data-testid`
    pub fn get_by_test_id(&self, id: &str) -> EnsayoResult<Locator> {
        Ok(Locator::new(
            Arc::clone(&self.session),
            self.context,
            Vec::new(),
            Selector::test_id(id)?,
        ))
    }

    /// Enter the frame matching `selector`
    pub fn frame_locator(&self, selector: &str) -> EnsayoResult<FrameLocator> {
        Ok(FrameLocator {
            session: Arc::clone(&self.session),
            root: self.context,
            frames: vec![Selector::parse(selector)?],
        })
    }

    /// Wait for a visible element and return a handle to it
    pub async fn wait_for_selector(&self, selector: &str) -> EnsayoResult<ElementHandle> {
        let locator = self.locator(selector)?;
        locator.wait_for(WaitState::Visible).await?;
        locator
            .with_visible(true)
            .with_strict(false)
            .element_handle()
            .await
    }

    /// Click the element matching `selector`
    pub async fn click(&self, selector: &str) -> EnsayoResult<()> {
        self.locator(selector)?.click().await
    }

    /// Fill the element matching `selector`
    pub async fn fill(&self, selector: &str, value: &str) -> EnsayoResult<()> {
        self.locator(selector)?.fill(value).await
    }

    /// Check the checkbox matching `selector`
    pub async fn check(&self, selector: &str) -> EnsayoResult<()> {
        self.locator(selector)?.check().await
    }

    /// Text of the element matching `selector`
    pub async fn text_content(&self, selector: &str) -> EnsayoResult<String> {
        self.locator(selector)?.text_content().await
    }

    /// Attach files to the file input matching `selector`
    pub async fn set_input_files<P: Into<PathBuf>>(
        &self,
        selector: &str,
        files: impl IntoIterator<Item = P>,
    ) -> EnsayoResult<()> {
        self.locator(selector)?.set_input_files(files).await
    }

    // =========================================================================
    // DIALOGS AND WINDOWS
    // =========================================================================

    /// Answer every dialog of this page with `handler` until removed
    pub fn on_dialog<F>(&self, handler: F)
    where
        F: Fn(&mut Dialog) + Send + Sync + 'static,
    {
        self.session.interceptor().on_dialog(self.context, handler);
    }

    /// Answer the next dialog of this page with `handler`.
    ///
    /// Register before the action that raises the dialog.
    pub fn once_dialog<F>(&self, handler: F) -> PendingEvent<Dialog>
    where
        F: FnOnce(&mut Dialog) + Send + 'static,
    {
        self.session.interceptor().once_dialog(self.context, handler)
    }

    /// Drop the persistent dialog handler
    pub fn remove_dialog_handler(&self) -> bool {
        self.session.interceptor().remove_dialog_handler(self.context)
    }

    /// Subscribe to the next window opened from this page
    pub fn register_new_window(&self) -> PendingEvent<ContextId> {
        self.session.interceptor().once_new_window(self.context)
    }

    /// Run `trigger` and return the window it opens, once loaded
    pub async fn wait_for_popup<F, Fut>(&self, trigger: F) -> EnsayoResult<Page>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EnsayoResult<()>>,
    {
        let popup = self
            .session
            .contexts()
            .wait_for_new_context(self.context, self.wait_options(), trigger)
            .await?;
        Ok(self.session.page(popup))
    }

    /// Live windows opened from this page
    #[must_use]
    pub fn popups(&self) -> Vec<Page> {
        let ids = crate::context::lock_tree(self.session.tree()).popups(self.context);
        ids.into_iter().map(|id| self.session.page(id)).collect()
    }

    /// Whether the context is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.session.contexts().ensure_live(self.context, None).is_err()
    }

    /// Close this page
    pub async fn close(&self) -> EnsayoResult<()> {
        self.session
            .channel()
            .send(Command::Close {
                context: self.context,
            })
            .await?;
        self.session.channel().drain_events().await;
        debug!(context = %self.context, "page closed");
        Ok(())
    }
}

// =============================================================================
// FRAME LOCATOR
// =============================================================================

/// Path of frame selectors from a page into nested documents.
///
/// Resolution is deferred: each locator built from it walks the path again,
/// so a frame that reloads is picked up transparently.
#[derive(Debug, Clone)]
pub struct FrameLocator {
    session: Arc<Session>,
    root: ContextId,
    frames: Vec<Selector>,
}

impl FrameLocator {
    /// Enter a frame nested inside this one
    pub fn frame_locator(&self, selector: &str) -> EnsayoResult<Self> {
        let mut frames = self.frames.clone();
        frames.push(Selector::parse(selector)?);
        Ok(Self {
            session: Arc::clone(&self.session),
            root: self.root,
            frames,
        })
    }

    /// Locator inside the innermost frame
    pub fn locator(&self, selector: &str) -> EnsayoResult<Locator> {
        Ok(Locator::new(
            Arc::clone(&self.session),
            self.root,
            self.frames.clone(),
            Selector::parse(selector)?,
        ))
    }

    /// Frame selectors, outermost first
    #[must_use]
    pub fn path(&self) -> &[Selector] {
        &self.frames
    }

    /// Context currently hosting the innermost document
    pub async fn resolve(&self) -> EnsayoResult<ContextId> {
        self.session
            .contexts()
            .resolve_frame_chain(self.root, &self.frames, self.session.wait_options())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dialog::DialogType;
    use crate::locator::expect;
    use crate::session::SessionOptions;
    use crate::simulated::{the_internet, SimulatedBrowser};
    use tokio_util::sync::CancellationToken;

    async fn page() -> Page {
        let browser = SimulatedBrowser::new(Arc::new(the_internet::site()));
        let session = Session::start(
            Arc::new(browser),
            SessionOptions::default().with_timeout(2_000),
            CancellationToken::new(),
        );
        session.new_page().await.unwrap()
    }

    mod navigation_tests {
        use super::*;

        #[tokio::test]
        async fn test_goto_url_and_title() {
            let page = page().await;
            page.goto(the_internet::EXAMPLE_URL).await.unwrap();
            assert_eq!(page.url().await.unwrap(), the_internet::EXAMPLE_URL);
            assert_eq!(page.title().await.unwrap(), "Example Domain");
            assert!(page.content().await.unwrap().contains("Example Domain"));
        }

        #[tokio::test]
        async fn test_wait_for_url_after_login() {
            let page = page().await;
            page.goto(&the_internet::url("/login")).await.unwrap();
            page.fill("#username", the_internet::USERNAME).await.unwrap();
            page.fill("#password", the_internet::PASSWORD).await.unwrap();
            page.click("button[type=\"submit\"]").await.unwrap();
            page.wait_for_url("**/secure").await.unwrap();
            expect(page.locator("#flash").unwrap())
                .to_contain_text("You logged into a secure area!")
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_invalid_selector_fails_before_waiting() {
            let page = page().await;
            assert!(matches!(
                page.locator("div[").unwrap_err(),
                EnsayoError::InvalidSelector { .. }
            ));
        }
    }

    mod frame_tests {
        use super::*;

        #[tokio::test]
        async fn test_nested_frames() {
            let page = page().await;
            page.goto(&the_internet::url("/nested_frames")).await.unwrap();
            let middle = page
                .frame_locator("frame[name=\"frame-top\"]")
                .unwrap()
                .frame_locator("frame[name=\"frame-middle\"]")
                .unwrap();
            assert_eq!(
                middle.locator("#content").unwrap().text_content().await.unwrap(),
                "MIDDLE"
            );
            let bottom = page.frame_locator("frame[name=\"frame-bottom\"]").unwrap();
            expect(bottom.locator("body").unwrap())
                .to_have_text("BOTTOM")
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_frame_path_re_resolves_after_reload() {
            let page = page().await;
            page.goto(&the_internet::url("/nested_frames")).await.unwrap();
            let top = page.frame_locator("frame[name=\"frame-top\"]").unwrap();
            let before = top.resolve().await.unwrap();
            page.goto(&the_internet::url("/nested_frames")).await.unwrap();
            let after = top.resolve().await.unwrap();
            assert_ne!(before, after);
            assert!(page.session().contexts().ensure_live(before, None).is_err());
            let middle = top.frame_locator("frame[name=\"frame-middle\"]").unwrap();
            assert_eq!(
                middle.locator("#content").unwrap().text_content().await.unwrap(),
                "MIDDLE"
            );
        }
    }

    mod window_tests {
        use super::*;

        #[tokio::test]
        async fn test_wait_for_popup() {
            let page = page().await;
            page.goto(&the_internet::url("/windows")).await.unwrap();
            let link = page.locator("text=Click Here").unwrap();
            let popup = page.wait_for_popup(|| link.click()).await.unwrap();
            assert_ne!(popup, page);
            assert_eq!(popup.title().await.unwrap(), "New Window");
            assert_eq!(page.popups(), vec![popup.clone()]);
            popup.close().await.unwrap();
            assert!(popup.is_closed());
            assert!(!page.is_closed());
        }

        #[tokio::test]
        async fn test_registered_window() {
            let page = page().await;
            page.goto(&the_internet::url("/windows")).await.unwrap();
            let pending = page.register_new_window();
            page.click("text=Click Here").await.unwrap();
            let id = pending.await.unwrap();
            assert_eq!(page.popups()[0].context(), id);
        }
    }

    mod dialog_tests {
        use super::*;

        #[tokio::test]
        async fn test_once_dialog_accepts_confirm() {
            let page = page().await;
            page.goto(&the_internet::url("/javascript_alerts")).await.unwrap();
            let pending = page.once_dialog(|d| d.accept());
            page.click("button[onclick=\"jsConfirm()\"]").await.unwrap();
            let dialog = pending.await.unwrap();
            assert_eq!(dialog.dialog_type(), DialogType::Confirm);
            assert_eq!(
                page.text_content("#result").await.unwrap(),
                "You clicked: Ok"
            );
        }

        #[tokio::test]
        async fn test_prompt_dismissed_by_default() {
            let page = page().await;
            page.goto(&the_internet::url("/javascript_alerts")).await.unwrap();
            page.click("button[onclick=\"jsPrompt()\"]").await.unwrap();
            assert_eq!(
                page.text_content("#result").await.unwrap(),
                "You entered: null"
            );
        }

        #[tokio::test]
        async fn test_wait_for_selector_takes_first_of_many() {
            let page = page().await;
            page.goto(&the_internet::url("/javascript_alerts")).await.unwrap();
            let handle = page.wait_for_selector("button").await.unwrap();
            assert_eq!(handle.info().text, "Click for JS Alert");
        }

        #[tokio::test]
        async fn test_persistent_handler_answers_prompt() {
            let page = page().await;
            page.goto(&the_internet::url("/javascript_alerts")).await.unwrap();
            page.on_dialog(|d| d.accept_with("ensayo"));
            page.click("button[onclick=\"jsPrompt()\"]").await.unwrap();
            assert_eq!(
                page.text_content("#result").await.unwrap(),
                "You entered: ensayo"
            );
            assert!(page.remove_dialog_handler());
        }
    }
}
