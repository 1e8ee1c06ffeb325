//! Auto-waiting element locators.
//!
//! A [`Locator`] is a recipe, not a result: every action or query re-runs
//! frame resolution and the element query through the session's [`Waiter`]
//! until the required match count holds. Locators are strict by default: an
//! action on a selector matching several elements keeps retrying and finally
//! fails with [`EnsayoError::AmbiguousMatch`].
//!
//! ```ignore
//! let button = page.locator("#input-example button")?.with_text("Enable");
//! button.click().await?;
//! expect(page.locator("#message")?).to_have_text("It's enabled!").await?;
//! ```
//!
//! [`Waiter`]: crate::wait::Waiter

use crate::channel::{Command, ContextId, ElementAction, ElementInfo};
use crate::result::{EnsayoError, EnsayoResult};
use crate::selector::{normalize_text, Selector};
use crate::session::Session;
use crate::wait::{Probe, WaitOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// MATCH REQUIREMENTS
// =============================================================================

/// How many matches an operation needs before it proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCount {
    /// Exactly one element (or the first, when not strict)
    ExactlyOne,
    /// One or more elements
    AtLeastOne,
    /// Whatever is there, including nothing
    Any,
}

/// Element state awaited by [`Locator::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitState {
    /// Present in the document
    Attached,
    /// Absent from the document
    Detached,
    /// Present and rendered
    #[default]
    Visible,
    /// Absent or not rendered
    Hidden,
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        };
        f.write_str(name)
    }
}

/// Positional pick among the matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nth {
    /// First in document order
    First,
    /// Last in document order
    Last,
    /// Zero-based index
    Index(usize),
}

impl Nth {
    fn pick(self, mut elements: Vec<ElementInfo>) -> Vec<ElementInfo> {
        let picked = match self {
            Self::First => elements.drain(..).next(),
            Self::Last => elements.pop(),
            Self::Index(i) if i < elements.len() => Some(elements.swap_remove(i)),
            Self::Index(_) => None,
        };
        picked.into_iter().collect()
    }
}

impl std::fmt::Display for Nth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "nth=0"),
            Self::Last => write!(f, "nth=-1"),
            Self::Index(i) => write!(f, "nth={i}"),
        }
    }
}

/// Elements found by one successful probe
#[derive(Debug, Clone)]
struct Located {
    context: ContextId,
    generation: u64,
    elements: Vec<ElementInfo>,
}

// =============================================================================
// LOCATOR
// =============================================================================

/// Lazily resolved element query scoped to one browsing context
#[derive(Debug, Clone)]
pub struct Locator {
    session: Arc<Session>,
    root: ContextId,
    frames: Vec<Selector>,
    selector: Selector,
    has_text: Option<String>,
    nth: Option<Nth>,
    strict: bool,
    visible_only: bool,
    options: WaitOptions,
}

impl Locator {
    pub(crate) fn new(
        session: Arc<Session>,
        root: ContextId,
        frames: Vec<Selector>,
        selector: Selector,
    ) -> Self {
        let options = *session.wait_options();
        Self {
            session,
            root,
            frames,
            selector,
            has_text: None,
            nth: None,
            strict: true,
            visible_only: false,
            options,
        }
    }

    /// Keep only elements whose text contains `text` (case-insensitive)
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.has_text = Some(text.into());
        self
    }

    /// Keep only rendered elements
    #[must_use]
    pub const fn with_visible(mut self, visible_only: bool) -> Self {
        self.visible_only = visible_only;
        self
    }

    /// Take the first of several matches instead of waiting for one
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Override the wait timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = timeout_ms;
        self
    }

    /// Override all wait options
    #[must_use]
    pub const fn with_options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    /// The `index`th match
    #[must_use]
    pub const fn nth(mut self, index: usize) -> Self {
        self.nth = Some(Nth::Index(index));
        self
    }

    /// The first match
    #[must_use]
    pub const fn first(mut self) -> Self {
        self.nth = Some(Nth::First);
        self
    }

    /// The last match
    #[must_use]
    pub const fn last(mut self) -> Self {
        self.nth = Some(Nth::Last);
        self
    }

    /// The element selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Frame selectors walked from the page before querying
    #[must_use]
    pub fn frame_path(&self) -> &[Selector] {
        &self.frames
    }

    /// Top-level context this locator starts from
    #[must_use]
    pub const fn root(&self) -> ContextId {
        self.root
    }

    /// Effective wait options
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Human-readable chain, e.g. `iframe#editor >> p >> nth=0`
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.frames.iter().map(ToString::to_string).collect();
        parts.push(self.selector.to_string());
        if let Some(text) = &self.has_text {
            parts.push(format!("has-text={text:?}"));
        }
        if self.visible_only {
            parts.push("visible=true".to_string());
        }
        if let Some(nth) = self.nth {
            parts.push(nth.to_string());
        }
        parts.join(" >> ")
    }

    fn keeps(&self, element: &ElementInfo) -> bool {
        if self.visible_only && !element.visible {
            return false;
        }
        self.has_text.as_ref().map_or(true, |text| {
            normalize_text(&element.text).contains(&normalize_text(text))
        })
    }

    fn not_found(&self) -> EnsayoError {
        EnsayoError::ElementNotFound {
            selector: self.describe(),
            timeout_ms: 0,
        }
    }

    /// One resolution attempt: frames, query, filters, count check
    async fn try_locate(&self, need: MatchCount) -> EnsayoResult<Probe<Located>> {
        let contexts = self.session.contexts();
        let context = match contexts.try_resolve_chain(self.root, &self.frames).await? {
            Probe::Ready(context) => context,
            Probe::Retry(err) => return Ok(Probe::Retry(err)),
        };
        let generation = match contexts.ensure_live(context, None) {
            Ok(ctx) => ctx.generation,
            Err(err) => return Ok(Probe::Retry(err)),
        };
        let found = match self
            .session
            .channel()
            .send(Command::Query {
                context,
                selector: self.selector.clone(),
            })
            .await
        {
            Ok(response) => response.into_elements()?,
            Err(err @ (EnsayoError::StaleContext { .. } | EnsayoError::StaleElement { .. })) => {
                return Ok(Probe::Retry(err))
            }
            Err(err) => return Err(err),
        };

        let mut elements: Vec<ElementInfo> = found.into_iter().filter(|e| self.keeps(e)).collect();
        if let Some(nth) = self.nth {
            elements = nth.pick(elements);
        }

        match need {
            MatchCount::Any => {}
            MatchCount::AtLeastOne | MatchCount::ExactlyOne if elements.is_empty() => {
                return Ok(Probe::Retry(self.not_found()));
            }
            MatchCount::ExactlyOne if elements.len() > 1 => {
                if self.strict {
                    return Ok(Probe::Retry(EnsayoError::AmbiguousMatch {
                        selector: self.describe(),
                        count: elements.len(),
                    }));
                }
                elements.truncate(1);
            }
            MatchCount::AtLeastOne | MatchCount::ExactlyOne => {}
        }
        Ok(Probe::Ready(Located {
            context,
            generation,
            elements,
        }))
    }

    async fn locate_with(&self, need: MatchCount) -> EnsayoResult<Located> {
        self.session
            .waiter()
            .until(&self.options, || self.try_locate(need))
            .await
    }

    async fn locate_one(&self) -> EnsayoResult<(Located, ElementInfo)> {
        let mut located = self.locate_with(MatchCount::ExactlyOne).await?;
        let element = located.elements.pop().ok_or_else(|| self.not_found())?;
        Ok((located, element))
    }

    /// Wait until `need` holds and return handles to the matches
    pub async fn locate(&self, need: MatchCount) -> EnsayoResult<Vec<ElementHandle>> {
        let located = self.locate_with(need).await?;
        let description = self.describe();
        Ok(located
            .elements
            .into_iter()
            .map(|info| ElementHandle {
                session: Arc::clone(&self.session),
                context: located.context,
                generation: located.generation,
                info,
                description: description.clone(),
            })
            .collect())
    }

    /// Handle to the single match
    pub async fn element_handle(&self) -> EnsayoResult<ElementHandle> {
        let mut handles = self.locate(MatchCount::ExactlyOne).await?;
        handles.pop().ok_or_else(|| self.not_found())
    }

    /// Handles to every current match, without waiting for any to appear
    pub async fn all(&self) -> EnsayoResult<Vec<ElementHandle>> {
        self.locate(MatchCount::Any).await
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Resolve, wait for actionability, and dispatch as one retryable unit,
    /// then let dialogs raised by the action be answered.
    async fn act(&self, action: ElementAction) -> EnsayoResult<()> {
        let name = action.name();
        let describe = self.describe();
        self.session
            .waiter()
            .until(&self.options, || {
                let action = action.clone();
                let describe = describe.clone();
                async move {
                    let mut located = match self.try_locate(MatchCount::ExactlyOne).await? {
                        Probe::Ready(located) => located,
                        Probe::Retry(err) => return Ok(Probe::Retry(err)),
                    };
                    let Some(target) = located.elements.pop() else {
                        return Ok(Probe::Retry(self.not_found()));
                    };
                    if let Some(reason) = target.blocking_reason(action.needs_editable()) {
                        return Ok(Probe::Retry(EnsayoError::NotActionable {
                            selector: describe,
                            reason: reason.to_string(),
                        }));
                    }
                    let sent = self
                        .session
                        .channel()
                        .send(Command::Perform {
                            context: located.context,
                            element: target.id,
                            action,
                        })
                        .await;
                    match sent {
                        Ok(_) => Ok(Probe::Ready(())),
                        Err(EnsayoError::NotActionable { reason, .. }) => {
                            Ok(Probe::Retry(EnsayoError::NotActionable {
                                selector: describe,
                                reason,
                            }))
                        }
                        Err(err) if err.is_retryable() => Ok(Probe::Retry(err)),
                        Err(err) => Err(err),
                    }
                }
            })
            .await?;
        debug!(action = name, target = %describe, "action dispatched");
        self.session.settle().await
    }

    /// Click the element
    pub async fn click(&self) -> EnsayoResult<()> {
        self.act(ElementAction::Click).await
    }

    /// Replace the value of an editable element
    pub async fn fill(&self, value: impl Into<String>) -> EnsayoResult<()> {
        self.act(ElementAction::Fill(value.into())).await
    }

    /// Check a checkbox or radio; no-op if already checked
    pub async fn check(&self) -> EnsayoResult<()> {
        self.act(ElementAction::Check).await
    }

    /// Uncheck a checkbox; no-op if already unchecked
    pub async fn uncheck(&self) -> EnsayoResult<()> {
        self.act(ElementAction::Uncheck).await
    }

    /// Attach files to a file input
    pub async fn set_input_files<P: Into<PathBuf>>(
        &self,
        files: impl IntoIterator<Item = P>,
    ) -> EnsayoResult<()> {
        let files = files.into_iter().map(Into::into).collect();
        self.act(ElementAction::SetInputFiles(files)).await
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Number of current matches; does not wait
    pub async fn count(&self) -> EnsayoResult<usize> {
        Ok(match self.try_locate(MatchCount::Any).await? {
            Probe::Ready(located) => located.elements.len(),
            Probe::Retry(_) => 0,
        })
    }

    /// Whether the single match is rendered; does not wait.
    ///
    /// No match is `false`; several matches under strict mode is an error.
    pub async fn is_visible(&self) -> EnsayoResult<bool> {
        match self.try_locate(MatchCount::ExactlyOne).await? {
            Probe::Ready(located) => Ok(located.elements.iter().any(|e| e.visible)),
            Probe::Retry(err @ EnsayoError::AmbiguousMatch { .. }) => Err(err),
            Probe::Retry(_) => Ok(false),
        }
    }

    /// Text content of the single match
    pub async fn text_content(&self) -> EnsayoResult<String> {
        Ok(self.locate_one().await?.1.text)
    }

    /// Text content of every current match
    pub async fn all_text_contents(&self) -> EnsayoResult<Vec<String>> {
        let located = self.locate_with(MatchCount::Any).await?;
        Ok(located.elements.into_iter().map(|e| e.text).collect())
    }

    /// Attribute of the single match
    pub async fn get_attribute(&self, name: &str) -> EnsayoResult<Option<String>> {
        Ok(self.locate_one().await?.1.attribute(name).map(str::to_string))
    }

    /// Form value of the single match
    pub async fn input_value(&self) -> EnsayoResult<String> {
        Ok(self.locate_one().await?.1.value.unwrap_or_default())
    }

    /// Whether the single match is enabled
    pub async fn is_enabled(&self) -> EnsayoResult<bool> {
        Ok(self.locate_one().await?.1.enabled)
    }

    /// Whether the single match is checked
    pub async fn is_checked(&self) -> EnsayoResult<bool> {
        Ok(self.locate_one().await?.1.checked)
    }

    /// Wait until the matches reach `state`
    pub async fn wait_for(&self, state: WaitState) -> EnsayoResult<()> {
        let describe = self.describe();
        self.session
            .waiter()
            .until(&self.options, || {
                let describe = describe.clone();
                async move {
                    let elements = match self.try_locate(MatchCount::Any).await? {
                        Probe::Ready(located) => located.elements,
                        Probe::Retry(err) if state == WaitState::Attached => {
                            return Ok(Probe::Retry(err))
                        }
                        // An unresolvable frame path has no matches.
                        Probe::Retry(_) => Vec::new(),
                    };
                    let reached = match state {
                        WaitState::Attached => !elements.is_empty(),
                        WaitState::Detached => elements.is_empty(),
                        WaitState::Visible => elements.iter().any(|e| e.visible),
                        WaitState::Hidden => elements.iter().all(|e| !e.visible),
                    };
                    Ok(if reached {
                        Probe::Ready(())
                    } else if state == WaitState::Attached {
                        Probe::Retry(self.not_found())
                    } else {
                        Probe::waiting(format!("'{describe}' to be {state}"))
                    })
                }
            })
            .await
    }
}

// =============================================================================
// ELEMENT HANDLE
// =============================================================================

/// A resolved element at a point in time.
///
/// Bound to the context generation it was found in: after that context
/// navigates or is destroyed every use fails with
/// [`EnsayoError::StaleContext`]. Handles do not wait; re-resolve through
/// the [`Locator`] instead.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    session: Arc<Session>,
    context: ContextId,
    generation: u64,
    info: ElementInfo,
    description: String,
}

impl ElementHandle {
    /// Owning context
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Context generation at resolution time
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Element state at resolution time
    #[must_use]
    pub const fn info(&self) -> &ElementInfo {
        &self.info
    }

    /// Current element state
    pub async fn refresh(&self) -> EnsayoResult<ElementInfo> {
        let channel = self.session.channel();
        channel.drain_events().await;
        self.session
            .contexts()
            .ensure_live(self.context, Some(self.generation))?;
        let info = channel
            .send(Command::Describe {
                context: self.context,
                element: self.info.id,
            })
            .await?
            .into_element()?;
        if !info.attached {
            return Err(EnsayoError::StaleElement {
                element: self.info.id.to_string(),
            });
        }
        Ok(info)
    }

    /// Current text content
    pub async fn text_content(&self) -> EnsayoResult<String> {
        Ok(self.refresh().await?.text)
    }

    async fn perform(&self, action: ElementAction) -> EnsayoResult<()> {
        let info = self.refresh().await?;
        if let Some(reason) = info.blocking_reason(action.needs_editable()) {
            return Err(EnsayoError::NotActionable {
                selector: self.description.clone(),
                reason: reason.to_string(),
            });
        }
        self.session
            .channel()
            .send(Command::Perform {
                context: self.context,
                element: self.info.id,
                action,
            })
            .await?;
        self.session.settle().await
    }

    /// Click now, without waiting
    pub async fn click(&self) -> EnsayoResult<()> {
        self.perform(ElementAction::Click).await
    }

    /// Fill now, without waiting
    pub async fn fill(&self, value: impl Into<String>) -> EnsayoResult<()> {
        self.perform(ElementAction::Fill(value.into())).await
    }
}

// =============================================================================
// ASSERTIONS
// =============================================================================

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Condition checked by [`Expect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectAssertion {
    /// Single match has exactly this text (whitespace-collapsed)
    HasText(String),
    /// Single match contains this text
    ContainsText(String),
    /// Matches contain these texts, in order
    ContainsTexts(Vec<String>),
    /// Single match is rendered
    IsVisible,
    /// No match is rendered
    IsHidden,
    /// Single match is enabled
    IsEnabled,
    /// Single match is checked
    IsChecked,
    /// Exactly this many matches
    HasCount(usize),
}

impl ExpectAssertion {
    fn single<'a>(&self, elements: &'a [ElementInfo], strict: bool) -> Result<&'a ElementInfo, String> {
        match elements {
            [] => Err("no element".to_string()),
            [one] => Ok(one),
            [first, ..] if !strict => Ok(first),
            many => Err(format!("{} elements", many.len())),
        }
    }

    /// Check the assertion against the current matches.
    ///
    /// # Errors
    ///
    /// Returns a description of the actual state when it does not hold.
    pub fn validate(&self, elements: &[ElementInfo], strict: bool) -> Result<(), String> {
        match self {
            Self::HasText(expected) => {
                let actual = collapse(&self.single(elements, strict)?.text);
                if actual == collapse(expected) {
                    Ok(())
                } else {
                    Err(format!("{actual:?}"))
                }
            }
            Self::ContainsText(expected) => {
                let actual = collapse(&self.single(elements, strict)?.text);
                if actual.contains(&collapse(expected)) {
                    Ok(())
                } else {
                    Err(format!("{actual:?}"))
                }
            }
            Self::ContainsTexts(expected) => {
                let actual: Vec<String> = elements.iter().map(|e| collapse(&e.text)).collect();
                let mut remaining = actual.iter();
                let all_found = expected.iter().all(|want| {
                    let want = collapse(want);
                    remaining.any(|have| have.contains(&want))
                });
                if all_found {
                    Ok(())
                } else {
                    Err(format!("{actual:?}"))
                }
            }
            Self::IsVisible => {
                if self.single(elements, strict)?.visible {
                    Ok(())
                } else {
                    Err("hidden".to_string())
                }
            }
            Self::IsHidden => {
                let shown = elements.iter().filter(|e| e.visible).count();
                if shown == 0 {
                    Ok(())
                } else {
                    Err(format!("{shown} visible"))
                }
            }
            Self::IsEnabled => {
                if self.single(elements, strict)?.enabled {
                    Ok(())
                } else {
                    Err("disabled".to_string())
                }
            }
            Self::IsChecked => {
                if self.single(elements, strict)?.checked {
                    Ok(())
                } else {
                    Err("unchecked".to_string())
                }
            }
            Self::HasCount(expected) => {
                if elements.len() == *expected {
                    Ok(())
                } else {
                    Err(elements.len().to_string())
                }
            }
        }
    }
}

impl std::fmt::Display for ExpectAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HasText(text) => write!(f, "text {text:?}"),
            Self::ContainsText(text) => write!(f, "text containing {text:?}"),
            Self::ContainsTexts(texts) => write!(f, "texts containing {texts:?}"),
            Self::IsVisible => write!(f, "visible"),
            Self::IsHidden => write!(f, "hidden"),
            Self::IsEnabled => write!(f, "enabled"),
            Self::IsChecked => write!(f, "checked"),
            Self::HasCount(n) => write!(f, "count {n}"),
        }
    }
}

/// Auto-retrying assertions on a locator
#[derive(Debug, Clone)]
pub struct Expect {
    locator: Locator,
}

impl Expect {
    /// Expectation on `locator`, using its wait options
    #[must_use]
    pub const fn new(locator: Locator) -> Self {
        Self { locator }
    }

    /// Override the assertion timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.locator = self.locator.with_timeout(timeout_ms);
        self
    }

    /// Poll until `assertion` holds or the timeout elapses
    pub async fn assert(&self, assertion: ExpectAssertion) -> EnsayoResult<()> {
        let locator = &self.locator;
        let assertion = &assertion;
        let outcome = locator
            .session
            .waiter()
            .until(&locator.options, || async move {
                let elements = match locator.try_locate(MatchCount::Any).await? {
                    Probe::Ready(located) => located.elements,
                    Probe::Retry(err) => return Ok(Probe::Retry(err)),
                };
                Ok(match assertion.validate(&elements, locator.strict) {
                    Ok(()) => Probe::Ready(()),
                    Err(actual) => Probe::Retry(EnsayoError::AssertionFailed {
                        message: format!(
                            "'{}': expected {assertion}, got {actual}",
                            locator.describe()
                        ),
                    }),
                })
            })
            .await;
        match outcome {
            Err(EnsayoError::AssertionFailed { message }) => Err(EnsayoError::AssertionFailed {
                message: format!("{message} (waited {}ms)", locator.options.timeout_ms),
            }),
            other => other,
        }
    }

    /// Text equals `expected`, ignoring whitespace runs
    pub async fn to_have_text(&self, expected: impl Into<String>) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::HasText(expected.into())).await
    }

    /// Text contains `expected`
    pub async fn to_contain_text(&self, expected: impl Into<String>) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::ContainsText(expected.into()))
            .await
    }

    /// Successive matches contain each of `expected`, in order
    pub async fn to_contain_texts<S: Into<String>>(
        &self,
        expected: impl IntoIterator<Item = S>,
    ) -> EnsayoResult<()> {
        let texts = expected.into_iter().map(Into::into).collect();
        self.assert(ExpectAssertion::ContainsTexts(texts)).await
    }

    /// Element is rendered
    pub async fn to_be_visible(&self) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::IsVisible).await
    }

    /// Element is absent or not rendered
    pub async fn to_be_hidden(&self) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::IsHidden).await
    }

    /// Element is enabled
    pub async fn to_be_enabled(&self) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::IsEnabled).await
    }

    /// Element is checked
    pub async fn to_be_checked(&self) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::IsChecked).await
    }

    /// Exactly `count` matches
    pub async fn to_have_count(&self, count: usize) -> EnsayoResult<()> {
        self.assert(ExpectAssertion::HasCount(count)).await
    }
}

/// Create an expectation for a locator
///
/// `expect(page.locator("#flash")?).to_contain_text("secure area").await?;`
#[must_use]
pub fn expect(locator: Locator) -> Expect {
    Expect::new(locator)
}
