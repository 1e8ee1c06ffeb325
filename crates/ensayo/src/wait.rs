//! Wait/Poll engine.
//!
//! Every auto-waiting operation (locators, frame hops, load states,
//! assertions) is a probe run by [`Waiter::until`]: check, sleep, check again
//! until the probe is ready or the deadline passes. Sleeps are cooperative,
//! never shorter than [`MIN_POLL_INTERVAL_MS`], and clamped to the deadline
//! so the condition always gets one last check right before timing out.
//!
//! A [`Waiter`] carries the cancellation token of its test case; cancelling
//! it abandons every wait in flight with [`EnsayoError::Cancelled`].

use crate::channel::ReadyState;
use crate::result::{EnsayoError, EnsayoResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Lower bound on any poll interval
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

// =============================================================================
// LOAD STATE
// =============================================================================

/// Page load states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadState {
    /// Wait for the `load` event to fire
    #[default]
    Load,
    /// Wait for `DOMContentLoaded` event
    DomContentLoaded,
}

impl LoadState {
    /// Get the JavaScript event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
        }
    }

    /// Whether a document in `ready` has reached this state
    #[must_use]
    pub const fn is_reached(&self, ready: ReadyState) -> bool {
        match self {
            Self::Load => matches!(ready, ReadyState::Complete),
            Self::DomContentLoaded => {
                matches!(ready, ReadyState::Interactive | ReadyState::Complete)
            }
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// How the poll interval evolves between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same interval every time
    #[default]
    Fixed,
    /// Double the interval after each check, up to `max_ms`
    Exponential {
        /// Upper bound in milliseconds
        max_ms: u64,
    },
}

/// Options for wait operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Interval growth
    pub backoff: Backoff,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff: Backoff::Fixed,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set interval growth
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// First poll interval, never below the floor
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Interval to use after sleeping `current`
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        let floor = Duration::from_millis(MIN_POLL_INTERVAL_MS);
        match self.backoff {
            Backoff::Fixed => current.max(floor),
            Backoff::Exponential { max_ms } => {
                let cap = Duration::from_millis(max_ms).max(floor);
                (current * 2).min(cap).max(floor)
            }
        }
    }
}

// =============================================================================
// PROBES AND CONDITIONS
// =============================================================================

/// Outcome of a single check
#[derive(Debug)]
pub enum Probe<T> {
    /// Condition holds; stop waiting
    Ready(T),
    /// Not yet; this error is reported if the deadline passes
    Retry(EnsayoError),
}

impl<T> Probe<T> {
    /// Retry with a generic timeout error describing the condition
    pub fn waiting(waited_for: impl Into<String>) -> Self {
        Self::Retry(EnsayoError::Timeout {
            ms: 0,
            waited_for: waited_for.into(),
        })
    }
}

/// Trait for custom wait conditions
pub trait WaitCondition: Send + Sync {
    /// Check if the condition is satisfied
    fn check(&self) -> bool;

    /// Get description for error messages
    fn description(&self) -> String;
}

/// A function-based wait condition
pub struct FnCondition<F: Fn() -> bool + Send + Sync> {
    func: F,
    description: String,
}

impl<F: Fn() -> bool + Send + Sync> std::fmt::Debug for FnCondition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F: Fn() -> bool + Send + Sync> FnCondition<F> {
    /// Create a new function condition
    pub fn new(func: F, description: impl Into<String>) -> Self {
        Self {
            func,
            description: description.into(),
        }
    }
}

impl<F: Fn() -> bool + Send + Sync> WaitCondition for FnCondition<F> {
    fn check(&self) -> bool {
        (self.func)()
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Result of a successful wait
#[derive(Debug, Clone)]
pub struct WaitResult {
    /// Time spent waiting
    pub elapsed: Duration,
    /// Description of what was waited for
    pub waited_for: String,
}

// =============================================================================
// WAITER
// =============================================================================

/// Cancellable poll scheduler
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    cancel: CancellationToken,
}

impl Waiter {
    /// Create a waiter with its own token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a waiter bound to an existing token
    #[must_use]
    pub const fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Token that abandons this waiter's waits
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether waits are being abandoned
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn cancelled_error() -> EnsayoError {
        EnsayoError::Cancelled {
            reason: "test case cancelled".to_string(),
        }
    }

    /// Run `probe` until it is ready, it fails hard, or the timeout elapses.
    ///
    /// `Probe::Retry` errors are retried; the last one is returned on timeout
    /// with its timeout field set. `Err` from the probe aborts immediately.
    pub async fn until<T, F, Fut>(&self, options: &WaitOptions, mut probe: F) -> EnsayoResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EnsayoResult<Probe<T>>>,
    {
        let deadline = Instant::now() + options.timeout();
        let mut interval = options.poll_interval();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Self::cancelled_error());
            }
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => return Err(Self::cancelled_error()),
                outcome = probe() => outcome?,
            };
            let last = match outcome {
                Probe::Ready(value) => return Ok(value),
                Probe::Retry(err) => err,
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(with_timeout(last, options.timeout_ms));
            }
            let nap = interval.min(deadline - now);
            tokio::select! {
                () = self.cancel.cancelled() => return Err(Self::cancelled_error()),
                () = tokio::time::sleep(nap) => {}
            }
            interval = options.next_interval(interval);
        }
    }

    /// Wait for a custom condition
    pub async fn wait_for<C: WaitCondition>(
        &self,
        condition: &C,
        options: &WaitOptions,
    ) -> EnsayoResult<WaitResult> {
        let start = Instant::now();
        self.until(options, || async {
            Ok(if condition.check() {
                Probe::Ready(())
            } else {
                Probe::waiting(condition.description())
            })
        })
        .await?;
        Ok(WaitResult {
            elapsed: start.elapsed(),
            waited_for: condition.description(),
        })
    }

    /// Wait for a predicate closure
    pub async fn wait_for_function<F>(
        &self,
        predicate: F,
        description: &str,
        options: &WaitOptions,
    ) -> EnsayoResult<WaitResult>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.wait_for(&FnCondition::new(predicate, description), options)
            .await
    }
}

fn with_timeout(err: EnsayoError, ms: u64) -> EnsayoError {
    match err {
        EnsayoError::Timeout { waited_for, .. } => EnsayoError::Timeout { ms, waited_for },
        EnsayoError::ElementNotFound { selector, .. } => EnsayoError::ElementNotFound {
            selector,
            timeout_ms: ms,
        },
        other => other,
    }
}

/// Convenience: wait for a predicate with default polling
pub async fn wait_until<F>(predicate: F, timeout_ms: u64) -> EnsayoResult<()>
where
    F: Fn() -> bool + Send + Sync,
{
    let options = WaitOptions::new().with_timeout(timeout_ms);
    Waiter::new()
        .wait_for_function(predicate, "custom condition", &options)
        .await
        .map(|_| ())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    mod load_state_tests {
        use super::*;

        #[test]
        fn test_load_state_event_names() {
            assert_eq!(LoadState::Load.event_name(), "load");
            assert_eq!(LoadState::DomContentLoaded.event_name(), "DOMContentLoaded");
            assert_eq!(format!("{}", LoadState::default()), "load");
        }

        #[test]
        fn test_load_state_reached() {
            assert!(!LoadState::Load.is_reached(ReadyState::Interactive));
            assert!(LoadState::Load.is_reached(ReadyState::Complete));
            assert!(LoadState::DomContentLoaded.is_reached(ReadyState::Interactive));
            assert!(!LoadState::DomContentLoaded.is_reached(ReadyState::Loading));
        }
    }

    mod wait_options_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let opts = WaitOptions::default();
            assert_eq!(opts.timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
            assert_eq!(opts.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
            assert_eq!(opts.backoff, Backoff::Fixed);
        }

        #[test]
        fn test_poll_interval_floor() {
            let opts = WaitOptions::new().with_poll_interval(0);
            assert_eq!(opts.poll_interval(), Duration::from_millis(MIN_POLL_INTERVAL_MS));
            assert_eq!(
                opts.next_interval(Duration::ZERO),
                Duration::from_millis(MIN_POLL_INTERVAL_MS)
            );
        }

        #[test]
        fn test_exponential_backoff_caps() {
            let opts = WaitOptions::new()
                .with_poll_interval(20)
                .with_backoff(Backoff::Exponential { max_ms: 100 });
            let mut interval = opts.poll_interval();
            let mut seen = Vec::new();
            for _ in 0..5 {
                interval = opts.next_interval(interval);
                seen.push(interval.as_millis());
            }
            assert_eq!(seen, vec![40, 80, 100, 100, 100]);
        }
    }

    mod waiter_tests {
        use super::*;

        #[tokio::test]
        async fn test_ready_immediately() {
            let waiter = Waiter::new();
            let value = waiter
                .until(&WaitOptions::new().with_timeout(100), || async {
                    Ok(Probe::Ready(42))
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        #[tokio::test]
        async fn test_becomes_ready_after_retries() {
            let waiter = Waiter::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let options = WaitOptions::new().with_timeout(2_000).with_poll_interval(10);
            let value = waiter
                .until(&options, || {
                    let calls = Arc::clone(&calls);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        Ok(if n >= 3 {
                            Probe::Ready(n)
                        } else {
                            Probe::waiting("third call")
                        })
                    }
                })
                .await
                .unwrap();
            assert_eq!(value, 3);
        }

        #[tokio::test]
        async fn test_timeout_reports_last_error_with_timeout() {
            let waiter = Waiter::new();
            let start = std::time::Instant::now();
            let err = waiter
                .until(&WaitOptions::new().with_timeout(150), || async {
                    Ok(Probe::<()>::Retry(EnsayoError::ElementNotFound {
                        selector: "#never".to_string(),
                        timeout_ms: 0,
                    }))
                })
                .await
                .unwrap_err();
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(150));
            assert!(elapsed < Duration::from_millis(1_000));
            match err {
                EnsayoError::ElementNotFound { timeout_ms, .. } => assert_eq!(timeout_ms, 150),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_final_probe_at_deadline() {
            let waiter = Waiter::new();
            let start = Instant::now();
            let last = Arc::new(Mutex::new(start));
            let options = WaitOptions::new().with_timeout(100).with_poll_interval(70);
            let _ = waiter
                .until(&options, || {
                    let last = Arc::clone(&last);
                    async move {
                        *last.lock().unwrap() = Instant::now();
                        Ok(Probe::<()>::waiting("never"))
                    }
                })
                .await;
            let last_check = *last.lock().unwrap() - start;
            assert!(last_check >= Duration::from_millis(100));
        }

        #[tokio::test]
        async fn test_hard_error_aborts() {
            let waiter = Waiter::new();
            let calls = AtomicUsize::new(0);
            let err = waiter
                .until(&WaitOptions::new().with_timeout(5_000), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<Probe<()>, _>(EnsayoError::ChannelClosed {
                            reason: "gone".to_string(),
                        })
                    }
                })
                .await
                .unwrap_err();
            assert!(matches!(err, EnsayoError::ChannelClosed { .. }));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_cancellation_abandons_wait() {
            let waiter = Waiter::new();
            let token = waiter.cancellation().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                token.cancel();
            });
            let start = std::time::Instant::now();
            let err = waiter
                .until(&WaitOptions::new().with_timeout(10_000), || async {
                    Ok(Probe::<()>::waiting("forever"))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, EnsayoError::Cancelled { .. }));
            assert!(start.elapsed() < Duration::from_secs(2));
        }

        #[tokio::test]
        async fn test_wait_for_condition() {
            let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let setter = Arc::clone(&flag);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                setter.store(true, Ordering::SeqCst);
            });
            let reader = Arc::clone(&flag);
            let condition = FnCondition::new(move || reader.load(Ordering::SeqCst), "flag set");
            let result = Waiter::new()
                .wait_for(&condition, &WaitOptions::new().with_timeout(2_000))
                .await
                .unwrap();
            assert_eq!(result.waited_for, "flag set");
        }

        #[tokio::test]
        async fn test_wait_until_times_out() {
            let err = wait_until(|| false, 50).await.unwrap_err();
            match err {
                EnsayoError::Timeout { ms, waited_for } => {
                    assert_eq!(ms, 50);
                    assert_eq!(waited_for, "custom condition");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
