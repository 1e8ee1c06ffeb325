//! Runner configuration.
//!
//! Loaded from YAML, then overridden by `ENSAYO_*` environment variables, then
//! validated. Every field has a default so an empty document is valid.

use crate::dialog::AutoDialogBehavior;
use crate::result::{EnsayoError, EnsayoResult};
use crate::wait::{Backoff, WaitOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "ENSAYO_";

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to the browser binary (None = auto-detect)
    pub executable: Option<PathBuf>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            executable: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set browser binary
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }
}

/// Settings for a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-case timeout
    pub test_timeout_ms: u64,
    /// Default locator and assertion timeout
    pub expect_timeout_ms: u64,
    /// First poll interval of every wait
    pub poll_interval_ms: u64,
    /// Poll interval growth
    pub backoff: Backoff,
    /// How long an action waits for its dialogs to be answered
    pub dialog_grace_ms: u64,
    /// Cases run concurrently
    pub workers: usize,
    /// Skip remaining cases after the first failure
    pub fail_fast: bool,
    /// Answer for dialogs no handler claimed
    pub dialog_policy: AutoDialogBehavior,
    /// Browser launch options
    pub browser: BrowserConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            test_timeout_ms: 30_000,
            expect_timeout_ms: 5_000,
            poll_interval_ms: crate::wait::DEFAULT_POLL_INTERVAL_MS,
            backoff: Backoff::Fixed,
            dialog_grace_ms: 5_000,
            workers: 1,
            fail_fast: false,
            dialog_policy: AutoDialogBehavior::DismissAll,
            browser: BrowserConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML, apply the process environment, validate
    pub fn from_yaml(yaml: &str) -> EnsayoResult<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.with_env()?.validated()
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> EnsayoResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> EnsayoResult<Self> {
        self.with_overrides(std::env::vars())
    }

    /// Apply `ENSAYO_*` overrides from `vars`; other keys are ignored
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> EnsayoResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "TEST_TIMEOUT_MS" => self.test_timeout_ms = parse(name, value)?,
                "EXPECT_TIMEOUT_MS" => self.expect_timeout_ms = parse(name, value)?,
                "POLL_INTERVAL_MS" => self.poll_interval_ms = parse(name, value)?,
                "DIALOG_GRACE_MS" => self.dialog_grace_ms = parse(name, value)?,
                "WORKERS" => self.workers = parse(name, value)?,
                "FAIL_FAST" => self.fail_fast = parse_bool(name, value)?,
                "DIALOG_POLICY" => self.dialog_policy = value.parse()?,
                "HEADLESS" => self.browser.headless = parse_bool(name, value)?,
                "BROWSER_EXECUTABLE" => self.browser.executable = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(self)
    }

    /// Reject settings the runner cannot honor
    pub fn validated(self) -> EnsayoResult<Self> {
        let zero = |field: &str| EnsayoError::Config {
            message: format!("{field} must be greater than zero"),
        };
        if self.test_timeout_ms == 0 {
            return Err(zero("test_timeout_ms"));
        }
        if self.expect_timeout_ms == 0 {
            return Err(zero("expect_timeout_ms"));
        }
        if self.workers == 0 {
            return Err(zero("workers"));
        }
        if let Backoff::Exponential { max_ms } = self.backoff {
            if max_ms < self.poll_interval_ms {
                return Err(EnsayoError::Config {
                    message: format!(
                        "backoff max_ms ({max_ms}) is below poll_interval_ms ({})",
                        self.poll_interval_ms
                    ),
                });
            }
        }
        Ok(self)
    }

    /// Set per-case timeout
    #[must_use]
    pub const fn with_test_timeout(mut self, ms: u64) -> Self {
        self.test_timeout_ms = ms;
        self
    }

    /// Set locator and assertion timeout
    #[must_use]
    pub const fn with_expect_timeout(mut self, ms: u64) -> Self {
        self.expect_timeout_ms = ms;
        self
    }

    /// Set concurrency
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set fail-fast
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set the unhandled-dialog policy
    #[must_use]
    pub const fn with_dialog_policy(mut self, policy: AutoDialogBehavior) -> Self {
        self.dialog_policy = policy;
        self
    }

    /// Set the dialog grace period
    #[must_use]
    pub const fn with_dialog_grace(mut self, ms: u64) -> Self {
        self.dialog_grace_ms = ms;
        self
    }

    /// Wait options for locators and assertions
    #[must_use]
    pub const fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout_ms: self.expect_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            backoff: self.backoff,
        }
    }

    /// Per-case timeout
    #[must_use]
    pub const fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    /// Dialog grace period
    #[must_use]
    pub const fn dialog_grace(&self) -> Duration {
        Duration::from_millis(self.dialog_grace_ms)
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> EnsayoResult<T> {
    value.parse().map_err(|_| EnsayoError::Config {
        message: format!("{ENV_PREFIX}{name}: invalid value '{value}'"),
    })
}

fn parse_bool(name: &str, value: &str) -> EnsayoResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EnsayoError::Config {
            message: format!("{ENV_PREFIX}{name}: expected a boolean, got '{value}'"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_default_config() {
            let config = RunnerConfig::default();
            assert_eq!(config.test_timeout_ms, 30_000);
            assert_eq!(config.expect_timeout_ms, 5_000);
            assert_eq!(config.workers, 1);
            assert!(!config.fail_fast);
            assert_eq!(config.dialog_policy, AutoDialogBehavior::DismissAll);
            assert!(config.browser.headless);
        }

        #[test]
        fn test_wait_options_follow_config() {
            let config = RunnerConfig::new().with_expect_timeout(750);
            let opts = config.wait_options();
            assert_eq!(opts.timeout_ms, 750);
            assert_eq!(opts.poll_interval_ms, config.poll_interval_ms);
        }

        #[test]
        fn test_chained_builders() {
            let config = RunnerConfig::new()
                .with_workers(4)
                .with_fail_fast(true)
                .with_test_timeout(1_000)
                .with_dialog_grace(250)
                .with_dialog_policy(AutoDialogBehavior::AcceptAll);
            assert_eq!(config.workers, 4);
            assert!(config.fail_fast);
            assert_eq!(config.test_timeout(), Duration::from_secs(1));
            assert_eq!(config.dialog_grace(), Duration::from_millis(250));
        }
    }

    mod yaml_tests {
        use super::*;

        #[test]
        fn test_partial_yaml_keeps_defaults() {
            let yaml = "workers: 3\ndialog_policy: accept_all\nbrowser:\n  headless: false\n";
            let config: RunnerConfig = serde_yaml_ng::from_str(yaml).unwrap();
            let config = config.validated().unwrap();
            assert_eq!(config.workers, 3);
            assert_eq!(config.dialog_policy, AutoDialogBehavior::AcceptAll);
            assert!(!config.browser.headless);
            assert_eq!(config.expect_timeout_ms, 5_000);
        }

        #[test]
        fn test_backoff_from_yaml() {
            let yaml = "backoff:\n  kind: exponential\n  max_ms: 400\n";
            let config: RunnerConfig = serde_yaml_ng::from_str(yaml).unwrap();
            assert_eq!(config.backoff, Backoff::Exponential { max_ms: 400 });
        }

        #[test]
        fn test_invalid_yaml_is_yaml_error() {
            let err = serde_yaml_ng::from_str::<RunnerConfig>("workers: [").unwrap_err();
            let err: EnsayoError = err.into();
            assert!(matches!(err, EnsayoError::Yaml(_)));
        }

        #[test]
        fn test_from_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("ensayo.yaml");
            std::fs::write(&path, "expect_timeout_ms: 1200\n").unwrap();
            // Environment overrides may apply; only the file value is asserted
            // when no override is present.
            let config = RunnerConfig::from_file(&path);
            if std::env::var("ENSAYO_EXPECT_TIMEOUT_MS").is_err() {
                assert_eq!(config.unwrap().expect_timeout_ms, 1_200);
            }
        }
    }

    mod override_tests {
        use super::*;

        #[test]
        fn test_env_overrides_apply() {
            let config = RunnerConfig::new()
                .with_overrides([
                    ("ENSAYO_WORKERS", "8"),
                    ("ENSAYO_FAIL_FAST", "yes"),
                    ("ENSAYO_DIALOG_POLICY", "accept"),
                    ("ENSAYO_BROWSER_EXECUTABLE", "/opt/chrome"),
                    ("PATH", "/usr/bin"),
                ])
                .unwrap();
            assert_eq!(config.workers, 8);
            assert!(config.fail_fast);
            assert_eq!(config.dialog_policy, AutoDialogBehavior::AcceptAll);
            assert_eq!(config.browser.executable, Some(PathBuf::from("/opt/chrome")));
        }

        #[test]
        fn test_bad_override_is_config_error() {
            let err = RunnerConfig::new()
                .with_overrides([("ENSAYO_WORKERS", "many")])
                .unwrap_err();
            assert!(matches!(err, EnsayoError::Config { .. }));
            let err = RunnerConfig::new()
                .with_overrides([("ENSAYO_HEADLESS", "maybe")])
                .unwrap_err();
            assert!(err.to_string().contains("ENSAYO_HEADLESS"));
        }

        #[test]
        fn test_validation_rejects_zero() {
            assert!(RunnerConfig::new().with_workers(0).validated().is_err());
            assert!(RunnerConfig::new().with_test_timeout(0).validated().is_err());
            let config = RunnerConfig {
                poll_interval_ms: 100,
                backoff: Backoff::Exponential { max_ms: 50 },
                ..RunnerConfig::default()
            };
            assert!(config.validated().is_err());
        }
    }
}
