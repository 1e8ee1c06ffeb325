//! Result and error types for Ensayo.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Ensayo operations
pub type EnsayoResult<T> = Result<T, EnsayoError>;

/// Errors that can occur in Ensayo
#[derive(Debug, Error)]
pub enum EnsayoError {
    /// Selector could not be parsed
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// Selector source
        selector: String,
        /// Why parsing failed
        reason: String,
    },

    /// No element matched within the timeout
    #[error("No element matches '{selector}' after {timeout_ms}ms")]
    ElementNotFound {
        /// Selector description
        selector: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// More than one element matched where exactly one was required
    #[error("Selector '{selector}' matched {count} elements, expected exactly one")]
    AmbiguousMatch {
        /// Selector description
        selector: String,
        /// Number of matches at last check
        count: usize,
    },

    /// Element exists but never became actionable
    #[error("Element '{selector}' is not actionable: {reason}")]
    NotActionable {
        /// Selector description
        selector: String,
        /// Last failed actionability check
        reason: String,
    },

    /// Handle used after its browsing context navigated or was destroyed
    #[error("Browsing context {context} is stale: {reason}")]
    StaleContext {
        /// Context identifier
        context: String,
        /// What invalidated it
        reason: String,
    },

    /// Element handle no longer attached to the document
    #[error("Element {element} is detached from the document")]
    StaleElement {
        /// Element identifier
        element: String,
    },

    /// Generic condition did not become true within the timeout
    #[error("Timed out after {ms}ms waiting for {waited_for}")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
        /// What was being waited for
        waited_for: String,
    },

    /// Whole test case exceeded its time budget
    #[error("Test '{name}' exceeded its timeout of {ms}ms")]
    TestTimeout {
        /// Test case name
        name: String,
        /// Budget in milliseconds
        ms: u64,
    },

    /// Event handler did not finish within the grace period
    #[error("Handler for {event} did not complete within {ms}ms")]
    HandlerTimeout {
        /// Event description
        event: String,
        /// Grace period in milliseconds
        ms: u64,
    },

    /// Browser connection is gone
    #[error("Command channel closed: {reason}")]
    ChannelClosed {
        /// Close reason
        reason: String,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Expected vs. actual
        message: String,
    },

    /// Wait was abandoned because its owning case was cancelled
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why
        reason: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Browser rejected a command
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Fixture error (setup/teardown failed)
    #[error("Fixture error: {message}")]
    Fixture {
        /// Error message
        message: String,
    },

    /// HTTP capability error
    #[error("HTTP error: {message}")]
    Http {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Test body panicked
    #[error("Test panicked: {message}")]
    Panic {
        /// Panic payload, if it was a string
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// Serializable classification of an [`EnsayoError`], used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`EnsayoError::InvalidSelector`]
    InvalidSelector,
    /// See [`EnsayoError::ElementNotFound`]
    ElementNotFound,
    /// See [`EnsayoError::AmbiguousMatch`]
    AmbiguousMatch,
    /// See [`EnsayoError::NotActionable`]
    NotActionable,
    /// See [`EnsayoError::StaleContext`]
    StaleContext,
    /// See [`EnsayoError::StaleElement`]
    StaleElement,
    /// See [`EnsayoError::Timeout`]
    Timeout,
    /// See [`EnsayoError::TestTimeout`]
    TestTimeout,
    /// See [`EnsayoError::HandlerTimeout`]
    HandlerTimeout,
    /// See [`EnsayoError::ChannelClosed`]
    ChannelClosed,
    /// See [`EnsayoError::AssertionFailed`]
    AssertionFailure,
    /// See [`EnsayoError::Cancelled`]
    Cancelled,
    /// See [`EnsayoError::Navigation`]
    Navigation,
    /// See [`EnsayoError::Protocol`]
    Protocol,
    /// See [`EnsayoError::Fixture`]
    Fixture,
    /// See [`EnsayoError::Http`]
    Http,
    /// See [`EnsayoError::Config`]
    Config,
    /// See [`EnsayoError::Panic`]
    Panic,
    /// I/O, JSON and YAML errors
    Io,
}

impl EnsayoError {
    /// Classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSelector { .. } => ErrorKind::InvalidSelector,
            Self::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            Self::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            Self::NotActionable { .. } => ErrorKind::NotActionable,
            Self::StaleContext { .. } => ErrorKind::StaleContext,
            Self::StaleElement { .. } => ErrorKind::StaleElement,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TestTimeout { .. } => ErrorKind::TestTimeout,
            Self::HandlerTimeout { .. } => ErrorKind::HandlerTimeout,
            Self::ChannelClosed { .. } => ErrorKind::ChannelClosed,
            Self::AssertionFailed { .. } => ErrorKind::AssertionFailure,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Fixture { .. } => ErrorKind::Fixture,
            Self::Http { .. } => ErrorKind::Http,
            Self::Config { .. } => ErrorKind::Config,
            Self::Panic { .. } => ErrorKind::Panic,
            Self::Io(_) | Self::Json(_) | Self::Yaml(_) => ErrorKind::Io,
        }
    }

    /// Whether a locator step may retry after this error.
    ///
    /// Covers resolution and actionability failures plus detached nodes and
    /// frames that are being replaced.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. }
                | Self::AmbiguousMatch { .. }
                | Self::NotActionable { .. }
                | Self::StaleElement { .. }
                | Self::StaleContext { .. }
                | Self::Timeout { .. }
        )
    }

    /// Whether this error ends the owning session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. } | Self::Cancelled { .. })
    }

    /// Copy the error for a second consumer.
    ///
    /// `std::io::Error` and the serde errors are not `Clone`; they are
    /// carried over by message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::InvalidSelector { selector, reason } => Self::InvalidSelector {
                selector: selector.clone(),
                reason: reason.clone(),
            },
            Self::ElementNotFound {
                selector,
                timeout_ms,
            } => Self::ElementNotFound {
                selector: selector.clone(),
                timeout_ms: *timeout_ms,
            },
            Self::AmbiguousMatch { selector, count } => Self::AmbiguousMatch {
                selector: selector.clone(),
                count: *count,
            },
            Self::NotActionable { selector, reason } => Self::NotActionable {
                selector: selector.clone(),
                reason: reason.clone(),
            },
            Self::StaleContext { context, reason } => Self::StaleContext {
                context: context.clone(),
                reason: reason.clone(),
            },
            Self::StaleElement { element } => Self::StaleElement {
                element: element.clone(),
            },
            Self::Timeout { ms, waited_for } => Self::Timeout {
                ms: *ms,
                waited_for: waited_for.clone(),
            },
            Self::TestTimeout { name, ms } => Self::TestTimeout {
                name: name.clone(),
                ms: *ms,
            },
            Self::HandlerTimeout { event, ms } => Self::HandlerTimeout {
                event: event.clone(),
                ms: *ms,
            },
            Self::ChannelClosed { reason } => Self::ChannelClosed {
                reason: reason.clone(),
            },
            Self::AssertionFailed { message } => Self::AssertionFailed {
                message: message.clone(),
            },
            Self::Cancelled { reason } => Self::Cancelled {
                reason: reason.clone(),
            },
            Self::Navigation { url, message } => Self::Navigation {
                url: url.clone(),
                message: message.clone(),
            },
            Self::Protocol { message } => Self::Protocol {
                message: message.clone(),
            },
            Self::Fixture { message } => Self::Fixture {
                message: message.clone(),
            },
            Self::Http { message } => Self::Http {
                message: message.clone(),
            },
            Self::Config { message } => Self::Config {
                message: message.clone(),
            },
            Self::Panic { message } => Self::Panic {
                message: message.clone(),
            },
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::Protocol {
                message: format!("JSON error: {e}"),
            },
            Self::Yaml(e) => Self::Config {
                message: format!("YAML error: {e}"),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod kind_tests {
        use super::*;

        #[test]
        fn test_kind_matches_variant() {
            let err = EnsayoError::ElementNotFound {
                selector: "#missing".to_string(),
                timeout_ms: 500,
            };
            assert_eq!(err.kind(), ErrorKind::ElementNotFound);

            let err = EnsayoError::AssertionFailed {
                message: "x".to_string(),
            };
            assert_eq!(err.kind(), ErrorKind::AssertionFailure);
        }

        #[test]
        fn test_kind_serializes_snake_case() {
            let json = serde_json::to_string(&ErrorKind::HandlerTimeout).unwrap();
            assert_eq!(json, "\"handler_timeout\"");
        }

        #[test]
        fn test_io_errors_convert() {
            let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
            let err: EnsayoError = io.into();
            assert_eq!(err.kind(), ErrorKind::Io);
        }
    }

    mod classification_tests {
        use super::*;

        #[test]
        fn test_resolution_errors_are_retryable() {
            assert!(EnsayoError::AmbiguousMatch {
                selector: "li".to_string(),
                count: 3,
            }
            .is_retryable());
            assert!(!EnsayoError::ChannelClosed {
                reason: "exit".to_string(),
            }
            .is_retryable());
        }

        #[test]
        fn test_channel_closed_is_fatal() {
            assert!(EnsayoError::ChannelClosed {
                reason: "exit".to_string(),
            }
            .is_fatal());
            assert!(!EnsayoError::Timeout {
                ms: 1,
                waited_for: "x".to_string(),
            }
            .is_fatal());
        }

        #[test]
        fn test_display_names_selector_and_timeout() {
            let err = EnsayoError::ElementNotFound {
                selector: "button:has-text(\"Enable\")".to_string(),
                timeout_ms: 5000,
            };
            let text = err.to_string();
            assert!(text.contains("Enable"));
            assert!(text.contains("5000ms"));
        }

        #[test]
        fn test_duplicate_keeps_fields() {
            let err = EnsayoError::TestTimeout {
                name: "slow".to_string(),
                ms: 10,
            };
            assert_eq!(err.duplicate().to_string(), err.to_string());
        }
    }
}
