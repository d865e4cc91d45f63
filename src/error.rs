//! Unified error type threaded through every resilience layer.

use std::fmt;
use std::time::Duration;

/// Errors observable by a caller of any resilience layer in this crate.
///
/// Retry and breaker layers re-raise inner errors unchanged to preserve
/// caller classification; only the fallback chain introduces a synthetic
/// message, and only after exhausting every candidate (see module docs on
/// `fallback`).
#[derive(Debug)]
pub enum CoreError<E> {
    /// The wrapped operation's own error, unchanged. Surfaced as-is both
    /// when an error isn't retryable and when the retry engine exhausts
    /// its attempts — the retry engine never wraps it.
    Inner(E),
    /// The circuit breaker for `key` is open and failed the call fast.
    CircuitOpen { key: String, failure_count: usize, retry_after: Duration },
    /// Every candidate in a fallback chain was skipped or failed.
    FallbacksExhausted { primary_message: String },
}

impl<E: Clone> Clone for CoreError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Inner(e) => Self::Inner(e.clone()),
            Self::CircuitOpen { key, failure_count, retry_after } => {
                Self::CircuitOpen { key: key.clone(), failure_count: *failure_count, retry_after: *retry_after }
            }
            Self::FallbacksExhausted { primary_message } => {
                Self::FallbacksExhausted { primary_message: primary_message.clone() }
            }
        }
    }
}

impl<E: fmt::Display> fmt::Display for CoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{e}"),
            Self::CircuitOpen { failure_count: _, retry_after, .. } => {
                let secs = (retry_after.as_millis() + 999) / 1000;
                write!(f, "Circuit breaker is open. Service unavailable. Retry in {secs}s")
            }
            Self::FallbacksExhausted { primary_message } => {
                write!(f, "All fallbacks exhausted. Primary error: {primary_message}")
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CoreError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> CoreError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_fallbacks_exhausted(&self) -> bool {
        matches!(self, Self::FallbacksExhausted { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for DummyError {}

    #[test]
    fn circuit_open_message_matches_wire_contract() {
        let err: CoreError<io::Error> =
            CoreError::CircuitOpen { key: "svc".into(), failure_count: 5, retry_after: Duration::from_millis(2500) };
        assert_eq!(err.to_string(), "Circuit breaker is open. Service unavailable. Retry in 3s");
    }

    #[test]
    fn circuit_open_rounds_up_partial_seconds() {
        let err: CoreError<io::Error> =
            CoreError::CircuitOpen { key: "svc".into(), failure_count: 1, retry_after: Duration::from_millis(1) };
        assert_eq!(err.to_string(), "Circuit breaker is open. Service unavailable. Retry in 1s");
    }

    #[test]
    fn fallbacks_exhausted_message_matches_wire_contract() {
        let err: CoreError<DummyError> =
            CoreError::FallbacksExhausted { primary_message: "boom".into() };
        assert_eq!(err.to_string(), "All fallbacks exhausted. Primary error: boom");
    }

    #[test]
    fn inner_is_reraised_unchanged() {
        let err: CoreError<DummyError> = CoreError::Inner(DummyError("specific"));
        assert_eq!(err.to_string(), "specific");
        assert_eq!(err.into_inner(), Some(DummyError("specific")));
    }

    #[test]
    fn source_returns_the_inner_error() {
        let err: CoreError<DummyError> = CoreError::Inner(DummyError("a"));
        assert_eq!(err.source().unwrap().to_string(), "a");
    }

    #[test]
    fn predicates_cover_all_variants() {
        let open: CoreError<DummyError> =
            CoreError::CircuitOpen { key: "k".into(), failure_count: 1, retry_after: Duration::from_secs(1) };
        assert!(open.is_circuit_open());

        let fallbacks: CoreError<DummyError> =
            CoreError::FallbacksExhausted { primary_message: "x".into() };
        assert!(fallbacks.is_fallbacks_exhausted());

        let inner: CoreError<DummyError> = CoreError::Inner(DummyError("x"));
        assert!(inner.is_inner());
    }
}
