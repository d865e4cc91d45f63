//! Error classification.
//!
//! Maps an opaque failure into a [`Classification`] that the rest of the
//! crate uses to decide whether to retry, fall back, or trigger a recovery
//! workflow. The substring table is matched case-insensitively, in a fixed
//! priority order, so the same message always classifies the same way.

/// Broad failure category assigned by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Validation,
    Resource,
    Internal,
    External,
    Unknown,
}

/// Severity assigned alongside a [`Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable classification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub severity: Severity,
    pub retryable: bool,
    pub fallback_eligible: bool,
    pub requires_recovery: bool,
}

impl Classification {
    const fn new(
        category: Category,
        severity: Severity,
        retryable: bool,
        fallback_eligible: bool,
        requires_recovery: bool,
    ) -> Self {
        Self { category, severity, retryable, fallback_eligible, requires_recovery }
    }
}

/// Implemented by caller error types that already know their own
/// classification, letting them short-circuit the substring matcher below.
///
/// The default implementation returns `None`, which falls back to
/// [`classify`] on `Display`'s output.
pub trait Classifiable {
    fn classification(&self) -> Option<Classification> {
        None
    }
}

impl Classifiable for std::io::Error {}
impl Classifiable for Box<dyn std::error::Error + Send + Sync> {}

/// Classify an error by its own pre-built classification if present,
/// otherwise fall back to substring matching on its message.
pub fn classify_error<E>(error: &E) -> Classification
where
    E: Classifiable + std::fmt::Display,
{
    error.classification().unwrap_or_else(|| classify(&error.to_string()))
}

/// Classify a raw error message via case-insensitive substring matching.
///
/// Signals are evaluated in a fixed priority order; the first match wins.
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["network", "econnrefused", "enotfound", "etimedout"]) {
        return Classification::new(Category::Network, Severity::Medium, true, true, false);
    }
    if any(&["timeout", "timed out"]) {
        return Classification::new(Category::Timeout, Severity::Medium, true, true, false);
    }
    if any(&["rate limit", "too many requests", "429"]) {
        return Classification::new(Category::RateLimit, Severity::Low, true, false, false);
    }
    if any(&["unauthorized", "forbidden", "401", "403", "authentication"]) {
        return Classification::new(Category::Authentication, Severity::High, false, false, true);
    }
    if any(&["validation", "invalid", "bad request", "400"]) {
        return Classification::new(Category::Validation, Severity::Low, false, false, false);
    }
    if any(&["not found", "404", "resource", "memory", "disk"]) {
        return Classification::new(Category::Resource, Severity::Medium, false, true, false);
    }
    if any(&["internal", "500", "server error"]) {
        return Classification::new(Category::Internal, Severity::High, true, true, true);
    }
    if any(&["external", "third party", "api error"]) {
        return Classification::new(Category::External, Severity::Medium, true, true, false);
    }
    Classification::new(Category::Unknown, Severity::Medium, true, true, false)
}
