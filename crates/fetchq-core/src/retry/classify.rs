//! Classify fetch failures into permanent vs transient.

use crate::fetch::FetchFailure;

/// Failure kind as reported by the fetch operation.
///
/// Fetchers map their own errors (process exit, HTTP status, IO) into these;
/// the classifier decides what they mean for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out.
    Timeout,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// Content is known to be gone or restricted.
    Unavailable,
    /// Anything else.
    Other,
}

/// What a failure means for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Do not retry; the job fails immediately.
    Permanent,
    /// Go through the backoff path.
    Transient,
}

/// Pluggable predicate deciding whether a fetch failure is permanent.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, failure: &FetchFailure) -> FailureClass;
}

impl<F> FailureClassifier for F
where
    F: Fn(&FetchFailure) -> FailureClass + Send + Sync,
{
    fn classify(&self, failure: &FetchFailure) -> FailureClass {
        self(failure)
    }
}

/// Default classifier: `Unavailable` failures are permanent, as is any
/// message containing one of the configured patterns (case-insensitive).
/// Everything else is transient.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    patterns: Vec<String>,
}

impl PatternClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }
}

impl FailureClassifier for PatternClassifier {
    fn classify(&self, failure: &FetchFailure) -> FailureClass {
        if failure.kind == ErrorKind::Unavailable {
            return FailureClass::Permanent;
        }
        let message = failure.message.to_lowercase();
        if self.patterns.iter().any(|p| message.contains(p.as_str())) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }
}
