use std::fmt;
use std::time::Duration;

/// Boxed error type carried across the provider interfaces.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Verdicts produced by throttlers.
///
/// Errors are plain values: cloneable so verdicts can be memoized and
/// comparable so policies can be table-tested. Foreign errors surfacing from
/// providers keep their display text in [`Error::Provider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An accepted-count ceiling was hit.
    #[error("admission ceiling exceeded at {count}")]
    Exceeded { count: u64 },

    /// The in-flight limit was hit.
    #[error("in-flight limit exceeded at {running}")]
    Saturated { running: u64 },

    /// A tracked latency sample sits above the configured maximum.
    #[error("latency threshold exceeded at {observed:?}")]
    LatencyExceeded { observed: Duration },

    /// A resource usage snapshot met a configured threshold.
    #[error("resource stats exceeded configured thresholds")]
    StatsExceeded,

    /// The watched binary metric fired.
    #[error("binary metric has tripped")]
    MetricTripped,

    /// The pass threshold has not been reached yet.
    #[error("admission threshold not reached yet at {count}")]
    NotReached { count: u64 },

    /// The call landed on a periodic skip slot.
    #[error("periodic skip at {count}")]
    PeriodicSkip { count: u64 },

    /// Release without a matching successful acquire.
    #[error("nothing to release")]
    NothingToRelease,

    /// The context carries no key attribute, or no route matched it.
    #[error("no matching key attribute in context")]
    MissingKey,

    /// The context carries no payload attribute.
    #[error("no payload attribute in context")]
    MissingPayload,

    /// The context carries no marshaler attribute.
    #[error("no marshaler attribute in context")]
    MissingMarshaler,

    /// The call's cancellation token fired.
    #[error("call was cancelled")]
    Cancelled,

    /// The random draw rejected the call.
    #[error("chance draw rejected the call")]
    ChanceMissed,

    /// An inverting combinator saw its child pass.
    #[error("inverted verdict: child throttler passed")]
    Inverted,

    /// Dispatch over an empty ring.
    #[error("ring has no throttlers")]
    EmptyRing,

    /// A stats, metric, enqueue, or marshal collaborator failed.
    #[error("provider failed: {0}")]
    Provider(String),

    /// Verdicts aggregated by a combinator, every component preserved.
    #[error("aggregated throttler errors [{0}]")]
    Composite(Aggregate),
}

impl Error {
    /// Wraps a foreign error, keeping its display text.
    pub fn provider(err: impl fmt::Display) -> Self {
        Error::Provider(err.to_string())
    }
}

/// An ordered collection of component errors behind [`Error::Composite`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregate(pub Vec<Error>);

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, err) in self.0.iter().enumerate() {
            if pos > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl From<Vec<Error>> for Aggregate {
    fn from(errors: Vec<Error>) -> Self {
        Self(errors)
    }
}
