//! Whanau error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core whanau error type. This type is used in all external
/// whanau apis as well as internally in the core modules.
///
/// The outcome-code variants correspond to the wire error codes of the
/// rpc surface. This type is required to implement `Clone` to ease the
/// use of shared futures, which require the entire `Result` to be
/// `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WhError {
    /// The requested key is not known to the responder. This is a
    /// normal outcome of lookups and reads, not a fault.
    #[error("no such key")]
    NoKey,

    /// A random walk could not be completed.
    #[error("walk failed: {ctx}")]
    WalkErr {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// An rpc did not complete within its deadline, or the peer is
    /// unreachable. Transient; callers absorb this by over-sampling.
    #[error("timeout: {ctx}")]
    Timeout {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// A signed record did not verify under its claimed public key.
    /// Never absorbed; surfaced to the client as a distinct result.
    #[error("bad signature")]
    BadSignature,

    /// A claimed public key could not be parsed.
    #[error("malformed public key")]
    MalformedKey,

    /// The responder could not make progress (e.g. a consensus round
    /// lost to a competing ballot, or no majority was reachable).
    #[error("busy: {ctx}")]
    Busy {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// Generic whanau internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl WhError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a walk error.
    pub fn walk<C: std::fmt::Display>(ctx: C) -> Self {
        Self::WalkErr {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a timeout error.
    pub fn timeout<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Timeout {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a busy error.
    pub fn busy<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Busy {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// `true` if this error is transient and may be absorbed by
    /// taking additional samples or retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WhError::WalkErr { .. }
                | WhError::Timeout { .. }
                | WhError::Busy { .. }
        )
    }
}

/// The core whanau result type.
pub type WhResult<T> = Result<T, WhError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "bla (src: None)",
            WhError::other("bla").to_string().as_str(),
        );
        assert_eq!(
            "foo (src: bar)",
            WhError::other_src("foo", std::io::Error::other("bar"))
                .to_string()
                .as_str(),
        );
        assert_eq!("no such key", WhError::NoKey.to_string().as_str());
        assert_eq!(
            "walk failed: dead end",
            WhError::walk("dead end").to_string().as_str(),
        );
    }

    #[test]
    fn transient_classification() {
        assert!(WhError::walk("x").is_transient());
        assert!(WhError::timeout("x").is_transient());
        assert!(WhError::busy("x").is_transient());
        assert!(!WhError::BadSignature.is_transient());
        assert!(!WhError::NoKey.is_transient());
        assert!(!WhError::other("x").is_transient());
    }

    #[test]
    fn ensure_wherror_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync>(_t: T) {}
        ensure(WhError::other("bla"));
    }
}
