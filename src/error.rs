use crate::scope::ScopeKind;

/// Classification of embedding provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Provider endpoint not reachable.
    Unavailable,
    /// Provider call exceeded its deadline.
    Timeout,
    /// Provider responded with something we could not use.
    Malformed,
}

/// All errors that can occur in engram.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: '{id}' in {scope} scope")]
    NotFound { id: String, scope: String },

    #[error("already exists: '{id}' in {scope} scope")]
    AlreadyExists { id: String, scope: String },

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("provider error ({}): {message}", kind_str(.kind))]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("scope unavailable: {0}")]
    Unavailable(ScopeKind),

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

fn kind_str(kind: &ProviderErrorKind) -> &'static str {
    match kind {
        ProviderErrorKind::Unavailable => "unavailable",
        ProviderErrorKind::Timeout => "timeout",
        ProviderErrorKind::Malformed => "malformed",
    }
}

impl Error {
    /// Shorthand for a NotFound error scoped to one scope.
    pub fn not_found(id: impl Into<String>, scope: ScopeKind) -> Self {
        Self::NotFound {
            id: id.into(),
            scope: scope.to_string(),
        }
    }

    /// Shorthand for a NotFound error after a cross-scope scan.
    pub fn not_found_anywhere(id: impl Into<String>) -> Self {
        Self::NotFound {
            id: id.into(),
            scope: "any".to_string(),
        }
    }

    /// Stable kind string carried in the JSON envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Invalid(_) => "invalid",
            Self::Conflict(_) => "conflict",
            Self::Io(_) => "io",
            Self::Parse { .. } => "parse",
            Self::Provider { kind, .. } => match kind {
                ProviderErrorKind::Unavailable => "provider_unavailable",
                ProviderErrorKind::Timeout => "provider_timeout",
                ProviderErrorKind::Malformed => "provider_malformed",
            },
            Self::Unavailable(_) => "unavailable",
            Self::Logging(_) => "logging",
        }
    }

    /// Shorthand for a provider error of the given kind.
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn not_found_variant_formats() {
        let err = Error::not_found("learning-foo", ScopeKind::Project);
        assert_eq!(err.to_string(), "not found: 'learning-foo' in project scope");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn not_found_anywhere_formats() {
        let err = Error::not_found_anywhere("learning-foo");
        assert_eq!(err.to_string(), "not found: 'learning-foo' in any scope");
    }

    #[test]
    fn already_exists_variant_formats() {
        let err = Error::AlreadyExists {
            id: "hub-index".into(),
            scope: ScopeKind::Global.to_string(),
        };
        assert!(err.to_string().contains("hub-index"));
        assert_eq!(err.kind(), "already_exists");
    }

    #[test]
    fn invalid_variant_formats() {
        let err = Error::Invalid("unknown type 'note'".into());
        assert_eq!(err.to_string(), "invalid: unknown type 'note'");
        assert_eq!(err.kind(), "invalid");
    }

    #[test]
    fn conflict_variant_formats() {
        let err = Error::Conflict("lease timeout after 5000ms".into());
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn io_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: Error = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn parse_variant_formats() {
        let err = Error::Parse {
            path: "permanent/learning-x.md".into(),
            message: "missing frontmatter".into(),
        };
        let s = err.to_string();
        assert!(s.contains("permanent/learning-x.md"));
        assert!(s.contains("missing frontmatter"));
    }

    #[test]
    fn provider_kinds_map_to_envelope_strings() {
        let timeout = Error::provider(ProviderErrorKind::Timeout, "deadline");
        assert_eq!(timeout.kind(), "provider_timeout");
        assert!(timeout.to_string().contains("timeout"));

        let unavailable = Error::provider(ProviderErrorKind::Unavailable, "refused");
        assert_eq!(unavailable.kind(), "provider_unavailable");

        let malformed = Error::provider(ProviderErrorKind::Malformed, "bad json");
        assert_eq!(malformed.kind(), "provider_malformed");
    }

    #[test]
    fn unavailable_variant_formats() {
        let err = Error::Unavailable(ScopeKind::Enterprise);
        assert_eq!(err.to_string(), "scope unavailable: enterprise");
        assert_eq!(err.kind(), "unavailable");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
