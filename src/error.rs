use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the board, the desktop, or the visual probe.
///
/// The variant decides how far a failure propagates: transient errors retry on
/// the next cadence tick, element timeouts degrade a single item to missed,
/// and the remaining two end the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("board temporarily unavailable: {0}")]
    TransientSource(String),
    #[error("timed out after {waited_ms}ms waiting for {what}")]
    ElementTimeout { what: String, waited_ms: u64 },
    #[error("template {} could not be loaded: {reason}", path.display())]
    TemplateMissing { path: PathBuf, reason: String },
    #[error("board unreachable: {0}")]
    FatalSource(String),
}

impl ClaimError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClaimError::TemplateMissing { .. } | ClaimError::FatalSource(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClaimError::TransientSource(_))
    }
}

pub type ClaimResult<T> = Result<T, ClaimError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("keyword must not be empty")]
    EmptyKeyword,
    #[error("keyword '{0}' already exists")]
    DuplicateKeyword(String),
    #[error("keyword '{0}' is both included and excluded")]
    ContradictoryKeyword(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_propagation_policy() {
        assert!(ClaimError::TransientSource("502".into()).is_transient());
        assert!(!ClaimError::TransientSource("502".into()).is_fatal());

        let timeout = ClaimError::ElementTimeout {
            what: "comment box".into(),
            waited_ms: 5000,
        };
        assert!(!timeout.is_fatal());
        assert!(!timeout.is_transient());

        assert!(ClaimError::FatalSource("dns".into()).is_fatal());
        assert!(ClaimError::TemplateMissing {
            path: PathBuf::from("files/conflict.png"),
            reason: "not found".into(),
        }
        .is_fatal());
    }

    #[test]
    fn messages_name_the_failing_piece() {
        let err = ClaimError::TemplateMissing {
            path: PathBuf::from("files/conflict.png"),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "template files/conflict.png could not be loaded: not found"
        );
    }
}
