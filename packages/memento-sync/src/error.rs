//! Sync Coordinator error model (§7): six tagged kinds, each mapped onto a
//! retry-or-surface decision the coordinator — and only the coordinator — makes.

use thiserror::Error;

/// The six tagged error kinds named by §7, carried as data rather than exception
/// hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Non-fatal; attached to the `File` entity's `metadata.parseErrors`, prior
    /// good state preserved.
    ParseError,
    /// Transient; retried with backoff; dead-lettered after max attempts.
    StoreUnavailable,
    /// Data-integrity violation; fatal for the change, no rollback needed because
    /// commit never proceeded.
    StoreConstraint,
    /// Non-fatal for graph writes; the vector entry is marked `needsEmbed=true`
    /// and retried on the next pass.
    EmbedFailed,
    /// Not an error — the pipeline unwinds cleanly.
    CancellationRequested,
    /// Fatal; aborts the pipeline; no partial commit is retained.
    InvariantViolation,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::ParseError => "parse_error",
            SyncErrorKind::StoreUnavailable => "store_unavailable",
            SyncErrorKind::StoreConstraint => "store_constraint",
            SyncErrorKind::EmbedFailed => "embed_failed",
            SyncErrorKind::CancellationRequested => "cancellation_requested",
            SyncErrorKind::InvariantViolation => "invariant_violation",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> SyncErrorKind {
        self.kind
    }

    /// Whether the coordinator should schedule a backoff retry rather than
    /// surface the failure immediately (§9's exponential-backoff policy applies
    /// only to this set).
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, SyncErrorKind::StoreUnavailable)
    }
}

impl From<memento_storage::error::StorageError> for SyncError {
    fn from(err: memento_storage::error::StorageError) -> Self {
        let kind = if err.kind.is_transient() { SyncErrorKind::StoreUnavailable } else { SyncErrorKind::StoreConstraint };
        SyncError::new(kind, err.to_string())
    }
}

impl From<memento_ir::Error> for SyncError {
    fn from(err: memento_ir::Error) -> Self {
        SyncError::new(SyncErrorKind::ParseError, err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::new(SyncErrorKind::StoreUnavailable, format!("io error: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_retryable() {
        let err = SyncError::new(SyncErrorKind::StoreUnavailable, "connection reset");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invariant_violation_is_not_retryable() {
        let err = SyncError::new(SyncErrorKind::InvariantViolation, "canonical id mismatch");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = SyncError::new(SyncErrorKind::ParseError, "unexpected token");
        assert_eq!(format!("{err}"), "[parse_error] unexpected token");
    }
}
