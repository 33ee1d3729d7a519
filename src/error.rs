//! Error types for the update orchestrator.

/// Errors produced by an update run.
///
/// Each variant is one phase of the run. [`UpdateError::Cancel`] marks a run the
/// user declined (snooze or cancel); it is returned to the caller but never
/// handed to the reporting hook.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The update source could not be queried.
    #[error("find error: {0}")]
    Find(String),

    /// The host prompt failed or returned nothing usable.
    #[error("prompt error: {0}")]
    Prompt(String),

    /// Network, HTTP status, or digest failure while fetching the asset.
    #[error("download error: {0}")]
    Download(String),

    /// The host trust check rejected the downloaded asset.
    #[error("verify error: {0}")]
    Verify(String),

    /// A before-apply, apply, or after-apply hook failed.
    #[error("apply error: {0}")]
    Apply(String),

    /// Persisting configuration failed.
    #[error("config error: {0}")]
    Config(String),

    /// The user declined the update.
    #[error("cancel: {0}")]
    Cancel(String),
}

impl UpdateError {
    /// Short, stable name of the error kind, suitable for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Find(_) => "find",
            Self::Prompt(_) => "prompt",
            Self::Download(_) => "download",
            Self::Verify(_) => "verify",
            Self::Apply(_) => "apply",
            Self::Config(_) => "config",
            Self::Cancel(_) => "cancel",
        }
    }

    /// Returns `true` for user-declined runs.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
