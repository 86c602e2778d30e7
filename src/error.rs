use std::io;

/// Error taxonomy for the IBS pipeline.
///
/// `Schema` and `Precondition` on a requested region are always fatal;
/// `OracleInvocation` is fatal or skippable depending on the orchestrator's
/// window-failure policy.
#[derive(thiserror::Error, Debug)]
pub enum IbsError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("oracle response is missing required column '{column}'")]
    Schema { column: String },

    #[error("invalid interval {chrom}:{start}-{end}: {reason}")]
    Precondition {
        chrom: String,
        start: u64,
        end: u64,
        reason: String,
    },

    #[error("oracle invocation failed for window {window}: {reason}")]
    OracleInvocation { window: String, reason: String },

    #[error("run cancelled before window {window}")]
    Cancelled { window: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IbsError {
    /// Whether the skip-and-continue window policy may absorb this error.
    /// Schema violations mean column identity cannot be trusted for any
    /// window, so they are never skippable.
    pub fn is_window_local(&self) -> bool {
        matches!(self, IbsError::OracleInvocation { .. })
    }
}
