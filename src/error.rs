use std::path::PathBuf;

/// All the ways a dump can fail. The first failure aborts the current edit and
/// bubbles up to the caller; there are no in-editor retries.
///
/// Callback-ordering violations by the driver are not represented here - those
/// are bugs in the driver and panic instead (see the editor contract).
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// Writing to the output stream or a scratch file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A scratch file for a buffered text delta could not be created.
    #[error("failed to create scratch file in {dir:?}: {source}")]
    Scratch {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// The URL names a scheme we have no transport for.
    #[error("no transport available for '{0}' URLs")]
    UnsupportedScheme(String),

    /// A recorded edit stream could not be decoded.
    #[error("malformed recorded history: {0}")]
    Recording(#[from] bincode::Error),

    /// The requested revision range does not exist on the server.
    #[error("revision range {lower}:{upper} is outside the repository history (latest is {latest})")]
    RangeOutOfHistory {
        lower: u64,
        upper: u64,
        latest: u64,
    },
}
