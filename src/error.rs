use thiserror::Error;

/// Domain errors surfaced from engine construction and invocation.
///
/// Worker threads never propagate failures directly; anything that goes
/// wrong inside the parallel region is logged and converted into
/// cancellation, so these errors only emerge from top-level calls.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid modification motif `{0}`")]
    InvalidMotif(String),

    #[error("unknown modification `{0}` in file-specific parameters")]
    UnknownModification(String),

    #[error("unknown protease `{0}` in file-specific parameters")]
    UnknownProtease(String),

    #[error("no precursor tolerance registered for file `{0}`")]
    MissingFileTolerance(String),

    #[error("match slab has {got} slots but the scan collection has {expected} scans")]
    SlabLengthMismatch { got: usize, expected: usize },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}
