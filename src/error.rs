/// Error taxonomy for the analysis/transform pipeline. Analyses fail fast
/// and leave the module unchanged beyond already-applied sub-rewrites;
/// transforms are transactional at pass granularity (the caller discards the
/// module on error). DCE and peephole never produce an `Error`: unknown
/// opcodes are conservatively preserved rather than rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Layout inference could not satisfy `num_warps` or a shape
    /// divisibility constraint.
    #[error("config error: {0}")]
    Config(String),
    /// An IR consistency invariant was violated (mismatched shapes, bad
    /// permutation, reshape not volume-preserving).
    #[error("shape error: {0}")]
    Shape(String),
    /// An internal assertion failed (e.g. an unexpected terminator while
    /// detecting a loop latch).
    #[error("invariant error: {0}")]
    Invariant(String),
    /// An IR instruction kind is not yet handled by this pass.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
