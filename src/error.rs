//! Error kinds raised by the band-structure core.
//!
//! Commands propagate these through `anyhow`; the variants stay typed so callers can
//! match on them (e.g. skip the k-path transform after a failed unfolding).

use thiserror::Error;


#[derive(Error, Debug, Clone, PartialEq)]
pub enum EbsError {
    #[error("Unsupported mode {0:?}, available modes: {1}")]
    UnsupportedMode(String, &'static str),

    #[error("{axis} index {index} out of range, only {len} available")]
    IndexOutOfRange {
        axis: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Invalid transformation matrix: {0}")]
    InvalidTransform(String),

    #[error("Structure is not commensurate with the transformation matrix: {0}")]
    IncommensurateStructure(String),

    #[error("Inconsistent array shapes: {0}")]
    ShapeMismatch(String),

    #[error("`{0}` has already been applied to this band structure")]
    TransformAlreadyApplied(&'static str),

    #[error("This operation requires a k-path, but none is attached")]
    MissingKPath,
}


pub type EbsResult<T> = std::result::Result<T, EbsError>;
