
//! Error kinds raised by the presence store, filter pipeline, association builder
//! and cluster engine.
//!
//! Configuration errors (bad resolution, rank list or parameter) are raised before any
//! computation starts. Data-consistency errors (corrupt or internally inconsistent
//! stores, incompatible sketches) are raised instead of continuing with partial data.

use thiserror::Error;

use crate::sketch::ItemHash;

#[derive(Debug, Error)]
pub enum Error {
    /// Downsampling was asked to refine the resolution.
    #[error("cannot downsample to scaled={requested}: current scaled is {current}")]
    InvalidResolution {
        current: u64,
        requested: u64,
    },

    /// Pangenome rank outside the range [1, 5].
    #[error("invalid pangenome rank {0}: must be in the range [1, 5]")]
    InvalidRank(i64),

    /// Category filter given without any ranks.
    #[error("pangenome rank list must not be empty")]
    EmptyRankList,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },

    /// Serialized store has an unexpected byte layout or type tag.
    #[error("corrupt presence store: {0}")]
    CorruptStore(String),

    /// Store contents violate a presence store invariant.
    #[error("inconsistent presence data: {0}")]
    InconsistentData(String),

    /// Hash has an empty presence set.
    #[error("hash {0} has no observing samples")]
    EmptyPresence(ItemHash),

    /// Sketch cannot be combined with the store being built.
    #[error("sketch '{name}' is incompatible: {reason}")]
    IncompatibleSketch {
        name: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
