//! WenoError: unified error type for weno-stencil public APIs
//!
//! Every setup failure is a configuration error: it is surfaced immediately,
//! setup aborts and no partially built scheme is ever handed to the evaluator.

use crate::mesh::GlobalCellId;
use thiserror::Error;

/// Unified error type for stencil construction and matrix assembly.
#[derive(Debug, Error)]
pub enum WenoError {
    /// A cell is too degenerate to build a reference frame, or no
    /// pseudo-inverse candidate of one of its stencils has a usable rank.
    #[error("geometry failure at cell {cell}: {reason}")]
    GeometryFailure { cell: GlobalCellId, reason: String },
    /// Stencil growth exhausted the mesh connectivity before reaching the
    /// required size; the mesh is too coarse for the polynomial order.
    #[error("stencil growth failure at cell {cell}: reached {reached} of {required} cells")]
    StencilGrowthFailure {
        cell: GlobalCellId,
        reached: usize,
        required: usize,
    },
    /// The distributed mesh state is inconsistent (unknown global cell,
    /// wrong owner, unmatched processor face, ...).
    #[error("distributed consistency failure: {0}")]
    DistributedConsistency(String),
    /// Another rank failed a setup phase; its own error is reported there.
    #[error("rank {rank} failed during {phase}")]
    PeerFailure { rank: usize, phase: String },
    /// Persisted state does not belong to the current mesh/configuration.
    #[error("persisted state mismatch: {0}")]
    PersistenceFormatMismatch(String),
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A field handed to the evaluator does not have one value per local cell.
    #[error("field has {got} values, expected {expected}")]
    FieldLength { expected: usize, got: usize },
    /// Mesh connectivity or geometry that the provider should never produce.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    /// Communication with a neighbor rank failed or returned malformed data.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Encoding or decoding of a payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WenoError {
    pub(crate) fn comm(neighbor: usize, message: impl Into<String>) -> Self {
        WenoError::CommError {
            neighbor,
            source: message.into().into(),
        }
    }
}

impl From<bincode::Error> for WenoError {
    fn from(err: bincode::Error) -> Self {
        WenoError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for WenoError {
    fn from(err: serde_json::Error) -> Self {
        WenoError::Serialization(err.to_string())
    }
}
