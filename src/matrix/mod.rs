//! Reconstruction matrices: least-squares assembly and the shared store of
//! canonical matrices.

pub mod assembler;
pub mod cache;

pub use assembler::{AssembledStencil, MatrixAssembler};
pub use cache::{CacheStats, MatrixCache, MatrixHandle, matrix_key};
