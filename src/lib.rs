#![cfg_attr(docsrs, feature(doc_cfg))]
//! # weno-stencil
//!
//! Stencil construction and reconstruction-matrix management for WENO
//! (Weighted Essentially Non-Oscillatory) reconstruction on distributed
//! unstructured polyhedral meshes.
//!
//! ## Features
//! - Breadth-first stencil growth over a gathered global mesh image, with
//!   optional sectorial splitting and halo bookkeeping across ranks
//! - Exact monomial volume integrals over arbitrary polyhedra in per-cell
//!   reference frames, plus face quadrature and smoothness matrices
//! - Least-squares pseudo-inverses with an optional best-conditioned row
//!   search, deduplicated through an approximate-matching matrix store
//! - Per-rank persistence of the whole precomputed state
//! - Pluggable communication backends (serial, in-process, MPI)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! weno-stencil = "0.3"
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```rust
//! use weno_stencil::prelude::*;
//!
//! let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
//! let config = ReconstructionConfig {
//!     polynomial_order: 1,
//!     split: SplitPolicy::Never,
//!     ..Default::default()
//! };
//! let scheme = ReconstructionScheme::setup(&mesh, &config, &NoComm).unwrap();
//! assert_eq!(scheme.dof_count(), 3);
//! ```

pub mod algs;
pub mod config;
pub mod evaluator;
pub mod geometry;
pub mod io;
pub mod matrix;
pub mod mesh;
pub mod reconstruction;
pub mod stencil;
pub mod weno_error;

pub use weno_error::WenoError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{MatrixCacheConfig, ReconstructionConfig, SplitPolicy};
    pub use crate::evaluator::{HaloValues, ReconstructionEvaluator, WenoWeights};
    pub use crate::geometry::{DegreeSet, IntegralTable, ReferenceFrame};
    pub use crate::matrix::{MatrixCache, MatrixHandle};
    pub use crate::mesh::{GlobalCellId, GlobalMeshView, MeshProvider, PolyMesh, hex_box, hex_box_2d};
    pub use crate::reconstruction::{FaceNeighbour, ReconstructionScheme};
    pub use crate::stencil::{CellSource, HaloPlan, Stencil, StencilKind};
    pub use crate::weno_error::WenoError;
}
