//! Geometry engine for polynomial reconstruction.
//!
//! Pure functions over cell shapes: reference frames, exact volume integrals
//! of monomials, their change of frame, face quadrature and smoothness
//! matrices. Nothing here holds shared mutable state, so per-cell work may
//! run in any order or in parallel.

pub mod degrees;
pub mod frame;
pub mod integrals;
pub mod quadrature;
pub mod shape;
pub mod smoothness;

pub use degrees::{DegreeSet, IntegralTable, dof_count, triples};
pub use frame::{DegenerateFrame, ReferenceFrame, compute_jacobian, transform_point};
pub use integrals::{transform_integral, volume_integrals};
pub use quadrature::{SideIntegrals, SurfaceIntegralPair, gauss_legendre, surface_integrals};
pub use shape::CellShape;
pub use smoothness::oscillation_matrix;
