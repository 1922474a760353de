//! Mesh provider interface and in-memory polyhedral meshes.
//!
//! The reconstruction only consumes meshes through [`MeshProvider`]:
//! owner/neighbour face topology, face vertex loops, cell centroids and
//! volumes, processor patches and the local → global cell numbering.

pub mod decompose;
pub mod global_view;
pub mod meshgen;
pub mod poly_mesh;

pub use decompose::{decompose, decompose_slabs};
pub use global_view::GlobalMeshView;
pub use meshgen::{hex_box, hex_box_2d};
pub use poly_mesh::PolyMesh;

use crate::geometry::shape::{self, CellShape};
use crate::weno_error::WenoError;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mesh-wide cell identifier, dense in `0..N` over all ranks.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GlobalCellId(u64);

impl GlobalCellId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        GlobalCellId(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Position in a dense per-mesh array.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for GlobalCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalCellId").field(&self.0).finish()
    }
}

impl fmt::Display for GlobalCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for GlobalCellId {
    fn from(raw: usize) -> Self {
        GlobalCellId(raw as u64)
    }
}

/// `GlobalCellId` travels over MPI as a plain `u64`.
#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for GlobalCellId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

/// Faces shared with one neighbouring rank.
///
/// Both ranks list the shared faces in the same geometric order; the owner
/// of every processor face is the local cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorPatch {
    pub neighbour_rank: usize,
    pub faces: Vec<usize>,
}

/// Read-only view of one rank's piece of an unstructured polyhedral mesh.
pub trait MeshProvider {
    fn n_cells(&self) -> usize;
    fn n_faces(&self) -> usize;
    fn points(&self) -> &[Point3<f64>];
    /// Vertex loop of a face; its right-hand normal points out of the owner.
    fn face_vertices(&self, face: usize) -> &[usize];
    fn face_owner(&self, face: usize) -> usize;
    /// Neighbour cell of an internal face; `None` on boundary and processor faces.
    fn face_neighbour(&self, face: usize) -> Option<usize>;
    fn cell_faces(&self, cell: usize) -> &[usize];
    fn cell_centroid(&self, cell: usize) -> Point3<f64>;
    fn cell_volume(&self, cell: usize) -> f64;
    fn processor_patches(&self) -> &[ProcessorPatch];
    fn global_cell_id(&self, cell: usize) -> GlobalCellId;

    /// Axis along which a 2-D mesh is extruded one cell deep.
    fn empty_direction(&self) -> Option<usize> {
        None
    }

    fn face_points(&self, face: usize) -> Vec<Point3<f64>> {
        let pts = self.points();
        self.face_vertices(face).iter().map(|&v| pts[v]).collect()
    }

    fn face_centre(&self, face: usize) -> Point3<f64> {
        shape::face_centre(&self.face_points(face))
    }

    /// Area-weighted normal, pointing out of the owner.
    fn face_area_vector(&self, face: usize) -> Vector3<f64> {
        shape::area_vector(&self.face_points(face))
    }

    fn cell_shape(&self, cell: usize) -> Result<CellShape, WenoError> {
        CellShape::new(
            self.cell_faces(cell)
                .iter()
                .map(|&f| self.face_points(f))
                .collect(),
        )
    }

    /// Cells across the internal faces of `cell`, in face order.
    fn cell_neighbours(&self, cell: usize) -> Vec<usize> {
        self.cell_faces(cell)
            .iter()
            .filter_map(|&f| {
                let nb = self.face_neighbour(f)?;
                Some(if nb == cell { self.face_owner(f) } else { nb })
            })
            .collect()
    }
}
