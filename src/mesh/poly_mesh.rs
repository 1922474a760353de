//! Face-based polyhedral mesh held in memory.

use crate::geometry::frame::ReferenceFrame;
use crate::geometry::integrals::volume_integrals;
use crate::mesh::{GlobalCellId, MeshProvider, ProcessorPatch};
use crate::weno_error::WenoError;
use nalgebra::Point3;
use std::collections::BTreeSet;

/// Owner/neighbour polyhedral mesh.
///
/// Centroids and volumes are integrated exactly from the face loops when the
/// mesh is built, so generated and decomposed meshes agree bit for bit on
/// every rank.
#[derive(Clone, Debug)]
pub struct PolyMesh {
    points: Vec<Point3<f64>>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<Option<usize>>,
    cell_faces: Vec<Vec<usize>>,
    centroids: Vec<Point3<f64>>,
    volumes: Vec<f64>,
    patches: Vec<ProcessorPatch>,
    global_ids: Vec<GlobalCellId>,
    empty_direction: Option<usize>,
}

impl PolyMesh {
    /// Build a serial mesh; global ids equal local ids.
    pub fn new(
        points: Vec<Point3<f64>>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<Option<usize>>,
    ) -> Result<Self, WenoError> {
        if faces.len() != owner.len() || faces.len() != neighbour.len() {
            return Err(WenoError::InvalidMesh(format!(
                "{} faces but {} owners and {} neighbours",
                faces.len(),
                owner.len(),
                neighbour.len()
            )));
        }
        for (f, verts) in faces.iter().enumerate() {
            if verts.len() < 3 {
                return Err(WenoError::InvalidMesh(format!("face {f} has {} vertices", verts.len())));
            }
            if let Some(&v) = verts.iter().find(|&&v| v >= points.len()) {
                return Err(WenoError::InvalidMesh(format!("face {f} references missing point {v}")));
            }
            if neighbour[f] == Some(owner[f]) {
                return Err(WenoError::InvalidMesh(format!("face {f} has the same cell on both sides")));
            }
        }

        let n_cells = owner
            .iter()
            .chain(neighbour.iter().flatten())
            .max()
            .map_or(0, |&c| c + 1);
        let mut cell_faces = vec![Vec::new(); n_cells];
        for (f, &o) in owner.iter().enumerate() {
            cell_faces[o].push(f);
            if let Some(n) = neighbour[f] {
                cell_faces[n].push(f);
            }
        }

        let mut mesh = Self {
            points,
            faces,
            owner,
            neighbour,
            cell_faces,
            centroids: Vec::with_capacity(n_cells),
            volumes: Vec::with_capacity(n_cells),
            patches: Vec::new(),
            global_ids: (0..n_cells).map(GlobalCellId::from).collect(),
            empty_direction: None,
        };
        for cell in 0..n_cells {
            let table = volume_integrals(&mesh.cell_shape(cell)?, 1, &ReferenceFrame::identity());
            let volume = table.volume();
            if !(volume.is_finite() && volume > 0.0) {
                return Err(WenoError::InvalidMesh(format!(
                    "cell {cell} has non-positive volume {volume}"
                )));
            }
            mesh.volumes.push(volume);
            mesh.centroids.push(Point3::new(
                table.get(1, 0, 0) / volume,
                table.get(0, 1, 0) / volume,
                table.get(0, 0, 1) / volume,
            ));
        }
        Ok(mesh)
    }

    pub fn with_global_ids(mut self, ids: Vec<GlobalCellId>) -> Result<Self, WenoError> {
        if ids.len() != self.n_cells() {
            return Err(WenoError::InvalidMesh(format!(
                "{} global ids for {} cells",
                ids.len(),
                self.n_cells()
            )));
        }
        self.global_ids = ids;
        Ok(self)
    }

    pub fn with_processor_patches(mut self, patches: Vec<ProcessorPatch>) -> Result<Self, WenoError> {
        let mut seen = BTreeSet::new();
        for patch in &patches {
            for &f in &patch.faces {
                if f >= self.faces.len() || self.neighbour[f].is_some() || !seen.insert(f) {
                    return Err(WenoError::InvalidMesh(format!(
                        "face {f} cannot be a processor face towards rank {}",
                        patch.neighbour_rank
                    )));
                }
            }
        }
        self.patches = patches;
        Ok(self)
    }

    pub fn with_empty_direction(mut self, direction: Option<usize>) -> Self {
        self.empty_direction = direction;
        self
    }

    /// Total volume of all cells.
    pub fn total_volume(&self) -> f64 {
        self.volumes.iter().sum()
    }
}

impl MeshProvider for PolyMesh {
    fn n_cells(&self) -> usize {
        self.cell_faces.len()
    }

    fn n_faces(&self) -> usize {
        self.faces.len()
    }

    fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    fn face_vertices(&self, face: usize) -> &[usize] {
        &self.faces[face]
    }

    fn face_owner(&self, face: usize) -> usize {
        self.owner[face]
    }

    fn face_neighbour(&self, face: usize) -> Option<usize> {
        self.neighbour[face]
    }

    fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cell_faces[cell]
    }

    fn cell_centroid(&self, cell: usize) -> Point3<f64> {
        self.centroids[cell]
    }

    fn cell_volume(&self, cell: usize) -> f64 {
        self.volumes[cell]
    }

    fn processor_patches(&self) -> &[ProcessorPatch] {
        &self.patches
    }

    fn global_cell_id(&self, cell: usize) -> GlobalCellId {
        self.global_ids[cell]
    }

    fn empty_direction(&self) -> Option<usize> {
        self.empty_direction
    }
}
