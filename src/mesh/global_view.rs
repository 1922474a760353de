//! Process-local view of the whole distributed mesh.
//!
//! Every rank contributes a [`MeshPiece`] describing its cells; the pieces
//! are all-gathered so stencil growth can walk across processor boundaries
//! without further communication. Processor faces are stitched by matching
//! face centres against the neighbouring rank's patch back to this rank.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, all_gather_bytes};
use crate::geometry::shape::CellShape;
use crate::mesh::{GlobalCellId, MeshProvider};
use crate::weno_error::WenoError;
use hashbrown::HashMap;
use log::debug;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Relative distance below which two processor-face centres coincide.
const FACE_MATCH_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ProcessorFaceRecord {
    local_face: usize,
    neighbour_rank: usize,
    centre: Point3<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PieceCell {
    global: GlobalCellId,
    local: usize,
    centroid: Point3<f64>,
    volume: f64,
    shape: CellShape,
    /// Face-neighbours across internal faces, with the face position in the cell.
    internal: Vec<(usize, GlobalCellId)>,
    /// Processor faces with their position in the cell.
    processor: Vec<(usize, ProcessorFaceRecord)>,
}

/// One rank's contribution to the global mesh image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshPiece {
    rank: usize,
    cells: Vec<PieceCell>,
}

impl MeshPiece {
    pub fn from_mesh<M: MeshProvider>(mesh: &M, rank: usize) -> Result<Self, WenoError> {
        let mut proc_face: HashMap<usize, usize> = HashMap::new();
        for patch in mesh.processor_patches() {
            for &f in &patch.faces {
                proc_face.insert(f, patch.neighbour_rank);
            }
        }
        let mut cells = Vec::with_capacity(mesh.n_cells());
        for cell in 0..mesh.n_cells() {
            let mut internal = Vec::new();
            let mut processor = Vec::new();
            for (pos, &f) in mesh.cell_faces(cell).iter().enumerate() {
                if let Some(nb) = mesh.face_neighbour(f) {
                    let other = if nb == cell { mesh.face_owner(f) } else { nb };
                    internal.push((pos, mesh.global_cell_id(other)));
                } else if let Some(&neighbour_rank) = proc_face.get(&f) {
                    processor.push((
                        pos,
                        ProcessorFaceRecord {
                            local_face: f,
                            neighbour_rank,
                            centre: mesh.face_centre(f),
                        },
                    ));
                }
            }
            cells.push(PieceCell {
                global: mesh.global_cell_id(cell),
                local: cell,
                centroid: mesh.cell_centroid(cell),
                volume: mesh.cell_volume(cell),
                shape: mesh.cell_shape(cell)?,
                internal,
                processor,
            });
        }
        Ok(Self { rank, cells })
    }
}

#[derive(Clone, Debug)]
struct GlobalCell {
    owner: usize,
    local: usize,
    centroid: Point3<f64>,
    volume: f64,
    shape: CellShape,
    neighbours: Vec<GlobalCellId>,
}

/// Global mesh image plus the local ↔ global maps of this rank.
#[derive(Clone, Debug)]
pub struct GlobalMeshView {
    rank: usize,
    size: usize,
    cells: Vec<GlobalCell>,
    local_to_global: Vec<GlobalCellId>,
    remote_faces: HashMap<usize, GlobalCellId>,
}

impl GlobalMeshView {
    /// Collective: every rank must call this with its own piece of the mesh.
    pub fn build<M, C>(mesh: &M, comm: &C) -> Result<Self, WenoError>
    where
        M: MeshProvider,
        C: Communicator,
    {
        let local = MeshPiece::from_mesh(mesh, comm.rank())
            .and_then(|piece| Ok(bincode::serialize(&piece)?));
        let bytes = agree(comm, tags::STATUS, "mesh piece encoding", local)?;
        let gathered = all_gather_bytes(comm, tags::GLOBAL_MESH, &bytes)?;
        let pieces = gathered
            .iter()
            .map(|b| bincode::deserialize::<MeshPiece>(b))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "rank {}: gathered {} mesh pieces ({} bytes sent)",
            comm.rank(),
            pieces.len(),
            bytes.len()
        );
        Self::from_pieces(comm.rank(), pieces)
    }

    /// Assemble the view from already gathered pieces, indexed by rank.
    pub fn from_pieces(rank: usize, pieces: Vec<MeshPiece>) -> Result<Self, WenoError> {
        let size = pieces.len();
        if rank >= size {
            return Err(WenoError::DistributedConsistency(format!(
                "rank {rank} outside a communicator of size {size}"
            )));
        }
        let n_total: usize = pieces.iter().map(|p| p.cells.len()).sum();

        // processor faces of rank s that face rank r, keyed by (s, r)
        let mut patch_index: HashMap<(usize, usize), Vec<(Point3<f64>, GlobalCellId, f64)>> =
            HashMap::new();
        for piece in &pieces {
            for cell in &piece.cells {
                for (_, pf) in &cell.processor {
                    patch_index
                        .entry((piece.rank, pf.neighbour_rank))
                        .or_default()
                        .push((pf.centre, cell.global, cell.volume.cbrt()));
                }
            }
        }

        let mut slots: Vec<Option<GlobalCell>> = vec![None; n_total];
        let mut remote_faces = HashMap::new();
        let mut local_to_global = Vec::new();
        for piece in pieces {
            if piece.rank >= size {
                return Err(WenoError::DistributedConsistency(format!(
                    "mesh piece claims rank {} of {size}",
                    piece.rank
                )));
            }
            for cell in piece.cells {
                let g = cell.global;
                if g.index() >= n_total {
                    return Err(WenoError::DistributedConsistency(format!(
                        "global cell id {g} outside dense range 0..{n_total}"
                    )));
                }
                let mut by_face: Vec<(usize, GlobalCellId)> = cell.internal;
                for (pos, pf) in &cell.processor {
                    let across = match_processor_face(&patch_index, piece.rank, pf, cell.volume)?;
                    if piece.rank == rank {
                        remote_faces.insert(pf.local_face, across);
                    }
                    by_face.push((*pos, across));
                }
                by_face.sort_by_key(|&(pos, _)| pos);
                if piece.rank == rank {
                    if local_to_global.len() <= cell.local {
                        local_to_global.resize(cell.local + 1, GlobalCellId::new(u64::MAX));
                    }
                    local_to_global[cell.local] = g;
                }
                let slot = &mut slots[g.index()];
                if slot.is_some() {
                    return Err(WenoError::DistributedConsistency(format!(
                        "global cell id {g} is claimed twice"
                    )));
                }
                *slot = Some(GlobalCell {
                    owner: piece.rank,
                    local: cell.local,
                    centroid: cell.centroid,
                    volume: cell.volume,
                    shape: cell.shape,
                    neighbours: by_face.into_iter().map(|(_, nb)| nb).collect(),
                });
            }
        }
        // every slot is filled: ids are unique and in range, and there are n_total of them
        let cells = slots.into_iter().flatten().collect();
        Ok(Self {
            rank,
            size,
            cells,
            local_to_global,
            remote_faces,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_global_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_local_cells(&self) -> usize {
        self.local_to_global.len()
    }

    fn cell(&self, g: GlobalCellId) -> Result<&GlobalCell, WenoError> {
        self.cells.get(g.index()).ok_or_else(|| {
            WenoError::DistributedConsistency(format!("global cell {g} is not part of the mesh"))
        })
    }

    pub fn is_local_cell(&self, g: GlobalCellId) -> bool {
        self.cells.get(g.index()).is_some_and(|c| c.owner == self.rank)
    }

    pub fn owner_process(&self, g: GlobalCellId) -> Result<usize, WenoError> {
        Ok(self.cell(g)?.owner)
    }

    /// Local id of `g` on `process`; fails unless `process` owns `g`.
    pub fn local_cell_for(&self, g: GlobalCellId, process: usize) -> Result<usize, WenoError> {
        let cell = self.cell(g)?;
        if cell.owner != process {
            return Err(WenoError::DistributedConsistency(format!(
                "global cell {g} is owned by rank {}, not rank {process}",
                cell.owner
            )));
        }
        Ok(cell.local)
    }

    /// Global id of a local cell; `None` past the local range.
    pub fn global_id(&self, local: usize) -> Option<GlobalCellId> {
        self.local_to_global.get(local).copied()
    }

    pub fn local_cells(&self) -> impl Iterator<Item = GlobalCellId> + '_ {
        self.local_to_global.iter().copied()
    }

    /// Face-neighbours of `g` across internal and processor faces.
    pub fn neighbours(&self, g: GlobalCellId) -> Result<&[GlobalCellId], WenoError> {
        Ok(&self.cell(g)?.neighbours)
    }

    pub fn centroid(&self, g: GlobalCellId) -> Result<Point3<f64>, WenoError> {
        Ok(self.cell(g)?.centroid)
    }

    pub fn volume(&self, g: GlobalCellId) -> Result<f64, WenoError> {
        Ok(self.cell(g)?.volume)
    }

    pub fn shape(&self, g: GlobalCellId) -> Result<&CellShape, WenoError> {
        Ok(&self.cell(g)?.shape)
    }

    /// Cell across a local processor face.
    pub fn remote_neighbour(&self, local_face: usize) -> Option<GlobalCellId> {
        self.remote_faces.get(&local_face).copied()
    }

    /// Cell whose centroid is nearest to `point`, over all ranks.
    pub fn find_cell(&self, point: &Point3<f64>) -> Option<GlobalCellId> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (i, (c.centroid - *point).norm_squared()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| GlobalCellId::from(i))
    }
}

fn match_processor_face(
    patch_index: &HashMap<(usize, usize), Vec<(Point3<f64>, GlobalCellId, f64)>>,
    rank: usize,
    face: &ProcessorFaceRecord,
    volume: f64,
) -> Result<GlobalCellId, WenoError> {
    let candidates = patch_index
        .get(&(face.neighbour_rank, rank))
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let (dist, cell, scale) = candidates
        .iter()
        .map(|(c, g, h)| ((*c - face.centre).norm(), *g, *h))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .ok_or_else(|| {
            WenoError::DistributedConsistency(format!(
                "rank {} has no processor faces towards rank {rank}",
                face.neighbour_rank
            ))
        })?;
    if dist > FACE_MATCH_TOLERANCE * scale.min(volume.cbrt()) {
        return Err(WenoError::DistributedConsistency(format!(
            "processor face {} of rank {rank} has no counterpart on rank {} (nearest at {dist:e})",
            face.local_face, face.neighbour_rank
        )));
    }
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::mesh::{decompose_slabs, hex_box};

    #[test]
    fn serial_view_mirrors_mesh() {
        let mesh = hex_box([3, 2, 1], [0.0; 3], [3.0, 2.0, 1.0]).unwrap();
        let view = GlobalMeshView::build(&mesh, &NoComm).unwrap();
        assert_eq!(view.n_global_cells(), 6);
        let g = GlobalCellId::new(4);
        assert!(view.is_local_cell(g));
        assert_eq!(view.local_cell_for(g, 0).unwrap(), 4);
        assert!(matches!(
            view.local_cell_for(g, 1),
            Err(WenoError::DistributedConsistency(_))
        ));
        assert_eq!(view.find_cell(&Point3::new(1.4, 1.6, 0.5)), Some(g));
        assert_eq!(view.global_id(4), Some(g));
        assert_eq!(view.global_id(6), None);
    }

    #[test]
    fn two_rank_view_stitches_processor_faces() {
        let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
        let pieces = decompose_slabs(&mesh, 2, 0).unwrap();
        let handles: Vec<_> = LocalComm::group(2)
            .into_iter()
            .zip(pieces)
            .map(|(comm, piece)| {
                std::thread::spawn(move || {
                    let view = GlobalMeshView::build(&piece, &comm).unwrap();
                    (piece, view)
                })
            })
            .collect();
        for h in handles {
            let (piece, view) = h.join().unwrap();
            assert_eq!(view.n_global_cells(), 64);
            for g in 0..64 {
                let g = GlobalCellId::from(g);
                let mut got: Vec<_> = view.neighbours(g).unwrap().to_vec();
                let mut want: Vec<_> = mesh
                    .cell_neighbours(g.index())
                    .into_iter()
                    .map(GlobalCellId::from)
                    .collect();
                got.sort();
                want.sort();
                assert_eq!(got, want);
            }
            for patch in piece.processor_patches() {
                for &f in &patch.faces {
                    let across = view.remote_neighbour(f).unwrap();
                    assert_eq!(view.owner_process(across).unwrap(), patch.neighbour_rank);
                }
            }
        }
    }

    #[test]
    fn sparse_global_ids_are_rejected() {
        let mesh = hex_box([2, 1, 1], [0.0; 3], [1.0; 3])
            .unwrap()
            .with_global_ids(vec![GlobalCellId::new(0), GlobalCellId::new(5)])
            .unwrap();
        assert!(matches!(
            GlobalMeshView::build(&mesh, &NoComm),
            Err(WenoError::DistributedConsistency(_))
        ));
    }
}
