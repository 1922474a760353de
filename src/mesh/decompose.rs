//! Split a serial mesh into per-rank pieces.
//!
//! Every piece keeps the serial cell numbering as its global ids. Faces
//! between two ranks become processor faces on both sides, listed in serial
//! face order so both patches enumerate the shared faces identically.

use crate::mesh::poly_mesh::PolyMesh;
use crate::mesh::{GlobalCellId, MeshProvider, ProcessorPatch};
use crate::weno_error::WenoError;
use std::collections::BTreeMap;

/// Build the piece of every rank from a cell → rank assignment.
pub fn decompose(mesh: &PolyMesh, cell_rank: &[usize], n_ranks: usize) -> Result<Vec<PolyMesh>, WenoError> {
    if cell_rank.len() != mesh.n_cells() {
        return Err(WenoError::InvalidMesh(format!(
            "rank assignment covers {} of {} cells",
            cell_rank.len(),
            mesh.n_cells()
        )));
    }
    if let Some(&bad) = cell_rank.iter().find(|&&r| r >= n_ranks) {
        return Err(WenoError::InvalidMesh(format!(
            "cell assigned to rank {bad} but only {n_ranks} ranks exist"
        )));
    }
    (0..n_ranks).map(|rank| piece_for(mesh, cell_rank, rank)).collect()
}

/// Equal-count slabs along `axis`, ordered by cell centroid.
pub fn decompose_slabs(mesh: &PolyMesh, n_ranks: usize, axis: usize) -> Result<Vec<PolyMesh>, WenoError> {
    if n_ranks == 0 || axis > 2 {
        return Err(WenoError::InvalidMesh(format!(
            "cannot cut {n_ranks} slabs along axis {axis}"
        )));
    }
    let n = mesh.n_cells();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        mesh.cell_centroid(a)[axis].total_cmp(&mesh.cell_centroid(b)[axis])
    });
    let mut cell_rank = vec![0; n];
    for (pos, &cell) in order.iter().enumerate() {
        cell_rank[cell] = pos * n_ranks / n;
    }
    decompose(mesh, &cell_rank, n_ranks)
}

fn piece_for(mesh: &PolyMesh, cell_rank: &[usize], rank: usize) -> Result<PolyMesh, WenoError> {
    let cells: Vec<usize> = (0..mesh.n_cells()).filter(|&c| cell_rank[c] == rank).collect();
    if cells.is_empty() {
        return Err(WenoError::InvalidMesh(format!("rank {rank} receives no cells")));
    }
    let mut local_of = vec![usize::MAX; mesh.n_cells()];
    for (local, &c) in cells.iter().enumerate() {
        local_of[c] = local;
    }

    let mut internal = Vec::new();
    let mut boundary = Vec::new();
    let mut shared: BTreeMap<usize, Vec<(Vec<usize>, usize)>> = BTreeMap::new();
    for f in 0..mesh.n_faces() {
        let loop_ = mesh.face_vertices(f).to_vec();
        let o = mesh.face_owner(f);
        match mesh.face_neighbour(f) {
            None if cell_rank[o] == rank => boundary.push((loop_, local_of[o])),
            None => {}
            Some(n) => match (cell_rank[o] == rank, cell_rank[n] == rank) {
                (true, true) => internal.push((loop_, local_of[o], local_of[n])),
                (true, false) => shared.entry(cell_rank[n]).or_default().push((loop_, local_of[o])),
                (false, true) => {
                    let mut flipped = loop_;
                    flipped.reverse();
                    shared.entry(cell_rank[o]).or_default().push((flipped, local_of[n]));
                }
                (false, false) => {}
            },
        }
    }

    let mut point_map: BTreeMap<usize, usize> = BTreeMap::new();
    let mut points = Vec::new();
    let mut faces = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();
    let mut push_face = |loop_: Vec<usize>, o: usize, n: Option<usize>| {
        let local_loop: Vec<usize> = loop_
            .into_iter()
            .map(|v| {
                *point_map.entry(v).or_insert_with(|| {
                    points.push(mesh.points()[v]);
                    points.len() - 1
                })
            })
            .collect();
        faces.push(local_loop);
        owner.push(o);
        neighbour.push(n);
        faces.len() - 1
    };

    for (loop_, o, n) in internal {
        push_face(loop_, o, Some(n));
    }
    for (loop_, o) in boundary {
        push_face(loop_, o, None);
    }
    let mut patches = Vec::with_capacity(shared.len());
    for (neighbour_rank, list) in shared {
        let patch_faces = list
            .into_iter()
            .map(|(loop_, o)| push_face(loop_, o, None))
            .collect();
        patches.push(ProcessorPatch {
            neighbour_rank,
            faces: patch_faces,
        });
    }

    let global_ids = cells.iter().map(|&c| mesh.global_cell_id(c)).collect::<Vec<GlobalCellId>>();
    PolyMesh::new(points, faces, owner, neighbour)?
        .with_global_ids(global_ids)?
        .with_processor_patches(patches)
        .map(|piece| piece.with_empty_direction(mesh.empty_direction()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::meshgen::hex_box;

    #[test]
    fn slabs_share_matching_patches() {
        let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
        let pieces = decompose_slabs(&mesh, 2, 0).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].n_cells() + pieces[1].n_cells(), 64);

        let p0 = &pieces[0].processor_patches()[0];
        let p1 = &pieces[1].processor_patches()[0];
        assert_eq!((p0.neighbour_rank, p1.neighbour_rank), (1, 0));
        assert_eq!(p0.faces.len(), 16);
        for (&a, &b) in p0.faces.iter().zip(&p1.faces) {
            assert!((pieces[0].face_centre(a) - pieces[1].face_centre(b)).norm() < 1e-14);
        }
    }

    #[test]
    fn pieces_keep_serial_geometry() {
        let mesh = hex_box([3, 2, 1], [0.0; 3], [3.0, 2.0, 1.0]).unwrap();
        let pieces = decompose(&mesh, &[0, 1, 0, 1, 0, 1], 2).unwrap();
        for piece in &pieces {
            for c in 0..piece.n_cells() {
                let g = piece.global_cell_id(c).index();
                assert!((piece.cell_centroid(c) - mesh.cell_centroid(g)).norm() < 1e-13);
                assert!((piece.cell_volume(c) - mesh.cell_volume(g)).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn empty_rank_is_rejected() {
        let mesh = hex_box([2, 1, 1], [0.0; 3], [1.0; 3]).unwrap();
        assert!(decompose(&mesh, &[0, 0], 2).is_err());
    }
}
