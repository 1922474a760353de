//! Structured hexahedral box generators.

use crate::mesh::poly_mesh::PolyMesh;
use crate::weno_error::WenoError;
use nalgebra::Point3;

fn invalid_geometry(message: impl Into<String>) -> WenoError {
    WenoError::InvalidMesh(message.into())
}

/// `n[0] × n[1] × n[2]` hexahedra filling the box `[lo, hi]`.
///
/// Cells are numbered x fastest, then y, then z. Internal faces come first,
/// each owned by the lower-numbered cell; boundary faces follow.
pub fn hex_box(n: [usize; 3], lo: [f64; 3], hi: [f64; 3]) -> Result<PolyMesh, WenoError> {
    if n.contains(&0) {
        return Err(invalid_geometry(format!("cell counts must be non-zero, got {n:?}")));
    }
    for d in 0..3 {
        if !(hi[d] > lo[d]) {
            return Err(invalid_geometry(format!(
                "box extent along axis {d} is empty: [{}, {}]",
                lo[d], hi[d]
            )));
        }
    }
    let [nx, ny, nz] = n;
    let pid = |i: usize, j: usize, k: usize| (k * (ny + 1) + j) * (nx + 1) + i;
    let cid = |i: usize, j: usize, k: usize| (k * ny + j) * nx + i;

    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                let at = |d: usize, idx: usize, count: usize| {
                    lo[d] + (hi[d] - lo[d]) * idx as f64 / count as f64
                };
                points.push(Point3::new(at(0, i, nx), at(1, j, ny), at(2, k, nz)));
            }
        }
    }

    // loop on the lower plane of cell (i, j, k) across `axis`, right-hand normal along +axis
    let plane = |axis: usize, i: usize, j: usize, k: usize| -> Vec<usize> {
        match axis {
            0 => vec![pid(i, j, k), pid(i, j + 1, k), pid(i, j + 1, k + 1), pid(i, j, k + 1)],
            1 => vec![pid(i, j, k), pid(i, j, k + 1), pid(i + 1, j, k + 1), pid(i + 1, j, k)],
            _ => vec![pid(i, j, k), pid(i + 1, j, k), pid(i + 1, j + 1, k), pid(i, j + 1, k)],
        }
    };
    let upper = |axis: usize, i: usize, j: usize, k: usize| {
        plane(
            axis,
            i + usize::from(axis == 0),
            j + usize::from(axis == 1),
            k + usize::from(axis == 2),
        )
    };
    let lower = |axis: usize, i: usize, j: usize, k: usize| {
        let mut face = plane(axis, i, j, k);
        face.reverse();
        face
    };

    let mut faces = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let c = cid(i, j, k);
                if i + 1 < nx {
                    faces.push(upper(0, i, j, k));
                    owner.push(c);
                    neighbour.push(Some(cid(i + 1, j, k)));
                }
                if j + 1 < ny {
                    faces.push(upper(1, i, j, k));
                    owner.push(c);
                    neighbour.push(Some(cid(i, j + 1, k)));
                }
                if k + 1 < nz {
                    faces.push(upper(2, i, j, k));
                    owner.push(c);
                    neighbour.push(Some(cid(i, j, k + 1)));
                }
            }
        }
    }
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let c = cid(i, j, k);
                let idx = [i, j, k];
                for axis in 0..3 {
                    if idx[axis] == 0 {
                        faces.push(lower(axis, i, j, k));
                        owner.push(c);
                        neighbour.push(None);
                    }
                    if idx[axis] + 1 == n[axis] {
                        faces.push(upper(axis, i, j, k));
                        owner.push(c);
                        neighbour.push(None);
                    }
                }
            }
        }
    }
    PolyMesh::new(points, faces, owner, neighbour)
}

/// One-cell-deep extrusion of an `n[0] × n[1]` quad grid, with z as the
/// empty direction.
pub fn hex_box_2d(n: [usize; 2], lo: [f64; 2], hi: [f64; 2], depth: f64) -> Result<PolyMesh, WenoError> {
    if !(depth > 0.0) {
        return Err(invalid_geometry(format!("extrusion depth must be positive, got {depth}")));
    }
    Ok(hex_box([n[0], n[1], 1], [lo[0], lo[1], 0.0], [hi[0], hi[1], depth])?
        .with_empty_direction(Some(2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshProvider;

    #[test]
    fn face_counts() {
        let mesh = hex_box([2, 3, 4], [0.0; 3], [1.0; 3]).unwrap();
        assert_eq!(mesh.n_cells(), 24);
        let internal = (0..mesh.n_faces()).filter(|&f| mesh.face_neighbour(f).is_some()).count();
        assert_eq!(internal, 1 * 3 * 4 + 2 * 2 * 4 + 2 * 3 * 3);
        assert_eq!(mesh.n_faces() - internal, 2 * (3 * 4 + 2 * 4 + 2 * 3));
    }

    #[test]
    fn area_vectors_point_out_of_owner() {
        let mesh = hex_box([2, 2, 2], [0.0; 3], [1.0; 3]).unwrap();
        for f in 0..mesh.n_faces() {
            let out = mesh.face_centre(f) - mesh.cell_centroid(mesh.face_owner(f));
            assert!(mesh.face_area_vector(f).dot(&out) > 0.0, "face {f}");
        }
    }

    #[test]
    fn empty_extent_is_rejected() {
        assert!(hex_box([1, 1, 1], [0.0; 3], [1.0, 0.0, 1.0]).is_err());
        assert!(hex_box_2d([2, 2], [0.0; 2], [1.0; 2], 0.0).is_err());
    }
}
