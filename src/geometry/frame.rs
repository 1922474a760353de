//! Affine reference frames of cells.
//!
//! A frame maps reference coordinates `ξ` to physical coordinates
//! `x = J ξ + x₀`. Its columns are spanned by cell vertices chosen greedily
//! for a well-conditioned map, so the cell occupies a region of unit size in
//! reference space regardless of its physical size or stretching.

use crate::geometry::shape::CellShape;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative determinant threshold below which a frame is degenerate.
pub const DET_TOLERANCE: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq, Error)]
#[error("degenerate reference frame: |det J| = {det:e} is below {threshold:e}")]
pub struct DegenerateFrame {
    pub det: f64,
    pub threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    jacobian: Matrix3<f64>,
    inverse: Matrix3<f64>,
    det: f64,
    origin: Point3<f64>,
}

impl ReferenceFrame {
    /// Reference space equal to physical space.
    pub fn identity() -> Self {
        Self {
            jacobian: Matrix3::identity(),
            inverse: Matrix3::identity(),
            det: 1.0,
            origin: Point3::origin(),
        }
    }

    /// Build a frame from its Jacobian and origin; `length` is the
    /// characteristic cell size used to scale the degeneracy threshold.
    pub fn from_parts(
        jacobian: Matrix3<f64>,
        origin: Point3<f64>,
        length: f64,
    ) -> Result<Self, DegenerateFrame> {
        let det = jacobian.determinant();
        let threshold = DET_TOLERANCE * length.powi(3);
        if !det.is_finite() || det.abs() <= threshold {
            return Err(DegenerateFrame { det, threshold });
        }
        let inverse = jacobian
            .try_inverse()
            .ok_or(DegenerateFrame { det, threshold })?;
        Ok(Self {
            jacobian,
            inverse,
            det,
            origin,
        })
    }

    pub fn jacobian(&self) -> &Matrix3<f64> {
        &self.jacobian
    }

    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// Determinant of the Jacobian (reference → physical volume ratio).
    pub fn det(&self) -> f64 {
        self.det
    }

    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    pub fn to_reference(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * (*p - self.origin))
    }

    pub fn to_physical(&self, xi: &Point3<f64>) -> Point3<f64> {
        self.origin + self.jacobian * xi.coords
    }

    /// Express a physical normal direction in reference space.
    pub fn normal_to_reference(&self, n: &Vector3<f64>) -> Vector3<f64> {
        self.jacobian.transpose() * n
    }
}

/// Transform an arbitrary point into the reference space of `frame`.
pub fn transform_point(frame: &ReferenceFrame, p: &Point3<f64>) -> Point3<f64> {
    frame.to_reference(p)
}

/// Compute the reference frame of a cell.
///
/// In 3-D the frame is the tetrahedron `(x₀, a, b, c)` of cell vertices with
/// the largest spread found greedily. With an `empty_direction` (2-D meshes
/// extruded one cell deep) the first two columns are chosen in the plane and
/// the third column spans the cell along the empty direction, so `ξ` and `η`
/// never depend on the empty coordinate.
pub fn compute_jacobian(
    shape: &CellShape,
    empty_direction: Option<usize>,
) -> Result<ReferenceFrame, DegenerateFrame> {
    let origin = *shape
        .vertices()
        .next()
        .ok_or(DegenerateFrame { det: 0.0, threshold: 0.0 })?;
    let offsets: Vec<Vector3<f64>> = shape.vertices().map(|p| p - origin).collect();
    let length = offsets.iter().map(|v| v.norm()).fold(0.0, f64::max);

    let (mut a, mut b, c) = match empty_direction {
        None => {
            let a = argmax(&offsets, |v| v.norm());
            let b = argmax(&offsets, |v| a.cross(v).norm());
            let c = argmax(&offsets, |v| a.cross(&b).dot(v).abs());
            (a, b, c)
        }
        Some(dir) => {
            let mut e = Vector3::zeros();
            e[dir.min(2)] = 1.0;
            let planar: Vec<Vector3<f64>> =
                offsets.iter().map(|v| v - e * v.dot(&e)).collect();
            let a = argmax(&planar, |v| v.norm());
            let b = argmax(&planar, |v| a.cross(v).norm());
            let (lo, hi) = offsets
                .iter()
                .map(|v| v.dot(&e))
                .fold((0.0_f64, 0.0_f64), |(lo, hi), h| (lo.min(h), hi.max(h)));
            (a, b, e * (hi - lo))
        }
    };
    if a.cross(&b).dot(&c) < 0.0 {
        std::mem::swap(&mut a, &mut b);
    }
    ReferenceFrame::from_parts(Matrix3::from_columns(&[a, b, c]), origin, length)
}

fn argmax<F>(candidates: &[Vector3<f64>], score: F) -> Vector3<f64>
where
    F: Fn(&Vector3<f64>) -> f64,
{
    let mut best = Vector3::zeros();
    let mut best_score = f64::NEG_INFINITY;
    for v in candidates {
        let s = score(v);
        if s > best_score {
            best_score = s;
            best = *v;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::meshgen::hex_box;
    use crate::mesh::MeshProvider;

    #[test]
    fn frame_round_trips_points() {
        let mesh = hex_box([2, 1, 1], [0.0, 0.0, 0.0], [2.0, 0.5, 3.0]).unwrap();
        let frame = compute_jacobian(&mesh.cell_shape(1).unwrap(), None).unwrap();
        assert!(frame.det() > 0.0);
        let p = Point3::new(1.3, 0.2, 2.9);
        let back = frame.to_physical(&frame.to_reference(&p));
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn flat_cell_is_degenerate() {
        let square = |z: f64| {
            vec![
                Point3::new(0.0, 0.0, z),
                Point3::new(1.0, 0.0, z),
                Point3::new(1.0, 1.0, z),
                Point3::new(0.0, 1.0, z),
            ]
        };
        let flat = CellShape::new(vec![square(0.0), square(0.0), square(0.0), square(0.0)]).unwrap();
        assert!(compute_jacobian(&flat, None).is_err());
    }

    #[test]
    fn planar_frame_isolates_empty_direction() {
        let mesh = hex_box([1, 1, 1], [0.0, 0.0, 0.0], [1.0, 2.0, 0.1]).unwrap();
        let frame = compute_jacobian(&mesh.cell_shape(0).unwrap(), Some(2)).unwrap();
        let low = frame.to_reference(&Point3::new(0.4, 0.7, 0.0));
        let high = frame.to_reference(&Point3::new(0.4, 0.7, 0.1));
        assert!((low.x - high.x).abs() < 1e-12);
        assert!((low.y - high.y).abs() < 1e-12);
        assert!((high.z - low.z - 1.0).abs() < 1e-12);
    }
}
