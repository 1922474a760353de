//! Polyhedral cell geometry as a list of face vertex loops.

use crate::weno_error::WenoError;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Polyhedron described by its face loops.
///
/// Loops may be oriented either way; integration only relies on the cell
/// being star-shaped with respect to [`CellShape::vertex_centre`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellShape {
    faces: Vec<Vec<Point3<f64>>>,
}

impl CellShape {
    pub fn new(faces: Vec<Vec<Point3<f64>>>) -> Result<Self, WenoError> {
        if faces.len() < 4 {
            return Err(WenoError::InvalidMesh(format!(
                "a polyhedron needs at least 4 faces, got {}",
                faces.len()
            )));
        }
        if let Some(bad) = faces.iter().position(|f| f.len() < 3) {
            return Err(WenoError::InvalidMesh(format!(
                "face {bad} has fewer than 3 vertices"
            )));
        }
        Ok(Self { faces })
    }

    pub fn faces(&self) -> &[Vec<Point3<f64>>] {
        &self.faces
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Point3<f64>> {
        self.faces.iter().flatten()
    }

    /// Average of all face-loop vertices.
    pub fn vertex_centre(&self) -> Point3<f64> {
        let mut sum = Vector3::zeros();
        let mut count = 0usize;
        for p in self.vertices() {
            sum += p.coords;
            count += 1;
        }
        Point3::from(sum / count as f64)
    }

    /// Unit normal of face `idx`, oriented away from `inside`.
    pub fn outward_normal(&self, idx: usize, inside: &Point3<f64>) -> Vector3<f64> {
        let face = &self.faces[idx];
        let n = area_vector(face);
        let norm = n.norm();
        if norm == 0.0 {
            return n;
        }
        let n = n / norm;
        if n.dot(&(face_centre(face) - *inside)) < 0.0 {
            -n
        } else {
            n
        }
    }
}

/// Arithmetic mean of a face loop.
pub fn face_centre(face: &[Point3<f64>]) -> Point3<f64> {
    let sum: Vector3<f64> = face.iter().map(|p| p.coords).sum();
    Point3::from(sum / face.len() as f64)
}

/// Area-weighted normal of a face loop (Newell's method, right-hand rule).
pub fn area_vector(face: &[Point3<f64>]) -> Vector3<f64> {
    let c = face_centre(face);
    let mut acc = Vector3::zeros();
    for (k, p) in face.iter().enumerate() {
        let q = face[(k + 1) % face.len()];
        acc += (*p - c).cross(&(q - c));
    }
    acc * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(z: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
        ]
    }

    #[test]
    fn newell_area_of_unit_square() {
        let a = area_vector(&square(0.0));
        assert!((a - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-14);
    }

    #[test]
    fn too_few_faces_rejected() {
        assert!(CellShape::new(vec![square(0.0), square(1.0)]).is_err());
    }
}
