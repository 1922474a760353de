//! Gauss quadrature on faces.
//!
//! Faces are fanned into triangles around their centre; each triangle is
//! integrated with a collapsed (Duffy) tensor Gauss–Legendre rule
//! `s = u (1 - v)`, `t = u v`, whose Jacobian `u` is absorbed into the
//! weights. `q` points per direction integrate degree `2q - 1` exactly.

use crate::geometry::degrees::{IntegralTable, triples};
use crate::geometry::frame::ReferenceFrame;
use crate::geometry::shape::face_centre;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Gauss–Legendre nodes and weights on `[0, 1]`; `q ≥ 1`.
pub fn gauss_legendre(q: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = Vec::with_capacity(q);
    let mut weights = Vec::with_capacity(q);
    for i in 0..q {
        // Chebyshev guess, then Newton on P_q
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (q as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=q {
                let kf = k as f64;
                let p2 = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
                p0 = p1;
                p1 = p2;
            }
            dp = q as f64 * (x * p1 - p0) / (x * x - 1.0);
            let dx = p1 / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes.push(0.5 * (1.0 - x));
        weights.push(0.5 * w);
    }
    (nodes, weights)
}

/// Points and weights of a rule on the unit triangle `{s, t ≥ 0, s + t ≤ 1}`
/// exact for polynomials of total degree `degree`. Weights sum to 1/2.
pub fn triangle_rule(degree: usize) -> Vec<(f64, f64, f64)> {
    let (x, w) = gauss_legendre(degree / 2 + 2);
    let mut rule = Vec::with_capacity(x.len() * x.len());
    for (u, wu) in x.iter().zip(&w) {
        for (v, wv) in x.iter().zip(&w) {
            rule.push((u * (1.0 - v), u * v, wu * wv * u));
        }
    }
    rule
}

/// One side of a face: zero-mean basis integrals and the face area, both in
/// the reference space of the cell on that side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SideIntegrals {
    pub table: IntegralTable,
    pub area: f64,
}

/// Surface integrals of a face for its owner and (if any) its neighbour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceIntegralPair {
    pub owner: SideIntegrals,
    pub neighbour: Option<SideIntegrals>,
}

impl SurfaceIntegralPair {
    /// Face area in the owner's reference space.
    pub fn reference_area(&self) -> f64 {
        self.owner.area
    }
}

/// Geometry of the cell on one side of a face.
#[derive(Clone, Copy, Debug)]
pub struct Side<'a> {
    pub frame: &'a ReferenceFrame,
    /// Volume integrals of that cell in its own frame.
    pub volume: &'a IntegralTable,
}

/// Integrate `φ = ξⁿηᵐζˡ - ∫_cell ξⁿηᵐζˡ / V` over the face for every triple
/// up to the order of the side's volume table.
pub fn side_integrals(face: &[Point3<f64>], side: Side<'_>) -> SideIntegrals {
    let order = side.volume.order();
    let pts: Vec<Point3<f64>> = face.iter().map(|p| side.frame.to_reference(p)).collect();
    let fc = face_centre(&pts);
    let rule = triangle_rule(order);

    let mut raw = IntegralTable::zeros(order);
    let mut area = 0.0;
    let mut powers = vec![[1.0; 3]; order + 1];
    for (k, a) in pts.iter().enumerate() {
        let b = pts[(k + 1) % pts.len()];
        let ea = *a - fc;
        let eb = b - fc;
        let jac = ea.cross(&eb).norm();
        area += 0.5 * jac;
        for &(s, t, w) in &rule {
            let x = fc + ea * s + eb * t;
            for d in 1..=order {
                for c in 0..3 {
                    powers[d][c] = powers[d - 1][c] * x[c];
                }
            }
            for [n, m, l] in triples(order) {
                raw.add(n, m, l, w * jac * powers[n][0] * powers[m][1] * powers[l][2]);
            }
        }
    }

    let volume = side.volume.volume();
    let mut table = IntegralTable::zeros(order);
    for [n, m, l] in triples(order) {
        table.set(n, m, l, raw.get(n, m, l) - area * side.volume.get(n, m, l) / volume);
    }
    SideIntegrals { table, area }
}

pub fn surface_integrals(
    face: &[Point3<f64>],
    owner: Side<'_>,
    neighbour: Option<Side<'_>>,
) -> SurfaceIntegralPair {
    SurfaceIntegralPair {
        owner: side_integrals(face, owner),
        neighbour: neighbour.map(|side| side_integrals(face, side)),
    }
}
