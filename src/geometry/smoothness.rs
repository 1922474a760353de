//! Smoothness-indicator (oscillation) matrices.

use crate::geometry::degrees::{DegreeSet, triples};
use crate::geometry::frame::ReferenceFrame;
use crate::geometry::integrals::{falling_factorial, volume_integrals};
use crate::geometry::shape::CellShape;
use nalgebra::DMatrix;

/// `B[p][q] = Σ_{1 ≤ |α| ≤ order} ∫_cell Dᵅφ_p Dᵅφ_q dξ` in the reference
/// space of `frame`, for the basis functions of `degrees`.
///
/// The indicator of a polynomial with coefficients `c` is `cᵀ B c`.
pub fn oscillation_matrix(shape: &CellShape, frame: &ReferenceFrame, degrees: &DegreeSet) -> DMatrix<f64> {
    let order = degrees.order();
    let t2o = volume_integrals(shape, 2 * order, frame);
    let basis = degrees.triples();
    let dof = basis.len();

    let mut b = DMatrix::zeros(dof, dof);
    for p in 0..dof {
        for q in p..dof {
            let (tp, tq) = (basis[p], basis[q]);
            let mut sum = 0.0;
            for alpha in triples(order).filter(|a| a.iter().sum::<usize>() > 0) {
                if (0..3).any(|d| alpha[d] > tp[d] || alpha[d] > tq[d]) {
                    continue;
                }
                let weight: f64 = (0..3)
                    .map(|d| falling_factorial(tp[d], alpha[d]) * falling_factorial(tq[d], alpha[d]))
                    .product();
                sum += weight
                    * t2o.get(
                        tp[0] + tq[0] - 2 * alpha[0],
                        tp[1] + tq[1] - 2 * alpha[1],
                        tp[2] + tq[2] - 2 * alpha[2],
                    );
            }
            b[(p, q)] = sum;
            b[(q, p)] = sum;
        }
    }
    b
}
