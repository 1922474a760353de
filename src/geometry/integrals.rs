//! Exact monomial integrals over polyhedral cells.
//!
//! A cell is decomposed into tetrahedra, each spanned by the cell vertex
//! centre, a face centre and one edge of that face. On a tetrahedron with
//! barycentric coordinates `λ` every monomial in `ξ` is a homogeneous
//! polynomial in `λ`, and the Dirichlet moments
//!
//! ```text
//! ∫_T λ^β dV = 6 |T| β! / (|β| + 3)!
//! ```
//!
//! integrate it in closed form. The same homogeneous expansion, applied to
//! the affine map between two frames, re-expresses a table in another frame.

use crate::geometry::degrees::IntegralTable;
use crate::geometry::frame::ReferenceFrame;
use crate::geometry::shape::{CellShape, area_vector, face_centre};
use nalgebra::{Matrix3, Point3};
use once_cell::sync::Lazy;

/// Highest total degree handled by the homogeneous expansion tables.
pub const MAX_EXPANSION_DEGREE: usize = 2 * crate::config::MAX_POLYNOMIAL_ORDER;

const FACTORIAL_LEN: usize = MAX_EXPANSION_DEGREE + 4;

static FACTORIALS: Lazy<[f64; FACTORIAL_LEN]> = Lazy::new(|| {
    let mut f = [1.0; FACTORIAL_LEN];
    for k in 1..FACTORIAL_LEN {
        f[k] = f[k - 1] * k as f64;
    }
    f
});

static EXPANSION: Lazy<Homogeneous> = Lazy::new(|| Homogeneous::new(MAX_EXPANSION_DEGREE));

/// `k!` for `k ≤ MAX_EXPANSION_DEGREE + 3`.
#[inline]
pub fn factorial(k: usize) -> f64 {
    FACTORIALS[k]
}

/// Multinomial coefficient `|k|! / Π kᵢ!`.
fn multinomial(k: &[usize]) -> f64 {
    let total: usize = k.iter().sum();
    k.iter().fold(factorial(total), |acc, &ki| acc / factorial(ki))
}

/// Falling factorial `n (n-1) ... (n-k+1)`; zero when `k > n`.
pub fn falling_factorial(n: usize, k: usize) -> f64 {
    if k > n {
        0.0
    } else {
        factorial(n) / factorial(n - k)
    }
}

/// Exponent bookkeeping for homogeneous polynomials in four variables.
///
/// Polynomials of degree `k` are stored as coefficient vectors over
/// `exponents[k]`; `lookup` maps a packed exponent back to its position.
struct Homogeneous {
    max_degree: usize,
    exponents: Vec<Vec<[usize; 4]>>,
    lookup: Vec<u32>,
    /// `β! / (|β| + 3)!` per exponent, the Dirichlet moment without `6|T|`.
    moments: Vec<Vec<f64>>,
}

impl Homogeneous {
    fn new(max_degree: usize) -> Self {
        let base = max_degree + 1;
        let mut exponents = vec![Vec::new(); base];
        let mut lookup = vec![u32::MAX; base.pow(4)];
        for a in 0..base {
            for b in 0..base - a {
                for c in 0..base - a - b {
                    for d in 0..base - a - b - c {
                        let k = a + b + c + d;
                        let beta = [a, b, c, d];
                        lookup[Self::pack_with(base, beta)] = exponents[k].len() as u32;
                        exponents[k].push(beta);
                    }
                }
            }
        }
        let moments = exponents
            .iter()
            .enumerate()
            .map(|(k, list)| {
                list.iter()
                    // Π βᵢ! / (k + 3)!
                    .map(|beta| 1.0 / (multinomial(beta) * falling_factorial(k + 3, 3)))
                    .collect()
            })
            .collect();
        Self {
            max_degree,
            exponents,
            lookup,
            moments,
        }
    }

    #[inline]
    fn pack_with(base: usize, beta: [usize; 4]) -> usize {
        ((beta[0] * base + beta[1]) * base + beta[2]) * base + beta[3]
    }

    #[inline]
    fn position(&self, beta: [usize; 4]) -> usize {
        self.lookup[Self::pack_with(self.max_degree + 1, beta)] as usize
    }

    /// Multiply a degree-`k` polynomial by a linear form.
    fn times_linear(&self, poly: &[f64], k: usize, form: &[f64; 4]) -> Vec<f64> {
        let mut out = vec![0.0; self.exponents[k + 1].len()];
        for (coef, beta) in poly.iter().zip(&self.exponents[k]) {
            if *coef == 0.0 {
                continue;
            }
            for (i, &w) in form.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let mut up = *beta;
                up[i] += 1;
                out[self.position(up)] += coef * w;
            }
        }
        out
    }
}

/// Visit the expansion `Π_d forms[d]^{t_d}` of every triple `t` with
/// `|t| ≤ order`, as a homogeneous polynomial of degree `|t|` in four
/// variables, in triple enumeration order.
fn expand_monomials<F>(forms: &[[f64; 4]; 3], order: usize, mut visit: F)
where
    F: FnMut([usize; 3], &[f64], usize),
{
    let h = &*EXPANSION;
    debug_assert!(order <= h.max_degree);
    let mut p_n = vec![1.0];
    for n in 0..=order {
        if n > 0 {
            p_n = h.times_linear(&p_n, n - 1, &forms[0]);
        }
        let mut p_nm = p_n.clone();
        for m in 0..=order - n {
            if m > 0 {
                p_nm = h.times_linear(&p_nm, n + m - 1, &forms[1]);
            }
            let mut p_nml = p_nm.clone();
            for l in 0..=order - n - m {
                if l > 0 {
                    p_nml = h.times_linear(&p_nml, n + m + l - 1, &forms[2]);
                }
                visit([n, m, l], &p_nml, n + m + l);
            }
        }
    }
}

/// Accumulate the integrals of one tetrahedron into `table`, weighted by
/// `signed_volume`.
fn add_tetrahedron(table: &mut IntegralTable, vertices: [Point3<f64>; 4], signed_volume: f64) {
    let h = &*EXPANSION;
    let forms: [[f64; 4]; 3] = std::array::from_fn(|d| std::array::from_fn(|i| vertices[i][d]));
    let scale = 6.0 * signed_volume;
    expand_monomials(&forms, table.order(), |[n, m, l], poly, k| {
        let integral: f64 = poly.iter().zip(&h.moments[k]).map(|(c, mu)| c * mu).sum();
        table.add(n, m, l, scale * integral);
    });
}

/// Integrals of every monomial `ξⁿηᵐζˡ` with `n + m + l ≤ order` over the
/// cell, in the reference space of `frame`.
pub fn volume_integrals(shape: &CellShape, order: usize, frame: &ReferenceFrame) -> IntegralTable {
    let mut table = IntegralTable::zeros(order);
    let centre = frame.to_reference(&shape.vertex_centre());
    for face in shape.faces() {
        let loop_ref: Vec<Point3<f64>> = face.iter().map(|p| frame.to_reference(p)).collect();
        let fc = face_centre(&loop_ref);
        // fan triangles follow the loop; flip loops that wind inwards
        let winding = if area_vector(&loop_ref).dot(&(fc - centre)) < 0.0 {
            -1.0
        } else {
            1.0
        };
        for (k, a) in loop_ref.iter().enumerate() {
            let b = loop_ref[(k + 1) % loop_ref.len()];
            let tet = [centre, fc, *a, b];
            let six_v = Matrix3::from_columns(&[fc - centre, *a - centre, b - centre]).determinant();
            add_tetrahedron(&mut table, tet, winding * six_v / 6.0);
        }
    }
    table
}

/// Re-express integrals computed in `from` in the reference space of `to`.
///
/// With `ξ_to = A ξ_from + b` each target monomial expands into source
/// monomials of no higher degree; the volume element scales by
/// `|det J_from / det J_to|`.
pub fn transform_integral(
    table: &IntegralTable,
    from: &ReferenceFrame,
    to: &ReferenceFrame,
) -> IntegralTable {
    if from == to {
        return table.clone();
    }
    let h = &*EXPANSION;
    let a = to.inverse() * from.jacobian();
    let b = to.inverse() * (*from.origin() - *to.origin());
    let forms: [[f64; 4]; 3] =
        std::array::from_fn(|d| [a[(d, 0)], a[(d, 1)], a[(d, 2)], b[d]]);
    let det = (from.det() / to.det()).abs();

    let order = table.order();
    let mut out = IntegralTable::zeros(order);
    expand_monomials(&forms, order, |[n, m, l], poly, k| {
        let value: f64 = poly
            .iter()
            .zip(&h.exponents[k])
            .map(|(c, beta)| c * table.get(beta[0], beta[1], beta[2]))
            .sum();
        out.set(n, m, l, det * value);
    });
    out
}
