//! Monomial degree enumeration and flat integral tables.
//!
//! A degree triple `(n, m, l)` stands for the monomial `ξⁿ ηᵐ ζˡ` in the
//! reference space of a cell. Triples are always enumerated with `n` in the
//! outer loop, `m` in the middle loop and `l` in the inner loop; the column
//! order of every least-squares matrix and the coefficient order used at
//! evaluation time both follow this enumeration.

use serde::{Deserialize, Serialize};

/// All triples with `n + m + l ≤ order`, in enumeration order.
pub fn triples(order: usize) -> impl Iterator<Item = [usize; 3]> {
    (0..=order).flat_map(move |n| {
        (0..=order - n).flat_map(move |m| (0..=order - n - m).map(move |l| [n, m, l]))
    })
}

/// Per-monomial integrals stored contiguously.
///
/// Storage is a dense `(order + 1)³` cube addressed by
/// `(n·(order+1) + m)·(order+1) + l`; only entries with `n + m + l ≤ order`
/// carry meaning, the remainder stay zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegralTable {
    order: usize,
    data: Vec<f64>,
}

impl IntegralTable {
    pub fn zeros(order: usize) -> Self {
        Self {
            order,
            data: vec![0.0; (order + 1).pow(3)],
        }
    }

    #[inline]
    pub fn offset(order: usize, n: usize, m: usize, l: usize) -> usize {
        (n * (order + 1) + m) * (order + 1) + l
    }

    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn get(&self, n: usize, m: usize, l: usize) -> f64 {
        debug_assert!(n + m + l <= self.order);
        self.data[Self::offset(self.order, n, m, l)]
    }

    #[inline]
    pub fn at(&self, t: [usize; 3]) -> f64 {
        self.get(t[0], t[1], t[2])
    }

    #[inline]
    pub fn set(&mut self, n: usize, m: usize, l: usize, value: f64) {
        let idx = Self::offset(self.order, n, m, l);
        self.data[idx] = value;
    }

    #[inline]
    pub fn add(&mut self, n: usize, m: usize, l: usize, value: f64) {
        let idx = Self::offset(self.order, n, m, l);
        self.data[idx] += value;
    }

    /// Integral of the constant monomial.
    pub fn volume(&self) -> f64 {
        self.get(0, 0, 0)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Degree triples that make up the degrees of freedom of one cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeSet {
    order: usize,
    dims: [usize; 3],
    triples: Vec<[usize; 3]>,
}

impl DegreeSet {
    /// `dims[k]` caps the exponent of the k-th reference coordinate.
    pub fn new(order: usize, dims: [usize; 3]) -> Self {
        let triples = triples(order)
            .filter(|&[n, m, l]| {
                n + m + l > 0 && n <= dims[0] && m <= dims[1] && l <= dims[2]
            })
            .collect();
        Self {
            order,
            dims,
            triples,
        }
    }

    /// Full 3-D set, or the planar set when one direction is empty.
    pub fn for_mesh(order: usize, empty_direction: Option<usize>) -> Self {
        let mut dims = [order; 3];
        if let Some(dir) = empty_direction {
            // the reference frame maps the empty direction onto ζ
            debug_assert!(dir < 3);
            dims[2] = 0;
        }
        Self::new(order, dims)
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Dimension triple: highest exponent per reference coordinate.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn triples(&self) -> &[[usize; 3]] {
        &self.triples
    }

    /// Number of degrees of freedom.
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

/// Degrees of freedom of a polynomial of total degree `order` in `n_dims`
/// dimensions, constant term excluded.
pub fn dof_count(order: usize, n_dims: usize) -> usize {
    match n_dims {
        1 => order,
        2 => (order + 1) * (order + 2) / 2 - 1,
        _ => (order + 1) * (order + 2) * (order + 3) / 6 - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_is_n_outer_l_inner() {
        let order1: Vec<_> = triples(1).collect();
        assert_eq!(order1, vec![[0, 0, 0], [0, 0, 1], [0, 1, 0], [1, 0, 0]]);
    }

    #[test]
    fn degree_sets_match_closed_form() {
        for order in 1..=5 {
            assert_eq!(DegreeSet::for_mesh(order, None).len(), dof_count(order, 3));
            assert_eq!(DegreeSet::for_mesh(order, Some(2)).len(), dof_count(order, 2));
        }
        assert_eq!(dof_count(2, 3), 9);
    }

    #[test]
    fn planar_set_has_no_zeta_terms() {
        let set = DegreeSet::for_mesh(3, Some(1));
        assert!(set.triples().iter().all(|t| t[2] == 0));
        assert_eq!(set.dims(), [3, 3, 0]);
    }

    #[test]
    fn table_offsets_are_dense() {
        let mut t = IntegralTable::zeros(2);
        t.set(1, 0, 1, 4.0);
        assert_eq!(t.as_slice()[IntegralTable::offset(2, 1, 0, 1)], 4.0);
        assert_eq!(t.get(1, 0, 1), 4.0);
        assert_eq!(t.as_slice().len(), 27);
    }
}
