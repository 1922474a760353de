//! Least-squares reconstruction matrices and their pseudo-inverses.

use crate::geometry::{DegreeSet, IntegralTable};
use crate::mesh::GlobalCellId;
use crate::weno_error::WenoError;
use itertools::Itertools;
use log::debug;
use nalgebra::DMatrix;

/// Singular values at or below this fraction of the largest count as zero.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Result of assembling one stencil.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledStencil {
    /// One row per non-target member, one column per degree triple.
    pub matrix: DMatrix<f64>,
    /// `dof × rows`; a dropped row has a zero column here.
    pub pseudo_inverse: DMatrix<f64>,
    /// Row left out by the best-conditioned search.
    pub dropped: Option<usize>,
    /// Numerical rank of the retained rows.
    pub rank: usize,
    /// `σ_max / σ_min`, infinite when rank-deficient.
    pub condition: f64,
}

impl AssembledStencil {
    pub fn is_rank_deficient(&self) -> bool {
        self.rank < self.pseudo_inverse.nrows()
    }
}

#[derive(Clone, Debug)]
pub struct MatrixAssembler {
    degrees: DegreeSet,
    best_conditioned: bool,
}

impl MatrixAssembler {
    pub fn new(degrees: DegreeSet, best_conditioned: bool) -> Self {
        Self {
            degrees,
            best_conditioned,
        }
    }

    pub fn degrees(&self) -> &DegreeSet {
        &self.degrees
    }

    /// Row `j`: mean of each basis monomial over member `j` minus its mean
    /// over the target, everything in the target's reference space.
    pub fn least_squares_matrix(&self, target: &IntegralTable, members: &[IntegralTable]) -> DMatrix<f64> {
        let basis = self.degrees.triples();
        let v_target = target.volume();
        DMatrix::from_fn(members.len(), basis.len(), |j, k| {
            let t = basis[k];
            members[j].at(t) / members[j].volume() - target.at(t) / v_target
        })
    }

    /// Assemble the matrix of `cell`'s stencil and its pseudo-inverse.
    ///
    /// `members` excludes the target and must already be expressed in the
    /// target's frame. A rank-deficient system yields the minimum-norm
    /// inverse; only a matrix with no usable singular value is an error.
    pub fn assemble(
        &self,
        cell: GlobalCellId,
        target: &IntegralTable,
        members: &[IntegralTable],
    ) -> Result<AssembledStencil, WenoError> {
        let matrix = self.least_squares_matrix(target, members);
        let rows = matrix.nrows();
        let dof = self.degrees.len();
        if rows < dof {
            return Err(WenoError::GeometryFailure {
                cell,
                reason: format!("{rows} stencil rows cannot determine {dof} coefficients"),
            });
        }

        let mut best: Option<(Candidate, Option<usize>)> = pseudo_inverse(&matrix).map(|c| (c, None));
        if self.best_conditioned && rows > dof {
            for keep in (0..rows).combinations(rows - 1) {
                let dropped = (0..rows).find(|r| !keep.contains(r));
                let sub = matrix.select_rows(keep.iter());
                let Some(candidate) = pseudo_inverse(&sub) else {
                    continue;
                };
                if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
                    best = Some((candidate, dropped));
                }
            }
        }

        let (Candidate { rank, condition, pinv }, dropped) = best.ok_or_else(|| WenoError::GeometryFailure {
            cell,
            reason: format!("least-squares matrix of {rows}×{dof} has no usable singular value"),
        })?;
        if rank < dof {
            debug!("cell {cell}: least-squares matrix has rank {rank} of {dof}");
        }
        let pseudo_inverse = match dropped {
            Some(r) => {
                debug!("cell {cell}: dropping stencil row {r}, condition {condition:.3e}");
                pinv.insert_column(r, 0.0)
            }
            None => pinv,
        };
        Ok(AssembledStencil {
            matrix,
            pseudo_inverse,
            dropped,
            rank,
            condition,
        })
    }
}

struct Candidate {
    rank: usize,
    condition: f64,
    pinv: DMatrix<f64>,
}

impl Candidate {
    /// Higher rank first, then strictly lower condition number.
    fn beats(&self, other: &Candidate) -> bool {
        self.rank > other.rank || (self.rank == other.rank && self.condition < other.condition)
    }
}

/// Truncated-SVD pseudo-inverse, or `None` when nothing survives truncation.
fn pseudo_inverse(a: &DMatrix<f64>) -> Option<Candidate> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let svd = a.clone().svd(true, true);
    let s = &svd.singular_values;
    let max = s.max();
    if !(max > 0.0) {
        return None;
    }
    let cut = RANK_TOLERANCE * max;
    let rank = s.iter().filter(|&&v| v > cut).count();
    let condition = if rank == a.ncols() { max / s.min() } else { f64::INFINITY };
    let pinv = svd.pseudo_inverse(cut).ok()?;
    Some(Candidate { rank, condition, pinv })
}
