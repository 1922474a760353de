//! Solve-time consumer of a [`ReconstructionScheme`].
//!
//! Given cell averages of a scalar field, evaluates the stencil polynomials,
//! blends them with WENO weights and turns the result into face-value
//! corrections on top of linear interpolation.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::exchange_sized;
use crate::algs::wire::{WireScalar, cast_slice, decode_records};
use crate::reconstruction::{FaceNeighbour, ReconstructionScheme};
use crate::stencil::{CellSource, StencilEntry, StencilKind};
use crate::weno_error::WenoError;
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Halo cell values received from their owners, in receive-slot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HaloValues {
    by_owner: BTreeMap<usize, Vec<f64>>,
}

impl HaloValues {
    pub fn get(&self, owner: usize, slot: usize) -> Option<f64> {
        self.by_owner.get(&owner)?.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.by_owner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Linear weights and the smoothness sensitivity of the WENO blend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WenoWeights {
    pub central: f64,
    pub sectorial: f64,
    pub exponent: i32,
    pub epsilon: f64,
}

impl Default for WenoWeights {
    fn default() -> Self {
        Self {
            central: 1000.0,
            sectorial: 1.0,
            exponent: 4,
            epsilon: 1e-10,
        }
    }
}

/// `cᵀ B c`.
pub fn smoothness_indicator(b: &DMatrix<f64>, c: &DVector<f64>) -> f64 {
    c.dot(&(b * c))
}

pub struct ReconstructionEvaluator<'a> {
    scheme: &'a ReconstructionScheme,
    weights: WenoWeights,
}

impl<'a> ReconstructionEvaluator<'a> {
    pub fn new(scheme: &'a ReconstructionScheme) -> Self {
        Self {
            scheme,
            weights: WenoWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: WenoWeights) -> Self {
        self.weights = weights;
        self
    }

    fn check_field(&self, values: &[f64]) -> Result<(), WenoError> {
        let expected = self.scheme.n_cells();
        if values.len() != expected {
            return Err(WenoError::FieldLength {
                expected,
                got: values.len(),
            });
        }
        Ok(())
    }

    /// Collective: one message per rank pair of the halo plan.
    pub fn exchange_halo_values<C: Communicator>(&self, values: &[f64], comm: &C) -> Result<HaloValues, WenoError> {
        self.check_field(values)?;
        let plan = self.scheme.halo_plan();
        let outgoing: BTreeMap<usize, Vec<u8>> = plan
            .send_procs()
            .into_iter()
            .map(|rank| {
                let wire: Vec<WireScalar> = plan
                    .send_cells(rank)
                    .iter()
                    .map(|&c| WireScalar::of(values[c]))
                    .collect();
                (rank, cast_slice(&wire).to_vec())
            })
            .collect();
        let sizes: BTreeMap<usize, usize> = plan
            .receive_procs()
            .into_iter()
            .map(|rank| (rank, plan.receive_cells(rank).len() * std::mem::size_of::<WireScalar>()))
            .collect();

        let received = exchange_sized(comm, tags::HALO_VALUES, &outgoing, &sizes)?;
        let mut by_owner = BTreeMap::new();
        for (rank, bytes) in received {
            let wire: Vec<WireScalar> = decode_records(&bytes).map_err(|msg| WenoError::comm(rank, msg))?;
            by_owner.insert(rank, wire.iter().map(WireScalar::get).collect());
        }
        debug!(
            "rank {}: exchanged halo values with {} ranks",
            self.scheme.rank(),
            by_owner.len()
        );
        Ok(HaloValues { by_owner })
    }

    fn value_of(&self, entry: &StencilEntry, values: &[f64], halo: &HaloValues) -> Result<f64, WenoError> {
        let missing = || {
            WenoError::DistributedConsistency(format!("no value for stencil member {}", entry.cell))
        };
        let slot = entry.slot.ok_or_else(missing)?;
        match entry.source {
            CellSource::Local => values.get(slot).copied().ok_or_else(missing),
            CellSource::Remote(owner) => halo.get(owner, slot).ok_or_else(missing),
            CellSource::Deleted => Err(missing()),
        }
    }

    /// `pinv · (u_j − u_i)` per stencil of `cell`; `None` for deleted stencils.
    pub fn stencil_coefficients(
        &self,
        cell: usize,
        values: &[f64],
        halo: &HaloValues,
    ) -> Result<Vec<Option<DVector<f64>>>, WenoError> {
        self.check_field(values)?;
        let u_i = *values.get(cell).ok_or_else(|| {
            WenoError::DistributedConsistency(format!("cell {cell} is not local to rank {}", self.scheme.rank()))
        })?;
        self.scheme
            .stencils(cell)
            .iter()
            .enumerate()
            .map(|(s, stencil)| {
                let Some(pinv) = self.scheme.pseudo_inverse(cell, s) else {
                    return Ok(None);
                };
                let rhs = stencil.members()[1..]
                    .iter()
                    .map(|e| Ok(self.value_of(e, values, halo)? - u_i))
                    .collect::<Result<Vec<f64>, WenoError>>()?;
                Ok(Some(pinv * DVector::from_vec(rhs)))
            })
            .collect()
    }

    /// WENO blend of the stencil polynomials of `cell`.
    pub fn weighted_coefficients(&self, cell: usize, values: &[f64], halo: &HaloValues) -> Result<DVector<f64>, WenoError> {
        let coeffs = self.stencil_coefficients(cell, values, halo)?;
        let stencils = self.scheme.stencils(cell);
        let mut blended = DVector::zeros(self.scheme.dof_count());
        let mut total = 0.0;
        for (s, c) in coeffs.iter().enumerate() {
            let (Some(c), Some(b)) = (c, self.scheme.oscillation(cell, s)) else {
                continue;
            };
            let linear = match stencils[s].kind() {
                StencilKind::Central => self.weights.central,
                StencilKind::Sector(_) => self.weights.sectorial,
            };
            let is = smoothness_indicator(b, c);
            let w = linear / (self.weights.epsilon + is).powi(self.weights.exponent);
            blended += c * w;
            total += w;
        }
        if total > 0.0 {
            blended /= total;
        }
        Ok(blended)
    }

    /// Face average of the zero-mean part of the owner's polynomial.
    pub fn face_average_correction(&self, face: usize, coeffs: &DVector<f64>) -> Option<f64> {
        let pair = self.scheme.surface_integrals(face)?;
        let area = pair.reference_area();
        let sum: f64 = self
            .scheme
            .degrees()
            .triples()
            .iter()
            .zip(coeffs.iter())
            .map(|(&t, c)| c * pair.owner.table.at(t))
            .sum();
        Some(sum / area)
    }

    /// Per face, the amount to add to `w u_P + (1 − w) u_N` to reach the
    /// owner's reconstructed face average; zero on physical boundaries.
    pub fn face_corrections(&self, values: &[f64], halo: &HaloValues) -> Result<Vec<f64>, WenoError> {
        self.check_field(values)?;
        let coeffs = (0..self.scheme.n_cells())
            .map(|c| self.weighted_coefficients(c, values, halo))
            .collect::<Result<Vec<_>, _>>()?;
        let plan = self.scheme.halo_plan();
        (0..self.scheme.n_faces())
            .map(|f| {
                let missing = || WenoError::DistributedConsistency(format!("face {f} is not part of the scheme"));
                let owner = self.scheme.face_owner(f).ok_or_else(missing)?;
                let u_n = match self.scheme.face_neighbour(f).ok_or_else(missing)? {
                    FaceNeighbour::Boundary => return Ok(0.0),
                    FaceNeighbour::Internal(n) => values[n],
                    FaceNeighbour::Remote(g) => plan
                        .slot_of(g)
                        .and_then(|(rank, slot)| halo.get(rank, slot))
                        .ok_or_else(|| {
                            WenoError::DistributedConsistency(format!("no halo value for cell {g} across face {f}"))
                        })?,
                };
                let w = self.scheme.face_weight(f).ok_or_else(missing)?;
                let correction = self.face_average_correction(f, &coeffs[owner]).ok_or_else(missing)?;
                Ok((1.0 - w) * (values[owner] - u_n) + correction)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::{ReconstructionConfig, SplitPolicy};
    use crate::mesh::{MeshProvider, hex_box};

    #[test]
    fn indicator_is_a_quadratic_form() {
        let b = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let c = DVector::from_vec(vec![1.0, -1.0]);
        assert_eq!(smoothness_indicator(&b, &c), 3.0);
    }

    #[test]
    fn constant_field_needs_no_correction() {
        let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
        let config = ReconstructionConfig {
            polynomial_order: 2,
            split: SplitPolicy::Never,
            ..Default::default()
        };
        let scheme = ReconstructionScheme::setup(&mesh, &config, &NoComm).unwrap();
        let eval = ReconstructionEvaluator::new(&scheme);
        let values = vec![2.5; mesh.n_cells()];
        let halo = eval.exchange_halo_values(&values, &NoComm).unwrap();
        assert!(halo.is_empty());
        let corr = eval.face_corrections(&values, &halo).unwrap();
        assert!(corr.iter().all(|c| c.abs() < 1e-12));
    }

    #[test]
    fn wrong_field_length_is_rejected() {
        let mesh = hex_box([3, 3, 3], [0.0; 3], [1.0; 3]).unwrap();
        let config = ReconstructionConfig {
            polynomial_order: 1,
            split: SplitPolicy::Never,
            ..Default::default()
        };
        let scheme = ReconstructionScheme::setup(&mesh, &config, &NoComm).unwrap();
        let eval = ReconstructionEvaluator::new(&scheme);
        let err = eval.face_corrections(&[1.0; 3], &HaloValues::default()).unwrap_err();
        assert!(matches!(err, WenoError::FieldLength { expected: 27, got: 3 }));
    }
}
