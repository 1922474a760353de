//! Reconstruction setup and the read-only state consumed at solve time.
//!
//! [`ReconstructionScheme::setup`] is collective. It runs the phases in a
//! fixed order so every halo cell is resolved before any matrix is
//! assembled, and it either returns a complete scheme or an error: nothing
//! partially built ever escapes. Each phase closes with a status exchange,
//! so a failure on one rank fails setup on every rank instead of leaving
//! the others blocked in the next collective.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, all_gather_bytes};
use crate::config::ReconstructionConfig;
use crate::geometry::quadrature::Side;
use crate::geometry::{
    DegreeSet, IntegralTable, ReferenceFrame, SurfaceIntegralPair, compute_jacobian, oscillation_matrix,
    surface_integrals, transform_integral, volume_integrals,
};
use crate::io::persist::{self, PersistHeader, PersistedState};
use crate::matrix::{CacheStats, MatrixAssembler, MatrixCache, MatrixHandle};
use crate::mesh::{GlobalCellId, GlobalMeshView, MeshProvider};
use crate::stencil::{HaloPlan, Stencil, StencilBuilder};
use crate::weno_error::WenoError;
use hashbrown::HashMap;
use log::{debug, info, warn};
use nalgebra::DMatrix;
#[cfg(feature = "rayon")]
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What lies across a local face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceNeighbour {
    Internal(usize),
    /// Across a processor boundary; its value arrives with the halo.
    Remote(GlobalCellId),
    Boundary,
}

/// Per-cell output of setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub dims: [usize; 3],
    /// Central stencil first.
    pub stencils: Vec<Stencil>,
    /// One entry per stencil; `None` for deleted stencils.
    pub pseudo_inverses: Vec<Option<MatrixHandle>>,
    pub oscillation: MatrixHandle,
}

/// Per-face output of setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub owner: usize,
    pub neighbour: FaceNeighbour,
    /// Owner weight of the linear interpolation; 1 on physical boundaries.
    pub weight: f64,
    pub integrals: SurfaceIntegralPair,
}

/// Counters of both matrix stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatrixStats {
    pub pseudo_inverse: CacheStats,
    pub oscillation: CacheStats,
}

/// Frame and own-frame volume integrals of one cell.
#[derive(Clone, Debug)]
struct CellGeometry {
    frame: ReferenceFrame,
    table: IntegralTable,
}

type GeometryCache = HashMap<GlobalCellId, CellGeometry>;

const LOAD_MISSING: u8 = 0;
const LOAD_OK: u8 = 1;
const LOAD_MISMATCH: u8 = 2;

#[derive(Clone, Debug)]
pub struct ReconstructionScheme {
    rank: usize,
    size: usize,
    degrees: DegreeSet,
    cells: Vec<CellRecord>,
    faces: Vec<FaceRecord>,
    halo: HaloPlan,
    pseudo_inverses: MatrixCache,
    oscillations: MatrixCache,
}

impl ReconstructionScheme {
    /// Collective: every rank calls this with its own piece of the mesh.
    pub fn setup<M, C>(mesh: &M, config: &ReconstructionConfig, comm: &C) -> Result<Self, WenoError>
    where
        M: MeshProvider,
        C: Communicator,
    {
        agree(comm, tags::STATUS, "configuration", config.validate())?;
        let (rank, size) = (comm.rank(), comm.size());
        let total_volume: f64 = (0..mesh.n_cells()).map(|c| mesh.cell_volume(c)).sum();
        let header = PersistHeader::new(config, rank, size, mesh.n_cells(), mesh.n_faces(), total_volume);

        if let Some(dir) = &config.persist_dir {
            if let Some(state) = load_collectively(dir, &header, comm)? {
                info!("rank {rank}: restored reconstruction state from {}", dir.display());
                return Ok(Self::from_state(config, state));
            }
        }

        // each phase ends in a checkpoint so a local failure aborts every rank
        let degrees = DegreeSet::for_mesh(config.polynomial_order, mesh.empty_direction());
        let built = GlobalMeshView::build(mesh, comm)
            .and_then(|view| Stenciled::build(mesh, config, &degrees, view, rank));
        let mut stenciled = agree(comm, tags::STATUS, "stencil construction", built)?;

        let finished = HaloPlan::build(mesh, &stenciled.view, &mut stenciled.stencils, comm)
            .and_then(|halo| stenciled.finish(mesh, config, degrees, halo, header, size));
        let scheme = agree(comm, tags::STATUS, "matrix assembly", finished)?;

        let stats = scheme.matrix_stats();
        info!(
            "rank {rank}: pseudo-inverse cache {} stored / {} issued ({} hits), oscillation cache {} stored / {} issued ({} hits)",
            stats.pseudo_inverse.stored,
            stats.pseudo_inverse.issued,
            stats.pseudo_inverse.hits,
            stats.oscillation.stored,
            stats.oscillation.issued,
            stats.oscillation.hits
        );
        Ok(scheme)
    }

    /// Snapshot of the scheme for [`persist::save`].
    pub fn to_state(&self, header: PersistHeader) -> PersistedState {
        PersistedState {
            header,
            degrees: self.degrees.clone(),
            cells: self.cells.clone(),
            faces: self.faces.clone(),
            halo: self.halo.clone(),
            pseudo_inverses: self.pseudo_inverses.entries().to_vec(),
            oscillations: self.oscillations.entries().to_vec(),
        }
    }

    pub fn from_state(config: &ReconstructionConfig, state: PersistedState) -> Self {
        Self {
            rank: state.header.rank,
            size: state.header.size,
            degrees: state.degrees,
            cells: state.cells,
            faces: state.faces,
            halo: state.halo,
            pseudo_inverses: MatrixCache::from_parts(config.cache, state.pseudo_inverses),
            oscillations: MatrixCache::from_parts(config.cache, state.oscillations),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// Degrees of freedom per cell, constant term excluded.
    pub fn dof_count(&self) -> usize {
        self.degrees.len()
    }

    pub fn degrees(&self) -> &DegreeSet {
        &self.degrees
    }

    /// Highest exponent per reference coordinate for `cell`.
    pub fn dimensions(&self, cell: usize) -> Option<[usize; 3]> {
        self.cells.get(cell).map(|c| c.dims)
    }

    pub fn stencils(&self, cell: usize) -> &[Stencil] {
        self.cells.get(cell).map_or(&[], |c| c.stencils.as_slice())
    }

    pub fn pseudo_inverse_handle(&self, cell: usize, stencil: usize) -> Option<MatrixHandle> {
        *self.cells.get(cell)?.pseudo_inverses.get(stencil)?
    }

    /// `dof × (members − 1)`; `None` for deleted stencils.
    pub fn pseudo_inverse(&self, cell: usize, stencil: usize) -> Option<&DMatrix<f64>> {
        self.pseudo_inverses.get(self.pseudo_inverse_handle(cell, stencil)?)
    }

    /// Smoothness-indicator matrix for the polynomial of one stencil; every
    /// live stencil of a cell shares its cell's matrix.
    pub fn oscillation(&self, cell: usize, stencil: usize) -> Option<&DMatrix<f64>> {
        let record = self.cells.get(cell)?;
        match record.pseudo_inverses.get(stencil)? {
            Some(_) => self.oscillations.get(record.oscillation),
            None => None,
        }
    }

    pub fn face_owner(&self, face: usize) -> Option<usize> {
        self.faces.get(face).map(|f| f.owner)
    }

    pub fn face_neighbour(&self, face: usize) -> Option<FaceNeighbour> {
        self.faces.get(face).map(|f| f.neighbour)
    }

    pub fn surface_integrals(&self, face: usize) -> Option<&SurfaceIntegralPair> {
        self.faces.get(face).map(|f| &f.integrals)
    }

    pub fn reference_face_area(&self, face: usize) -> Option<f64> {
        self.surface_integrals(face).map(SurfaceIntegralPair::reference_area)
    }

    pub fn face_weight(&self, face: usize) -> Option<f64> {
        self.faces.get(face).map(|f| f.weight)
    }

    pub fn halo_plan(&self) -> &HaloPlan {
        &self.halo
    }

    pub fn send_proc_list(&self) -> Vec<usize> {
        self.halo.send_procs()
    }

    pub fn receive_proc_list(&self) -> Vec<usize> {
        self.halo.receive_procs()
    }

    /// Cache counters of this session; a restored scheme has issued nothing.
    pub fn matrix_stats(&self) -> MatrixStats {
        MatrixStats {
            pseudo_inverse: self.pseudo_inverses.stats(),
            oscillation: self.oscillations.stats(),
        }
    }
}

/// Local state between stencil construction and matrix assembly.
struct Stenciled {
    rank: usize,
    view: GlobalMeshView,
    local: Vec<GlobalCellId>,
    geometry: GeometryCache,
    stencils: Vec<Vec<Stencil>>,
}

impl Stenciled {
    /// Frames of the local cells and their stencils; no communication.
    fn build<M: MeshProvider>(
        mesh: &M,
        config: &ReconstructionConfig,
        degrees: &DegreeSet,
        view: GlobalMeshView,
        rank: usize,
    ) -> Result<Self, WenoError> {
        if view.n_local_cells() != mesh.n_cells() {
            return Err(WenoError::DistributedConsistency(format!(
                "rank {rank}: view holds {} local cells, mesh {}",
                view.n_local_cells(),
                mesh.n_cells()
            )));
        }
        let empty_direction = mesh.empty_direction();
        let local: Vec<GlobalCellId> = view.local_cells().collect();
        let geometry = cell_geometry(&view, &local, degrees.order(), empty_direction)?;

        let builder = StencilBuilder::new(
            &view,
            degrees.len(),
            config.extend_ratio,
            config.split,
            empty_direction,
        );
        let stencils = local
            .iter()
            .map(|&g| builder.build(g, &geometry_of(&geometry, g)?.frame))
            .collect::<Result<Vec<_>, _>>()?;
        let n_stencils: usize = stencils.iter().map(Vec::len).sum();
        info!(
            "rank {rank}: built {n_stencils} stencils for {} cells ({} members each)",
            local.len(),
            builder.required()
        );
        Ok(Self {
            rank,
            view,
            local,
            geometry,
            stencils,
        })
    }

    /// Halo geometry, matrices, face records and the optional save.
    fn finish<M: MeshProvider>(
        self,
        mesh: &M,
        config: &ReconstructionConfig,
        degrees: DegreeSet,
        halo: HaloPlan,
        header: PersistHeader,
        size: usize,
    ) -> Result<ReconstructionScheme, WenoError> {
        let Self {
            rank,
            view,
            local,
            mut geometry,
            stencils,
        } = self;
        let order = degrees.order();
        let empty_direction = mesh.empty_direction();

        let mut remote: Vec<GlobalCellId> = stencils
            .iter()
            .flatten()
            .filter(|s| !s.is_deleted())
            .flat_map(Stencil::member_ids)
            .chain((0..mesh.n_faces()).filter_map(|f| view.remote_neighbour(f)))
            .filter(|g| !geometry.contains_key(g))
            .collect();
        remote.sort_unstable();
        remote.dedup();
        geometry.extend(cell_geometry(&view, &remote, order, empty_direction)?);
        debug!("rank {rank}: geometry for {} local and {} halo cells", local.len(), remote.len());

        let assembler = MatrixAssembler::new(degrees.clone(), config.best_conditioned);
        let mut pseudo_inverses = MatrixCache::new(config.cache);
        let mut oscillations = MatrixCache::new(config.cache);
        let mut cells = Vec::with_capacity(local.len());
        let mut deficient = 0usize;
        for (&g, cell_stencils) in local.iter().zip(stencils) {
            let target = geometry_of(&geometry, g)?;
            let mut handles = Vec::with_capacity(cell_stencils.len());
            for stencil in &cell_stencils {
                if stencil.is_deleted() {
                    handles.push(None);
                    continue;
                }
                let members = stencil.members()[1..]
                    .iter()
                    .map(|e| {
                        let other = geometry_of(&geometry, e.cell)?;
                        Ok(transform_integral(&other.table, &other.frame, &target.frame))
                    })
                    .collect::<Result<Vec<IntegralTable>, WenoError>>()?;
                let assembled = assembler.assemble(g, &target.table, &members)?;
                deficient += usize::from(assembled.is_rank_deficient());
                handles.push(Some(pseudo_inverses.intern(assembled.pseudo_inverse)));
            }
            let b = oscillation_matrix(view.shape(g)?, &target.frame, &degrees);
            cells.push(CellRecord {
                dims: degrees.dims(),
                stencils: cell_stencils,
                pseudo_inverses: handles,
                oscillation: oscillations.intern(b),
            });
        }

        if deficient > 0 {
            info!("rank {rank}: {deficient} stencils use a rank-deficient least-squares inverse");
        }

        let faces = (0..mesh.n_faces())
            .map(|f| face_record(mesh, &view, &geometry, f))
            .collect::<Result<Vec<_>, _>>()?;

        let scheme = ReconstructionScheme {
            rank,
            size,
            degrees,
            cells,
            faces,
            halo,
            pseudo_inverses,
            oscillations,
        };
        if let Some(dir) = &config.persist_dir {
            let path = persist::save(dir, &scheme.to_state(header))?;
            debug!("rank {rank}: saved reconstruction state to {}", path.display());
        }
        Ok(scheme)
    }
}

fn geometry_of(geometry: &GeometryCache, g: GlobalCellId) -> Result<&CellGeometry, WenoError> {
    geometry
        .get(&g)
        .ok_or_else(|| WenoError::DistributedConsistency(format!("no geometry for cell {g}")))
}

fn one_cell(
    view: &GlobalMeshView,
    g: GlobalCellId,
    order: usize,
    empty_direction: Option<usize>,
) -> Result<(GlobalCellId, CellGeometry), WenoError> {
    let shape = view.shape(g)?;
    let frame = compute_jacobian(shape, empty_direction).map_err(|err| WenoError::GeometryFailure {
        cell: g,
        reason: err.to_string(),
    })?;
    let table = volume_integrals(shape, order, &frame);
    Ok((g, CellGeometry { frame, table }))
}

#[cfg(feature = "rayon")]
fn cell_geometry(
    view: &GlobalMeshView,
    cells: &[GlobalCellId],
    order: usize,
    empty_direction: Option<usize>,
) -> Result<GeometryCache, WenoError> {
    cells
        .par_iter()
        .map(|&g| one_cell(view, g, order, empty_direction))
        .collect::<Result<Vec<_>, _>>()
        .map(|v| v.into_iter().collect())
}

#[cfg(not(feature = "rayon"))]
fn cell_geometry(
    view: &GlobalMeshView,
    cells: &[GlobalCellId],
    order: usize,
    empty_direction: Option<usize>,
) -> Result<GeometryCache, WenoError> {
    cells
        .iter()
        .map(|&g| one_cell(view, g, order, empty_direction))
        .collect()
}

fn face_record<M: MeshProvider>(
    mesh: &M,
    view: &GlobalMeshView,
    geometry: &GeometryCache,
    face: usize,
) -> Result<FaceRecord, WenoError> {
    let owner = mesh.face_owner(face);
    let global = |local: usize| {
        view.global_id(local).ok_or_else(|| {
            WenoError::DistributedConsistency(format!("face {face}: local cell {local} has no global id"))
        })
    };
    let (neighbour, across) = match (mesh.face_neighbour(face), view.remote_neighbour(face)) {
        (Some(n), _) => (FaceNeighbour::Internal(n), Some(global(n)?)),
        (None, Some(g)) => (FaceNeighbour::Remote(g), Some(g)),
        (None, None) => (FaceNeighbour::Boundary, None),
    };
    let side = |g: GlobalCellId| {
        geometry_of(geometry, g).map(|geo| Side {
            frame: &geo.frame,
            volume: &geo.table,
        })
    };
    let owner_g = global(owner)?;
    let points = mesh.face_points(face);
    let owner_side = side(owner_g)?;
    let (integrals, weight) = match across {
        Some(g) => {
            let s = mesh.face_area_vector(face);
            let cf = mesh.face_centre(face);
            let d_owner = s.dot(&(cf - view.centroid(owner_g)?)).abs();
            let d_neighbour = s.dot(&(view.centroid(g)? - cf)).abs();
            let weight = d_neighbour / (d_owner + d_neighbour);
            (surface_integrals(&points, owner_side, Some(side(g)?)), weight)
        }
        None => (surface_integrals(&points, owner_side, None), 1.0),
    };
    Ok(FaceRecord {
        owner,
        neighbour,
        weight,
        integrals,
    })
}

/// Every rank loads its own file, then all ranks agree: a mismatch anywhere
/// fails everywhere, a missing file anywhere means everyone recomputes.
fn load_collectively<C: Communicator>(
    dir: &Path,
    header: &PersistHeader,
    comm: &C,
) -> Result<Option<PersistedState>, WenoError> {
    let (flag, state, error) = match persist::load(dir, header) {
        Ok(Some(state)) => (LOAD_OK, Some(state), None),
        Ok(None) => (LOAD_MISSING, None, None),
        Err(err) => (LOAD_MISMATCH, None, Some(err)),
    };
    let flags: Vec<u8> = all_gather_bytes(comm, tags::PERSIST, &[flag])?
        .into_iter()
        .map(|b| b.first().copied().unwrap_or(LOAD_MISMATCH))
        .collect();
    if let Some(err) = error {
        return Err(err);
    }
    if let Some(r) = flags.iter().position(|&f| f == LOAD_MISMATCH) {
        return Err(WenoError::PersistenceFormatMismatch(format!(
            "persisted state of rank {r} does not match the current setup"
        )));
    }
    if flags.iter().any(|&f| f == LOAD_MISSING) {
        if state.is_some() {
            warn!(
                "rank {}: persisted state missing on some ranks, recomputing",
                comm.rank()
            );
        }
        return Ok(None);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::SplitPolicy;
    use crate::mesh::hex_box;

    fn config(order: usize) -> ReconstructionConfig {
        ReconstructionConfig {
            polynomial_order: order,
            split: SplitPolicy::Never,
            ..Default::default()
        }
    }

    #[test]
    fn serial_setup_fills_every_cell_and_face() {
        let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
        let scheme = ReconstructionScheme::setup(&mesh, &config(1), &NoComm).unwrap();
        assert_eq!(scheme.n_cells(), 64);
        assert_eq!(scheme.n_faces(), mesh.n_faces());
        assert_eq!(scheme.dof_count(), 3);
        assert_eq!(scheme.dimensions(0), Some([1, 1, 1]));
        for cell in 0..64 {
            let pinv = scheme.pseudo_inverse(cell, 0).unwrap();
            assert_eq!(pinv.shape(), (3, scheme.stencils(cell)[0].len() - 1));
            assert!(scheme.oscillation(cell, 0).is_some());
        }
        assert!(scheme.pseudo_inverse(64, 0).is_none());
        assert!(scheme.send_proc_list().is_empty() && scheme.receive_proc_list().is_empty());
    }

    #[test]
    fn uniform_mesh_shares_matrices() {
        let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
        let scheme = ReconstructionScheme::setup(&mesh, &config(1), &NoComm).unwrap();
        let stats = scheme.matrix_stats();
        // interior cells see the same geometry in the same order
        assert_eq!(stats.oscillation.issued, 64);
        assert!(stats.oscillation.hits > 0);
        assert_eq!(stats.pseudo_inverse.issued, 64);
        assert!(stats.pseudo_inverse.stored < 64);
    }

    #[test]
    fn face_weights_are_halves_inside_and_one_on_the_boundary() {
        let mesh = hex_box([3, 3, 3], [0.0; 3], [3.0; 3]).unwrap();
        let scheme = ReconstructionScheme::setup(&mesh, &config(1), &NoComm).unwrap();
        for f in 0..scheme.n_faces() {
            let w = scheme.face_weight(f).unwrap();
            match scheme.face_neighbour(f).unwrap() {
                FaceNeighbour::Internal(_) => assert!((w - 0.5).abs() < 1e-12),
                FaceNeighbour::Boundary => assert_eq!(w, 1.0),
                FaceNeighbour::Remote(_) => unreachable!(),
            }
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_any_work() {
        let mesh = hex_box([2, 2, 2], [0.0; 3], [1.0; 3]).unwrap();
        let err = ReconstructionScheme::setup(&mesh, &config(0), &NoComm).unwrap_err();
        assert!(matches!(err, WenoError::InvalidConfig(_)));
    }
}
