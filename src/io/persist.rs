//! Per-rank persistence of the precomputed reconstruction state.
//!
//! Each rank writes `weno.rank{r}-of{n}.bin` (bincode body) next to a JSON
//! sidecar holding the header only, so a stale file can be inspected
//! without decoding the body.

use crate::config::{MatrixCacheConfig, ReconstructionConfig, SplitPolicy};
use crate::geometry::DegreeSet;
use crate::reconstruction::{CellRecord, FaceRecord};
use crate::stencil::HaloPlan;
use crate::weno_error::WenoError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 2;

const VOLUME_TOLERANCE: f64 = 1e-9;

/// Identifies the mesh piece and configuration a state was computed for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistHeader {
    pub version: u32,
    pub rank: usize,
    pub size: usize,
    pub polynomial_order: usize,
    pub extend_ratio: f64,
    pub best_conditioned: bool,
    pub split: SplitPolicy,
    /// Matching tolerances the stored matrices were deduplicated with.
    pub cache: MatrixCacheConfig,
    pub n_cells: usize,
    pub n_faces: usize,
    pub total_volume: f64,
}

impl PersistHeader {
    pub fn new(
        config: &ReconstructionConfig,
        rank: usize,
        size: usize,
        n_cells: usize,
        n_faces: usize,
        total_volume: f64,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            rank,
            size,
            polynomial_order: config.polynomial_order,
            extend_ratio: config.extend_ratio,
            best_conditioned: config.best_conditioned,
            split: config.split,
            cache: config.cache,
            n_cells,
            n_faces,
            total_volume,
        }
    }

    /// Fails with the first field that differs from `expected`.
    pub fn check(&self, expected: &PersistHeader) -> Result<(), WenoError> {
        let mismatch = |what: &str, found: String, want: String| {
            Err(WenoError::PersistenceFormatMismatch(format!(
                "{what}: stored {found}, expected {want}"
            )))
        };
        if self.version != expected.version {
            return mismatch("format version", self.version.to_string(), expected.version.to_string());
        }
        if (self.rank, self.size) != (expected.rank, expected.size) {
            return mismatch(
                "rank layout",
                format!("{}/{}", self.rank, self.size),
                format!("{}/{}", expected.rank, expected.size),
            );
        }
        if self.polynomial_order != expected.polynomial_order {
            return mismatch(
                "polynomial order",
                self.polynomial_order.to_string(),
                expected.polynomial_order.to_string(),
            );
        }
        if self.extend_ratio != expected.extend_ratio
            || self.best_conditioned != expected.best_conditioned
            || self.split != expected.split
        {
            return mismatch(
                "stencil settings",
                format!("{} / {} / {:?}", self.extend_ratio, self.best_conditioned, self.split),
                format!(
                    "{} / {} / {:?}",
                    expected.extend_ratio, expected.best_conditioned, expected.split
                ),
            );
        }
        if self.cache != expected.cache {
            return mismatch(
                "matrix cache settings",
                format!("{:?}", self.cache),
                format!("{:?}", expected.cache),
            );
        }
        if (self.n_cells, self.n_faces) != (expected.n_cells, expected.n_faces) {
            return mismatch(
                "mesh size",
                format!("{} cells, {} faces", self.n_cells, self.n_faces),
                format!("{} cells, {} faces", expected.n_cells, expected.n_faces),
            );
        }
        let scale = expected.total_volume.abs().max(f64::MIN_POSITIVE);
        if (self.total_volume - expected.total_volume).abs() > VOLUME_TOLERANCE * scale {
            return mismatch(
                "mesh volume",
                self.total_volume.to_string(),
                expected.total_volume.to_string(),
            );
        }
        Ok(())
    }
}

/// Everything setup produces on one rank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub header: PersistHeader,
    pub degrees: DegreeSet,
    pub cells: Vec<CellRecord>,
    pub faces: Vec<FaceRecord>,
    pub halo: HaloPlan,
    /// Canonical pseudo-inverses, in handle order.
    pub pseudo_inverses: Vec<DMatrix<f64>>,
    /// Canonical oscillation matrices, in handle order.
    pub oscillations: Vec<DMatrix<f64>>,
}

pub fn file_stem(rank: usize, size: usize) -> String {
    format!("weno.rank{rank}-of{size}")
}

fn state_paths(dir: &Path, rank: usize, size: usize) -> (PathBuf, PathBuf) {
    let stem = file_stem(rank, size);
    (dir.join(format!("{stem}.bin")), dir.join(format!("{stem}.json")))
}

pub fn write_to<W: Write>(state: &PersistedState, writer: W) -> Result<(), WenoError> {
    bincode::serialize_into(writer, state)?;
    Ok(())
}

pub fn read_from<R: Read>(reader: R) -> Result<PersistedState, WenoError> {
    Ok(bincode::deserialize_from(reader)?)
}

/// Write `state` into `dir`, returning the body path.
pub fn save(dir: impl AsRef<Path>, state: &PersistedState) -> Result<PathBuf, WenoError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let (body, sidecar) = state_paths(dir, state.header.rank, state.header.size);

    let mut writer = BufWriter::new(File::create(&body)?);
    write_to(state, &mut writer)?;
    writer.flush()?;
    fs::write(&sidecar, serde_json::to_vec_pretty(&state.header)?)?;
    Ok(body)
}

/// Load the state written for `expected.rank`; `Ok(None)` when absent.
pub fn load(dir: impl AsRef<Path>, expected: &PersistHeader) -> Result<Option<PersistedState>, WenoError> {
    let (body, _) = state_paths(dir.as_ref(), expected.rank, expected.size);
    let file = match File::open(&body) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let state = read_from(BufReader::new(file))
        .map_err(|err| WenoError::PersistenceFormatMismatch(format!("{}: {err}", body.display())))?;
    state.header.check(expected)?;
    Ok(Some(state))
}
