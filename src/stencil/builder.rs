//! Stencil growth, trimming and sectorial splitting.
//!
//! Stencils grow breadth-first over face-neighbour connectivity of the global
//! mesh image, one whole layer at a time, so halo cells are discovered like
//! any other cell and merely tagged with their owning rank.

use crate::config::SplitPolicy;
use crate::geometry::frame::{ReferenceFrame, transform_point};
use crate::mesh::{GlobalCellId, GlobalMeshView};
use crate::stencil::{CellSource, Stencil, StencilEntry, StencilKind};
use crate::weno_error::WenoError;
use hashbrown::HashSet;
use log::{debug, warn};
use nalgebra::{Point3, Vector3};

/// Members needed for `dof` degrees of freedom, target cell included.
pub fn required_stencil_size(dof: usize, extend_ratio: f64) -> usize {
    (extend_ratio * dof as f64).ceil() as usize
}

/// Builds the central and sectorial stencils of local cells.
pub struct StencilBuilder<'a> {
    view: &'a GlobalMeshView,
    required: usize,
    split: SplitPolicy,
    empty_direction: Option<usize>,
}

/// Outward face normal of the target, in its reference frame.
struct Sector {
    face: usize,
    normal: Vector3<f64>,
}

impl<'a> StencilBuilder<'a> {
    pub fn new(
        view: &'a GlobalMeshView,
        dof: usize,
        extend_ratio: f64,
        split: SplitPolicy,
        empty_direction: Option<usize>,
    ) -> Self {
        Self {
            view,
            required: required_stencil_size(dof, extend_ratio),
            split,
            empty_direction,
        }
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Central stencil first, then one stencil per sector when split.
    pub fn build(&self, target: GlobalCellId, frame: &ReferenceFrame) -> Result<Vec<Stencil>, WenoError> {
        let pool = self.grow(target, self.required)?;
        if pool.len() < self.required {
            return Err(WenoError::StencilGrowthFailure {
                cell: target,
                reached: pool.len(),
                required: self.required,
            });
        }
        let mut rest = pool[1..].to_vec();
        self.sort_by_distance(target, &mut rest)?;
        rest.truncate(self.required - 1);

        let sectors = self.sectors(target, frame)?;
        let split = self.should_split(target, &rest, &sectors, frame)?;
        let central = self.stencil(StencilKind::Central, target, &rest)?;
        let mut stencils = vec![central];
        if !split {
            return Ok(stencils);
        }

        let wide = self.grow(target, self.required * sectors.len())?;
        let mut bins: Vec<Vec<GlobalCellId>> = vec![Vec::new(); sectors.len()];
        for &g in &wide[1..] {
            if let Some(s) = self.bin(target, g, &sectors, frame)? {
                bins[s].push(g);
            }
        }
        let mut deleted = 0;
        for (sector, mut cells) in sectors.iter().zip(bins) {
            self.sort_by_distance(target, &mut cells)?;
            let kind = StencilKind::Sector(sector.face);
            if cells.len() + 1 >= self.required {
                cells.truncate(self.required - 1);
                stencils.push(self.stencil(kind, target, &cells)?);
            } else {
                let mut stencil = self.stencil(kind, target, &cells)?;
                stencil.mark_deleted();
                stencils.push(stencil);
                deleted += 1;
            }
        }
        if deleted > 0 {
            warn!(
                "cell {target}: {deleted} of {} sectorial stencils short of {} cells, marked deleted",
                sectors.len(),
                self.required
            );
        }
        debug!("cell {target}: split into {} sectors", sectors.len());
        Ok(stencils)
    }

    /// Breadth-first growth by whole layers until at least `want` cells
    /// (target included) are collected or connectivity is exhausted.
    fn grow(&self, target: GlobalCellId, want: usize) -> Result<Vec<GlobalCellId>, WenoError> {
        let mut visited: HashSet<GlobalCellId> = HashSet::new();
        visited.insert(target);
        let mut pool = vec![target];
        let mut layer = vec![target];
        while pool.len() < want {
            let mut next = Vec::new();
            for &c in &layer {
                for &nb in self.view.neighbours(c)? {
                    if visited.insert(nb) {
                        next.push(nb);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            pool.extend_from_slice(&next);
            layer = next;
        }
        Ok(pool)
    }

    /// Stable sort by distance from the target centroid.
    fn sort_by_distance(&self, target: GlobalCellId, cells: &mut [GlobalCellId]) -> Result<(), WenoError> {
        let origin = self.view.centroid(target)?;
        let mut keyed = cells
            .iter()
            .map(|&g| Ok(((self.view.centroid(g)? - origin).norm(), g)))
            .collect::<Result<Vec<(f64, GlobalCellId)>, WenoError>>()?;
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (slot, (_, g)) in cells.iter_mut().zip(keyed) {
            *slot = g;
        }
        Ok(())
    }

    fn stencil(&self, kind: StencilKind, target: GlobalCellId, rest: &[GlobalCellId]) -> Result<Stencil, WenoError> {
        let mut members = Vec::with_capacity(rest.len() + 1);
        for &g in std::iter::once(&target).chain(rest) {
            let owner = self.view.owner_process(g)?;
            let source = if owner == self.view.rank() {
                CellSource::Local
            } else {
                CellSource::Remote(owner)
            };
            members.push(StencilEntry {
                cell: g,
                source,
                slot: None,
            });
        }
        Ok(Stencil::new(kind, members))
    }

    fn sectors(&self, target: GlobalCellId, frame: &ReferenceFrame) -> Result<Vec<Sector>, WenoError> {
        let shape = self.view.shape(target)?;
        let centroid = self.view.centroid(target)?;
        let mut sectors = Vec::with_capacity(shape.faces().len());
        for face in 0..shape.faces().len() {
            let n = shape.outward_normal(face, &centroid);
            if let Some(dir) = self.empty_direction {
                if n[dir].abs() > 0.5 {
                    continue;
                }
            }
            let normal = frame.normal_to_reference(&n);
            let len = normal.norm();
            if len > 0.0 {
                sectors.push(Sector {
                    face,
                    normal: normal / len,
                });
            }
        }
        Ok(sectors)
    }

    /// Sector whose normal makes the largest positive cosine with the
    /// reference-space direction from the target to `g`.
    fn bin(
        &self,
        target: GlobalCellId,
        g: GlobalCellId,
        sectors: &[Sector],
        frame: &ReferenceFrame,
    ) -> Result<Option<usize>, WenoError> {
        let from: Point3<f64> = transform_point(frame, &self.view.centroid(target)?);
        let to = transform_point(frame, &self.view.centroid(g)?);
        let dir = to - from;
        let len = dir.norm();
        if len == 0.0 {
            return Ok(None);
        }
        let mut best = None;
        let mut best_cos = 0.0;
        for (s, sector) in sectors.iter().enumerate() {
            let cos = dir.dot(&sector.normal) / len;
            if cos > best_cos {
                best_cos = cos;
                best = Some(s);
            }
        }
        Ok(best)
    }

    fn should_split(
        &self,
        target: GlobalCellId,
        members: &[GlobalCellId],
        sectors: &[Sector],
        frame: &ReferenceFrame,
    ) -> Result<bool, WenoError> {
        if sectors.is_empty() {
            return Ok(false);
        }
        let ratio = match self.split {
            SplitPolicy::Never => return Ok(false),
            SplitPolicy::Always => return Ok(true),
            SplitPolicy::WhenAnisotropic { imbalance_ratio } => imbalance_ratio,
        };
        let mut counts = vec![0usize; sectors.len()];
        for &g in members {
            if let Some(s) = self.bin(target, g, sectors, frame)? {
                counts[s] += 1;
            }
        }
        let binned: usize = counts.iter().sum();
        let busiest = counts.iter().copied().max().unwrap_or(0);
        let mean = binned as f64 / sectors.len() as f64;
        Ok(binned > 0 && busiest as f64 > ratio * mean)
    }
}
