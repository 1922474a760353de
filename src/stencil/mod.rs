//! Reconstruction stencils and their halo bookkeeping.

pub mod builder;
pub mod halo;

pub use builder::{StencilBuilder, required_stencil_size};
pub use halo::HaloPlan;

use crate::mesh::GlobalCellId;
use serde::{Deserialize, Serialize};

/// Where the data of a stencil member lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellSource {
    Local,
    /// Owned by another rank; its value arrives through the halo exchange.
    Remote(usize),
    /// Pruned while splitting; contributes to no matrix.
    Deleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilEntry {
    pub cell: GlobalCellId,
    pub source: CellSource,
    /// Local cell id for `Local`, receive-buffer slot for `Remote`; set by
    /// [`HaloPlan::build`].
    pub slot: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StencilKind {
    Central,
    /// Sector facing the target cell's face at this position.
    Sector(usize),
}

/// Ordered stencil; the target cell is always the first member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stencil {
    kind: StencilKind,
    members: Vec<StencilEntry>,
}

impl Stencil {
    pub fn new(kind: StencilKind, members: Vec<StencilEntry>) -> Self {
        Self { kind, members }
    }

    pub fn kind(&self) -> StencilKind {
        self.kind
    }

    pub fn target(&self) -> GlobalCellId {
        self.members[0].cell
    }

    pub fn members(&self) -> &[StencilEntry] {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut [StencilEntry] {
        &mut self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = GlobalCellId> + '_ {
        self.members.iter().map(|e| e.cell)
    }

    /// A deleted stencil carries no matrix and takes no part in evaluation.
    pub fn is_deleted(&self) -> bool {
        self.members.iter().all(|e| e.source == CellSource::Deleted)
    }

    pub(crate) fn mark_deleted(&mut self) {
        for e in &mut self.members {
            e.source = CellSource::Deleted;
            e.slot = None;
        }
    }
}
