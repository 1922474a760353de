//! Halo bookkeeping: which cells each rank receives from and sends to whom.
//!
//! The plan is built once after all stencils are known. Remote cells get a
//! slot in the receive buffer of their owning rank; the owners learn what to
//! send through a single batched request exchange, so the send and receive
//! lists of every rank pair are mutual.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, exchange_bytes};
use crate::algs::wire::{WireCellId, cast_slice, decode_records};
use crate::mesh::{GlobalCellId, GlobalMeshView, MeshProvider};
use crate::stencil::{CellSource, Stencil};
use crate::weno_error::WenoError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HaloPlan {
    /// Remote cells per owning rank, in receive-slot order.
    receive: BTreeMap<usize, Vec<GlobalCellId>>,
    /// Local cells to send per requesting rank, in that rank's slot order.
    send: BTreeMap<usize, Vec<usize>>,
    index: BTreeMap<GlobalCellId, (usize, usize)>,
}

impl HaloPlan {
    /// Collective. Assigns every stencil entry its slot and exchanges the
    /// requests with the owning ranks.
    pub fn build<M, C>(
        mesh: &M,
        view: &GlobalMeshView,
        stencils: &mut [Vec<Stencil>],
        comm: &C,
    ) -> Result<Self, WenoError>
    where
        M: MeshProvider,
        C: Communicator,
    {
        let me = comm.rank();
        let local = Self::register_all(mesh, view, stencils, me);
        let mut plan = agree(comm, tags::STATUS, "halo registration", local)?;

        let outgoing: BTreeMap<usize, Vec<u8>> = plan
            .receive
            .iter()
            .map(|(&rank, cells)| {
                let wire: Vec<WireCellId> = cells.iter().map(|g| WireCellId::of(g.get())).collect();
                (rank, cast_slice(&wire).to_vec())
            })
            .collect();
        let peers: BTreeSet<usize> = (0..comm.size()).filter(|&r| r != me).collect();
        let requests = exchange_bytes(comm, tags::HALO_REQUEST, &outgoing, &peers)?;
        for (rank, bytes) in requests {
            let ids: Vec<WireCellId> = decode_records(&bytes).map_err(|msg| WenoError::comm(rank, msg))?;
            if ids.is_empty() {
                continue;
            }
            let cells = ids
                .iter()
                .map(|id| view.local_cell_for(GlobalCellId::new(id.get()), me))
                .collect::<Result<Vec<_>, _>>()?;
            plan.send.insert(rank, cells);
        }
        debug!(
            "rank {me}: halo receives {} cells from {:?}, sends to {:?}",
            plan.index.len(),
            plan.receive_procs(),
            plan.send_procs()
        );
        Ok(plan)
    }

    /// Slots for every processor-face neighbour and stencil member.
    fn register_all<M: MeshProvider>(
        mesh: &M,
        view: &GlobalMeshView,
        stencils: &mut [Vec<Stencil>],
        me: usize,
    ) -> Result<Self, WenoError> {
        let mut plan = HaloPlan::default();

        // processor-face neighbours are always needed, for face interpolation
        for patch in mesh.processor_patches() {
            for &f in &patch.faces {
                let across = view.remote_neighbour(f).ok_or_else(|| {
                    WenoError::DistributedConsistency(format!(
                        "processor face {f} towards rank {} is unmatched",
                        patch.neighbour_rank
                    ))
                })?;
                plan.register(across, view.owner_process(across)?);
            }
        }

        for cell_stencils in stencils.iter_mut() {
            for stencil in cell_stencils.iter_mut() {
                for entry in stencil.members_mut() {
                    entry.slot = match entry.source {
                        CellSource::Local => Some(view.local_cell_for(entry.cell, me)?),
                        CellSource::Remote(rank) => Some(plan.register(entry.cell, rank)),
                        CellSource::Deleted => None,
                    };
                }
            }
        }
        Ok(plan)
    }

    /// Slot of `g` in its owner's receive buffer, registering it if new.
    fn register(&mut self, g: GlobalCellId, owner: usize) -> usize {
        if let Some(&(_, slot)) = self.index.get(&g) {
            return slot;
        }
        let list = self.receive.entry(owner).or_default();
        list.push(g);
        let slot = list.len() - 1;
        self.index.insert(g, (owner, slot));
        slot
    }

    /// Ranks this rank receives halo values from.
    pub fn receive_procs(&self) -> Vec<usize> {
        self.receive.keys().copied().collect()
    }

    /// Ranks this rank sends halo values to.
    pub fn send_procs(&self) -> Vec<usize> {
        self.send.keys().copied().collect()
    }

    pub fn receive_cells(&self, rank: usize) -> &[GlobalCellId] {
        self.receive.get(&rank).map_or(&[], Vec::as_slice)
    }

    pub fn send_cells(&self, rank: usize) -> &[usize] {
        self.send.get(&rank).map_or(&[], Vec::as_slice)
    }

    /// `(owner rank, slot)` of a halo cell.
    pub fn slot_of(&self, g: GlobalCellId) -> Option<(usize, usize)> {
        self.index.get(&g).copied()
    }

    pub fn n_halo_cells(&self) -> usize {
        self.index.len()
    }
}
