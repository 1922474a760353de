//! Two-stage byte exchange between ranks: sizes first, then payloads.
//!
//! Both stages post every receive before any send and drain every handle
//! before returning, even if an error occurs. A peer listed in `peers` always
//! gets a message (possibly empty), so receivers never wait forever on a rank
//! that had nothing to say.

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut, expect_exact_len};
use crate::weno_error::WenoError;
use std::collections::{BTreeMap, BTreeSet};

/// Exchange the byte length of the outgoing payload with every peer.
/// Returns a map `peer → incoming length` once all receives have completed.
pub fn exchange_sizes<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    peers: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, WenoError>
where
    C: Communicator,
{
    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(peers.len());
    for &peer in peers {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            peer,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        pending_recvs.push((peer, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(peers.len());
    for &peer in peers {
        let count = WireCount::new(outgoing.get(&peer).map_or(0, Vec::len));
        pending_sends.push(comm.isend(
            peer,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }

    // 3) wait for all recvs, keep the first error but do not early-return
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        match h.wait() {
            Some(data) if maybe_err.is_none() => {
                match expect_exact_len(data.len(), std::mem::size_of::<WireCount>()) {
                    Ok(()) => {
                        let mut cnt = WireCount::new(0);
                        cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                        sizes_in.insert(peer, cnt.get());
                    }
                    Err(msg) => maybe_err = Some(WenoError::comm(peer, msg)),
                }
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(WenoError::comm(
                    peer,
                    format!("failed to receive size from rank {peer}"),
                ));
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Send `outgoing[peer]` (empty when absent) to every peer and collect what
/// every peer sent back.
pub fn exchange_bytes<C>(
    comm: &C,
    tags: ExchangeTags,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    peers: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, WenoError>
where
    C: Communicator,
{
    if peers.is_empty() {
        return Ok(BTreeMap::new());
    }
    let full: BTreeMap<usize, Vec<u8>> = peers
        .iter()
        .map(|&p| (p, outgoing.get(&p).cloned().unwrap_or_default()))
        .collect();
    let sizes = exchange_sizes(comm, tags.sizes, &full, peers)?;
    exchange_sized(comm, tags.data, &full, &sizes)
}

/// Payload stage of an exchange whose incoming sizes are already known:
/// sends every entry of `outgoing` and receives from every key of
/// `incoming_sizes`. The two rank sets may differ.
pub fn exchange_sized<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    incoming_sizes: &BTreeMap<usize, usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, WenoError>
where
    C: Communicator,
{
    let mut pending_recvs = Vec::with_capacity(incoming_sizes.len());
    for (&peer, &len) in incoming_sizes {
        let mut buffer = vec![0u8; len];
        let h = comm.irecv(peer, tag.as_u16(), &mut buffer);
        pending_recvs.push((peer, len, h));
    }

    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&peer, payload) in outgoing {
        pending_sends.push(comm.isend(peer, tag.as_u16(), payload));
    }

    let mut received = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, len, h) in pending_recvs {
        match h.wait() {
            Some(data) if maybe_err.is_none() => match expect_exact_len(data.len(), len) {
                Ok(()) => {
                    received.insert(peer, data);
                }
                Err(msg) => maybe_err = Some(WenoError::comm(peer, msg)),
            },
            None if maybe_err.is_none() => {
                maybe_err = Some(WenoError::comm(
                    peer,
                    format!("failed to receive payload from rank {peer}"),
                ));
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// Gather every rank's payload on every rank, indexed by rank.
pub fn all_gather_bytes<C>(
    comm: &C,
    tags: ExchangeTags,
    mine: &[u8],
) -> Result<Vec<Vec<u8>>, WenoError>
where
    C: Communicator,
{
    let me = comm.rank();
    let peers: BTreeSet<usize> = (0..comm.size()).filter(|&r| r != me).collect();
    let outgoing: BTreeMap<usize, Vec<u8>> = peers.iter().map(|&r| (r, mine.to_vec())).collect();
    let mut received = exchange_bytes(comm, tags, &outgoing, &peers)?;

    let mut gathered = Vec::with_capacity(comm.size());
    for rank in 0..comm.size() {
        if rank == me {
            gathered.push(mine.to_vec());
        } else {
            let data = received
                .remove(&rank)
                .ok_or_else(|| WenoError::comm(rank, "missing gather contribution"))?;
            gathered.push(data);
        }
    }
    Ok(gathered)
}

/// Settle a local phase result across all ranks.
///
/// Every rank contributes whether `local` succeeded. A rank that failed gets
/// its own error back; every other rank gets [`WenoError::PeerFailure`] naming
/// the lowest failed rank, so no rank goes on to a collective the others
/// will never join.
pub fn agree<C, T>(comm: &C, tags: ExchangeTags, phase: &str, local: Result<T, WenoError>) -> Result<T, WenoError>
where
    C: Communicator,
{
    let flag = [u8::from(local.is_ok())];
    let flags = all_gather_bytes(comm, tags, &flag)?;
    let value = local?;
    match flags.iter().position(|f| f.first() != Some(&1)) {
        Some(rank) => Err(WenoError::PeerFailure {
            rank,
            phase: phase.to_string(),
        }),
        None => Ok(value),
    }
}
