use nalgebra::Point3;
use serial_test::serial;
use std::path::PathBuf;
use weno_stencil::algs::communicator::{Communicator, LocalComm};
use weno_stencil::config::{ReconstructionConfig, SplitPolicy};
use weno_stencil::evaluator::ReconstructionEvaluator;
use weno_stencil::mesh::{GlobalCellId, MeshProvider, PolyMesh, decompose_slabs, hex_box};
use weno_stencil::reconstruction::{FaceNeighbour, ReconstructionScheme};
use weno_stencil::stencil::CellSource;
use weno_stencil::weno_error::WenoError;

fn config(order: usize) -> ReconstructionConfig {
    ReconstructionConfig {
        polynomial_order: order,
        split: SplitPolicy::Never,
        ..Default::default()
    }
}

/// Run `setup` on every piece, one thread per rank.
fn setup_all(pieces: Vec<PolyMesh>, cfg: &ReconstructionConfig) -> Vec<(PolyMesh, ReconstructionScheme)> {
    let handles: Vec<_> = LocalComm::group(pieces.len())
        .into_iter()
        .zip(pieces)
        .map(|(comm, piece)| {
            let cfg = cfg.clone();
            std::thread::spawn(move || {
                let scheme = ReconstructionScheme::setup(&piece, &cfg, &comm).unwrap();
                (piece, scheme)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn linear(p: &Point3<f64>) -> f64 {
    -0.5 + 0.3 * p.x + 1.1 * p.y - 2.0 * p.z
}

#[test]
#[serial]
fn send_and_receive_lists_are_mutual() {
    let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
    let ranks = setup_all(decompose_slabs(&mesh, 2, 0).unwrap(), &config(1));

    for (me, (piece, scheme)) in ranks.iter().enumerate() {
        let other = 1 - me;
        assert_eq!(scheme.send_proc_list(), vec![other]);
        assert_eq!(scheme.receive_proc_list(), vec![other]);

        let (_, peer) = &ranks[other];
        let sent: Vec<GlobalCellId> = scheme
            .halo_plan()
            .send_cells(other)
            .iter()
            .map(|&c| piece.global_cell_id(c))
            .collect();
        assert_eq!(sent.as_slice(), peer.halo_plan().receive_cells(me));
    }
}

#[test]
#[serial]
fn remote_members_point_at_their_receive_slot() {
    let mesh = hex_box([6, 4, 4], [0.0; 3], [1.5, 1.0, 1.0]).unwrap();
    let ranks = setup_all(decompose_slabs(&mesh, 3, 0).unwrap(), &config(2));

    let mut remote = 0;
    for (piece, scheme) in &ranks {
        for cell in 0..piece.n_cells() {
            let members = scheme.stencils(cell).iter().flat_map(|s| s.members());
            for entry in members {
                match entry.source {
                    CellSource::Local => {
                        assert_eq!(entry.slot.map(|c| piece.global_cell_id(c)), Some(entry.cell));
                    }
                    CellSource::Remote(owner) => {
                        remote += 1;
                        let slot = entry.slot.unwrap();
                        assert_eq!(scheme.halo_plan().receive_cells(owner)[slot], entry.cell);
                        assert_eq!(scheme.halo_plan().slot_of(entry.cell), Some((owner, slot)));
                    }
                    CellSource::Deleted => panic!("no stencil is split"),
                }
            }
        }
    }
    assert!(remote > 0);
}

#[test]
#[serial]
fn linear_fields_are_exact_across_processor_faces() {
    let mesh = hex_box([6, 4, 4], [0.0; 3], [1.5, 1.0, 1.0]).unwrap();
    let pieces = decompose_slabs(&mesh, 3, 0).unwrap();
    let cfg = ReconstructionConfig {
        extend_ratio: 3.0,
        ..config(2)
    };
    let handles: Vec<_> = LocalComm::group(3)
        .into_iter()
        .zip(pieces)
        .map(|(comm, piece)| {
            let cfg = cfg.clone();
            std::thread::spawn(move || {
                let scheme = ReconstructionScheme::setup(&piece, &cfg, &comm).unwrap();
                let eval = ReconstructionEvaluator::new(&scheme);
                let values: Vec<f64> = (0..piece.n_cells()).map(|c| linear(&piece.cell_centroid(c))).collect();
                let halo = eval.exchange_halo_values(&values, &comm).unwrap();
                let corrections = eval.face_corrections(&values, &halo).unwrap();

                let mut checked = 0;
                for f in 0..piece.n_faces() {
                    let u_n = match scheme.face_neighbour(f).unwrap() {
                        FaceNeighbour::Boundary => continue,
                        FaceNeighbour::Internal(n) => values[n],
                        FaceNeighbour::Remote(g) => {
                            let (owner, slot) = scheme.halo_plan().slot_of(g).unwrap();
                            assert_ne!(owner, comm.rank());
                            halo.get(owner, slot).unwrap()
                        }
                    };
                    let p = scheme.face_owner(f).unwrap();
                    let w = scheme.face_weight(f).unwrap();
                    let got = w * values[p] + (1.0 - w) * u_n + corrections[f];
                    let exact = linear(&piece.face_centre(f));
                    assert!((got - exact).abs() < 1e-8, "rank {}, face {f}: {got} vs {exact}", comm.rank());
                    checked += 1;
                }
                checked
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap() > 0);
    }
}

#[test]
#[serial]
fn missing_state_on_one_rank_makes_every_rank_recompute() {
    let dir: PathBuf = std::env::temp_dir().join(format!("weno-two-rank-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
    let cfg = ReconstructionConfig {
        persist_dir: Some(dir.clone()),
        ..config(1)
    };

    let fresh = setup_all(decompose_slabs(&mesh, 2, 0).unwrap(), &cfg);
    assert!(dir.join("weno.rank0-of2.bin").exists());
    assert!(dir.join("weno.rank1-of2.bin").exists());

    std::fs::remove_file(dir.join("weno.rank1-of2.bin")).unwrap();
    let again = setup_all(decompose_slabs(&mesh, 2, 0).unwrap(), &cfg);
    for ((_, a), (_, b)) in fresh.iter().zip(&again) {
        // recomputed, not restored
        assert!(b.matrix_stats().pseudo_inverse.issued > 0);
        for cell in 0..a.n_cells() {
            assert_eq!(a.stencils(cell), b.stencils(cell));
        }
        assert_eq!(a.halo_plan(), b.halo_plan());
    }

    let restored = setup_all(decompose_slabs(&mesh, 2, 0).unwrap(), &cfg);
    for (_, scheme) in &restored {
        assert_eq!(scheme.matrix_stats().pseudo_inverse.issued, 0);
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn growth_failure_on_one_rank_fails_every_rank() {
    // rank 0 owns a three-cell column that cannot reach five members
    let column = hex_box([1, 1, 3], [0.0; 3], [1.0, 1.0, 3.0]).unwrap();
    let ids = (3..67).map(GlobalCellId::new).collect();
    let block = hex_box([4, 4, 4], [10.0, 0.0, 0.0], [14.0, 4.0, 4.0])
        .unwrap()
        .with_global_ids(ids)
        .unwrap();

    let handles: Vec<_> = LocalComm::group(2)
        .into_iter()
        .zip([column, block])
        .map(|(comm, piece)| {
            std::thread::spawn(move || ReconstructionScheme::setup(&piece, &config(1), &comm).unwrap_err())
        })
        .collect();
    let errors: Vec<WenoError> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(matches!(
        errors[0],
        WenoError::StencilGrowthFailure { reached: 3, required: 5, .. }
    ));
    assert!(matches!(&errors[1], WenoError::PeerFailure { rank: 0, .. }));
}
