use nalgebra::{DMatrix, Matrix3, Point3, Vector3};
use weno_stencil::algs::communicator::NoComm;
use weno_stencil::config::{ReconstructionConfig, SplitPolicy};
use weno_stencil::evaluator::{HaloValues, ReconstructionEvaluator, smoothness_indicator};
use weno_stencil::geometry::{DegreeSet, compute_jacobian, transform_integral, volume_integrals};
use weno_stencil::matrix::MatrixAssembler;
use weno_stencil::mesh::{GlobalMeshView, MeshProvider, PolyMesh, hex_box, hex_box_2d};
use weno_stencil::reconstruction::{FaceNeighbour, ReconstructionScheme};
use weno_stencil::weno_error::WenoError;

fn config(order: usize) -> ReconstructionConfig {
    ReconstructionConfig {
        polynomial_order: order,
        split: SplitPolicy::Never,
        ..Default::default()
    }
}

/// `hex_box` with every point mapped through `x ↦ A x + b`.
fn sheared(n: [usize; 3]) -> PolyMesh {
    let base = hex_box(n, [0.0; 3], [1.0; 3]).unwrap();
    let a = Matrix3::new(1.0, 0.3, 0.0, 0.0, 0.8, 0.2, 0.1, 0.0, 1.2);
    let b = Vector3::new(0.5, -1.0, 2.0);
    let points = base.points().iter().map(|p| Point3::from(a * p.coords + b)).collect();
    let faces = (0..base.n_faces()).map(|f| base.face_vertices(f).to_vec()).collect();
    let owner = (0..base.n_faces()).map(|f| base.face_owner(f)).collect();
    let neighbour = (0..base.n_faces()).map(|f| base.face_neighbour(f)).collect();
    PolyMesh::new(points, faces, owner, neighbour).unwrap()
}

fn linear(p: &Point3<f64>) -> f64 {
    1.5 + 2.0 * p.x - 0.7 * p.y + 0.25 * p.z
}

#[test]
fn coarse_mesh_cannot_host_second_order_stencils() {
    let mesh = hex_box([2, 2, 2], [0.0; 3], [1.0; 3]).unwrap();
    let err = ReconstructionScheme::setup(&mesh, &config(2), &NoComm).unwrap_err();
    match err {
        WenoError::StencilGrowthFailure { reached, required, .. } => {
            assert_eq!(reached, 8);
            assert_eq!(required, 14);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn pseudo_inverses_invert_their_stencil_matrices() {
    let mesh = hex_box([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
    let scheme = ReconstructionScheme::setup(&mesh, &config(2), &NoComm).unwrap();
    let view = GlobalMeshView::build(&mesh, &NoComm).unwrap();
    let assembler = MatrixAssembler::new(DegreeSet::for_mesh(2, None), false);
    let dof = scheme.dof_count();
    assert_eq!(dof, 9);

    for cell in 0..mesh.n_cells() {
        let stencil = &scheme.stencils(cell)[0];
        assert_eq!(stencil.len(), 14);
        let g = stencil.target();
        let frame = compute_jacobian(view.shape(g).unwrap(), None).unwrap();
        let target = volume_integrals(view.shape(g).unwrap(), 2, &frame);
        let members: Vec<_> = stencil
            .member_ids()
            .skip(1)
            .map(|m| {
                let shape = view.shape(m).unwrap();
                let own = compute_jacobian(shape, None).unwrap();
                transform_integral(&volume_integrals(shape, 2, &own), &own, &frame)
            })
            .collect();
        let a = assembler.least_squares_matrix(&target, &members);
        let pinv = scheme.pseudo_inverse(cell, 0).unwrap();
        assert_eq!(pinv.shape(), (dof, 13));
        // identity on the row space, rank-deficient stencils included
        let residual = (&a * pinv * &a - &a).norm();
        assert!(residual < 1e-6 * a.norm(), "cell {cell}: A·A⁺·A differs from A by {residual}");

        let out = assembler.assemble(g, &target, &members).unwrap();
        if !out.is_rank_deficient() {
            assert!((pinv * &a - DMatrix::identity(dof, dof)).norm() < 1e-6);
        }
    }
}

#[test]
fn linear_fields_are_reconstructed_exactly() {
    for order in 1..=2 {
        let mesh = sheared([5, 5, 5]);
        // wide enough that no boundary stencil is rank-deficient
        let cfg = ReconstructionConfig {
            extend_ratio: 3.5,
            ..config(order)
        };
        let scheme = ReconstructionScheme::setup(&mesh, &cfg, &NoComm).unwrap();
        let eval = ReconstructionEvaluator::new(&scheme);
        let values: Vec<f64> = (0..mesh.n_cells()).map(|c| linear(&mesh.cell_centroid(c))).collect();
        let halo = HaloValues::default();
        let corrections = eval.face_corrections(&values, &halo).unwrap();

        for f in 0..mesh.n_faces() {
            let FaceNeighbour::Internal(n) = scheme.face_neighbour(f).unwrap() else {
                assert_eq!(corrections[f], 0.0);
                continue;
            };
            let p = scheme.face_owner(f).unwrap();
            let w = scheme.face_weight(f).unwrap();
            let face_value = w * values[p] + (1.0 - w) * values[n] + corrections[f];
            let exact = linear(&mesh.face_centre(f));
            assert!(
                (face_value - exact).abs() < 1e-8,
                "order {order}, face {f}: {face_value} vs {exact}"
            );
        }
    }
}

#[test]
fn smoothness_of_a_linear_field_is_its_reference_gradient() {
    let mesh = hex_box([5, 5, 5], [0.0; 3], [1.0, 2.0, 0.5]).unwrap();
    let scheme = ReconstructionScheme::setup(&mesh, &config(1), &NoComm).unwrap();
    let eval = ReconstructionEvaluator::new(&scheme);
    let values: Vec<f64> = (0..mesh.n_cells()).map(|c| linear(&mesh.cell_centroid(c))).collect();
    let cell = 2 + 2 * 5 + 2 * 25;
    let coeffs = eval.stencil_coefficients(cell, &values, &HaloValues::default()).unwrap();
    let c = coeffs[0].as_ref().unwrap();

    let shape = mesh.cell_shape(cell).unwrap();
    let frame = compute_jacobian(&shape, None).unwrap();
    let gradient = frame.jacobian().transpose() * Vector3::new(2.0, -0.7, 0.25);
    // basis order is ζ, η, ξ
    let expected = [gradient.z, gradient.y, gradient.x];
    for (got, want) in c.iter().zip(expected) {
        assert!((got - want).abs() < 1e-10, "{got} vs {want}");
    }

    let b = scheme.oscillation(cell, 0).unwrap();
    let v_ref = volume_integrals(&shape, 0, &frame).volume();
    let is = smoothness_indicator(b, c);
    assert!((is - v_ref * gradient.norm_squared()).abs() < 1e-10 * is.max(1.0));
}

#[test]
fn planar_meshes_use_the_planar_degree_set() {
    let mesh = hex_box_2d([6, 6], [0.0; 2], [1.0; 2], 0.1).unwrap();
    let scheme = ReconstructionScheme::setup(&mesh, &config(2), &NoComm).unwrap();
    assert_eq!(scheme.dof_count(), 5);
    assert_eq!(scheme.dimensions(0), Some([2, 2, 0]));
    for cell in 0..mesh.n_cells() {
        assert_eq!(scheme.stencils(cell)[0].len(), 8);
        assert_eq!(scheme.pseudo_inverse(cell, 0).unwrap().shape(), (5, 7));
    }
}
