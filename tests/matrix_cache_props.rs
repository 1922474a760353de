use nalgebra::DMatrix;
use proptest::prelude::*;
use weno_stencil::config::MatrixCacheConfig;
use weno_stencil::matrix::{MatrixCache, matrix_key};

fn matrix() -> impl Strategy<Value = DMatrix<f64>> {
    (1usize..=5, 1usize..=5).prop_flat_map(|(r, c)| {
        prop::collection::vec(-10.0f64..10.0, r * c).prop_map(move |v| DMatrix::from_vec(r, c, v))
    })
}

proptest! {
    #[test]
    fn interning_twice_gives_the_same_handle(m in matrix()) {
        let mut cache = MatrixCache::new(MatrixCacheConfig::default());
        let a = cache.intern(m.clone());
        let b = cache.intern(m.clone());
        prop_assert_eq!(a, b);
        prop_assert_eq!(cache.get(a), Some(&m));
        prop_assert_eq!(cache.len(), 1);
    }

    #[test]
    fn perturbations_within_tolerance_are_merged(
        m in matrix(),
        noise in prop::collection::vec(-0.4f64..0.4, 25),
    ) {
        let config = MatrixCacheConfig::default();
        let max = m.amax();
        prop_assume!(max > 1e-3);
        let mut n = m.clone();
        for (v, d) in n.iter_mut().zip(&noise) {
            *v += d * config.epsilon * max;
        }
        let mut cache = MatrixCache::new(config);
        let a = cache.intern(m);
        let b = cache.intern(n);
        prop_assert_eq!(a, b);
        prop_assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn different_shapes_never_collide(m in matrix()) {
        let mut cache = MatrixCache::new(MatrixCacheConfig::default());
        let a = cache.intern(m.clone());
        let b = cache.intern(m.transpose());
        if m.nrows() != m.ncols() {
            prop_assert_ne!(a, b);
        }
        let wider = m.clone().insert_column(m.ncols(), 0.0);
        prop_assert_ne!(cache.intern(wider), a);
    }

    #[test]
    fn restored_cache_resolves_every_handle(ms in prop::collection::vec(matrix(), 1..8)) {
        let mut cache = MatrixCache::new(MatrixCacheConfig::default());
        let handles: Vec<_> = ms.iter().map(|m| cache.intern(m.clone())).collect();
        let restored = MatrixCache::from_parts(MatrixCacheConfig::default(), cache.entries().to_vec());
        for h in handles {
            prop_assert_eq!(restored.get(h), cache.get(h));
        }
        prop_assert_eq!(restored.len(), cache.stats().stored);
    }

    #[test]
    fn key_ignores_uniform_scaling(m in matrix(), s in 0.5f64..4.0) {
        prop_assume!(m.amax() > 1e-3);
        let k = matrix_key(&m);
        let scaled = matrix_key(&(m * s));
        // one unit of truncation per entry at most
        prop_assert!((k - scaled).abs() <= 25);
    }
}
