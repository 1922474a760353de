//! Content-addressed store of dense matrices with approximate matching.
//!
//! Matrices are fingerprinted by the sum of their entries scaled to
//! `±1e6` and truncated. Near-identical matrices land on nearby keys, so a
//! new matrix is compared against every stored entry whose key lies within
//! `check_range` of its own; the first entry within tolerance is reused.

use crate::config::MatrixCacheConfig;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KEY_SCALE: f64 = 1e6;

/// Handle to a canonical matrix in a [`MatrixCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixHandle(u32);

impl MatrixHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Counters reported at the end of setup.
///
/// They describe the current session only: a cache rebuilt with
/// [`MatrixCache::from_parts`] reports its restored entries as `stored`
/// and starts `issued` and `hits` at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Canonical matrices held.
    pub stored: usize,
    /// Handles handed out by [`MatrixCache::intern`].
    pub issued: usize,
    /// Interns answered by an existing entry.
    pub hits: usize,
}

#[derive(Clone, Debug)]
pub struct MatrixCache {
    config: MatrixCacheConfig,
    entries: Vec<DMatrix<f64>>,
    keys: BTreeMap<i64, Vec<MatrixHandle>>,
    issued: usize,
    hits: usize,
}

/// Approximate fingerprint of a matrix; zero for the zero matrix.
pub fn matrix_key(m: &DMatrix<f64>) -> i64 {
    let max = m.amax();
    if !(max.is_finite() && max > 0.0) {
        return 0;
    }
    let scale = KEY_SCALE / max;
    m.iter().map(|&a| (a * scale).trunc() as i64).sum()
}

impl MatrixCache {
    pub fn new(config: MatrixCacheConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            keys: BTreeMap::new(),
            issued: 0,
            hits: 0,
        }
    }

    /// Rebuild a cache whose handles refer to `entries` by position.
    pub fn from_parts(config: MatrixCacheConfig, entries: Vec<DMatrix<f64>>) -> Self {
        let mut cache = Self::new(config);
        for m in entries {
            let handle = MatrixHandle(cache.entries.len() as u32);
            cache.keys.entry(matrix_key(&m)).or_default().push(handle);
            cache.entries.push(m);
        }
        cache
    }

    /// Handle to a stored matrix within tolerance of `m`, storing `m` if
    /// nothing in the key window matches.
    pub fn intern(&mut self, m: DMatrix<f64>) -> MatrixHandle {
        self.issued += 1;
        let key = matrix_key(&m);
        if let Some(handle) = self.find(&m, key) {
            self.hits += 1;
            return handle;
        }
        let handle = MatrixHandle(self.entries.len() as u32);
        self.keys.entry(key).or_default().push(handle);
        self.entries.push(m);
        handle
    }

    fn find(&self, m: &DMatrix<f64>, key: i64) -> Option<MatrixHandle> {
        let tolerance = self.config.epsilon * m.amax();
        let window = key.saturating_sub(self.config.check_range)..=key.saturating_add(self.config.check_range);
        self.keys
            .range(window)
            .flat_map(|(_, handles)| handles.iter().copied())
            .find(|h| self.matches(&self.entries[h.index()], m, tolerance))
    }

    fn matches(&self, stored: &DMatrix<f64>, m: &DMatrix<f64>, tolerance: f64) -> bool {
        stored.shape() == m.shape()
            && stored
                .iter()
                .zip(m.iter())
                .all(|(&b, &a)| a.abs() < self.config.small || (b - a).abs() <= tolerance)
    }

    pub fn get(&self, handle: MatrixHandle) -> Option<&DMatrix<f64>> {
        self.entries.get(handle.index())
    }

    pub fn entries(&self) -> &[DMatrix<f64>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &MatrixCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            stored: self.entries.len(),
            issued: self.issued,
            hits: self.hits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MatrixCache {
        MatrixCache::new(MatrixCacheConfig::default())
    }

    #[test]
    fn identical_matrices_share_a_handle() {
        let mut c = cache();
        let m = DMatrix::from_row_slice(2, 2, &[1.0, -2.0, 0.5, 3.0]);
        let a = c.intern(m.clone());
        let b = c.intern(m);
        assert_eq!(a, b);
        assert_eq!(c.stats(), CacheStats { stored: 1, issued: 2, hits: 1 });
    }

    #[test]
    fn shapes_never_collide() {
        let mut c = cache();
        let a = c.intern(DMatrix::from_element(2, 3, 1.0));
        let b = c.intern(DMatrix::from_element(3, 2, 1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn out_of_tolerance_is_stored_separately() {
        let mut c = cache();
        let m = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        let mut n = m.clone();
        n[(0, 0)] += 1e-3;
        assert_ne!(c.intern(m), c.intern(n));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn zero_matrix_keys_to_zero() {
        assert_eq!(matrix_key(&DMatrix::zeros(3, 3)), 0);
        let mut c = cache();
        let h = c.intern(DMatrix::zeros(3, 3));
        assert_eq!(c.get(h), Some(&DMatrix::zeros(3, 3)));
        assert_eq!(c.get(MatrixHandle(7)), None);
    }

    #[test]
    fn from_parts_reproduces_handles() {
        let mut c = cache();
        let h1 = c.intern(DMatrix::identity(2, 2));
        let h2 = c.intern(DMatrix::from_element(2, 2, 4.0));
        let restored = MatrixCache::from_parts(*c.config(), c.entries().to_vec());
        assert_eq!(restored.get(h1), c.get(h1));
        assert_eq!(restored.get(h2), c.get(h2));
        let mut restored = restored;
        assert_eq!(restored.intern(DMatrix::identity(2, 2)), h1);
    }
}
