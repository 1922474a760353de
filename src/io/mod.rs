//! Saving and restoring precomputed reconstruction state.

pub mod persist;

pub use persist::{FORMAT_VERSION, PersistHeader, PersistedState, load, read_from, save, write_to};
