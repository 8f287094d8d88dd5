//! Voxel world state: block types, generation, persistence, and the chunk store tying them
//! together.

pub mod block_registry;
pub mod generator;
pub mod overlay_log;
pub mod persistence;
pub mod store;
