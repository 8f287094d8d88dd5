//! Persisted world state: per-column top-solid heights.
//!
//! Only the column-top height is ever persisted (one byte per `(x, z)` within a chunk column,
//! 256 bytes total) — the dense block contents of a chunk are always re-derived from a
//! generator's `block_for_height` rule given that height, plus the in-memory edit overlay on
//! top. This keeps persisted state small and independent of the generator's exact layer rules.

pub mod disk;
pub mod memory;

use vox_schemas::coordinates::CHUNK_DIM2Z;

use crate::prelude::*;

/// The column-top height grid for a single chunk column, one byte per `(x, z)`, row-major
/// (`x + z * CHUNK_DIM`). A height byte of 0 is a legal value (bedrock-level column).
pub type ColumnTops = [u8; CHUNK_DIM2Z];

/// A provider/sink for persisted column-top heights, keyed by chunk column `(cx, cz)`.
///
/// Implementations must be safe to call from worker threads; callers are expected to batch
/// calls rather than invoke this per-block.
pub trait ColumnPersistence: Send + Sync {
    /// Loads the persisted column-top heights for `(cx, cz)`, if any have been saved.
    fn load_column(&self, cx: i32, cz: i32) -> Result<Option<ColumnTops>>;

    /// Persists the column-top heights for `(cx, cz)`, overwriting any prior value.
    fn save_column(&self, cx: i32, cz: i32, tops: &ColumnTops) -> Result<()>;
}
