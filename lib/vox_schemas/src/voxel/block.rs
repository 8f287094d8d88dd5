//! The block id type used throughout chunk storage and the wire codec.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// An unsigned 16-bit block type index. `0` is always air.
///
/// The codec and chunk storage are agnostic to anything beyond this value; semantics
/// (name, texture references, collision, ...) live in the block registry.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Pod, Zeroable, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The reserved id for "no block".
    pub const AIR: Self = Self(0);

    /// Whether this id represents air.
    #[inline]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for BlockId {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<BlockId> for u16 {
    #[inline]
    fn from(value: BlockId) -> Self {
        value.0
    }
}
