//! In-memory column persistence, used for ephemeral worlds and tests.

use super::{ColumnPersistence, ColumnTops};
use crate::prelude::*;

/// Keeps column-top heights in a map rather than on disk. Never evicts; suitable for tests and
/// worlds explicitly configured not to persist across restarts.
#[derive(Default)]
pub struct InMemoryColumnPersistence {
    columns: Mutex<HashMap<(i32, i32), ColumnTops>>,
}

impl InMemoryColumnPersistence {
    /// Constructs an empty in-memory persistence layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColumnPersistence for InMemoryColumnPersistence {
    fn load_column(&self, cx: i32, cz: i32) -> Result<Option<ColumnTops>> {
        Ok(self.columns.lock().unwrap().get(&(cx, cz)).copied())
    }

    fn save_column(&self, cx: i32, cz: i32, tops: &ColumnTops) -> Result<()> {
        self.columns.lock().unwrap().insert((cx, cz), *tops);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use vox_schemas::coordinates::CHUNK_DIM2Z;

    use super::*;

    #[test]
    fn round_trips_and_defaults_to_none() {
        let persist = InMemoryColumnPersistence::new();
        assert!(persist.load_column(1, 1).unwrap().is_none());
        let tops = [7u8; CHUNK_DIM2Z];
        persist.save_column(1, 1, &tops).unwrap();
        assert_eq!(persist.load_column(1, 1).unwrap(), Some(tops));
    }
}
