//! Block type registry: loads block definitions from a directory tree at startup.
//!
//! The codec only uses the resulting id set to validate incoming palette ids; the rest of the
//! definition (name, category, textures, properties) is bookkeeping carried through for any
//! future consumer and is otherwise opaque to the streaming subsystem.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vox_schemas::voxel::block::BlockId;

use crate::prelude::*;

/// A single block definition, as loaded from one `*.json` file in the block pack.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BlockDefinition {
    /// The block's numeric id, stable within a single world.
    pub numeric_id: u16,
    /// The block's short, stable string id (e.g. `"stone"`).
    pub string_id: String,
    /// A human-readable display name.
    #[serde(default)]
    pub name: String,
    /// A coarse grouping used by tooling (e.g. `"natural"`, `"building"`).
    #[serde(default)]
    pub category: String,
    /// Per-face texture references, indexed by face name (`"top"`, `"bottom"`, `"side"`, ...).
    #[serde(default)]
    pub textures: HashMap<String, String>,
    /// Free-form properties not otherwise modeled (hardness, light emission, etc).
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// The server's view of every known block type, keyed by string id and by numeric id.
pub struct BlockRegistry {
    by_string_id: HashMap<String, BlockId>,
    definitions: HashMap<BlockId, BlockDefinition>,
}

impl BlockRegistry {
    /// Loads every `*.json` file directly under `root` as a block definition.
    ///
    /// Block id 0 (air) is implicit and never read from disk; it is an error for the pack to
    /// define it explicitly.
    pub fn load_from_dir(root: &Path) -> Result<Self> {
        let mut by_string_id = HashMap::new();
        let mut definitions = HashMap::new();

        let entries = fs::read_dir(root).with_context(|| format!("reading block pack at {}", root.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let def: BlockDefinition =
                serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
            ensure!(def.numeric_id != 0, "block pack entry {} reuses reserved id 0 (air)", path.display());
            let id = BlockId(def.numeric_id);
            ensure!(
                !by_string_id.contains_key(&def.string_id),
                "duplicate block string id `{}` in {}",
                def.string_id,
                path.display()
            );
            by_string_id.insert(def.string_id.clone(), id);
            definitions.insert(id, def);
        }

        Ok(Self { by_string_id, definitions })
    }

    /// A minimal built-in registry covering the blocks the flat generator needs: `air`
    /// (implicit), `grass`, `dirt`, `stone`. Used when no block pack is configured, and by tests.
    pub fn builtin() -> Self {
        let mut by_string_id = HashMap::new();
        let mut definitions = HashMap::new();
        for (numeric_id, string_id, category) in [
            (1u16, "grass", "natural"),
            (2, "dirt", "natural"),
            (3, "stone", "natural"),
        ] {
            let id = BlockId(numeric_id);
            by_string_id.insert(string_id.to_string(), id);
            definitions.insert(
                id,
                BlockDefinition {
                    numeric_id,
                    string_id: string_id.to_string(),
                    name: string_id.to_string(),
                    category: category.to_string(),
                    textures: HashMap::new(),
                    properties: HashMap::new(),
                },
            );
        }
        Self { by_string_id, definitions }
    }

    /// Looks up a block's numeric id by its string id. Returns `None` for unknown ids, and
    /// `Some(BlockId::AIR)` for `"air"` even though air is never present in `definitions`.
    pub fn id_of(&self, string_id: &str) -> Option<BlockId> {
        if string_id == "air" {
            return Some(BlockId::AIR);
        }
        self.by_string_id.get(string_id).copied()
    }

    /// Returns whether `id` is a known block id: either air, or present in the loaded pack.
    pub fn contains(&self, id: BlockId) -> bool {
        id.is_air() || self.definitions.contains_key(&id)
    }

    /// Looks up the full definition for a non-air block id.
    pub fn definition(&self, id: BlockId) -> Option<&BlockDefinition> {
        self.definitions.get(&id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_has_expected_blocks() {
        let reg = BlockRegistry::builtin();
        assert_eq!(reg.id_of("air"), Some(BlockId::AIR));
        assert!(reg.id_of("grass").is_some());
        assert!(reg.id_of("dirt").is_some());
        assert!(reg.id_of("stone").is_some());
        assert_eq!(reg.id_of("nonexistent"), None);
    }

    #[test]
    fn contains_reflects_pack_membership() {
        let reg = BlockRegistry::builtin();
        assert!(reg.contains(BlockId::AIR));
        assert!(reg.contains(reg.id_of("stone").unwrap()));
        assert!(!reg.contains(BlockId(999)));
    }

    #[test]
    fn load_from_dir_rejects_reserved_air_id() {
        let dir = tempdir();
        fs::write(
            dir.path().join("broken.json"),
            r#"{"numeric_id":0,"string_id":"broken"}"#,
        )
        .unwrap();
        assert!(BlockRegistry::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn load_from_dir_reads_definitions() {
        let dir = tempdir();
        fs::write(
            dir.path().join("stone.json"),
            r#"{"numeric_id":3,"string_id":"stone","name":"Stone","category":"natural"}"#,
        )
        .unwrap();
        let reg = BlockRegistry::load_from_dir(dir.path()).unwrap();
        assert_eq!(reg.id_of("stone"), Some(BlockId(3)));
        assert_eq!(reg.definition(BlockId(3)).unwrap().name, "Stone");
    }

    fn tempdir() -> TempDirGuard {
        static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("vox_server_block_registry_test_{}_{n}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        TempDirGuard(path)
    }

    struct TempDirGuard(std::path::PathBuf);

    impl TempDirGuard {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }
}
