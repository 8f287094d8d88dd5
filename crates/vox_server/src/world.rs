//! World metadata and the player entity record, persisted via the same atomic-write protocol
//! as session state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atomic_file::{read_with_backup, write_atomic_json};
use crate::prelude::*;

/// World-wide metadata, one per world, stored at `<world_root>/world.json`.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct WorldMetadata {
    /// A short identifier for the generator/ruleset used (currently always `"flat"`).
    #[serde(rename = "type")]
    pub world_type: String,
    /// The position new and respawning players are placed at.
    pub spawn_point: (f64, f64, f64),
    /// World height in blocks, bounding vertical chunk coordinates.
    pub height: i32,
}

impl WorldMetadata {
    /// Loads world metadata from `<root>/world.json`, or creates and persists a default if
    /// absent.
    pub fn load_or_create(root: &Path, height: i32) -> Result<Self> {
        let path = root.join("world.json");
        if let Some(meta) = read_with_backup::<Self>(&path)? {
            return Ok(meta);
        }
        let meta = Self { world_type: "flat".to_owned(), spawn_point: (0.0, 64.0, 0.0), height };
        write_atomic_json(&path, &meta)?;
        Ok(meta)
    }
}

/// A player's inventory: a fixed set of numbered slots, each holding an optional stack.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct InventorySlot {
    /// The block or item's string id.
    pub string_id: String,
    /// Stack count.
    pub count: u32,
}

/// A connected player's persistent entity state: identity, position, and inventory.
/// Persisted at `<world_root>/players/<uuid>.json`.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PlayerEntity {
    /// Stable numeric id used by the network layer (session/dispatcher keys).
    pub id: u64,
    /// Display name.
    pub username: String,
    /// Stable identity across reconnects and renames.
    pub uuid: Uuid,
    /// Which world this player is in. Single-world servers always use the same value.
    pub world_ref: String,
    /// Current position.
    pub position: (f64, f64, f64),
    /// Current look rotation, (yaw, pitch) in degrees.
    pub rotation: (f32, f32),
    /// Current health, out of 20 per the usual voxel-game convention.
    pub health: f32,
    /// Inventory slots, indexed by slot number.
    pub inventory: Vec<InventorySlot>,
}

impl PlayerEntity {
    /// Creates a fresh player entity at the world's spawn point.
    pub fn spawn(id: u64, username: String, uuid: Uuid, world: &WorldMetadata) -> Self {
        Self {
            id,
            username,
            uuid,
            world_ref: world.world_type.clone(),
            position: world.spawn_point,
            rotation: (0.0, 0.0),
            health: 20.0,
            inventory: Vec::new(),
        }
    }

    fn path(players_root: &Path, uuid: Uuid) -> PathBuf {
        players_root.join(format!("{uuid}.json"))
    }

    /// Loads a previously persisted player entity by uuid, if one exists.
    pub fn load(players_root: &Path, uuid: Uuid) -> Result<Option<Self>> {
        read_with_backup(&Self::path(players_root, uuid))
    }

    /// Persists this player entity.
    pub fn save(&self, players_root: &Path) -> Result<()> {
        write_atomic_json(&Self::path(players_root, self.uuid), self)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    fn temp_root() -> PathBuf {
        static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("vox_server_world_test_{}_{n}", std::process::id()));
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn world_metadata_is_created_with_defaults_then_reloaded_unchanged() {
        let root = temp_root();
        let created = WorldMetadata::load_or_create(&root, 256).unwrap();
        assert_eq!(created.height, 256);
        let reloaded = WorldMetadata::load_or_create(&root, 512).unwrap();
        assert_eq!(reloaded.height, 256, "a pre-existing world.json must not be overwritten");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn player_entity_round_trips_through_save_and_load() {
        let root = temp_root();
        let world = WorldMetadata::load_or_create(&root, 256).unwrap();
        let uuid = Uuid::new_v4();
        let player = PlayerEntity::spawn(1, "steve".to_owned(), uuid, &world);
        player.save(&root).unwrap();
        let loaded = PlayerEntity::load(&root, uuid).unwrap().unwrap();
        assert_eq!(loaded.username, "steve");
        assert_eq!(loaded.position, world.spawn_point);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn loading_an_absent_player_returns_none() {
        let root = temp_root();
        assert!(PlayerEntity::load(&root, Uuid::new_v4()).unwrap().is_none());
        fs::remove_dir_all(&root).unwrap();
    }
}
