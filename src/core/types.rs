//! Spatial types and identity records carried by the wire format.

use uuid::Uuid;

/// Number of hotbar slots; held-item indices outside `0..HOTBAR_SIZE` are
/// ignored by the session.
pub const HOTBAR_SIZE: i16 = 9;

/// Absolute player position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerPos {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PlayerPos {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Player orientation (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerRot {
    pub yaw: f32,
    pub pitch: f32,
}

impl PlayerRot {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }
}

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the neighboring position on the given block face
    /// (0 -y, 1 +y, 2 -z, 3 +z, 4 -x, 5 +x). Unknown faces leave the
    /// position unchanged.
    pub fn offset_by_face(self, face: i64) -> Self {
        let mut pos = self;
        match face {
            0 => pos.y -= 1,
            1 => pos.y += 1,
            2 => pos.z -= 1,
            3 => pos.z += 1,
            4 => pos.x -= 1,
            5 => pos.x += 1,
            _ => {}
        }
        pos
    }
}

impl From<PlayerPos> for BlockPos {
    fn from(pos: PlayerPos) -> Self {
        Self {
            x: pos.x as i32,
            y: pos.y as i32,
            z: pos.z as i32,
        }
    }
}

/// Chunk coordinate (one chunk spans 16x16 blocks on the horizontal plane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl From<BlockPos> for ChunkPos {
    fn from(pos: BlockPos) -> Self {
        Self {
            x: pos.x / 16,
            z: pos.z / 16,
        }
    }
}

impl From<PlayerPos> for ChunkPos {
    fn from(pos: PlayerPos) -> Self {
        Self {
            x: (pos.x / 16.0) as i32,
            z: (pos.z / 16.0) as i32,
        }
    }
}

/// A window slot holding an item and its count. Auxiliary item data is out
/// of scope and not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub item_id: i32,
    pub count: u8,
}

/// First hotbar slot index within the player inventory window.
const HOTBAR_WINDOW_START: i16 = 36;

/// Maps a player-inventory window slot to a hotbar index, or `None` for
/// slots outside the hotbar.
pub fn hotbar_index(window_slot: i16) -> Option<usize> {
    if (HOTBAR_WINDOW_START..HOTBAR_WINDOW_START + HOTBAR_SIZE).contains(&window_slot) {
        Some((window_slot - HOTBAR_WINDOW_START) as usize)
    } else {
        None
    }
}

/// Identity record for a connected client, owned by the directory service.
/// Sessions hold a cached copy after login.
#[derive(Debug, Clone, Default)]
pub struct ClientRecord {
    pub id: u32,
    pub uuid: Uuid,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_pos_from_player_pos() {
        assert_eq!(ChunkPos::from(PlayerPos::new(0.0, 66.0, 0.0)), ChunkPos::new(0, 0));
        assert_eq!(ChunkPos::from(PlayerPos::new(31.9, 66.0, 16.0)), ChunkPos::new(1, 1));
    }

    #[test]
    fn hotbar_window_mapping() {
        assert_eq!(hotbar_index(35), None);
        assert_eq!(hotbar_index(36), Some(0));
        assert_eq!(hotbar_index(44), Some(8));
        assert_eq!(hotbar_index(45), None);
        assert_eq!(hotbar_index(-1), None);
    }

    #[test]
    fn face_offsets() {
        let base = BlockPos::new(10, 64, -5);
        assert_eq!(base.offset_by_face(0), BlockPos::new(10, 63, -5));
        assert_eq!(base.offset_by_face(1), BlockPos::new(10, 65, -5));
        assert_eq!(base.offset_by_face(2), BlockPos::new(10, 64, -6));
        assert_eq!(base.offset_by_face(3), BlockPos::new(10, 64, -4));
        assert_eq!(base.offset_by_face(4), BlockPos::new(9, 64, -5));
        assert_eq!(base.offset_by_face(5), BlockPos::new(11, 64, -5));
        assert_eq!(base.offset_by_face(7), base);
    }
}
