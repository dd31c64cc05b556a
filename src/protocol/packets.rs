//! Packet id tables and outbound packet builders.
//!
//! Ids are fixed by protocol version 498. Outbound builders return a
//! [`PacketWriter`] whose buffer the session hands to its transport writer;
//! text bodies that cross the wire as chat components are JSON-encoded.

use crate::core::types::{BlockPos, PlayerPos, PlayerRot};
use crate::core::writer::PacketWriter;
use uuid::Uuid;

/// Packets legal in the `Handshake` state.
pub mod handshake {
    /// Inbound packet ids
    pub const IN_HANDSHAKE: u64 = 0x00;
}

/// Packets legal in the `Status` state.
pub mod status {
    use super::*;

    /// Inbound packet ids
    pub const IN_REQUEST: u64 = 0x00;
    pub const IN_PING: u64 = 0x01;

    /// Outbound packet ids
    pub const OUT_RESPONSE: u64 = 0x00;
    pub const OUT_PONG: u64 = 0x01;

    /// Server list response: version info, player counts and description,
    /// serialized as the status JSON document.
    pub fn make_response(
        version_name: &str,
        protocol_version: i64,
        max_players: u32,
        online_players: u32,
        description: &str,
    ) -> PacketWriter {
        let body = serde_json::json!({
            "version": { "name": version_name, "protocol": protocol_version },
            "players": { "max": max_players, "online": online_players },
            "description": { "text": description },
        });

        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_RESPONSE);
        writer.write_string(&body.to_string());
        writer
    }

    /// Echoes the client-chosen ping token unchanged.
    pub fn make_pong(token: i64) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_PONG);
        writer.write_i64(token);
        writer
    }
}

/// Packets legal in the `Login` state.
pub mod login {
    use super::*;

    /// Inbound packet ids
    pub const IN_LOGIN_START: u64 = 0x00;

    /// Outbound packet ids
    pub const OUT_DISCONNECT: u64 = 0x00;
    pub const OUT_LOGIN_SUCCESS: u64 = 0x02;

    pub fn make_disconnect(reason: &str) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_DISCONNECT);
        writer.write_string(&serde_json::json!({ "text": reason }).to_string());
        writer
    }

    pub fn make_login_success(uuid: &Uuid, username: &str) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_LOGIN_SUCCESS);
        writer.write_uuid_string(uuid);
        writer.write_string(username);
        writer
    }
}

/// Packets legal in the `Play` state.
pub mod play {
    use super::*;

    /// Inbound packet ids
    pub const IN_CHAT_MESSAGE: u64 = 0x03;
    pub const IN_CLIENT_SETTINGS: u64 = 0x05;
    pub const IN_CLOSE_WINDOW: u64 = 0x0A;
    pub const IN_KEEP_ALIVE: u64 = 0x0F;
    pub const IN_PLAYER: u64 = 0x10;
    pub const IN_PLAYER_POSITION: u64 = 0x11;
    pub const IN_PLAYER_POSITION_AND_LOOK: u64 = 0x12;
    pub const IN_PLAYER_LOOK: u64 = 0x13;
    pub const IN_PLAYER_DIGGING: u64 = 0x1A;
    pub const IN_HELD_ITEM_CHANGE: u64 = 0x23;
    pub const IN_CREATIVE_INVENTORY_ACTION: u64 = 0x26;
    pub const IN_PLAYER_BLOCK_PLACEMENT: u64 = 0x2C;

    /// Outbound packet ids
    pub const OUT_BLOCK_CHANGE: u64 = 0x0B;
    pub const OUT_CHAT_MESSAGE: u64 = 0x0E;
    pub const OUT_DISCONNECT: u64 = 0x1A;
    pub const OUT_UNLOAD_CHUNK: u64 = 0x1D;
    pub const OUT_KEEP_ALIVE: u64 = 0x20;
    pub const OUT_CHUNK_DATA: u64 = 0x21;
    pub const OUT_JOIN_GAME: u64 = 0x25;
    pub const OUT_PLAYER_POSITION_AND_LOOK: u64 = 0x35;
    pub const OUT_SPAWN_POSITION: u64 = 0x4D;

    pub fn make_block_change(pos: BlockPos, block_id: u16) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_BLOCK_CHANGE);
        writer.write_position(pos);
        writer.write_varint(block_id as u64);
        writer
    }

    /// Plain text chat message; `position` selects the client display slot
    /// (0 = chat box).
    pub fn make_chat_message_simple(text: &str, position: u8) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_CHAT_MESSAGE);
        writer.write_string(&serde_json::json!({ "text": text }).to_string());
        writer.write_byte(position);
        writer
    }

    pub fn make_disconnect(reason: &str) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_DISCONNECT);
        writer.write_string(&serde_json::json!({ "text": reason }).to_string());
        writer
    }

    pub fn make_unload_chunk(x: i32, z: i32) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_UNLOAD_CHUNK);
        writer.write_i32(x);
        writer.write_i32(z);
        writer
    }

    pub fn make_keep_alive(id: u64) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_KEEP_ALIVE);
        writer.write_i64(id as i64);
        writer
    }

    /// Chunk data envelope. The heightmap blob is a pre-encoded auxiliary
    /// payload and the section data is pre-encoded by the world service;
    /// both are copied verbatim.
    pub fn make_chunk_data(
        x: i32,
        z: i32,
        section_bitmask: u64,
        heightmaps: &[u8],
        data: &[u8],
    ) -> PacketWriter {
        let mut writer = PacketWriter::with_capacity(data.len() + heightmaps.len() + 32);
        writer.write_varint(OUT_CHUNK_DATA);
        writer.write_i32(x);
        writer.write_i32(z);
        writer.write_bool(true); // full chunk
        writer.write_varint(section_bitmask);
        writer.write_raw(heightmaps);
        writer.write_varint(data.len() as u64);
        writer.write_raw(data);
        writer.write_varint(0); // no block entities
        writer
    }

    pub fn make_join_game(
        entity_id: i32,
        gamemode: u8,
        dimension: i32,
        max_players: u8,
        view_distance: i64,
    ) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_JOIN_GAME);
        writer.write_i32(entity_id);
        writer.write_byte(gamemode);
        writer.write_i32(dimension);
        writer.write_byte(max_players);
        writer.write_string("default");
        writer.write_varint(view_distance as u64);
        writer.write_bool(false); // reduced debug info
        writer
    }

    pub fn make_player_position_and_look(
        pos: PlayerPos,
        rot: PlayerRot,
        flags: u8,
        teleport_id: u64,
    ) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_PLAYER_POSITION_AND_LOOK);
        writer.write_f64(pos.x);
        writer.write_f64(pos.y);
        writer.write_f64(pos.z);
        writer.write_f32(rot.yaw);
        writer.write_f32(rot.pitch);
        writer.write_byte(flags);
        writer.write_varint(teleport_id);
        writer
    }

    pub fn make_spawn_position(pos: BlockPos) -> PacketWriter {
        let mut writer = PacketWriter::new();
        writer.write_varint(OUT_SPAWN_POSITION);
        writer.write_position(pos);
        writer
    }
}
