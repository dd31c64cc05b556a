//! World service: the sole owner of one world's chunk and block state.
//!
//! Chunk requests reply straight to the requesting session's transport
//! writer, so bulk chunk data never passes through the session's mailbox.
//! Block edits are applied here and fanned out to every client as a
//! BlockChange packet through the directory.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::types::BlockPos;
use crate::core::writer::PacketWriter;
use crate::protocol::packets;
use crate::service::directory::DirectoryHandle;
use crate::transport::OutboundSender;

/// World height in 16-block sections.
const SECTION_COUNT: usize = 16;

/// Ground level of the flat terrain stub; everything below is stone.
const GROUND_LEVEL: i32 = 64;

const STONE: u16 = 1;
const AIR: u16 = 0;

/// Direct (palette-free) encoding width used in chunk data.
const BITS_PER_BLOCK: usize = 14;

/// Minimal pre-encoded heightmap blob (an empty auxiliary compound). The
/// codec copies it verbatim; its contents are opaque at this layer.
const HEIGHTMAPS_STUB: &[u8] = &[0x0A, 0x00, 0x00, 0x00];

/// Messages accepted by a world unit.
#[derive(Debug)]
pub enum WorldMsg {
    /// Asks for a full chunk; the reply goes directly to `reply_to`.
    RequestChunk {
        x: i32,
        z: i32,
        reply_to: OutboundSender,
    },
    /// Applies a block edit and announces it to connected clients.
    SetBlock { pos: BlockPos, block_id: u16 },
}

/// Cloneable mailbox handle for a world unit.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    tx: mpsc::UnboundedSender<WorldMsg>,
}

impl WorldHandle {
    /// Creates a handle/receiver pair without spawning; used by tests that
    /// inspect the world's mailbox directly.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorldMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request_chunk(&self, x: i32, z: i32, reply_to: OutboundSender) {
        let _ = self.tx.send(WorldMsg::RequestChunk { x, z, reply_to });
    }

    pub fn set_block(&self, pos: BlockPos, block_id: u16) {
        let _ = self.tx.send(WorldMsg::SetBlock { pos, block_id });
    }
}

/// A world as seen by sessions: its name plus its mailbox.
#[derive(Debug, Clone)]
pub struct WorldRef {
    pub name: String,
    pub handle: WorldHandle,
}

struct ChunkSection {
    blocks: Box<[u16; 4096]>,
}

impl ChunkSection {
    fn filled(id: u16) -> Self {
        Self {
            blocks: Box::new([id; 4096]),
        }
    }

    fn block_count(&self) -> i16 {
        self.blocks.iter().filter(|&&b| b != AIR).count() as i16
    }
}

struct Chunk {
    sections: HashMap<u8, ChunkSection>,
}

impl Chunk {
    /// Flat terrain: stone up to the ground level, air above.
    fn generate() -> Self {
        let mut sections = HashMap::new();
        for section_y in 0..(GROUND_LEVEL / 16) as u8 {
            sections.insert(section_y, ChunkSection::filled(STONE));
        }
        Self { sections }
    }

    fn set_block(&mut self, local_x: usize, y: usize, local_z: usize, id: u16) {
        let section_y = (y / 16) as u8;
        let section = self
            .sections
            .entry(section_y)
            .or_insert_with(|| ChunkSection::filled(AIR));
        section.blocks[(y % 16) * 256 + local_z * 16 + local_x] = id;
    }

    fn section_bitmask(&self) -> u64 {
        self.sections
            .keys()
            .fold(0u64, |mask, &section_y| mask | 1 << section_y)
    }
}

/// Packs values into consecutive little-end-first bit fields of 64-bit
/// words; entries may span word boundaries.
fn pack_bits(values: &[u16], bits: usize) -> Vec<u64> {
    let mut out = vec![0u64; (values.len() * bits + 63) / 64];
    for (i, &v) in values.iter().enumerate() {
        let bit = i * bits;
        let word = bit / 64;
        let offset = bit % 64;
        out[word] |= (v as u64) << offset;
        if offset + bits > 64 {
            out[word + 1] |= (v as u64) >> (64 - offset);
        }
    }
    out
}

/// The world unit's state.
pub struct WorldService {
    name: String,
    directory: DirectoryHandle,
    chunks: HashMap<(i32, i32), Chunk>,
}

impl WorldService {
    pub fn new(name: impl Into<String>, directory: DirectoryHandle) -> Self {
        Self {
            name: name.into(),
            directory,
            chunks: HashMap::new(),
        }
    }

    /// Spawns the world onto the runtime and returns a reference for
    /// sessions and the directory registry.
    pub fn spawn(name: impl Into<String>, directory: DirectoryHandle) -> WorldRef {
        let service = Self::new(name, directory);
        let name = service.name.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(service.run(rx));
        WorldRef {
            name,
            handle: WorldHandle { tx },
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorldMsg>) {
        info!(world = %self.name, "world started");
        while let Some(msg) = rx.recv().await {
            self.handle_message(msg);
        }
        debug!(world = %self.name, "world stopped");
    }

    pub fn handle_message(&mut self, msg: WorldMsg) {
        match msg {
            WorldMsg::RequestChunk { x, z, reply_to } => {
                let chunk = self.chunks.entry((x, z)).or_insert_with(Chunk::generate);
                let packet = encode_chunk_data(x, z, chunk);
                let _ = reply_to.send(packet.into_bytes());
            }

            WorldMsg::SetBlock { pos, block_id } => {
                if !(0..SECTION_COUNT as i32 * 16).contains(&pos.y) {
                    warn!(world = %self.name, ?pos, "block edit outside world height");
                    return;
                }
                let chunk_x = pos.x.div_euclid(16);
                let chunk_z = pos.z.div_euclid(16);
                let chunk = self
                    .chunks
                    .entry((chunk_x, chunk_z))
                    .or_insert_with(Chunk::generate);
                chunk.set_block(
                    pos.x.rem_euclid(16) as usize,
                    pos.y as usize,
                    pos.z.rem_euclid(16) as usize,
                    block_id,
                );

                let packet = packets::play::make_block_change(pos, block_id);
                self.directory.broadcast_packet(packet.into_bytes());
            }
        }
    }
}

/// Encodes the full chunk data packet: present sections in ascending order
/// (block count, direct-palette bit array), then the biome table.
fn encode_chunk_data(x: i32, z: i32, chunk: &Chunk) -> PacketWriter {
    let mut data = PacketWriter::with_capacity(chunk.sections.len() * 7200 + 1024);

    let mut section_ys: Vec<u8> = chunk.sections.keys().copied().collect();
    section_ys.sort_unstable();
    for section_y in section_ys {
        let section = &chunk.sections[&section_y];
        data.write_i16(section.block_count());
        data.write_byte(BITS_PER_BLOCK as u8);
        let words = pack_bits(&section.blocks[..], BITS_PER_BLOCK);
        data.write_varint(words.len() as u64);
        for word in words {
            data.write_u64(word);
        }
    }
    for _ in 0..256 {
        data.write_i32(0); // biome table
    }

    let data = data.into_bytes();
    packets::play::make_chunk_data(x, z, chunk.section_bitmask(), HEIGHTMAPS_STUB, &data)
}
