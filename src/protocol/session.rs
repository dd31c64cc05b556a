//! Per-connection protocol state machine.
//!
//! A session is one single-threaded-logic unit of execution per connection.
//! Its mailbox carries raw inbound packet buffers from the transport,
//! replies from peer services, event resolutions from the scripting engine,
//! and script queries; all of them are processed strictly in arrival order.
//! Requests to peers return immediately; the reply is just another mailbox
//! message, so one session waiting on the directory never stalls another.
//!
//! Packet dispatch is a closed table per protocol state: the first varint of
//! every packet selects a handler, unknown ids are skipped with a diagnostic
//! (forward compatibility), except in the handshake state where exactly one
//! packet is legal. Handler errors never leave this unit: a protocol
//! violation produces a best-effort disconnect notice and teardown, a
//! malformed buffer tears the connection down silently.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PROTOCOL_VERSION, PROTOCOL_VERSION_NAME};
use crate::core::reader::PacketReader;
use crate::core::types::{
    hotbar_index, BlockPos, ChunkPos, ClientRecord, PlayerPos, PlayerRot, Slot, HOTBAR_SIZE,
};
use crate::core::writer::PacketWriter;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::events::{ContinuationBridge, EventKind};
use crate::protocol::packets;
use crate::service::directory::DirectoryHandle;
use crate::service::scripting::ScriptingHandle;
use crate::service::world::WorldRef;
use crate::transport::OutboundSender;

/// Protocol states, advancing only through
/// `Handshake -> {Status | Login} -> (Login ->) Play`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshake,
    Status,
    Login,
    Play,
}

/// Display settings reported by the client; accepted and stored.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub locale: String,
    pub view_distance: i8,
    pub chat_mode: i64,
    pub chat_colors: bool,
    pub skin_parts: u8,
    pub main_hand: i64,
}

/// Messages deliverable to a session's mailbox.
#[derive(Debug)]
pub enum SessionMsg {
    /// One whole inbound packet buffer from the transport.
    PacketIn(Bytes),
    /// Pre-encoded packet to forward to the transport writer.
    PacketOut(Bytes),
    /// System chat message shown to this client.
    Message(String),
    /// Event resolution from the scripting engine.
    EventComplete { event_id: u64, suppressed: bool },
    /// Directory reply to an identity lookup.
    IdentityResolved(ClientRecord),
    /// Directory reply to a world lookup.
    WorldResolved(Option<WorldRef>),
    /// Scripting query for this session's position.
    QueryPosition { task_id: u64 },
    /// Scripting query for this session's world.
    QueryWorld { task_id: u64 },
    /// Stop accepting input and tear down.
    Stop,
}

/// Cloneable mailbox handle for one session. Sends to a torn-down session
/// are discarded.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: u32,
    tx: mpsc::UnboundedSender<SessionMsg>,
}

impl SessionHandle {
    /// Creates a handle/receiver pair for a new session mailbox.
    pub fn channel(id: u32) -> (Self, mpsc::UnboundedReceiver<SessionMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn send(&self, msg: SessionMsg) {
        let _ = self.tx.send(msg);
    }
}

type PacketHandler = fn(&mut Session, &mut PacketReader<'_>) -> Result<()>;

fn status_handler(id: u64) -> Option<PacketHandler> {
    match id {
        packets::status::IN_REQUEST => Some(Session::handle_status_request),
        packets::status::IN_PING => Some(Session::handle_ping),
        _ => None,
    }
}

fn login_handler(id: u64) -> Option<PacketHandler> {
    match id {
        packets::login::IN_LOGIN_START => Some(Session::handle_login_start),
        _ => None,
    }
}

fn play_handler(id: u64) -> Option<PacketHandler> {
    use packets::play::*;
    match id {
        IN_CHAT_MESSAGE => Some(Session::handle_chat_message),
        IN_CLIENT_SETTINGS => Some(Session::handle_client_settings),
        IN_CLOSE_WINDOW => Some(Session::handle_close_window),
        IN_KEEP_ALIVE => Some(Session::handle_keep_alive),
        IN_PLAYER => Some(Session::handle_player),
        IN_PLAYER_POSITION => Some(Session::handle_player_position),
        IN_PLAYER_POSITION_AND_LOOK => Some(Session::handle_player_position_and_look),
        IN_PLAYER_LOOK => Some(Session::handle_player_look),
        IN_PLAYER_DIGGING => Some(Session::handle_player_digging),
        IN_HELD_ITEM_CHANGE => Some(Session::handle_held_item_change),
        IN_CREATIVE_INVENTORY_ACTION => Some(Session::handle_creative_inventory_action),
        IN_PLAYER_BLOCK_PLACEMENT => Some(Session::handle_player_block_placement),
        _ => None,
    }
}

/// One connected client's protocol state machine.
pub struct Session {
    id: u32,
    config: Arc<Config>,
    state: ConnectionState,
    outbound: OutboundSender,
    directory: DirectoryHandle,
    scripting: ScriptingHandle,
    handle: SessionHandle,

    record: ClientRecord,
    pending_username: Option<String>,
    world: Option<WorldRef>,

    pos: PlayerPos,
    rot: PlayerRot,
    on_ground: bool,
    last_chunk: Option<ChunkPos>,

    settings: Option<ClientSettings>,
    hotbar: [Option<Slot>; HOTBAR_SIZE as usize],
    held_slot: usize,

    last_tick: Option<Instant>,
    elapsed_ticks: u64,
    secs_since_keep_alive: u64,
    keep_alive_pending: Option<u64>,

    bridge: ContinuationBridge,
}

impl Session {
    pub fn new(
        id: u32,
        config: Arc<Config>,
        outbound: OutboundSender,
        directory: DirectoryHandle,
        scripting: ScriptingHandle,
        handle: SessionHandle,
    ) -> Self {
        Self {
            id,
            config,
            state: ConnectionState::Handshake,
            outbound,
            directory,
            scripting,
            handle,
            record: ClientRecord::default(),
            pending_username: None,
            world: None,
            pos: PlayerPos::default(),
            rot: PlayerRot::default(),
            on_ground: true,
            last_chunk: None,
            settings: None,
            hotbar: Default::default(),
            held_slot: 0,
            last_tick: None,
            elapsed_ticks: 0,
            secs_since_keep_alive: 0,
            keep_alive_pending: None,
            bridge: ContinuationBridge::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn position(&self) -> PlayerPos {
        self.pos
    }

    pub fn on_ground(&self) -> bool {
        self.on_ground
    }

    pub fn client_settings(&self) -> Option<&ClientSettings> {
        self.settings.as_ref()
    }

    pub fn held_index(&self) -> usize {
        self.held_slot
    }

    /// The slot item currently held by the player.
    pub fn held_item(&self) -> Option<&Slot> {
        self.hotbar[self.held_slot].as_ref()
    }

    /// Processes the mailbox until the transport stops the session or a
    /// fatal condition tears it down.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        while let Some(msg) = rx.recv().await {
            if matches!(msg, SessionMsg::Stop) {
                break;
            }
            if let Err(err) = self.handle_message(msg) {
                self.fail(err);
                break;
            }
        }
        self.teardown();
    }

    /// Dispatches one mailbox message. An error return is fatal to the
    /// session.
    pub fn handle_message(&mut self, msg: SessionMsg) -> Result<()> {
        match msg {
            SessionMsg::PacketIn(buf) => self.handle_packet(&buf),
            SessionMsg::PacketOut(packet) => {
                let _ = self.outbound.send(packet);
                Ok(())
            }
            SessionMsg::Message(text) => {
                self.send_packet(packets::play::make_chat_message_simple(&text, 0));
                Ok(())
            }
            SessionMsg::EventComplete {
                event_id,
                suppressed,
            } => {
                self.bridge.resolve(event_id, suppressed);
                Ok(())
            }
            SessionMsg::IdentityResolved(record) => self.on_identity_resolved(record),
            SessionMsg::WorldResolved(world) => self.on_world_resolved(world),
            SessionMsg::QueryPosition { task_id } => {
                self.scripting.position_reply(task_id, self.pos, self.rot);
                Ok(())
            }
            SessionMsg::QueryWorld { task_id } => {
                let name = self
                    .world
                    .as_ref()
                    .map(|w| w.name.clone())
                    .unwrap_or_default();
                self.scripting.world_reply(task_id, name);
                Ok(())
            }
            SessionMsg::Stop => Ok(()),
        }
    }

    /// Decodes the packet id and dispatches through the current state's
    /// table. Unknown ids are skipped with a diagnostic, except during the
    /// handshake where only one packet is legal.
    pub fn handle_packet(&mut self, buf: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(buf);
        let id = reader.read_varint()?;

        let handler = match self.state {
            ConnectionState::Handshake => match id {
                packets::handshake::IN_HANDSHAKE => Session::handle_handshake as PacketHandler,
                other => {
                    return Err(ProtocolError::disconnect(format!(
                        "unexpected packet {other:#04x} during handshake"
                    )))
                }
            },
            ConnectionState::Status => match status_handler(id) {
                Some(handler) => handler,
                None => {
                    debug!(session = self.id, packet_id = id, "unknown STATUS packet");
                    return Ok(());
                }
            },
            ConnectionState::Login => match login_handler(id) {
                Some(handler) => handler,
                None => {
                    debug!(session = self.id, packet_id = id, "unknown LOGIN packet");
                    return Ok(());
                }
            },
            ConnectionState::Play => match play_handler(id) {
                Some(handler) => handler,
                None => {
                    warn!(session = self.id, packet_id = id, "unknown PLAY packet");
                    return Ok(());
                }
            },
        };

        handler(self, &mut reader)
    }

    /// Hands a finished packet buffer to the transport writer.
    fn send_packet(&self, writer: PacketWriter) {
        let _ = self.outbound.send(writer.into_bytes());
    }

    //
    // Handshake state.
    //

    fn handle_handshake(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let proto_version = reader.read_varint()? as i64;
        if proto_version != PROTOCOL_VERSION {
            warn!(session = self.id, version = proto_version, "client has wrong protocol version");
            return Err(ProtocolError::disconnect(constants::REASON_WRONG_VERSION));
        }

        reader.read_string(255)?; // server address, unused
        reader.read_u16()?; // server port, unused

        match reader.read_varint()? {
            1 => self.state = ConnectionState::Status,
            2 => self.state = ConnectionState::Login,
            _ => return Err(ProtocolError::disconnect(constants::REASON_INVALID_NEXT_STATE)),
        }
        Ok(())
    }

    //
    // Status state.
    //

    fn handle_status_request(&mut self, _reader: &mut PacketReader<'_>) -> Result<()> {
        debug!(session = self.id, "status request");
        self.send_packet(packets::status::make_response(
            PROTOCOL_VERSION_NAME,
            PROTOCOL_VERSION,
            self.config.server.max_players,
            0,
            &self.config.server.description,
        ));
        Ok(())
    }

    fn handle_ping(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let token = reader.read_i64()?;
        self.send_packet(packets::status::make_pong(token));
        Ok(())
    }

    //
    // Login state.
    //

    fn handle_login_start(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let username = reader.read_string(16)?;
        info!(session = self.id, %username, "login start");

        // Identity lives in the directory; ask for it and keep servicing the
        // mailbox until the reply arrives.
        self.pending_username = Some(username);
        self.directory.get_client(self.id, self.handle.clone());
        Ok(())
    }

    fn on_identity_resolved(&mut self, record: ClientRecord) -> Result<()> {
        if self.state != ConnectionState::Login {
            debug!(session = self.id, "identity reply outside login; dropped");
            return Ok(());
        }
        let Some(username) = self.pending_username.take() else {
            return Ok(());
        };

        self.record = record;
        self.record.username = username;
        self.directory.set_client(self.id, self.record.clone());
        self.scripting
            .register_player(self.record.clone(), self.handle.clone());

        self.state = ConnectionState::Play;
        self.send_packet(packets::login::make_login_success(
            &self.record.uuid,
            &self.record.username,
        ));
        self.send_packet(packets::play::make_join_game(
            self.id as i32,
            1, // creative
            0, // overworld
            self.config.server.max_players.min(255) as u8,
            self.config.game.chunk_radius as i64,
        ));

        self.join_world();
        Ok(())
    }

    fn join_world(&mut self) {
        let name = self.config.game.main_world.clone();
        info!(session = self.id, world = %name, "joining world");
        self.directory.get_world(&name, self.handle.clone());
    }

    fn on_world_resolved(&mut self, world: Option<WorldRef>) -> Result<()> {
        let Some(world) = world else {
            return Err(ProtocolError::disconnect(constants::REASON_UNKNOWN_WORLD));
        };
        debug!(session = self.id, world = %world.name, "world resolved");
        self.world = Some(world);

        self.pos = PlayerPos::new(0.0, 66.0, 0.0);
        self.update_chunks();

        self.send_packet(packets::play::make_spawn_position(BlockPos::from(self.pos)));
        self.send_packet(packets::play::make_player_position_and_look(
            self.pos, self.rot, 0, 1,
        ));
        Ok(())
    }

    //
    // Play state.
    //

    fn handle_chat_message(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let msg = reader.read_string(256)?;

        if msg.starts_with('/') {
            self.handle_command(&msg);
            return Ok(());
        }

        let text = format!("{}: {}", self.record.username, msg);
        let directory = self.directory.clone();
        self.raise_event(
            EventKind::PlayerChat { message: msg },
            Box::new(move || directory.broadcast(text)),
        );
        Ok(())
    }

    fn handle_command(&mut self, msg: &str) {
        let name = msg
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        debug!(session = self.id, command = %name, "command");
        self.scripting.run_command(name, msg.to_owned(), self.id);
    }

    fn handle_client_settings(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let settings = ClientSettings {
            locale: reader.read_string(16)?,
            view_distance: reader.read_i8()?,
            chat_mode: reader.read_varint()? as i64,
            chat_colors: reader.read_bool()?,
            skin_parts: reader.read_byte()?,
            main_hand: reader.read_varint()? as i64,
        };
        self.settings = Some(settings);
        Ok(())
    }

    fn handle_close_window(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        reader.read_byte()?; // window id
        Ok(())
    }

    fn handle_keep_alive(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let id = reader.read_i64()? as u64;
        if self.keep_alive_pending != Some(id) {
            return Err(ProtocolError::disconnect(
                constants::REASON_KEEP_ALIVE_MISMATCH,
            ));
        }
        self.keep_alive_pending = None;
        self.secs_since_keep_alive = 0;
        Ok(())
    }

    fn handle_player(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let ground = reader.read_bool()?;
        self.update_position(self.pos, self.rot, ground)
    }

    fn handle_player_position(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let x = reader.read_f64()?;
        let y = reader.read_f64()?;
        let z = reader.read_f64()?;
        let ground = reader.read_bool()?;
        self.update_position(PlayerPos::new(x, y, z), self.rot, ground)
    }

    fn handle_player_position_and_look(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let x = reader.read_f64()?;
        let y = reader.read_f64()?;
        let z = reader.read_f64()?;
        let yaw = reader.read_f32()?;
        let pitch = reader.read_f32()?;
        let ground = reader.read_bool()?;
        self.update_position(PlayerPos::new(x, y, z), PlayerRot::new(yaw, pitch), ground)
    }

    fn handle_player_look(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let yaw = reader.read_f32()?;
        let pitch = reader.read_f32()?;
        let ground = reader.read_bool()?;
        self.update_position(self.pos, PlayerRot::new(yaw, pitch), ground)
    }

    fn handle_player_digging(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let _status = reader.read_varint()?;
        let pos = reader.read_position()?;
        let _face = reader.read_i8()?;

        let Some(world) = self.world.clone() else {
            return Ok(());
        };
        self.raise_event(
            EventKind::PlayerChangeBlock { pos, block_id: 0 },
            Box::new(move || world.handle.set_block(pos, 0)),
        );
        Ok(())
    }

    fn handle_held_item_change(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let idx = reader.read_i16()?;
        if !(0..HOTBAR_SIZE).contains(&idx) {
            return Ok(());
        }
        self.held_slot = idx as usize;
        Ok(())
    }

    fn handle_creative_inventory_action(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let idx = reader.read_i16()?;
        let has_item = reader.read_bool()?;

        // Changes are allowed only to the hotbar.
        let Some(hotbar_idx) = hotbar_index(idx) else {
            return Ok(());
        };

        if has_item {
            let item_id = reader.read_varint()? as i32;
            let count = reader.read_byte()?;
            self.hotbar[hotbar_idx] = Some(Slot { item_id, count });
        } else {
            self.hotbar[hotbar_idx] = None;
        }
        Ok(())
    }

    fn handle_player_block_placement(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let _hand = reader.read_varint()?;
        let location = reader.read_position()?;
        let face = reader.read_varint()? as i64;
        let _cursor_x = reader.read_f32()?;
        let _cursor_y = reader.read_f32()?;
        let _cursor_z = reader.read_f32()?;
        let _inside_block = reader.read_bool()?;

        let Some(item) = self.held_item() else {
            return Ok(()); // not holding anything
        };
        let block_id = item.item_id as u16;
        let place_pos = location.offset_by_face(face);

        let Some(world) = self.world.clone() else {
            return Ok(());
        };
        self.raise_event(
            EventKind::PlayerChangeBlock {
                pos: place_pos,
                block_id,
            },
            Box::new(move || world.handle.set_block(place_pos, block_id)),
        );
        Ok(())
    }

    //
    // Event triggers.
    //

    /// Raises an event trigger toward the scripting engine and attaches its
    /// deferred default action under a fresh event id.
    fn raise_event(&mut self, kind: EventKind, default: Box<dyn FnOnce() + Send>) {
        let event_id = self.bridge.next_event_id();
        self.scripting
            .player_event(self.id, event_id, kind, self.handle.clone());
        self.bridge.attach(event_id, default);
    }

    //
    // Movement, ticking, chunk window.
    //

    fn update_position(&mut self, pos: PlayerPos, rot: PlayerRot, ground: bool) -> Result<()> {
        self.pos = pos;
        self.rot = rot;
        self.on_ground = ground;

        self.call_tick()?;
        self.update_chunks();
        Ok(())
    }

    /// Runs one tick when at least a wall-clock second has passed since the
    /// previous one. Ticks are driven by movement packets only.
    fn call_tick(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.last_tick {
            None => {
                self.last_tick = Some(now);
                Ok(())
            }
            Some(last) if now.duration_since(last).as_secs_f64() >= 1.0 => {
                self.last_tick = Some(now);
                self.tick()
            }
            Some(_) => Ok(()),
        }
    }

    /// One second of session time: keep-alive probing and timeout tracking.
    fn tick(&mut self) -> Result<()> {
        self.elapsed_ticks += 1;
        self.secs_since_keep_alive += 1;

        if self.secs_since_keep_alive >= self.config.game.keep_alive_secs {
            match self.keep_alive_pending {
                None => {
                    let id = self.elapsed_ticks;
                    self.keep_alive_pending = Some(id);
                    self.secs_since_keep_alive = 0;
                    self.send_packet(packets::play::make_keep_alive(id));
                }
                Some(_) => {
                    // The previous probe went unanswered for a whole window.
                    return Err(ProtocolError::disconnect(constants::REASON_TIMED_OUT));
                }
            }
        }
        Ok(())
    }

    /// Reconciles the loaded-chunk window with the current chunk coordinate:
    /// coordinates leaving the radius square are unloaded, entering ones are
    /// requested from the world. No-op while the coordinate is unchanged.
    fn update_chunks(&mut self) {
        let cpos = ChunkPos::from(self.pos);
        if self.last_chunk == Some(cpos) {
            return;
        }
        let Some(world) = &self.world else {
            return;
        };
        let radius = self.config.game.chunk_radius;

        // Coordinates leaving the old square are unloaded against the old
        // center.
        if let Some(prev) = self.last_chunk {
            for x in prev.x - radius..=prev.x + radius {
                for z in prev.z - radius..=prev.z + radius {
                    if x < cpos.x - radius
                        || x > cpos.x + radius
                        || z < cpos.z - radius
                        || z > cpos.z + radius
                    {
                        self.send_packet(packets::play::make_unload_chunk(x, z));
                    }
                }
            }
        }

        // Coordinates entering the new square are fetched from the world;
        // replies go straight to the transport writer.
        for x in cpos.x - radius..=cpos.x + radius {
            for z in cpos.z - radius..=cpos.z + radius {
                let outside_prev = match self.last_chunk {
                    Some(prev) => {
                        x < prev.x - radius
                            || x > prev.x + radius
                            || z < prev.z - radius
                            || z > prev.z + radius
                    }
                    None => true,
                };
                if outside_prev {
                    world.handle.request_chunk(x, z, self.outbound.clone());
                }
            }
        }

        self.last_chunk = Some(cpos);
    }

    //
    // Failure and teardown.
    //

    /// Resolves a fatal handler error: protocol violations get a
    /// state-appropriate notice, malformed buffers get none.
    fn fail(&mut self, err: ProtocolError) {
        match err {
            ProtocolError::Malformed(what) => {
                warn!(session = self.id, error = what, "got bad packet data");
            }
            ProtocolError::Disconnect(reason) => {
                info!(session = self.id, %reason, "disconnecting client");
                match self.state {
                    ConnectionState::Login => {
                        self.send_packet(packets::login::make_disconnect(&reason));
                    }
                    ConnectionState::Play => {
                        self.send_packet(packets::play::make_disconnect(&reason));
                    }
                    _ => {}
                }
            }
            other => {
                error!(session = self.id, error = %other, "session failed");
            }
        }
    }

    /// Notifies every peer service this session registered with.
    fn teardown(&mut self) {
        debug!(session = self.id, "session teardown");
        self.directory.remove_client(self.id);
        self.scripting.unregister_player(self.id);
    }
}
