//! End-to-end login choreography across the real units, driven
//! deterministically by pumping each mailbox in turn.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use world_protocol::config::{Config, PROTOCOL_VERSION};
use world_protocol::core::reader::PacketReader;
use world_protocol::core::writer::PacketWriter;
use world_protocol::protocol::packets;
use world_protocol::protocol::session::{Session, SessionHandle, SessionMsg};
use world_protocol::service::directory::{Directory, DirectoryMsg};
use world_protocol::service::scripting::{ScriptingEngine, ScriptingMsg};
use world_protocol::service::world::{WorldMsg, WorldService};

struct Net {
    session: Session,
    session_rx: mpsc::UnboundedReceiver<SessionMsg>,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    directory: Directory,
    directory_rx: mpsc::UnboundedReceiver<DirectoryMsg>,
    scripting: ScriptingEngine,
    scripting_rx: mpsc::UnboundedReceiver<ScriptingMsg>,
    world: WorldService,
    world_rx: mpsc::UnboundedReceiver<WorldMsg>,
}

/// Builds the whole unit graph for one client, with every mailbox held by
/// the test instead of a running task.
fn network() -> Net {
    let config = Arc::new(Config::default());

    let (directory_handle, directory_rx) = Directory::channel();
    let (scripting_handle, scripting_rx) = ScriptingEngine::channel();
    let (world_handle, world_rx) = world_protocol::service::WorldHandle::channel();

    let mut directory = Directory::new();
    directory.handle_message(DirectoryMsg::AddWorld {
        world: world_protocol::service::WorldRef {
            name: "Main".into(),
            handle: world_handle,
        },
    });

    let (session_handle, session_rx) = SessionHandle::channel(1);
    directory.handle_message(DirectoryMsg::AddClient {
        id: 1,
        session: session_handle.clone(),
    });

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let session = Session::new(
        1,
        config.clone(),
        outbound,
        directory_handle,
        scripting_handle,
        session_handle,
    );

    Net {
        session,
        session_rx,
        outbound_rx,
        directory,
        directory_rx,
        scripting: ScriptingEngine::new(config.scripting.idle_timeout()),
        scripting_rx,
        world: WorldService::new("Main", Directory::channel().0),
        world_rx,
    }
}

/// Delivers queued messages unit by unit until the network goes quiet.
fn pump(net: &mut Net) {
    loop {
        let mut progressed = false;
        while let Ok(msg) = net.directory_rx.try_recv() {
            net.directory.handle_message(msg);
            progressed = true;
        }
        while let Ok(msg) = net.scripting_rx.try_recv() {
            net.scripting.handle_message(msg);
            progressed = true;
        }
        while let Ok(msg) = net.world_rx.try_recv() {
            net.world.handle_message(msg);
            progressed = true;
        }
        while let Ok(msg) = net.session_rx.try_recv() {
            net.session.handle_message(msg).expect("session failure");
            progressed = true;
        }
        if !progressed {
            return;
        }
    }
}

fn handshake_packet(next_state: u64) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_varint(0x00);
    w.write_varint(PROTOCOL_VERSION as u64);
    w.write_string("localhost");
    w.write_u16(25565);
    w.write_varint(next_state);
    w.into_bytes()
}

fn login_start_packet(username: &str) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_varint(packets::login::IN_LOGIN_START);
    w.write_string(username);
    w.into_bytes()
}

fn drain_outbound(net: &mut Net) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Ok(packet) = net.outbound_rx.try_recv() {
        out.push(packet);
    }
    out
}

#[test]
fn login_emits_success_join_spawn_and_position_in_order() {
    let mut net = network();

    net.session.handle_packet(&handshake_packet(2)).unwrap();
    net.session
        .handle_packet(&login_start_packet("Alice"))
        .unwrap();
    pump(&mut net);

    let packets_out = drain_outbound(&mut net);
    let ids: Vec<u64> = packets_out
        .iter()
        .map(|p| PacketReader::new(p).read_varint().unwrap())
        .collect();

    assert_eq!(ids[0], packets::login::OUT_LOGIN_SUCCESS);
    assert_eq!(ids[1], packets::play::OUT_JOIN_GAME);
    assert_eq!(ids[2], packets::play::OUT_SPAWN_POSITION);
    assert_eq!(ids[3], packets::play::OUT_PLAYER_POSITION_AND_LOOK);

    // The initial chunk window arrives from the world after the join
    // sequence: one full radius-4 square.
    let chunk_data = ids[4..]
        .iter()
        .filter(|&&id| id == packets::play::OUT_CHUNK_DATA)
        .count();
    assert_eq!(chunk_data, 81);

    // The login success carries the directory-assigned identity.
    let mut r = PacketReader::new(&packets_out[0]);
    r.read_varint().unwrap();
    let uuid = r.read_string(36).unwrap();
    assert_eq!(uuid.len(), 36);
    assert_eq!(r.read_string(16).unwrap(), "Alice");
}

#[test]
fn status_exchange_answers_request_and_ping() {
    let mut net = network();

    net.session.handle_packet(&handshake_packet(1)).unwrap();

    let mut w = PacketWriter::new();
    w.write_varint(packets::status::IN_REQUEST);
    net.session.handle_packet(&w.into_bytes()).unwrap();

    let mut w = PacketWriter::new();
    w.write_varint(packets::status::IN_PING);
    w.write_i64(777);
    net.session.handle_packet(&w.into_bytes()).unwrap();
    pump(&mut net);

    let out = drain_outbound(&mut net);
    assert_eq!(out.len(), 2);

    let mut r = PacketReader::new(&out[0]);
    assert_eq!(r.read_varint().unwrap(), packets::status::OUT_RESPONSE);
    let body: serde_json::Value = serde_json::from_str(&r.read_string(32_767).unwrap()).unwrap();
    assert_eq!(body["version"]["protocol"], PROTOCOL_VERSION);

    let mut r = PacketReader::new(&out[1]);
    assert_eq!(r.read_varint().unwrap(), packets::status::OUT_PONG);
    assert_eq!(r.read_i64().unwrap(), 777);
}

#[test]
fn chat_after_login_reaches_every_client_via_broadcast() {
    let mut net = network();

    net.session.handle_packet(&handshake_packet(2)).unwrap();
    net.session
        .handle_packet(&login_start_packet("Alice"))
        .unwrap();
    pump(&mut net);
    drain_outbound(&mut net);

    let mut w = PacketWriter::new();
    w.write_varint(packets::play::IN_CHAT_MESSAGE);
    w.write_string("hello everyone");
    net.session.handle_packet(&w.into_bytes()).unwrap();
    pump(&mut net);

    let out = drain_outbound(&mut net);
    assert_eq!(out.len(), 1);
    let mut r = PacketReader::new(&out[0]);
    assert_eq!(r.read_varint().unwrap(), packets::play::OUT_CHAT_MESSAGE);
    let body: serde_json::Value = serde_json::from_str(&r.read_string(32_767).unwrap()).unwrap();
    assert_eq!(body["text"], "Alice: hello everyone");
}
