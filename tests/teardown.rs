//! Fatal-condition behavior of the running session task: disconnect
//! notices, silent teardown on malformed input, and peer notifications.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use world_protocol::config::{Config, PROTOCOL_VERSION};
use world_protocol::core::reader::PacketReader;
use world_protocol::core::writer::PacketWriter;
use world_protocol::protocol::packets;
use world_protocol::protocol::session::{Session, SessionHandle, SessionMsg};
use world_protocol::service::directory::{Directory, DirectoryMsg};
use world_protocol::service::scripting::{ScriptingEngine, ScriptingMsg};

struct Running {
    handle: SessionHandle,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    directory_rx: mpsc::UnboundedReceiver<DirectoryMsg>,
    scripting_rx: mpsc::UnboundedReceiver<ScriptingMsg>,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_session() -> Running {
    let config = Arc::new(Config::default());
    let (directory, directory_rx) = Directory::channel();
    let (scripting, scripting_rx) = ScriptingEngine::channel();
    let (handle, mailbox) = SessionHandle::channel(9);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    let session = Session::new(9, config, outbound, directory, scripting, handle.clone());
    let task = tokio::spawn(session.run(mailbox));
    Running {
        handle,
        outbound_rx,
        directory_rx,
        scripting_rx,
        task,
    }
}

fn handshake(next_state: u64, version: u64) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_varint(0x00);
    w.write_varint(version);
    w.write_string("localhost");
    w.write_u16(25565);
    w.write_varint(next_state);
    w.into_bytes()
}

async fn assert_peer_notifications(
    directory_rx: &mut mpsc::UnboundedReceiver<DirectoryMsg>,
    scripting_rx: &mut mpsc::UnboundedReceiver<ScriptingMsg>,
) {
    match timeout(Duration::from_secs(1), directory_rx.recv())
        .await
        .expect("directory notification")
    {
        Some(DirectoryMsg::RemoveClient { id }) => assert_eq!(id, 9),
        other => panic!("expected client removal, got {other:?}"),
    }
    match timeout(Duration::from_secs(1), scripting_rx.recv())
        .await
        .expect("scripting notification")
    {
        Some(ScriptingMsg::UnregisterPlayer { id }) => assert_eq!(id, 9),
        other => panic!("expected player unregistration, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_version_tears_down_without_notice() {
    let Running {
        handle,
        mut outbound_rx,
        mut directory_rx,
        mut scripting_rx,
        task,
    } = spawn_session();

    handle.send(SessionMsg::PacketIn(handshake(2, 1000)));

    timeout(Duration::from_secs(1), task)
        .await
        .expect("session should stop")
        .unwrap();

    // No disconnect packet exists in the handshake state; the channel just
    // closes.
    assert!(outbound_rx.recv().await.is_none());
    assert_peer_notifications(&mut directory_rx, &mut scripting_rx).await;
}

#[tokio::test]
async fn malformed_login_tears_down_silently() {
    let Running {
        handle,
        mut outbound_rx,
        mut directory_rx,
        mut scripting_rx,
        task,
    } = spawn_session();

    handle.send(SessionMsg::PacketIn(handshake(2, PROTOCOL_VERSION as u64)));

    // LoginStart whose declared string length runs past the buffer.
    let buf = Bytes::from_static(&[0x00, 0x20, b'A', b'l']);
    handle.send(SessionMsg::PacketIn(buf));

    timeout(Duration::from_secs(1), task)
        .await
        .expect("session should stop")
        .unwrap();

    assert!(outbound_rx.recv().await.is_none());
    assert_peer_notifications(&mut directory_rx, &mut scripting_rx).await;
}

#[tokio::test]
async fn login_violation_sends_login_disconnect_notice() {
    let Running {
        handle,
        mut outbound_rx,
        mut directory_rx,
        mut scripting_rx,
        task,
    } = spawn_session();

    handle.send(SessionMsg::PacketIn(handshake(2, PROTOCOL_VERSION as u64)));

    // A world lookup coming back empty means the registry entry is absent;
    // the session must fall back to a disconnect notice.
    handle.send(SessionMsg::WorldResolved(None));

    timeout(Duration::from_secs(1), task)
        .await
        .expect("session should stop")
        .unwrap();

    let notice = outbound_rx.recv().await.expect("disconnect notice");
    let mut r = PacketReader::new(&notice);
    assert_eq!(r.read_varint().unwrap(), packets::login::OUT_DISCONNECT);
    let body: serde_json::Value = serde_json::from_str(&r.read_string(32_767).unwrap()).unwrap();
    assert!(body["text"].as_str().unwrap().contains("world"));

    assert!(outbound_rx.recv().await.is_none());
    assert_peer_notifications(&mut directory_rx, &mut scripting_rx).await;
}

#[tokio::test]
async fn stop_message_ends_the_session() {
    let Running {
        handle,
        outbound_rx: _outbound_rx,
        mut directory_rx,
        mut scripting_rx,
        task,
    } = spawn_session();

    handle.send(SessionMsg::Stop);
    timeout(Duration::from_secs(1), task)
        .await
        .expect("session should stop")
        .unwrap();
    assert_peer_notifications(&mut directory_rx, &mut scripting_rx).await;
}
