//! Directory/broadcast service: the sole owner of the client registry and
//! the world registry.
//!
//! Registry lookups issued by sessions are answered asynchronously through
//! the requesting session's own mailbox, never by handing out references to
//! registry state. Identity records are created here (with a fresh v4 uuid)
//! when the transport registers a new connection.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::types::ClientRecord;
use crate::protocol::packets;
use crate::protocol::session::{SessionHandle, SessionMsg};
use crate::service::world::WorldRef;

/// Messages accepted by the directory unit.
#[derive(Debug)]
pub enum DirectoryMsg {
    AddClient { id: u32, session: SessionHandle },
    RemoveClient { id: u32 },
    GetClient { id: u32, reply: SessionHandle },
    SetClient { id: u32, record: ClientRecord },
    AddWorld { world: WorldRef },
    GetWorld { name: String, reply: SessionHandle },
    /// Chat message delivered to every connected client.
    Broadcast { text: String },
    /// Pre-encoded packet fanned out to every connected client.
    BroadcastPacket { packet: Bytes },
}

/// Cloneable mailbox handle for the directory unit. Sends never block; a
/// send to a stopped directory is discarded.
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::UnboundedSender<DirectoryMsg>,
}

impl DirectoryHandle {
    pub fn add_client(&self, id: u32, session: SessionHandle) {
        let _ = self.tx.send(DirectoryMsg::AddClient { id, session });
    }

    pub fn remove_client(&self, id: u32) {
        let _ = self.tx.send(DirectoryMsg::RemoveClient { id });
    }

    pub fn get_client(&self, id: u32, reply: SessionHandle) {
        let _ = self.tx.send(DirectoryMsg::GetClient { id, reply });
    }

    pub fn set_client(&self, id: u32, record: ClientRecord) {
        let _ = self.tx.send(DirectoryMsg::SetClient { id, record });
    }

    pub fn add_world(&self, world: WorldRef) {
        let _ = self.tx.send(DirectoryMsg::AddWorld { world });
    }

    pub fn get_world(&self, name: &str, reply: SessionHandle) {
        let _ = self.tx.send(DirectoryMsg::GetWorld {
            name: name.to_owned(),
            reply,
        });
    }

    pub fn broadcast(&self, text: String) {
        let _ = self.tx.send(DirectoryMsg::Broadcast { text });
    }

    pub fn broadcast_packet(&self, packet: Bytes) {
        let _ = self.tx.send(DirectoryMsg::BroadcastPacket { packet });
    }
}

struct ClientEntry {
    record: ClientRecord,
    session: SessionHandle,
}

/// The directory unit's state. Constructed with [`Directory::new`] for
/// direct driving in tests, or spawned onto the runtime with
/// [`Directory::spawn`].
#[derive(Default)]
pub struct Directory {
    clients: HashMap<u32, ClientEntry>,
    worlds: HashMap<String, WorldRef>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the directory onto the runtime and returns its handle.
    pub fn spawn() -> DirectoryHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::new().run(rx));
        DirectoryHandle { tx }
    }

    /// Creates a handle/receiver pair without spawning; used by tests that
    /// drive the unit synchronously.
    pub fn channel() -> (DirectoryHandle, mpsc::UnboundedReceiver<DirectoryMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DirectoryHandle { tx }, rx)
    }

    /// Processes the mailbox until every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DirectoryMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle_message(msg);
        }
        debug!("directory stopped");
    }

    pub fn handle_message(&mut self, msg: DirectoryMsg) {
        match msg {
            DirectoryMsg::AddClient { id, session } => {
                let record = ClientRecord {
                    id,
                    uuid: Uuid::new_v4(),
                    username: String::new(),
                };
                info!(client = id, uuid = %record.uuid, "client registered");
                self.clients.insert(id, ClientEntry { record, session });
            }

            DirectoryMsg::RemoveClient { id } => {
                if self.clients.remove(&id).is_some() {
                    info!(client = id, "client removed");
                }
            }

            DirectoryMsg::GetClient { id, reply } => {
                let record = self
                    .clients
                    .get(&id)
                    .map(|entry| entry.record.clone())
                    .unwrap_or_default();
                reply.send(SessionMsg::IdentityResolved(record));
            }

            DirectoryMsg::SetClient { id, record } => {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.record = record;
                }
            }

            DirectoryMsg::AddWorld { world } => {
                info!(world = %world.name, "world registered");
                self.worlds.insert(world.name.clone(), world);
            }

            DirectoryMsg::GetWorld { name, reply } => {
                reply.send(SessionMsg::WorldResolved(self.worlds.get(&name).cloned()));
            }

            DirectoryMsg::Broadcast { text } => {
                let packet = packets::play::make_chat_message_simple(&text, 0).into_bytes();
                for entry in self.clients.values() {
                    entry.session.send(SessionMsg::PacketOut(packet.clone()));
                }
            }

            DirectoryMsg::BroadcastPacket { packet } => {
                for entry in self.clients.values() {
                    entry.session.send(SessionMsg::PacketOut(packet.clone()));
                }
            }
        }
    }
}
