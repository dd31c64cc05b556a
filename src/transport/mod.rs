//! # Transport
//!
//! TCP listener and per-connection plumbing.
//!
//! Each accepted connection gets three tasks: a framed reader that feeds
//! whole packet buffers into the session's mailbox, a writer that drains the
//! session's outbound channel into the socket, and the session unit itself.
//! The writer's channel end is the handle peer services use to reply
//! straight to a client (chunk data never touches the session mailbox).

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use bytes::Bytes;

use crate::config::Config;
use crate::core::codec::PacketCodec;
use crate::error::Result;
use crate::protocol::session::{Session, SessionHandle, SessionMsg};
use crate::service::directory::DirectoryHandle;
use crate::service::scripting::ScriptingHandle;

/// Sending end of one connection's outbound packet channel. Peer services
/// holding a clone can reply directly to the client's transport writer.
pub type OutboundSender = mpsc::UnboundedSender<Bytes>;

/// Peer service handles shared by every session.
#[derive(Clone)]
pub struct Peers {
    pub directory: DirectoryHandle,
    pub scripting: ScriptingHandle,
}

/// Binds the listener and accepts connections until the shutdown channel
/// fires.
pub async fn start_server(
    config: Arc<Config>,
    peers: Peers,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    info!(address = %config.server.bind_address, "listening");

    let mut next_session_id: u32 = 1;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutting down listener");
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        let session_id = next_session_id;
                        next_session_id += 1;
                        info!(peer = %addr, session = session_id, "connection accepted");
                        spawn_connection(stream, session_id, config.clone(), peers.clone());
                    }
                    Err(e) => {
                        error!(error = %e, "error accepting connection");
                    }
                }
            }
        }
    }
}

/// Wires one accepted socket to a fresh session unit.
fn spawn_connection(stream: TcpStream, session_id: u32, config: Arc<Config>, peers: Peers) {
    let framed = Framed::new(stream, PacketCodec);
    let (mut sink, mut packets) = framed.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let (handle, mailbox) = SessionHandle::channel(session_id);

    peers.directory.add_client(session_id, handle.clone());

    let session = Session::new(
        session_id,
        config,
        outbound,
        peers.directory,
        peers.scripting,
        handle.clone(),
    );
    tokio::spawn(session.run(mailbox));

    // Writer: drains the outbound channel into the socket. Ends once every
    // outbound sender (session plus transient peer clones) is gone.
    tokio::spawn(async move {
        while let Some(packet) = outbound_rx.recv().await {
            if sink.send(packet).await.is_err() {
                break;
            }
        }
        debug!(session = session_id, "writer closed");
    });

    // Reader: feeds whole packet buffers into the session's mailbox until
    // the peer disconnects or produces an unframeable byte stream.
    tokio::spawn(async move {
        while let Some(frame) = packets.next().await {
            match frame {
                Ok(buf) => handle.send(SessionMsg::PacketIn(buf)),
                Err(e) => {
                    warn!(session = session_id, error = %e, "transport read failed");
                    break;
                }
            }
        }
        debug!(session = session_id, "reader closed");
        handle.send(SessionMsg::Stop);
    });
}
