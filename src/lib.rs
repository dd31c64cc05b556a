//! # world-protocol
//!
//! Session-layer protocol core for a multiplayer block-world server.
//!
//! The crate implements the server side of a versioned, stateful binary
//! wire protocol: a bit-exact packet codec over untrusted input, a
//! per-connection protocol state machine with disconnect-on-violation
//! semantics, and the asynchronous choreography between sessions and their
//! peer services (directory, world, scripting).
//!
//! ## Architecture
//!
//! Every stateful component is one single-threaded-logic unit of execution
//! with a private mailbox: one per session, one per world, one directory,
//! one scripting engine. Units never share mutable state; every cross-unit
//! effect is a message, and a unit issuing a request keeps servicing its
//! mailbox until the reply arrives as an ordinary message. No locks are
//! used anywhere.
//!
//! - [`core`]: frame codec, packet reader/writer, wire types
//! - [`protocol`]: the session state machine, packet catalogue, and the
//!   continuation bridge for externally adjudicated events
//! - [`service`]: directory, world, and scripting units
//! - [`transport`]: TCP listener and per-connection plumbing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use world_protocol::config::Config;
//! use world_protocol::service::{Directory, ScriptingEngine, WorldService};
//! use world_protocol::transport::{start_server, Peers};
//!
//! #[tokio::main]
//! async fn main() -> world_protocol::error::Result<()> {
//!     let config = Arc::new(Config::default());
//!     config.validate_strict()?;
//!
//!     let directory = Directory::spawn();
//!     let scripting = ScriptingEngine::spawn(Duration::from_secs(30));
//!     directory.add_world(WorldService::spawn(config.game.main_world.clone(), directory.clone()));
//!
//!     let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
//!     start_server(config, Peers { directory, scripting }, shutdown_rx).await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;

pub use config::Config;
pub use error::{ProtocolError, Result};
pub use protocol::{ConnectionState, Session, SessionHandle, SessionMsg};
