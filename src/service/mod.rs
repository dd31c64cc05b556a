//! # Peer Service Units
//!
//! The session engine's collaborators, each a single-threaded-logic unit of
//! execution owning its state outright and serializing every read and write
//! through its own mailbox:
//!
//! - **Directory**: sole owner of the client registry and world registry;
//!   also the broadcast fan-out point.
//! - **World**: sole owner of one world's chunk and block state.
//! - **Scripting**: runs command scripts as suspendable tasks and
//!   adjudicates event triggers.
//!
//! No unit ever reads another unit's state directly; cross-unit consistency
//! comes from routing every change through the owning unit's queue. No locks
//! are used anywhere.

pub mod directory;
pub mod scripting;
pub mod world;

pub use directory::{Directory, DirectoryHandle, DirectoryMsg};
pub use scripting::{ScriptingEngine, ScriptingHandle, ScriptingMsg};
pub use world::{WorldHandle, WorldMsg, WorldRef, WorldService};
