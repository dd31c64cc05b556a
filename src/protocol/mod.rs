//! # Session Protocol Layer
//!
//! The per-connection state machine and everything it dispatches on:
//! the packet catalogue, event triggers, and the continuation bridge that
//! reconciles event resolutions with locally attached default actions.
//!
//! ## Components
//! - **Packets**: packet id tables and outbound builders
//! - **Session**: protocol states, dispatch tables, handlers, tick, chunk
//!   window maintenance
//! - **Events**: triggers subject to external veto and their order-independent
//!   continuation matching

pub mod events;
pub mod packets;
pub mod session;

pub use events::{ContinuationBridge, EventKind};
pub use session::{ConnectionState, Session, SessionHandle, SessionMsg};
