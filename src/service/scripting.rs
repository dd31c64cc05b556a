//! Scripting engine: command scripts as cooperatively-scheduled tasks.
//!
//! A command invocation creates a task around a [`CommandScript`], an
//! explicit suspended-state record rather than a call stack: `resume` runs
//! the script until it completes, fails, or yields on a cross-service query.
//! On a yield the engine sends the query to the owning session and returns
//! to its own mailbox; the session's reply re-enters through the mailbox,
//! is checked against the recorded yield reason (stale or duplicate replies
//! are dropped), and resumes the task with the answer injected.
//!
//! Script failures are local to this unit: they are logged and destroy the
//! task, never the owning session or the engine. A periodic sweep abandons
//! tasks that have been suspended longer than the configured idle timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::types::{ClientRecord, PlayerPos, PlayerRot};
use crate::protocol::events::EventKind;
use crate::protocol::session::{SessionHandle, SessionMsg};

/// How often the idle sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Script-side runtime failure. Never crosses the unit boundary.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script yielded for {expected} but was resumed with {got}")]
    UnexpectedValue {
        expected: &'static str,
        got: &'static str,
    },

    #[error("script failed: {0}")]
    Failed(String),
}

/// Why a script suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldReason {
    QueryPosition,
    QueryWorld,
}

/// Value injected into a suspended script on resumption.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Position { pos: PlayerPos, rot: PlayerRot },
    World { name: String },
}

impl ScriptValue {
    fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Position { .. } => "position",
            ScriptValue::World { .. } => "world",
        }
    }
}

/// Outcome of one resumption step.
pub enum ScriptStatus {
    Complete,
    Suspended(YieldReason),
}

/// Capability object handed to a running script, bound to its owning
/// session.
pub struct ScriptContext<'a> {
    session: &'a SessionHandle,
    record: &'a ClientRecord,
    raw: &'a str,
}

impl<'a> ScriptContext<'a> {
    /// Sends a chat message to the owning player.
    pub fn message(&self, text: impl Into<String>) {
        self.session.send(SessionMsg::Message(text.into()));
    }

    /// The invoking player's identity record.
    pub fn player(&self) -> &'a ClientRecord {
        self.record
    }

    /// Arguments after the command name.
    pub fn args(&self) -> impl Iterator<Item = &'a str> {
        self.raw.split_whitespace().skip(1)
    }
}

/// A command script as an externally-suspendable execution: the
/// continuation is captured as data (the implementor's own state), not as a
/// call stack. `input` is `None` on first entry and carries the query
/// answer on every later resumption.
pub trait CommandScript: Send {
    fn resume(
        &mut self,
        ctx: &mut ScriptContext<'_>,
        input: Option<ScriptValue>,
    ) -> Result<ScriptStatus, ScriptError>;
}

type ScriptFactory = fn() -> Box<dyn CommandScript>;

/// Filter consulted for event triggers; returning `true` suppresses the
/// session's default action.
pub type EventFilter = Box<dyn Fn(&ClientRecord, &EventKind) -> bool + Send>;

/// Messages accepted by the scripting unit.
#[derive(Debug)]
pub enum ScriptingMsg {
    RegisterPlayer {
        record: ClientRecord,
        session: SessionHandle,
    },
    UnregisterPlayer {
        id: u32,
    },
    RunCommand {
        name: String,
        raw: String,
        client_id: u32,
    },
    /// Event trigger raised by a session; adjudicated and answered with an
    /// `EventComplete` message.
    PlayerEvent {
        client_id: u32,
        event_id: u64,
        kind: EventKind,
        reply: SessionHandle,
    },
    PositionReply {
        task_id: u64,
        pos: PlayerPos,
        rot: PlayerRot,
    },
    WorldReply {
        task_id: u64,
        name: String,
    },
}

/// Cloneable mailbox handle for the scripting unit.
#[derive(Clone)]
pub struct ScriptingHandle {
    tx: mpsc::UnboundedSender<ScriptingMsg>,
}

impl ScriptingHandle {
    pub fn register_player(&self, record: ClientRecord, session: SessionHandle) {
        let _ = self.tx.send(ScriptingMsg::RegisterPlayer { record, session });
    }

    pub fn unregister_player(&self, id: u32) {
        let _ = self.tx.send(ScriptingMsg::UnregisterPlayer { id });
    }

    pub fn run_command(&self, name: String, raw: String, client_id: u32) {
        let _ = self.tx.send(ScriptingMsg::RunCommand {
            name,
            raw,
            client_id,
        });
    }

    pub fn player_event(
        &self,
        client_id: u32,
        event_id: u64,
        kind: EventKind,
        reply: SessionHandle,
    ) {
        let _ = self.tx.send(ScriptingMsg::PlayerEvent {
            client_id,
            event_id,
            kind,
            reply,
        });
    }

    pub fn position_reply(&self, task_id: u64, pos: PlayerPos, rot: PlayerRot) {
        let _ = self.tx.send(ScriptingMsg::PositionReply { task_id, pos, rot });
    }

    pub fn world_reply(&self, task_id: u64, name: String) {
        let _ = self.tx.send(ScriptingMsg::WorldReply { task_id, name });
    }
}

struct RegisteredPlayer {
    record: ClientRecord,
    session: SessionHandle,
}

struct ScriptTask {
    id: u64,
    script: Box<dyn CommandScript>,
    session: SessionHandle,
    record: ClientRecord,
    raw: String,
    name: String,
    last_yield: Option<YieldReason>,
    suspended_at: Instant,
}

/// The scripting unit's state.
pub struct ScriptingEngine {
    idle_timeout: Duration,
    players: HashMap<u32, RegisteredPlayer>,
    commands: HashMap<&'static str, ScriptFactory>,
    filters: Vec<EventFilter>,
    tasks: HashMap<u64, ScriptTask>,
    next_task_id: u64,
}

impl ScriptingEngine {
    pub fn new(idle_timeout: Duration) -> Self {
        let mut engine = Self {
            idle_timeout,
            players: HashMap::new(),
            commands: HashMap::new(),
            filters: Vec::new(),
            tasks: HashMap::new(),
            next_task_id: 0,
        };
        engine.register_builtin_commands();
        engine
    }

    /// Spawns the engine onto the runtime and returns its handle.
    pub fn spawn(idle_timeout: Duration) -> ScriptingHandle {
        let engine = Self::new(idle_timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(engine.run(rx));
        ScriptingHandle { tx }
    }

    /// Creates a handle/receiver pair without spawning; used by tests and
    /// sessions driven synchronously.
    pub fn channel() -> (ScriptingHandle, mpsc::UnboundedReceiver<ScriptingMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ScriptingHandle { tx }, rx)
    }

    fn register_builtin_commands(&mut self) {
        self.commands.insert("whereami", || Box::new(WhereAmI));
        self.commands.insert("world", || Box::new(WorldName));
        self.commands.insert("commands", || Box::new(ListCommands));
    }

    /// Registers an additional command under the given name.
    pub fn register_command(&mut self, name: &'static str, factory: ScriptFactory) {
        self.commands.insert(name, factory);
    }

    /// Adds an event filter; any filter returning `true` suppresses the
    /// triggering session's default action.
    pub fn add_event_filter(&mut self, filter: EventFilter) {
        self.filters.push(filter);
    }

    /// Number of suspended tasks (diagnostics and tests).
    pub fn suspended_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Processes the mailbox until every handle is dropped, sweeping idle
    /// tasks in between.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ScriptingMsg>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }
        debug!("scripting engine stopped");
    }

    pub fn handle_message(&mut self, msg: ScriptingMsg) {
        match msg {
            ScriptingMsg::RegisterPlayer { record, session } => {
                debug!(client = record.id, username = %record.username, "player registered with scripting engine");
                self.players
                    .insert(record.id, RegisteredPlayer { record, session });
            }

            ScriptingMsg::UnregisterPlayer { id } => {
                self.players.remove(&id);
                // Orphaned tasks can no longer receive replies; drop them now
                // rather than waiting for the sweep.
                self.tasks.retain(|_, task| task.record.id != id);
            }

            ScriptingMsg::RunCommand {
                name,
                raw,
                client_id,
            } => self.handle_run_command(name, raw, client_id),

            ScriptingMsg::PlayerEvent {
                client_id,
                event_id,
                kind,
                reply,
            } => {
                let suppressed = match self.players.get(&client_id) {
                    Some(player) => self.filters.iter().any(|f| f(&player.record, &kind)),
                    None => false,
                };
                reply.send(SessionMsg::EventComplete {
                    event_id,
                    suppressed,
                });
            }

            ScriptingMsg::PositionReply { task_id, pos, rot } => self.handle_reply(
                task_id,
                YieldReason::QueryPosition,
                ScriptValue::Position { pos, rot },
            ),

            ScriptingMsg::WorldReply { task_id, name } => self.handle_reply(
                task_id,
                YieldReason::QueryWorld,
                ScriptValue::World { name },
            ),
        }
    }

    fn handle_run_command(&mut self, name: String, raw: String, client_id: u32) {
        let Some(player) = self.players.get(&client_id) else {
            debug!(client = client_id, command = %name, "command from unregistered player");
            return;
        };
        let Some(factory) = self.commands.get(name.as_str()) else {
            info!(client = client_id, command = %name, "unknown command");
            return;
        };

        let task = ScriptTask {
            id: self.next_task_id,
            script: factory(),
            session: player.session.clone(),
            record: player.record.clone(),
            raw,
            name,
            last_yield: None,
            suspended_at: Instant::now(),
        };
        self.next_task_id += 1;
        self.drive(task, None);
    }

    /// Resumes a task and files it back into the suspended set if it yields
    /// again; completion and failure both destroy it.
    fn drive(&mut self, mut task: ScriptTask, input: Option<ScriptValue>) {
        let mut ctx = ScriptContext {
            session: &task.session,
            record: &task.record,
            raw: &task.raw,
        };
        match task.script.resume(&mut ctx, input) {
            Ok(ScriptStatus::Complete) => {}
            Ok(ScriptStatus::Suspended(reason)) => {
                match reason {
                    YieldReason::QueryPosition => {
                        task.session.send(SessionMsg::QueryPosition { task_id: task.id });
                    }
                    YieldReason::QueryWorld => {
                        task.session.send(SessionMsg::QueryWorld { task_id: task.id });
                    }
                }
                task.last_yield = Some(reason);
                task.suspended_at = Instant::now();
                self.tasks.insert(task.id, task);
            }
            Err(e) => {
                error!(command = %task.name, client = task.record.id, error = %e, "script error");
            }
        }
    }

    fn handle_reply(&mut self, task_id: u64, expected: YieldReason, value: ScriptValue) {
        let Some(mut task) = self.tasks.remove(&task_id) else {
            debug!(task = task_id, "reply for unknown task; dropped");
            return;
        };
        if task.last_yield != Some(expected) {
            debug!(task = task_id, "reply does not match recorded yield; dropped");
            self.tasks.insert(task_id, task);
            return;
        }

        task.last_yield = None;
        self.drive(task, Some(value));
    }

    /// Abandons tasks suspended longer than the idle timeout.
    pub fn sweep(&mut self, now: Instant) {
        let timeout = self.idle_timeout;
        self.tasks.retain(|_, task| {
            let idle = now.duration_since(task.suspended_at);
            if idle > timeout {
                warn!(command = %task.name, client = task.record.id,
                      idle_secs = idle.as_secs(), "abandoning idle script task");
                false
            } else {
                true
            }
        });
    }
}

//
// Built-in commands.
//

/// Reports the invoking player's position and orientation.
struct WhereAmI;

impl CommandScript for WhereAmI {
    fn resume(
        &mut self,
        ctx: &mut ScriptContext<'_>,
        input: Option<ScriptValue>,
    ) -> Result<ScriptStatus, ScriptError> {
        match input {
            None => Ok(ScriptStatus::Suspended(YieldReason::QueryPosition)),
            Some(ScriptValue::Position { pos, rot }) => {
                ctx.message(format!(
                    "You are at {:.1} {:.1} {:.1} (yaw {:.1}, pitch {:.1})",
                    pos.x, pos.y, pos.z, rot.yaw, rot.pitch
                ));
                Ok(ScriptStatus::Complete)
            }
            Some(other) => Err(ScriptError::UnexpectedValue {
                expected: "position",
                got: other.kind(),
            }),
        }
    }
}

/// Reports the name of the world the player is in.
struct WorldName;

impl CommandScript for WorldName {
    fn resume(
        &mut self,
        ctx: &mut ScriptContext<'_>,
        input: Option<ScriptValue>,
    ) -> Result<ScriptStatus, ScriptError> {
        match input {
            None => Ok(ScriptStatus::Suspended(YieldReason::QueryWorld)),
            Some(ScriptValue::World { name }) => {
                ctx.message(format!("You are in world \"{name}\""));
                Ok(ScriptStatus::Complete)
            }
            Some(other) => Err(ScriptError::UnexpectedValue {
                expected: "world",
                got: other.kind(),
            }),
        }
    }
}

/// Lists the built-in commands; completes without yielding.
struct ListCommands;

impl CommandScript for ListCommands {
    fn resume(
        &mut self,
        ctx: &mut ScriptContext<'_>,
        _input: Option<ScriptValue>,
    ) -> Result<ScriptStatus, ScriptError> {
        ctx.message("Available commands: /whereami /world /commands");
        Ok(ScriptStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered_engine() -> (
        ScriptingEngine,
        mpsc::UnboundedReceiver<SessionMsg>,
        ClientRecord,
    ) {
        let mut engine = ScriptingEngine::new(Duration::from_secs(30));
        let (session, rx) = SessionHandle::channel(1);
        let record = ClientRecord {
            id: 1,
            uuid: uuid::Uuid::new_v4(),
            username: "Alice".into(),
        };
        engine.handle_message(ScriptingMsg::RegisterPlayer {
            record: record.clone(),
            session,
        });
        (engine, rx, record)
    }

    #[test]
    fn immediate_command_completes_without_yield() {
        let (mut engine, mut rx, _) = registered_engine();

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "commands".into(),
            raw: "/commands".into(),
            client_id: 1,
        });

        assert!(matches!(rx.try_recv().unwrap(), SessionMsg::Message(_)));
        assert_eq!(engine.suspended_tasks(), 0);
    }

    #[test]
    fn position_command_yields_then_resumes_with_reply() {
        let (mut engine, mut rx, _) = registered_engine();

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "whereami".into(),
            raw: "/whereami".into(),
            client_id: 1,
        });

        let task_id = match rx.try_recv().unwrap() {
            SessionMsg::QueryPosition { task_id } => task_id,
            other => panic!("expected position query, got {other:?}"),
        };
        assert_eq!(engine.suspended_tasks(), 1);

        engine.handle_message(ScriptingMsg::PositionReply {
            task_id,
            pos: PlayerPos::new(1.0, 66.0, -3.0),
            rot: PlayerRot::new(90.0, 0.0),
        });

        match rx.try_recv().unwrap() {
            SessionMsg::Message(text) => assert!(text.contains("66.0"), "got {text}"),
            other => panic!("expected chat message, got {other:?}"),
        }
        assert_eq!(engine.suspended_tasks(), 0);
    }

    #[test]
    fn mismatched_reply_kind_is_dropped() {
        let (mut engine, mut rx, _) = registered_engine();

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "whereami".into(),
            raw: "/whereami".into(),
            client_id: 1,
        });
        let task_id = match rx.try_recv().unwrap() {
            SessionMsg::QueryPosition { task_id } => task_id,
            other => panic!("expected position query, got {other:?}"),
        };

        // Reply of the wrong kind must not resume the task.
        engine.handle_message(ScriptingMsg::WorldReply {
            task_id,
            name: "Main".into(),
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.suspended_tasks(), 1);

        // A reply for an unknown task is dropped outright.
        engine.handle_message(ScriptingMsg::PositionReply {
            task_id: 999,
            pos: PlayerPos::default(),
            rot: PlayerRot::default(),
        });
        assert_eq!(engine.suspended_tasks(), 1);
    }

    #[test]
    fn unknown_command_creates_no_task() {
        let (mut engine, mut rx, _) = registered_engine();

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "frobnicate".into(),
            raw: "/frobnicate now".into(),
            client_id: 1,
        });

        assert!(rx.try_recv().is_err());
        assert_eq!(engine.suspended_tasks(), 0);
    }

    #[test]
    fn event_without_filters_resolves_unsuppressed() {
        let (mut engine, mut rx, _) = registered_engine();
        let (reply, mut reply_rx) = SessionHandle::channel(1);

        engine.handle_message(ScriptingMsg::PlayerEvent {
            client_id: 1,
            event_id: 5,
            kind: EventKind::PlayerChat {
                message: "hi".into(),
            },
            reply,
        });

        match reply_rx.try_recv().unwrap() {
            SessionMsg::EventComplete {
                event_id,
                suppressed,
            } => {
                assert_eq!(event_id, 5);
                assert!(!suppressed);
            }
            other => panic!("expected event completion, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn event_filter_suppresses_default_action() {
        let (mut engine, _rx, _) = registered_engine();
        engine.add_event_filter(Box::new(|_, kind| {
            matches!(kind, EventKind::PlayerChat { message } if message.contains("spam"))
        }));
        let (reply, mut reply_rx) = SessionHandle::channel(1);

        engine.handle_message(ScriptingMsg::PlayerEvent {
            client_id: 1,
            event_id: 9,
            kind: EventKind::PlayerChat {
                message: "buy spam".into(),
            },
            reply,
        });

        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            SessionMsg::EventComplete {
                suppressed: true,
                ..
            }
        ));
    }

    #[test]
    fn idle_sweep_abandons_stale_tasks() {
        let (mut engine, mut rx, _) = registered_engine();
        engine.idle_timeout = Duration::from_secs(0);

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "whereami".into(),
            raw: "/whereami".into(),
            client_id: 1,
        });
        let _ = rx.try_recv().unwrap();
        assert_eq!(engine.suspended_tasks(), 1);

        engine.sweep(Instant::now() + Duration::from_secs(1));
        assert_eq!(engine.suspended_tasks(), 0);
    }

    #[test]
    fn unregistering_player_drops_their_tasks() {
        let (mut engine, mut rx, _) = registered_engine();

        engine.handle_message(ScriptingMsg::RunCommand {
            name: "whereami".into(),
            raw: "/whereami".into(),
            client_id: 1,
        });
        let _ = rx.try_recv().unwrap();
        assert_eq!(engine.suspended_tasks(), 1);

        engine.handle_message(ScriptingMsg::UnregisterPlayer { id: 1 });
        assert_eq!(engine.suspended_tasks(), 0);
    }
}
