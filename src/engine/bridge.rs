//! Thread boundary between the tick loop and its host.
//!
//! `EngineBridge::spawn` moves an [`Engine`] onto a dedicated thread. The host
//! keeps an [`EngineHandle`] and talks to the loop through bounded crossbeam
//! channels: commands in, events out. Commands are applied between ticks, so
//! the graph is never touched mid-pass.

use crate::engine::executor::{Engine, TickOutcome};
use crate::engine::graph::{GraphEdit, GraphState, LoadReport};
use crate::engine::host::TickInfo;
use crate::engine::id::NodeId;
use crate::engine::overrides::OverrideKind;
use crate::engine::value::Value;
use crate::engine::watchdog::WatchdogReport;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Commands sent from the host to the tick loop.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Compile and start ticking.
    Start,
    /// Stop ticking and run cleanup hooks.
    Stop,
    /// Change the tick interval in milliseconds.
    SetTickInterval(u64),
    SetOverride {
        node_id: NodeId,
        kind: OverrideKind,
        key: String,
        value: Value,
        ttl_ms: Option<f64>,
    },
    ClearOverride {
        node_id: NodeId,
        kind: OverrideKind,
        key: String,
    },
    /// Validated edit, rejected if the result would not compile.
    Edit(GraphEdit),
    /// Replace the whole graph.
    Load(GraphState),
    /// Stop and exit the thread.
    Shutdown,
}

/// Events sent from the tick loop to the host.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    Tick(TickInfo),
    /// The engine halted; it stays stopped until `Start` is sent again.
    Watchdog(WatchdogReport),
    EditApplied,
    EditRejected(String),
    Loaded(LoadReport),
    Stopped,
    /// A command failed (start, load or override).
    Error(String),
    /// The thread is exiting.
    Shutdown,
}

/// Channel capacity for commands (host → loop).
const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for events (loop → host).
/// 4,096 events ≈ 2 minutes of ticks at the default cadence.
const EVENT_CHANNEL_CAPACITY: usize = 4096;
/// How long an idle loop waits for a command before checking again.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Host-side handle to a running tick loop.
pub struct EngineHandle {
    cmd_tx: Sender<EngineCommand>,
    event_rx: Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn send_command(&self, cmd: EngineCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn start(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Stop);
    }

    pub fn set_tick_interval(&self, ms: u64) {
        let _ = self.cmd_tx.send(EngineCommand::SetTickInterval(ms));
    }

    pub fn set_override(
        &self,
        node_id: impl Into<NodeId>,
        kind: OverrideKind,
        key: impl Into<String>,
        value: Value,
        ttl_ms: Option<f64>,
    ) {
        let _ = self.cmd_tx.send(EngineCommand::SetOverride {
            node_id: node_id.into(),
            kind,
            key: key.into(),
            value,
            ttl_ms,
        });
    }

    pub fn clear_override(&self, node_id: impl Into<NodeId>, kind: OverrideKind, key: impl Into<String>) {
        let _ = self.cmd_tx.send(EngineCommand::ClearOverride {
            node_id: node_id.into(),
            kind,
            key: key.into(),
        });
    }

    pub fn edit(&self, edit: GraphEdit) {
        let _ = self.cmd_tx.send(EngineCommand::Edit(edit));
    }

    pub fn load(&self, state: GraphState) {
        let _ = self.cmd_tx.send(EngineCommand::Load(state));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }

    /// Drain all pending events.
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Try to receive a single event without blocking.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

/// The tick loop that owns the engine on its thread.
pub struct EngineBridge {
    engine: Engine,
    cmd_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    interval: Duration,
    origin: Instant,
    next_tick: Instant,
}

impl EngineBridge {
    /// Spawn the loop. Joining the returned handle gives the engine back.
    pub fn spawn(engine: Engine) -> std::io::Result<(EngineHandle, JoinHandle<Engine>)> {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        let interval = engine.config().tick_interval();
        let now = Instant::now();

        let bridge = EngineBridge {
            engine,
            cmd_rx,
            event_tx,
            interval,
            origin: now,
            next_tick: now,
        };
        let thread = std::thread::Builder::new()
            .name("stagegraph-tick".to_string())
            .spawn(move || bridge.run())?;

        Ok((EngineHandle { cmd_tx, event_rx }, thread))
    }

    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn run(mut self) -> Engine {
        tracing::info!("Tick loop started ({:?} interval)", self.interval);

        loop {
            let timeout = if self.engine.is_running() {
                self.next_tick.saturating_duration_since(Instant::now())
            } else {
                IDLE_WAIT
            };

            match self.cmd_rx.recv_timeout(timeout) {
                Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(cmd) => self.handle_command(cmd),
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.engine.is_running() && Instant::now() >= self.next_tick {
                self.run_tick();
            }
        }

        self.engine.stop();
        self.emit(EngineEvent::Shutdown);
        tracing::info!("Tick loop exiting");
        self.engine
    }

    fn run_tick(&mut self) {
        let now_ms = self.now_ms();
        match self.engine.tick(now_ms) {
            TickOutcome::Completed(info) => self.emit(EngineEvent::Tick(info)),
            TickOutcome::Halted(report) => self.emit(EngineEvent::Watchdog(report)),
            TickOutcome::Idle => {}
        }

        let now = Instant::now();
        self.next_tick += self.interval;
        if self.next_tick < now {
            // Overran; resync instead of bursting to catch up.
            self.next_tick = now + self.interval;
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => match self.engine.start() {
                Ok(()) => {
                    self.next_tick = Instant::now();
                    self.emit(EngineEvent::Started);
                }
                Err(err) => {
                    tracing::warn!("Start failed: {}", err);
                    self.emit(EngineEvent::Error(err.to_string()));
                }
            },
            EngineCommand::Stop => {
                self.engine.stop();
                self.emit(EngineEvent::Stopped);
            }
            EngineCommand::SetTickInterval(ms) => {
                self.interval = Duration::from_millis(ms.max(1));
                self.next_tick = Instant::now() + self.interval;
                tracing::debug!("Tick interval set to {:?}", self.interval);
            }
            EngineCommand::SetOverride {
                node_id,
                kind,
                key,
                value,
                ttl_ms,
            } => {
                let now_ms = self.now_ms();
                if let Err(err) =
                    self.engine
                        .set_override(node_id.as_str(), kind, &key, value, ttl_ms, now_ms)
                {
                    self.emit(EngineEvent::Error(err.to_string()));
                }
            }
            EngineCommand::ClearOverride { node_id, kind, key } => {
                self.engine.clear_override(node_id.as_str(), kind, &key);
            }
            EngineCommand::Edit(edit) => match self.engine.try_edit(edit) {
                Ok(()) => self.emit(EngineEvent::EditApplied),
                Err(err) => {
                    tracing::debug!("Edit rejected: {}", err);
                    self.emit(EngineEvent::EditRejected(err.to_string()));
                }
            },
            EngineCommand::Load(state) => match self.engine.load(state) {
                Ok(report) => self.emit(EngineEvent::Loaded(report)),
                Err(err) => {
                    tracing::warn!("Load failed: {}", err);
                    self.emit(EngineEvent::Error(err.to_string()));
                }
            },
            EngineCommand::Shutdown => {}
        }
    }

    /// Send an event without ever blocking the loop.
    fn emit(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::debug!("Event channel full, dropping {:?}", event);
        }
    }
}
