//! Lifecycle of one play session: start, pause, save, load, quit.
//!
//! ```text
//!   Unstarted ──start──▶ Running ◀──resume── Paused
//!                          │  ▲ ──pause──▶     │
//!                          │  └────reset───────┘
//!                          └──────quit──────▶ Ended
//! ```
//!
//! The controller owns the engine for its whole life. Before `start` it
//! holds the bare engine; while playing it holds an [`EmulatorHandle`]
//! built from it; after `quit` it holds nothing.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::engine::{CoreEngine, EngineError};
use crate::error::SessionError;
use crate::handle::{EmulatorHandle, StateDump};
use crate::input::{ButtonSet, Direction, InputAggregator, InputMask, Transition};
use crate::persistence::{Game, GameId, PersistenceError, PersistenceGateway};
use crate::savestate::{Savestate, SavestateCodec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unstarted,
    Running,
    Paused,
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Ended => "ended",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Load the game's most recent savestate on start.
    pub resume_latest: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            resume_latest: true,
        }
    }
}

/// What happened during a successful [`SessionController::start`].
#[derive(Debug, Default)]
pub struct StartOutcome {
    /// Timestamp of the savestate the session resumed from.
    pub resumed_from: Option<SystemTime>,
    /// Why the latest savestate was not resumed, if one should have been.
    /// The session is running from a clean reset in that case.
    pub savestate_error: Option<SessionError>,
}

/// A save whose durable write is still in flight.
///
/// Hand it back to [`SessionController::commit`] to learn whether it
/// landed.
#[derive(Debug)]
pub struct PendingSave {
    savestate: Savestate,
    worker: JoinHandle<Result<(), PersistenceError>>,
}

impl PendingSave {
    /// The record being written. Already complete in memory.
    pub fn savestate(&self) -> &Savestate {
        &self.savestate
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

struct Session {
    handle: EmulatorHandle,
    game_id: GameId,
    paused: bool,
    /// Copy of the frame shown while paused. `None` while running, and
    /// while paused after a load invalidated it.
    paused_frame: Option<Box<[u8]>>,
}

impl Session {
    /// The paused frame, advancing once to produce it if there is none.
    fn frozen_frame(&mut self, input: InputMask) -> &[u8] {
        let handle = &mut self.handle;
        self.paused_frame
            .get_or_insert_with(|| handle.advance_frame(input).into())
    }
}

enum Phase {
    Unstarted(Box<dyn CoreEngine>),
    Active(Session),
    Ended,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Unstarted(_) => SessionState::Unstarted,
            Self::Active(session) if session.paused => SessionState::Paused,
            Self::Active(_) => SessionState::Running,
            Self::Ended => SessionState::Ended,
        }
    }
}

type Clock = Box<dyn Fn() -> SystemTime + Send>;

pub struct SessionController {
    phase: Phase,
    gateway: Arc<dyn PersistenceGateway>,
    input: InputAggregator,
    options: SessionOptions,
    clock: Clock,
    last_saved: Option<SystemTime>,
}

impl SessionController {
    pub fn new(engine: Box<dyn CoreEngine>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            phase: Phase::Unstarted(engine),
            gateway,
            input: InputAggregator::new(),
            options: SessionOptions::default(),
            clock: Box::new(SystemTime::now),
            last_saved: None,
        }
    }

    /// Source of savestate and play timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> SystemTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    /// Game being played, once started.
    pub fn game_id(&self) -> Option<&GameId> {
        match &self.phase {
            Phase::Active(session) => Some(&session.game_id),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<&EmulatorHandle> {
        match &self.phase {
            Phase::Active(session) => Some(&session.handle),
            _ => None,
        }
    }

    /// Timestamp of the last save confirmed durable.
    pub const fn last_saved(&self) -> Option<SystemTime> {
        self.last_saved
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            operation,
            state: self.state(),
        }
    }

    fn active_mut(&mut self, operation: &'static str) -> Result<&mut Session, SessionError> {
        match &mut self.phase {
            Phase::Active(session) => Ok(session),
            other => Err(SessionError::InvalidTransition {
                operation,
                state: other.state(),
            }),
        }
    }

    // ---- Transitions ----

    /// Boot `game` and, unless disabled, resume from its latest savestate.
    ///
    /// Only an engine rejecting the ROM stops the start; the controller is
    /// then still `Unstarted` and can be started again.
    pub fn start(&mut self, game: &Game) -> Result<StartOutcome, SessionError> {
        let engine = match std::mem::replace(&mut self.phase, Phase::Ended) {
            Phase::Unstarted(engine) => engine,
            other => {
                self.phase = other;
                return Err(self.invalid("start"));
            }
        };

        let mut handle = match EmulatorHandle::create(engine, Arc::clone(&game.rom)) {
            Ok(handle) => handle,
            Err(err) => {
                let source = err.source.clone();
                tracing::warn!(game = %game.id, error = %source, "engine rejected ROM");
                self.phase = Phase::Unstarted(err.into_engine());
                return Err(SessionError::Initialization(source));
            }
        };

        let mut outcome = StartOutcome::default();
        if self.options.resume_latest {
            match self.gateway.latest_savestate(&game.id) {
                Ok(Some(savestate)) => match handle.load_state(savestate.state()) {
                    Ok(()) => outcome.resumed_from = Some(savestate.timestamp()),
                    Err(err) => {
                        tracing::warn!(game = %game.id, error = %err, "latest savestate unusable, starting fresh");
                        handle.reset();
                        outcome.savestate_error = Some(SessionError::LastSavestateLoad(err));
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(game = %game.id, error = %err, "could not look up latest savestate");
                    outcome.savestate_error = Some(SessionError::Persistence(err));
                }
            }
        }

        if let Err(err) = self.gateway.record_played(&game.id, (self.clock)()) {
            tracing::warn!(game = %game.id, error = %err, "could not record play time");
        }

        tracing::info!(
            game = %game.id,
            engine = handle.engine_name(),
            resumed = outcome.resumed_from.is_some(),
            "session started"
        );
        self.phase = Phase::Active(Session {
            handle,
            game_id: game.id.clone(),
            paused: false,
            paused_frame: None,
        });
        Ok(outcome)
    }

    /// Freeze the screen. Returns the paused frame.
    ///
    /// Pausing an already paused session returns the same frame without
    /// advancing the core.
    pub fn pause(&mut self) -> Result<&[u8], SessionError> {
        let input = self.input.current_mask();
        let session = self.active_mut("pause")?;
        if !session.paused {
            tracing::debug!(game = %session.game_id, "paused");
        }
        session.paused = true;
        Ok(session.frozen_frame(input))
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        let session = self.active_mut("resume")?;
        if session.paused {
            tracing::debug!(game = %session.game_id, "resumed");
        }
        session.paused = false;
        session.paused_frame = None;
        Ok(())
    }

    /// Power-cycle the core. Always lands in `Running`.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let session = self.active_mut("reset")?;
        session.handle.reset();
        session.paused = false;
        session.paused_frame = None;
        tracing::info!(game = %session.game_id, "session reset");
        Ok(())
    }

    /// Restore `savestate`. Running/Paused status is kept.
    ///
    /// On failure nothing about the session changes.
    pub fn load_savestate(&mut self, savestate: &Savestate) -> Result<(), SessionError> {
        let session = self.active_mut("load savestate")?;
        if savestate.game_id() != &session.game_id {
            return Err(SessionError::LoadSavestate(EngineError::InvalidSavestate(
                format!("savestate belongs to game {}", savestate.game_id()),
            )));
        }
        session
            .handle
            .load_state(savestate.state())
            .map_err(SessionError::LoadSavestate)?;
        session.paused_frame = None;
        tracing::info!(game = %session.game_id, "savestate loaded");
        Ok(())
    }

    /// Tear the session down. Terminal.
    pub fn quit(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.phase, Phase::Ended) {
            Phase::Active(session) => {
                tracing::info!(game = %session.game_id, "session ended");
                session.handle.close();
                Ok(())
            }
            Phase::Unstarted(engine) => {
                tracing::debug!(engine = engine.name(), "quit before start");
                Ok(())
            }
            Phase::Ended => Err(self.invalid("quit")),
        }
    }

    // ---- Frame pump ----

    /// The frame to display now: the paused frame while paused, otherwise
    /// the next emulated frame with the current input held.
    pub fn next_frame(&mut self) -> Result<&[u8], SessionError> {
        let input = self.input.current_mask();
        let session = self.active_mut("advance")?;
        let frame = if session.paused {
            session.frozen_frame(input)
        } else {
            session.handle.advance_frame(input)
        };
        Ok(frame)
    }

    // ---- Input ----

    pub fn set_direction(&mut self, direction: Option<Direction>) -> Transition {
        self.input.set_direction(direction)
    }

    pub fn set_action_buttons(&mut self, pressed: ButtonSet) -> Transition {
        self.input.set_action_buttons(pressed)
    }

    pub fn input(&self) -> &InputAggregator {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputAggregator {
        &mut self.input
    }

    // ---- Saving ----

    /// Capture a savestate and start writing it in the background.
    ///
    /// `Ok(None)` unless paused with a paused frame on screen; nothing is
    /// captured or written in that case.
    pub fn begin_save(&mut self) -> Result<Option<PendingSave>, SessionError> {
        let timestamp = (self.clock)();
        let gateway = Arc::clone(&self.gateway);
        let session = self.active_mut("save")?;

        let (true, Some(preview)) = (session.paused, session.paused_frame.as_deref()) else {
            tracing::debug!(game = %session.game_id, "save skipped: no paused frame");
            return Ok(None);
        };
        let state = session
            .handle
            .dump_state()
            .map_err(SessionError::DumpFailed)?
            .state;
        let savestate =
            SavestateCodec::encode(&session.game_id, timestamp, StateDump { state, preview })?;

        let record = savestate.clone();
        let game_id = session.game_id.clone();
        let worker = thread::Builder::new()
            .name("savestate-writer".to_string())
            .spawn(move || {
                let result = gateway.add_savestate(record, &game_id);
                if let Err(err) = &result {
                    tracing::error!(game = %game_id, error = %err, "savestate write failed");
                }
                result
            })
            .map_err(|e| SessionError::Persistence(e.into()))?;

        tracing::debug!(game = %session.game_id, bytes = savestate.state().len(), "savestate captured");
        Ok(Some(PendingSave { savestate, worker }))
    }

    /// Wait for `pending` to become durable.
    ///
    /// A session that ended in the meantime does not take the result; the
    /// write itself still finished.
    pub fn commit(&mut self, pending: PendingSave) -> Result<Savestate, SessionError> {
        let PendingSave { savestate, worker } = pending;
        let written = worker.join().unwrap_or_else(|_| {
            Err(PersistenceError::Io(std::io::Error::other(
                "savestate writer panicked",
            )))
        });

        if matches!(self.phase, Phase::Ended) {
            tracing::debug!(game = %savestate.game_id(), "save finished after quit, not applied");
            return Err(self.invalid("commit save"));
        }

        match written {
            Ok(()) => {
                self.last_saved = Some(savestate.timestamp());
                tracing::info!(game = %savestate.game_id(), "savestate stored");
                Ok(savestate)
            }
            Err(source) => Err(SessionError::Unpersisted {
                savestate: Box::new(savestate),
                source,
            }),
        }
    }

    /// Capture and durably store a savestate. `Ok(None)` unless paused.
    pub fn save(&mut self) -> Result<Option<Savestate>, SessionError> {
        match self.begin_save()? {
            Some(pending) => self.commit(pending).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("game", &self.game_id())
            .field("input", &self.input.current_mask())
            .field("last_saved", &self.last_saved)
            .finish_non_exhaustive()
    }
}
