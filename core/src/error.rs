use crate::engine::EngineError;
use crate::persistence::PersistenceError;
use crate::savestate::{CodecError, Savestate};
use crate::session::SessionState;

/// Everything a [`SessionController`](crate::session::SessionController)
/// call can report.
#[derive(Debug)]
pub enum SessionError {
    /// The engine rejected the ROM. The session did not start.
    Initialization(EngineError),
    /// The most recent savestate could not be applied at start. The session
    /// started anyway, from a clean reset.
    LastSavestateLoad(EngineError),
    /// A savestate picked by the user could not be loaded. Nothing changed.
    LoadSavestate(EngineError),
    /// The engine could not produce a savestate.
    DumpFailed(EngineError),
    /// The dump could not be turned into a savestate record.
    Codec(CodecError),
    /// Storage failed outside of a save (lookup at start, bookkeeping).
    Persistence(PersistenceError),
    /// A save was captured but never became durable. The record is still
    /// here for the caller to retry with.
    Unpersisted {
        savestate: Box<Savestate>,
        source: PersistenceError,
    },
    /// The call is not allowed in the current state.
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialization(e) => write!(f, "could not start the game: {e}"),
            Self::LastSavestateLoad(e) => {
                write!(f, "latest savestate could not be restored: {e}")
            }
            Self::LoadSavestate(e) => write!(f, "could not load savestate: {e}"),
            Self::DumpFailed(e) => write!(f, "could not capture savestate: {e}"),
            Self::Codec(e) => write!(f, "could not build savestate: {e}"),
            Self::Persistence(e) => write!(f, "{e}"),
            Self::Unpersisted { source, .. } => write!(f, "savestate was not stored: {source}"),
            Self::InvalidTransition { operation, state } => {
                write!(f, "cannot {operation} while {state}")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Initialization(e)
            | Self::LastSavestateLoad(e)
            | Self::LoadSavestate(e)
            | Self::DumpFailed(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Persistence(e) | Self::Unpersisted { source: e, .. } => Some(e),
            Self::InvalidTransition { .. } => None,
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<PersistenceError> for SessionError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

/// Failure to add a cartridge to the library.
#[derive(Debug)]
pub enum ImportError {
    /// The engine would not boot these bytes.
    InvalidRom(EngineError),
    Persistence(PersistenceError),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRom(e) => write!(f, "not a playable cartridge: {e}"),
            Self::Persistence(e) => write!(f, "could not store game: {e}"),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRom(e) => Some(e),
            Self::Persistence(e) => Some(e),
        }
    }
}

impl From<PersistenceError> for ImportError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}
