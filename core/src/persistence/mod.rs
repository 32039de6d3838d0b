//! Durable storage contract for the game library and its savestates.
//!
//! The session layer only ever talks to [`PersistenceGateway`]. Which
//! backend sits behind it (in-memory, on-disk library...) is decided once
//! at startup by whoever builds the session.

mod memory;

pub use memory::MemoryPersistence;

use std::sync::Arc;
use std::time::SystemTime;

use crate::savestate::Savestate;

// ---------------------------------------------------------------------------
// CRC-32 (private)
// ---------------------------------------------------------------------------

/// CRC-32 lookup table (reflected polynomial 0xEDB88320), the ZIP/PNG variant.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Stable identifier of a game in the library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Content-derived id: lowercase hex CRC-32 of the cartridge bytes, so
    /// importing the same dump twice lands on the same record.
    pub fn from_rom(rom: &[u8]) -> Self {
        Self(format!("{:08x}", crc32(rom)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An imported cartridge. Owns its savestates: removing the game removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub rom: Arc<[u8]>,
    pub imported_at: SystemTime,
    /// `None` until the first session starts.
    pub last_played_at: Option<SystemTime>,
}

impl Game {
    pub fn new(name: impl Into<String>, rom: impl Into<Arc<[u8]>>, imported_at: SystemTime) -> Self {
        let rom = rom.into();
        Self {
            id: GameId::from_rom(&rom),
            name: name.into(),
            rom,
            imported_at,
            last_played_at: None,
        }
    }

    /// Moment used for "recently played" ordering.
    pub fn last_activity(&self) -> SystemTime {
        self.last_played_at.unwrap_or(self.imported_at)
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Storage backend for games and savestates.
///
/// Methods take `&self` so one gateway can be shared between the session
/// and a background persistence worker.
pub trait PersistenceGateway: Send + Sync {
    fn games(&self) -> Result<Vec<Game>, PersistenceError>;

    fn game(&self, id: &GameId) -> Result<Option<Game>, PersistenceError> {
        Ok(self.games()?.into_iter().find(|game| &game.id == id))
    }

    /// Fails with [`PersistenceError::AlreadyExists`] if the id is taken.
    fn add_game(&self, game: Game) -> Result<(), PersistenceError>;

    /// Remove a game and every savestate it owns.
    fn remove_game(&self, id: &GameId) -> Result<(), PersistenceError>;

    /// Stamp the game's `last_played_at`.
    fn record_played(&self, id: &GameId, at: SystemTime) -> Result<(), PersistenceError>;

    /// Savestates of one game, newest first.
    fn savestates(&self, id: &GameId) -> Result<Vec<Savestate>, PersistenceError>;

    fn latest_savestate(&self, id: &GameId) -> Result<Option<Savestate>, PersistenceError> {
        Ok(self.savestates(id)?.into_iter().next())
    }

    fn add_savestate(&self, savestate: Savestate, id: &GameId) -> Result<(), PersistenceError>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for Arc<G> {
    fn games(&self) -> Result<Vec<Game>, PersistenceError> {
        (**self).games()
    }

    fn game(&self, id: &GameId) -> Result<Option<Game>, PersistenceError> {
        (**self).game(id)
    }

    fn add_game(&self, game: Game) -> Result<(), PersistenceError> {
        (**self).add_game(game)
    }

    fn remove_game(&self, id: &GameId) -> Result<(), PersistenceError> {
        (**self).remove_game(id)
    }

    fn record_played(&self, id: &GameId, at: SystemTime) -> Result<(), PersistenceError> {
        (**self).record_played(id, at)
    }

    fn savestates(&self, id: &GameId) -> Result<Vec<Savestate>, PersistenceError> {
        (**self).savestates(id)
    }

    fn latest_savestate(&self, id: &GameId) -> Result<Option<Savestate>, PersistenceError> {
        (**self).latest_savestate(id)
    }

    fn add_savestate(&self, savestate: Savestate, id: &GameId) -> Result<(), PersistenceError> {
        (**self).add_savestate(savestate, id)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PersistenceError {
    /// Underlying storage I/O failed.
    Io(std::io::Error),
    /// No game with this id.
    NotFound(GameId),
    /// A game with this id is already in the library.
    AlreadyExists(GameId),
    /// Stored data could not be read back.
    Corrupt(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::NotFound(id) => write!(f, "no game with id {id}"),
            Self::AlreadyExists(id) => write!(f, "game {id} is already in the library"),
            Self::Corrupt(reason) => write!(f, "corrupt library data: {reason}"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
