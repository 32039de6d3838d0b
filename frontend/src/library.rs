//! On-disk game library.
//!
//! ```text
//! <root>/games/<id>/game.toml
//! <root>/games/<id>/rom.gb
//! <root>/games/<id>/savestates/<unix-ns>.state
//! <root>/games/<id>/savestates/<unix-ns>.png
//! ```
//!
//! Files are written to a temporary name and renamed into place. A game
//! directory is assembled under `<id>.tmp` and renamed once complete. A
//! savestate is listed only once its `.state` file exists, and that file is
//! written after its preview.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use dotmatrix_core::persistence::{Game, GameId, PersistenceError, PersistenceGateway};
use dotmatrix_core::savestate::Savestate;

use crate::preview;

const GAME_FILE: &str = "game.toml";
const ROM_FILE: &str = "rom.gb";
const SAVESTATE_DIR: &str = "savestates";
const STATE_EXT: &str = "state";
const PREVIEW_EXT: &str = "png";
const STAGING_SUFFIX: &str = ".tmp";

/// Nanoseconds since the Unix epoch; times before it clamp to 0.
///
/// Full precision so a stored record reads back equal to the one written.
pub fn unix_nanos(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn from_unix_nanos(ns: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(ns)
}

#[derive(Debug, Serialize, Deserialize)]
struct GameRecord {
    id: String,
    name: String,
    imported_at_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_played_at_ns: Option<u64>,
}

impl GameRecord {
    fn from_game(game: &Game) -> Self {
        Self {
            id: game.id.to_string(),
            name: game.name.clone(),
            imported_at_ns: unix_nanos(game.imported_at),
            last_played_at_ns: game.last_played_at.map(unix_nanos),
        }
    }
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Corrupt(format!("{}: {what}", path.display()))
}

/// Write `bytes` next to `path` and rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Filesystem-backed [`PersistenceGateway`].
pub struct FsLibrary {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FsLibrary {
    /// Open (creating if needed) the library rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(root.join("games"))?;
        tracing::debug!(root = %root.display(), "library opened");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn game_dir(&self, id: &GameId) -> PathBuf {
        self.root.join("games").join(id.as_str())
    }

    fn savestate_dir(&self, id: &GameId) -> PathBuf {
        self.game_dir(id).join(SAVESTATE_DIR)
    }

    /// Write a complete game directory at `dir`.
    fn stage_game(&self, dir: &Path, game: &Game) -> Result<(), PersistenceError> {
        fs::create_dir_all(dir.join(SAVESTATE_DIR))?;
        fs::write(dir.join(ROM_FILE), &game.rom)?;
        self.write_record(dir, &GameRecord::from_game(game))
    }

    fn read_record(&self, dir: &Path) -> Result<GameRecord, PersistenceError> {
        let path = dir.join(GAME_FILE);
        let text = fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| corrupt(&path, e))
    }

    fn write_record(&self, dir: &Path, record: &GameRecord) -> Result<(), PersistenceError> {
        let path = dir.join(GAME_FILE);
        let text = toml::to_string(record).map_err(|e| corrupt(&path, e))?;
        write_atomic(&path, text.as_bytes())?;
        Ok(())
    }

    fn load_game(&self, dir: &Path) -> Result<Game, PersistenceError> {
        let record = self.read_record(dir)?;
        let rom = fs::read(dir.join(ROM_FILE))?;
        let game = Game {
            id: GameId::new(record.id),
            name: record.name,
            rom: rom.into(),
            imported_at: from_unix_nanos(record.imported_at_ns),
            last_played_at: record.last_played_at_ns.map(from_unix_nanos),
        };
        Ok(game)
    }

    /// `.state` files of a game with their timestamps, newest first.
    fn state_files(&self, id: &GameId) -> Result<Vec<(u64, PathBuf)>, PersistenceError> {
        let entries = match fs::read_dir(self.savestate_dir(id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == STATE_EXT) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(ns) => files.push((ns, path)),
                None => {
                    tracing::warn!(path = %path.display(), "skipping savestate without a timestamp name")
                }
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files)
    }

    fn load_savestate(
        &self,
        id: &GameId,
        ns: u64,
        state_path: &Path,
    ) -> Result<Savestate, PersistenceError> {
        let state = fs::read(state_path)?;
        let preview_path = state_path.with_extension(PREVIEW_EXT);
        let file = fs::File::open(&preview_path)?;
        let preview = preview::read_png(std::io::BufReader::new(file))
            .map_err(|e| corrupt(&preview_path, e))?;
        Ok(Savestate::from_parts(
            id.clone(),
            from_unix_nanos(ns),
            preview,
            state,
        ))
    }
}

impl PersistenceGateway for FsLibrary {
    fn games(&self) -> Result<Vec<Game>, PersistenceError> {
        let _guard = self.guard();
        let mut games = Vec::new();
        for entry in fs::read_dir(self.root.join("games"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir()
                || entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX)
            {
                continue;
            }
            match self.load_game(&entry.path()) {
                Ok(game) => games.push(game),
                // Half-imported or hand-edited entries should not hide the rest.
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "skipping unreadable game")
                }
            }
        }
        games.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(games)
    }

    fn game(&self, id: &GameId) -> Result<Option<Game>, PersistenceError> {
        let _guard = self.guard();
        let dir = self.game_dir(id);
        if !dir.join(GAME_FILE).is_file() {
            return Ok(None);
        }
        self.load_game(&dir).map(Some)
    }

    fn add_game(&self, game: Game) -> Result<(), PersistenceError> {
        let _guard = self.guard();
        let dir = self.game_dir(&game.id);
        if dir.join(GAME_FILE).is_file() {
            return Err(PersistenceError::AlreadyExists(game.id));
        }
        if dir.exists() {
            // No record file: an import that never completed.
            tracing::warn!(dir = %dir.display(), "replacing incomplete game entry");
            fs::remove_dir_all(&dir)?;
        }

        let staging = self
            .root
            .join("games")
            .join(format!("{}{STAGING_SUFFIX}", game.id));
        match fs::remove_dir_all(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let staged = self
            .stage_game(&staging, &game)
            .and_then(|()| fs::rename(&staging, &dir).map_err(PersistenceError::from));
        if let Err(err) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
        tracing::debug!(id = %game.id, dir = %dir.display(), "game stored");
        Ok(())
    }

    fn remove_game(&self, id: &GameId) -> Result<(), PersistenceError> {
        let _guard = self.guard();
        let dir = self.game_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PersistenceError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn record_played(&self, id: &GameId, at: SystemTime) -> Result<(), PersistenceError> {
        let _guard = self.guard();
        let dir = self.game_dir(id);
        if !dir.join(GAME_FILE).is_file() {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        let mut record = self.read_record(&dir)?;
        record.last_played_at_ns = Some(unix_nanos(at));
        self.write_record(&dir, &record)
    }

    fn savestates(&self, id: &GameId) -> Result<Vec<Savestate>, PersistenceError> {
        let _guard = self.guard();
        let mut savestates = Vec::new();
        for (ns, path) in self.state_files(id)? {
            match self.load_savestate(id, ns, &path) {
                Ok(savestate) => savestates.push(savestate),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable savestate")
                }
            }
        }
        Ok(savestates)
    }

    /// Reads only as many files as it takes to find one that loads.
    fn latest_savestate(&self, id: &GameId) -> Result<Option<Savestate>, PersistenceError> {
        let _guard = self.guard();
        for (ns, path) in self.state_files(id)? {
            match self.load_savestate(id, ns, &path) {
                Ok(savestate) => return Ok(Some(savestate)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable savestate")
                }
            }
        }
        Ok(None)
    }

    fn add_savestate(&self, savestate: Savestate, id: &GameId) -> Result<(), PersistenceError> {
        let _guard = self.guard();
        let dir = self.savestate_dir(id);
        if !self.game_dir(id).is_dir() {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        fs::create_dir_all(&dir)?;

        let stem = unix_nanos(savestate.timestamp()).to_string();
        let state_path = dir.join(&stem).with_extension(STATE_EXT);
        let preview_path = dir.join(&stem).with_extension(PREVIEW_EXT);

        let png = preview::encode(savestate.preview())
            .map_err(|e| corrupt(&preview_path, e))?;
        write_atomic(&preview_path, &png)?;
        write_atomic(&state_path, savestate.state())?;
        tracing::debug!(id = %id, path = %state_path.display(), "savestate stored");
        Ok(())
    }
}
