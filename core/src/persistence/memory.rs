use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use super::{Game, GameId, PersistenceError, PersistenceGateway};
use crate::savestate::Savestate;

#[derive(Default)]
struct Store {
    games: Vec<Game>,
    savestates: HashMap<GameId, Vec<Savestate>>,
}

/// Gateway that keeps everything in process memory.
///
/// Nothing survives the process. Used by tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryPersistence {
    store: Mutex<Store>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated library.
    pub fn with_games(games: impl IntoIterator<Item = Game>) -> Self {
        let store = Store {
            games: games.into_iter().collect(),
            savestates: HashMap::new(),
        };
        Self {
            store: Mutex::new(store),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        // Every mutation is a single push/insert/remove, so a poisoned store
        // is still consistent.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistenceGateway for MemoryPersistence {
    fn games(&self) -> Result<Vec<Game>, PersistenceError> {
        Ok(self.lock().games.clone())
    }

    fn add_game(&self, game: Game) -> Result<(), PersistenceError> {
        let mut store = self.lock();
        if store.games.iter().any(|g| g.id == game.id) {
            return Err(PersistenceError::AlreadyExists(game.id));
        }
        store.games.push(game);
        Ok(())
    }

    fn remove_game(&self, id: &GameId) -> Result<(), PersistenceError> {
        let mut store = self.lock();
        let before = store.games.len();
        store.games.retain(|g| &g.id != id);
        if store.games.len() == before {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        store.savestates.remove(id);
        Ok(())
    }

    fn record_played(&self, id: &GameId, at: SystemTime) -> Result<(), PersistenceError> {
        let mut store = self.lock();
        let game = store
            .games
            .iter_mut()
            .find(|g| &g.id == id)
            .ok_or_else(|| PersistenceError::NotFound(id.clone()))?;
        game.last_played_at = Some(at);
        Ok(())
    }

    fn savestates(&self, id: &GameId) -> Result<Vec<Savestate>, PersistenceError> {
        let store = self.lock();
        let mut savestates = store.savestates.get(id).cloned().unwrap_or_default();
        savestates.sort_by_key(|s| std::cmp::Reverse(s.timestamp()));
        Ok(savestates)
    }

    fn add_savestate(&self, savestate: Savestate, id: &GameId) -> Result<(), PersistenceError> {
        let mut store = self.lock();
        if !store.games.iter().any(|g| &g.id == id) {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        store.savestates.entry(id.clone()).or_default().push(savestate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FRAME_LEN;
    use crate::savestate::PreviewImage;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn savestate(game: &GameId, secs: u64) -> Savestate {
        let preview = PreviewImage::from_frame(&vec![0u8; FRAME_LEN]).unwrap();
        Savestate::from_parts(game.clone(), at(secs), preview, vec![secs as u8])
    }

    #[test]
    fn duplicate_game_rejected() {
        let store = MemoryPersistence::new();
        store.add_game(Game::new("a", vec![1u8], at(0))).unwrap();
        let err = store.add_game(Game::new("b", vec![1u8], at(1))).unwrap_err();
        assert!(matches!(err, PersistenceError::AlreadyExists(_)));
    }

    #[test]
    fn savestates_newest_first() {
        let game = Game::new("a", vec![1u8], at(0));
        let id = game.id.clone();
        let store = MemoryPersistence::with_games([game]);

        store.add_savestate(savestate(&id, 20), &id).unwrap();
        store.add_savestate(savestate(&id, 30), &id).unwrap();
        store.add_savestate(savestate(&id, 10), &id).unwrap();

        let order: Vec<_> = store
            .savestates(&id)
            .unwrap()
            .iter()
            .map(Savestate::timestamp)
            .collect();
        assert_eq!(order, vec![at(30), at(20), at(10)]);
        assert_eq!(store.latest_savestate(&id).unwrap().unwrap().timestamp(), at(30));
    }

    #[test]
    fn remove_game_cascades() {
        let game = Game::new("a", vec![1u8], at(0));
        let id = game.id.clone();
        let store = MemoryPersistence::with_games([game]);
        store.add_savestate(savestate(&id, 5), &id).unwrap();

        store.remove_game(&id).unwrap();

        assert!(store.games().unwrap().is_empty());
        assert!(store.savestates(&id).unwrap().is_empty());
    }

    #[test]
    fn savestate_for_unknown_game_rejected() {
        let store = MemoryPersistence::new();
        let id = GameId::new("missing");
        let err = store.add_savestate(savestate(&id, 1), &id).unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[test]
    fn record_played_updates_game() {
        let game = Game::new("a", vec![1u8], at(0));
        let id = game.id.clone();
        let store = MemoryPersistence::with_games([game]);
        store.record_played(&id, at(99)).unwrap();
        assert_eq!(store.game(&id).unwrap().unwrap().last_played_at, Some(at(99)));
    }
}
