#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dotmatrix_core::engine::{CoreEngine, EngineError, FRAME_LEN, InstanceHandle, NativeFrame};
use dotmatrix_core::persistence::{
    Game, GameId, MemoryPersistence, PersistenceError, PersistenceGateway,
};
use dotmatrix_core::savestate::{PreviewImage, Savestate};

/// Every call the stub engine has seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallLog {
    pub instances_created: usize,
    pub instances_released: usize,
    pub buffers_produced: usize,
    pub buffers_released: usize,
    pub dumps: usize,
    pub loads: usize,
    pub resets: usize,
    /// Inputs passed to each advance, in order.
    pub inputs: Vec<u8>,
}

struct StubInstance {
    initial_scene: u8,
    scene: u8,
    frames: u32,
}

/// Minimal engine: accepts ROMs starting with `b"GB"`, renders a flat
/// screen of `scene ^ input`.
///
/// The scene starts at `rom[2]` and only changes through `load_state` and
/// `reset_instance`, so an idle game shows the same picture every frame.
pub struct StubEngine {
    log: Arc<Mutex<CallLog>>,
    instances: HashMap<u64, StubInstance>,
    next_id: u64,
    pub fail_dump: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(CallLog::default())),
            instances: HashMap::new(),
            next_id: 1,
            fail_dump: false,
        }
    }

    pub fn log(&self) -> Arc<Mutex<CallLog>> {
        Arc::clone(&self.log)
    }

    fn record(&self, f: impl FnOnce(&mut CallLog)) {
        f(&mut self.log.lock().unwrap());
    }
}

impl CoreEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn create_instance(&mut self, rom: &[u8]) -> Result<InstanceHandle, EngineError> {
        if rom.len() < 3 || &rom[..2] != b"GB" {
            return Err(EngineError::InvalidRom("missing GB signature".into()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.instances.insert(
            id,
            StubInstance {
                initial_scene: rom[2],
                scene: rom[2],
                frames: 0,
            },
        );
        self.record(|log| log.instances_created += 1);
        Ok(InstanceHandle::new(id))
    }

    fn advance_to_vblank(&mut self, instance: &InstanceHandle, input: u8) -> NativeFrame {
        let state = self.instances.get_mut(&instance.raw()).unwrap();
        state.frames += 1;
        let pixel = state.scene ^ input;
        self.record(|log| {
            log.buffers_produced += 1;
            log.inputs.push(input);
        });
        NativeFrame::new(vec![pixel; FRAME_LEN])
    }

    fn dump_state(&mut self, instance: &InstanceHandle) -> Result<Vec<u8>, EngineError> {
        if self.fail_dump {
            return Err(EngineError::DumpFailed("out of memory".into()));
        }
        let state = &self.instances[&instance.raw()];
        let mut blob = vec![b'S', state.scene];
        blob.extend_from_slice(&state.frames.to_le_bytes());
        self.record(|log| log.dumps += 1);
        Ok(blob)
    }

    fn load_state(&mut self, instance: &InstanceHandle, blob: &[u8]) -> Result<(), EngineError> {
        self.record(|log| log.loads += 1);
        if blob.len() != 6 || blob[0] != b'S' {
            return Err(EngineError::InvalidSavestate("not a stub savestate".into()));
        }
        let state = self.instances.get_mut(&instance.raw()).unwrap();
        state.scene = blob[1];
        state.frames = u32::from_le_bytes([blob[2], blob[3], blob[4], blob[5]]);
        Ok(())
    }

    fn reset_instance(&mut self, instance: &InstanceHandle) {
        let state = self.instances.get_mut(&instance.raw()).unwrap();
        state.scene = state.initial_scene;
        state.frames = 0;
        self.record(|log| log.resets += 1);
    }

    fn release_instance(&mut self, instance: InstanceHandle) {
        assert!(self.instances.remove(&instance.raw()).is_some(), "double release");
        self.record(|log| log.instances_released += 1);
    }

    fn release_buffer(&mut self, _buffer: NativeFrame) {
        self.record(|log| log.buffers_released += 1);
    }
}

/// Stub savestate blob for the given scene.
pub fn stub_state(scene: u8) -> Vec<u8> {
    let mut blob = vec![b'S', scene];
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob
}

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// A ROM the stub accepts, showing `scene`.
pub fn stub_game(name: &str, scene: u8) -> Game {
    Game::new(name, vec![b'G', b'B', scene, 0, 0, 0], at(1_000))
}

pub fn savestate(game: &GameId, secs: u64, state: Vec<u8>) -> Savestate {
    let preview = PreviewImage::from_frame(&vec![0u8; FRAME_LEN]).unwrap();
    Savestate::from_parts(game.clone(), at(secs), preview, state)
}

/// Gateway wrapper that records savestate writes and can fail or stall them.
/// Savestate lookups and play-time updates can be made to fail too.
pub struct RecordingGateway {
    inner: MemoryPersistence,
    pub writes: Mutex<Vec<Savestate>>,
    pub fail_writes: Mutex<bool>,
    pub fail_reads: Mutex<bool>,
    pub fail_record_played: Mutex<bool>,
    gate: Mutex<Option<Receiver<()>>>,
}

fn unavailable() -> PersistenceError {
    PersistenceError::Io(std::io::Error::other("storage unavailable"))
}

impl RecordingGateway {
    pub fn new(games: impl IntoIterator<Item = Game>) -> Self {
        Self {
            inner: MemoryPersistence::with_games(games),
            writes: Mutex::new(Vec::new()),
            fail_writes: Mutex::new(false),
            fail_reads: Mutex::new(false),
            fail_record_played: Mutex::new(false),
            gate: Mutex::new(None),
        }
    }

    /// Make the next savestate write wait until the returned sender fires.
    pub fn stall_writes(&self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl PersistenceGateway for RecordingGateway {
    fn games(&self) -> Result<Vec<Game>, PersistenceError> {
        self.inner.games()
    }

    fn add_game(&self, game: Game) -> Result<(), PersistenceError> {
        self.inner.add_game(game)
    }

    fn remove_game(&self, id: &GameId) -> Result<(), PersistenceError> {
        self.inner.remove_game(id)
    }

    fn record_played(&self, id: &GameId, at: SystemTime) -> Result<(), PersistenceError> {
        if *self.fail_record_played.lock().unwrap() {
            return Err(unavailable());
        }
        self.inner.record_played(id, at)
    }

    fn savestates(&self, id: &GameId) -> Result<Vec<Savestate>, PersistenceError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(unavailable());
        }
        self.inner.savestates(id)
    }

    fn latest_savestate(&self, id: &GameId) -> Result<Option<Savestate>, PersistenceError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(unavailable());
        }
        self.inner.latest_savestate(id)
    }

    fn add_savestate(&self, savestate: Savestate, id: &GameId) -> Result<(), PersistenceError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.writes.lock().unwrap().push(savestate.clone());
        if *self.fail_writes.lock().unwrap() {
            return Err(PersistenceError::Io(std::io::Error::other("disk full")));
        }
        self.inner.add_savestate(savestate, id)
    }
}
