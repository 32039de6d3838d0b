//! Exclusive ownership of one engine instance and the frame it last produced.

use std::sync::Arc;

use crate::engine::{CoreEngine, EngineError, InstanceHandle, NativeFrame};
use crate::input::InputMask;

/// Holds at most one live [`NativeFrame`].
///
/// Every frame the session layer ever receives passes through
/// [`replace`](Self::replace), and every frame it ever gives back goes out
/// through `replace` or [`release`](Self::release). Nothing else frees
/// engine buffers.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Option<NativeFrame>,
}

impl FrameSlot {
    pub const fn new() -> Self {
        Self { frame: None }
    }

    /// Store `frame`, handing the previous occupant back to `engine`.
    pub fn replace(&mut self, engine: &mut dyn CoreEngine, frame: NativeFrame) -> &NativeFrame {
        if let Some(previous) = self.frame.take() {
            engine.release_buffer(previous);
        }
        self.frame.insert(frame)
    }

    /// Hand the held frame (if any) back to `engine`.
    pub fn release(&mut self, engine: &mut dyn CoreEngine) {
        if let Some(frame) = self.frame.take() {
            engine.release_buffer(frame);
        }
    }

    pub fn get(&self) -> Option<&NativeFrame> {
        self.frame.as_ref()
    }

    pub const fn is_occupied(&self) -> bool {
        self.frame.is_some()
    }
}

/// Failed [`EmulatorHandle::create`]. Gives the engine back so the caller
/// can stay in its previous state.
pub struct CreateError {
    pub source: EngineError,
    engine: Box<dyn CoreEngine>,
}

impl CreateError {
    pub fn into_engine(self) -> Box<dyn CoreEngine> {
        self.engine
    }
}

impl std::fmt::Debug for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateError")
            .field("source", &self.source)
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} could not create an instance: {}", self.engine.name(), self.source)
    }
}

impl std::error::Error for CreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result of [`EmulatorHandle::dump_state`].
#[derive(Debug)]
pub struct StateDump<'a> {
    /// Opaque engine blob.
    pub state: Vec<u8>,
    /// The frame on screen when the dump was taken. Not re-rendered.
    pub preview: &'a [u8],
}

const LIVE: &str = "instance is held until the handle is dropped";

/// One engine instance plus the most recent frame it produced.
///
/// Dropping the handle (or calling [`close`](Self::close)) releases the
/// outstanding frame first, then the instance, then the ROM bytes.
pub struct EmulatorHandle {
    engine: Box<dyn CoreEngine>,
    instance: Option<InstanceHandle>,
    slot: FrameSlot,
    input: InputMask,
    frames: u64,
    // Kept alive for as long as the instance, whatever the engine does with it.
    rom: Arc<[u8]>,
}

impl EmulatorHandle {
    pub fn create(mut engine: Box<dyn CoreEngine>, rom: Arc<[u8]>) -> Result<Self, CreateError> {
        match engine.create_instance(&rom) {
            Ok(instance) => {
                tracing::debug!(
                    engine = engine.name(),
                    instance = instance.raw(),
                    rom_len = rom.len(),
                    "emulator instance created"
                );
                Ok(Self {
                    engine,
                    instance: Some(instance),
                    slot: FrameSlot::new(),
                    input: InputMask::NONE,
                    frames: 0,
                    rom,
                })
            }
            Err(source) => Err(CreateError { source, engine }),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn rom(&self) -> &Arc<[u8]> {
        &self.rom
    }

    /// Latch the mask used by the next [`advance_frame`](Self::advance_frame).
    pub fn apply_input(&mut self, input: InputMask) {
        self.input = input;
    }

    pub const fn input(&self) -> InputMask {
        self.input
    }

    /// Run to the next vertical blank and return its pixels.
    ///
    /// The previous frame is released before this returns; the borrow on
    /// `self` keeps callers from holding on to it.
    pub fn advance_frame(&mut self, input: InputMask) -> &[u8] {
        self.input = input;
        let instance = self.instance.as_ref().expect(LIVE);
        let frame = self.engine.advance_to_vblank(instance, input.bits());
        self.frames += 1;
        self.slot.replace(self.engine.as_mut(), frame).pixels()
    }

    /// Pixels of the last frame, if one has been produced.
    pub fn last_frame(&self) -> Option<&[u8]> {
        self.slot.get().map(NativeFrame::pixels)
    }

    /// Number of completed [`advance_frame`](Self::advance_frame) calls.
    pub const fn frames_advanced(&self) -> u64 {
        self.frames
    }

    /// Capture the engine state together with the frame currently on screen.
    pub fn dump_state(&mut self) -> Result<StateDump<'_>, EngineError> {
        let instance = self.instance.as_ref().expect(LIVE);
        let Some(frame) = self.slot.get() else {
            return Err(EngineError::DumpFailed(
                "no frame has been produced yet".to_string(),
            ));
        };
        let state = self.engine.dump_state(instance)?;
        Ok(StateDump {
            state,
            preview: frame.pixels(),
        })
    }

    /// Replace the engine state with `state`.
    ///
    /// If the engine rejects the blob, the state captured just before the
    /// attempt is put back, so a failed load leaves the instance as it was.
    pub fn load_state(&mut self, state: &[u8]) -> Result<(), EngineError> {
        let instance = self.instance.as_ref().expect(LIVE);
        let rollback = match self.engine.dump_state(instance) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(error = %err, "no rollback snapshot before savestate load");
                None
            }
        };

        let Err(err) = self.engine.load_state(instance, state) else {
            return Ok(());
        };

        if let Some(snapshot) = rollback
            && let Err(restore_err) = self.engine.load_state(instance, &snapshot)
        {
            tracing::error!(error = %restore_err, "could not restore state after failed load");
        }
        Err(err)
    }

    /// Power-cycle the instance in place.
    pub fn reset(&mut self) {
        let instance = self.instance.as_ref().expect(LIVE);
        self.engine.reset_instance(instance);
    }

    /// Tear the handle down now instead of at end of scope.
    pub fn close(self) {
        drop(self);
    }

    fn teardown(&mut self) {
        self.slot.release(self.engine.as_mut());
        if let Some(instance) = self.instance.take() {
            tracing::debug!(
                engine = self.engine.name(),
                instance = instance.raw(),
                frames = self.frames,
                "emulator instance released"
            );
            self.engine.release_instance(instance);
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for EmulatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorHandle")
            .field("engine", &self.engine.name())
            .field("instance", &self.instance)
            .field("has_frame", &self.slot.is_occupied())
            .field("input", &self.input)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}
