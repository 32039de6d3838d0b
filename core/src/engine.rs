/// Native screen width in pixels.
pub const SCREEN_WIDTH: usize = 160;
/// Native screen height in pixels.
pub const SCREEN_HEIGHT: usize = 144;
/// RGBA, premultiplied alpha last.
pub const BYTES_PER_PIXEL: usize = 4;
/// Size in bytes of one complete frame buffer.
pub const FRAME_LEN: usize = SCREEN_WIDTH * SCREEN_HEIGHT * BYTES_PER_PIXEL;

/// Opaque token for one live emulator instance inside an engine.
///
/// Deliberately neither `Clone` nor `Copy`: the only way to get rid of a
/// handle is [`CoreEngine::release_instance`], which consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// Wrap an engine-defined identifier. Only engines should call this.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// A frame buffer produced by an engine.
///
/// Move-only like [`InstanceHandle`]; it goes back to the engine through
/// [`CoreEngine::release_buffer`] and nowhere else.
#[derive(Debug)]
pub struct NativeFrame {
    pixels: Box<[u8]>,
}

impl NativeFrame {
    pub fn new(pixels: Vec<u8>) -> Self {
        Self {
            pixels: pixels.into_boxed_slice(),
        }
    }

    /// RGBA8 pixels, row-major, `SCREEN_WIDTH * SCREEN_HEIGHT * 4` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Take the allocation back, e.g. to recycle it for the next frame.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels.into_vec()
    }
}

/// Failures reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the cartridge (bad header, checksum, size...).
    InvalidRom(String),
    /// The savestate blob is malformed or came from an incompatible core.
    InvalidSavestate(String),
    /// The engine could not serialize its state.
    DumpFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRom(reason) => write!(f, "invalid ROM: {reason}"),
            Self::InvalidSavestate(reason) => write!(f, "invalid savestate: {reason}"),
            Self::DumpFailed(reason) => write!(f, "savestate dump failed: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Capability surface of an external Game Boy emulation core.
///
/// The session layer never looks inside the core: everything it needs goes
/// through these calls. An engine may host several instances; each one is
/// named by an [`InstanceHandle`] it handed out from
/// [`create_instance`](Self::create_instance).
///
/// Resources cross the boundary by value. Instances and frames come out of
/// the engine as move-only values and go back in through the `release_*`
/// methods, so a double release cannot be expressed.
pub trait CoreEngine: Send {
    /// Short identifier used in logs and the engine registry.
    fn name(&self) -> &str;

    /// Create an instance from cartridge bytes.
    ///
    /// This is the only place ROM validity is decided. The engine must not
    /// keep a borrow of `rom`; callers keep the bytes alive for the
    /// instance's lifetime anyway.
    fn create_instance(&mut self, rom: &[u8]) -> Result<InstanceHandle, EngineError>;

    /// Run until the next vertical blank with `input` held for the whole
    /// frame (bit layout in [`crate::input`]). Returns exactly one frame of
    /// [`FRAME_LEN`] bytes.
    fn advance_to_vblank(&mut self, instance: &InstanceHandle, input: u8) -> NativeFrame;

    /// Serialize the complete internal state of `instance`.
    fn dump_state(&mut self, instance: &InstanceHandle) -> Result<Vec<u8>, EngineError>;

    /// Replace the state of `instance` with a blob from [`dump_state`](Self::dump_state).
    fn load_state(&mut self, instance: &InstanceHandle, state: &[u8]) -> Result<(), EngineError>;

    /// Return `instance` to its power-on state without reallocating it.
    fn reset_instance(&mut self, instance: &InstanceHandle);

    fn release_instance(&mut self, instance: InstanceHandle);

    fn release_buffer(&mut self, buffer: NativeFrame);
}

impl<E: CoreEngine + ?Sized> CoreEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn create_instance(&mut self, rom: &[u8]) -> Result<InstanceHandle, EngineError> {
        (**self).create_instance(rom)
    }

    fn advance_to_vblank(&mut self, instance: &InstanceHandle, input: u8) -> NativeFrame {
        (**self).advance_to_vblank(instance, input)
    }

    fn dump_state(&mut self, instance: &InstanceHandle) -> Result<Vec<u8>, EngineError> {
        (**self).dump_state(instance)
    }

    fn load_state(&mut self, instance: &InstanceHandle, state: &[u8]) -> Result<(), EngineError> {
        (**self).load_state(instance, state)
    }

    fn reset_instance(&mut self, instance: &InstanceHandle) {
        (**self).reset_instance(instance);
    }

    fn release_instance(&mut self, instance: InstanceHandle) {
        (**self).release_instance(instance);
    }

    fn release_buffer(&mut self, buffer: NativeFrame) {
        (**self).release_buffer(buffer);
    }
}
