//! Deterministic reference core.
//!
//! Does not interpret cartridge code. It checks the cartridge header the
//! way the boot ROM does, then renders a scrolling test pattern driven by
//! the joypad and a per-cartridge LFSR. Everything it shows is a pure
//! function of its saved state, which makes it the engine of choice for
//! savestate and frame-pump tests.

use std::collections::HashMap;

use dotmatrix_core::engine::{
    BYTES_PER_PIXEL, CoreEngine, EngineError, FRAME_LEN, InstanceHandle, NativeFrame,
    SCREEN_HEIGHT, SCREEN_WIDTH,
};
use dotmatrix_core::input::{Direction, InputMask};
use dotmatrix_core::persistence::crc32;

use crate::registry::EngineEntry;

// ---------------------------------------------------------------------------
// Cartridge header
// ---------------------------------------------------------------------------

/// Header bytes covered by the checksum.
const HEADER_SUM_RANGE: std::ops::RangeInclusive<usize> = 0x134..=0x14C;
const HEADER_CHECKSUM: usize = 0x14D;
const TITLE_RANGE: std::ops::Range<usize> = 0x134..0x144;
/// Smallest image that contains a full header.
pub const MIN_ROM_LEN: usize = 0x150;

/// Header checksum as computed by the boot ROM. `None` if `rom` is too
/// short to hold the header.
pub fn header_checksum(rom: &[u8]) -> Option<u8> {
    let header = rom.get(HEADER_SUM_RANGE)?;
    Some(
        header
            .iter()
            .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1)),
    )
}

/// Cartridge title from the header, if it has a printable one.
pub fn cartridge_title(rom: &[u8]) -> Option<String> {
    let raw = rom.get(TITLE_RANGE)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let title = std::str::from_utf8(&raw[..end]).ok()?.trim();
    (!title.is_empty() && title.chars().all(|c| c.is_ascii_graphic() || c == ' '))
        .then(|| title.to_string())
}

fn validate(rom: &[u8]) -> Result<(), EngineError> {
    if rom.len() < MIN_ROM_LEN {
        return Err(EngineError::InvalidRom(format!(
            "{} bytes is too small for a cartridge header",
            rom.len()
        )));
    }
    let expected = rom[HEADER_CHECKSUM];
    let Some(actual) = header_checksum(rom) else {
        return Err(EngineError::InvalidRom("missing cartridge header".to_string()));
    };
    if actual != expected {
        return Err(EngineError::InvalidRom(format!(
            "header checksum mismatch: header says {expected:#04x}, computed {actual:#04x}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Savestate blob
// ---------------------------------------------------------------------------

const STATE_MAGIC: &[u8; 4] = b"DMPS";
const STATE_VERSION: u8 = 1;
const REG_COUNT: usize = 16;
/// magic + version + crc + frame + lfsr + input + regs
const STATE_LEN: usize = 4 + 1 + 4 + 4 + 2 + 1 + REG_COUNT * 2;

/// DMG palette, lightest first.
const PALETTE: [[u8; 3]; 4] = [
    [0xE0, 0xF8, 0xD0],
    [0x88, 0xC0, 0x70],
    [0x34, 0x68, 0x56],
    [0x08, 0x18, 0x20],
];

const SCROLL_X: usize = 0;
const SCROLL_Y: usize = 1;
const PALETTE_SHIFT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Instance {
    rom_crc: u32,
    frame: u32,
    lfsr: u16,
    input: u8,
    regs: [u16; REG_COUNT],
}

impl Instance {
    fn power_on(rom_crc: u32) -> Self {
        Self {
            rom_crc,
            frame: 0,
            // Zero is the LFSR's stuck state.
            lfsr: (rom_crc as u16) | 1,
            input: 0,
            regs: [0; REG_COUNT],
        }
    }

    fn step(&mut self, input: u8) {
        self.frame = self.frame.wrapping_add(1);
        let lsb = self.lfsr & 1;
        self.lfsr >>= 1;
        if lsb != 0 {
            self.lfsr ^= 0xB400;
        }

        let mask = InputMask::from_bits(input);
        let (dx, dy): (i16, i16) = match mask.direction() {
            Some(Direction::Right) => (1, 0),
            Some(Direction::Left) => (-1, 0),
            Some(Direction::Up) => (0, -1),
            Some(Direction::Down) => (0, 1),
            None => (0, 0),
        };
        self.regs[SCROLL_X] = self.regs[SCROLL_X].wrapping_add_signed(dx);
        self.regs[SCROLL_Y] = self.regs[SCROLL_Y].wrapping_add_signed(dy);
        // A newly pressed action button rotates the palette.
        let pressed = mask.actions().bits() & !self.input & 0x0F;
        if pressed != 0 {
            self.regs[PALETTE_SHIFT] = self.regs[PALETTE_SHIFT].wrapping_add(1);
        }
        let work = 3 + (self.frame as usize % (REG_COUNT - 3));
        self.regs[work] ^= self.lfsr;
        self.input = input;
    }

    fn render(&self, pixels: &mut [u8]) {
        let sx = usize::from(self.regs[SCROLL_X]);
        let sy = usize::from(self.regs[SCROLL_Y]);
        let shift = usize::from(self.regs[PALETTE_SHIFT]);
        let beam = self.frame as usize % SCREEN_HEIGHT;
        let noise = usize::from(self.lfsr);

        for (y, row) in pixels
            .chunks_exact_mut(SCREEN_WIDTH * BYTES_PER_PIXEL)
            .enumerate()
        {
            for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                let tile = ((x + sx) >> 3) + ((y + sy) >> 3);
                let shade = if y == beam {
                    3
                } else {
                    (tile + shift + ((x ^ y ^ noise) & 1)) & 3
                };
                let [r, g, b] = PALETTE[shade];
                px.copy_from_slice(&[r, g, b, 0xFF]);
            }
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(STATE_LEN);
        blob.extend_from_slice(STATE_MAGIC);
        blob.push(STATE_VERSION);
        blob.extend_from_slice(&self.rom_crc.to_le_bytes());
        blob.extend_from_slice(&self.frame.to_le_bytes());
        blob.extend_from_slice(&self.lfsr.to_le_bytes());
        blob.push(self.input);
        for reg in self.regs {
            blob.extend_from_slice(&reg.to_le_bytes());
        }
        blob
    }

    fn decode(blob: &[u8], rom_crc: u32) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidSavestate(reason.to_string());
        if blob.len() != STATE_LEN {
            return Err(EngineError::InvalidSavestate(format!(
                "expected {STATE_LEN} bytes, got {}",
                blob.len()
            )));
        }
        if &blob[..4] != STATE_MAGIC {
            return Err(invalid("not a pattern core savestate"));
        }
        if blob[4] != STATE_VERSION {
            return Err(EngineError::InvalidSavestate(format!(
                "unsupported version {}",
                blob[4]
            )));
        }
        let u16_at = |i: usize| u16::from_le_bytes([blob[i], blob[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([blob[i], blob[i + 1], blob[i + 2], blob[i + 3]]);

        if u32_at(5) != rom_crc {
            return Err(invalid("savestate was made with a different cartridge"));
        }
        let mut regs = [0u16; REG_COUNT];
        for (i, reg) in regs.iter_mut().enumerate() {
            *reg = u16_at(16 + i * 2);
        }
        Ok(Self {
            rom_crc,
            frame: u32_at(9),
            lfsr: u16_at(13),
            input: blob[15],
            regs,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Frames kept for reuse instead of reallocating every vblank.
const SPARE_FRAMES: usize = 2;

#[derive(Debug, Default)]
pub struct PatternEngine {
    instances: HashMap<u64, Instance>,
    next_id: u64,
    spare: Vec<Vec<u8>>,
}

impl PatternEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances created and not yet released.
    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance(&self, handle: &InstanceHandle) -> Result<&Instance, EngineError> {
        self.instances
            .get(&handle.raw())
            .ok_or_else(|| EngineError::DumpFailed(format!("unknown instance {}", handle.raw())))
    }
}

impl CoreEngine for PatternEngine {
    fn name(&self) -> &str {
        "pattern"
    }

    fn create_instance(&mut self, rom: &[u8]) -> Result<InstanceHandle, EngineError> {
        validate(rom)?;
        self.next_id += 1;
        let id = self.next_id;
        self.instances.insert(id, Instance::power_on(crc32(rom)));
        Ok(InstanceHandle::new(id))
    }

    fn advance_to_vblank(&mut self, handle: &InstanceHandle, input: u8) -> NativeFrame {
        let mut pixels = self.spare.pop().unwrap_or_else(|| vec![0; FRAME_LEN]);
        match self.instances.get_mut(&handle.raw()) {
            Some(instance) => {
                instance.step(input);
                instance.render(&mut pixels);
            }
            None => {
                tracing::error!(instance = handle.raw(), "advance on unknown instance");
                pixels.fill(0);
            }
        }
        NativeFrame::new(pixels)
    }

    fn dump_state(&mut self, handle: &InstanceHandle) -> Result<Vec<u8>, EngineError> {
        Ok(self.instance(handle)?.encode())
    }

    fn load_state(&mut self, handle: &InstanceHandle, state: &[u8]) -> Result<(), EngineError> {
        let Some(instance) = self.instances.get_mut(&handle.raw()) else {
            return Err(EngineError::InvalidSavestate(format!(
                "unknown instance {}",
                handle.raw()
            )));
        };
        *instance = Instance::decode(state, instance.rom_crc)?;
        Ok(())
    }

    fn reset_instance(&mut self, handle: &InstanceHandle) {
        if let Some(instance) = self.instances.get_mut(&handle.raw()) {
            *instance = Instance::power_on(instance.rom_crc);
        }
    }

    fn release_instance(&mut self, handle: InstanceHandle) {
        if self.instances.remove(&handle.raw()).is_none() {
            tracing::warn!(instance = handle.raw(), "release of unknown instance");
        }
    }

    fn release_buffer(&mut self, buffer: NativeFrame) {
        let pixels = buffer.into_pixels();
        if self.spare.len() < SPARE_FRAMES && pixels.len() == FRAME_LEN {
            self.spare.push(pixels);
        }
    }
}

// ---------------------------------------------------------------------------
// Engine registry
// ---------------------------------------------------------------------------

fn create_engine() -> Box<dyn CoreEngine> {
    Box::new(PatternEngine::new())
}

inventory::submit! {
    EngineEntry::new("pattern", "deterministic test-pattern core (header-checked)", create_engine)
}
