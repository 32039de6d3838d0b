use std::sync::Arc;
use std::time::SystemTime;

use crate::engine::{BYTES_PER_PIXEL, FRAME_LEN, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::handle::StateDump;
use crate::persistence::GameId;

/// Bitmap snapshot of the screen, RGBA8 row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl PreviewImage {
    /// Wrap RGBA pixels of the given dimensions.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(CodecError::PreviewSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Wrap one full screen frame.
    pub fn from_frame(pixels: &[u8]) -> Result<Self, CodecError> {
        if pixels.len() != FRAME_LEN {
            return Err(CodecError::PreviewSize {
                expected: FRAME_LEN,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width: SCREEN_WIDTH as u32,
            height: SCREEN_HEIGHT as u32,
            pixels: pixels.into(),
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A captured play position: engine blob plus what the screen showed.
///
/// Immutable once built. Loading one only ever touches the live emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savestate {
    game_id: GameId,
    timestamp: SystemTime,
    preview: PreviewImage,
    state: Arc<[u8]>,
}

impl Savestate {
    /// Rebuild a record read back from storage.
    pub fn from_parts(
        game_id: GameId,
        timestamp: SystemTime,
        preview: PreviewImage,
        state: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            game_id,
            timestamp,
            preview,
            state: state.into(),
        }
    }

    pub const fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub const fn preview(&self) -> &PreviewImage {
        &self.preview
    }

    /// The engine blob, uninterpreted.
    pub fn state(&self) -> &[u8] {
        &self.state
    }
}

/// Builds [`Savestate`] records from engine dumps.
pub struct SavestateCodec;

impl SavestateCodec {
    pub fn encode(
        game_id: &GameId,
        timestamp: SystemTime,
        dump: StateDump<'_>,
    ) -> Result<Savestate, CodecError> {
        let preview = PreviewImage::from_frame(dump.preview)?;
        Ok(Savestate {
            game_id: game_id.clone(),
            timestamp,
            preview,
            state: dump.state.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The preview pixels do not match the declared dimensions.
    PreviewSize { expected: usize, actual: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreviewSize { expected, actual } => {
                write!(f, "preview image: expected {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn game() -> GameId {
        GameId::new("0badcafe")
    }

    #[test]
    fn encode_keeps_blob_and_preview_verbatim() {
        let frame = vec![0x7Fu8; FRAME_LEN];
        let dump = StateDump {
            state: vec![1, 2, 3],
            preview: &frame,
        };
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let savestate = SavestateCodec::encode(&game(), at, dump).unwrap();

        assert_eq!(savestate.state(), &[1, 2, 3]);
        assert_eq!(savestate.preview().pixels(), frame.as_slice());
        assert_eq!(savestate.preview().width(), 160);
        assert_eq!(savestate.preview().height(), 144);
        assert_eq!(savestate.timestamp(), at);
        assert_eq!(savestate.game_id(), &game());
    }

    #[test]
    fn encode_rejects_short_preview() {
        let frame = vec![0u8; 16];
        let dump = StateDump {
            state: Vec::new(),
            preview: &frame,
        };
        let err = SavestateCodec::encode(&game(), SystemTime::UNIX_EPOCH, dump).unwrap_err();
        assert_eq!(
            err,
            CodecError::PreviewSize {
                expected: FRAME_LEN,
                actual: 16
            }
        );
    }

    #[test]
    fn clones_share_storage() {
        let frame = vec![0u8; FRAME_LEN];
        let dump = StateDump {
            state: vec![9; 64],
            preview: &frame,
        };
        let original = SavestateCodec::encode(&game(), SystemTime::UNIX_EPOCH, dump).unwrap();
        let copy = original.clone();
        assert_eq!(original, copy);
        assert!(std::ptr::eq(original.state().as_ptr(), copy.state().as_ptr()));
    }

    #[test]
    fn from_rgba_checks_dimensions() {
        assert!(PreviewImage::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(PreviewImage::from_rgba(2, 2, vec![0; 15]).is_err());
    }
}
