//! Reads cartridge images off disk for import: a loose `.gb`/`.gbc` file
//! or the first cartridge inside a `.zip` archive.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const CARTRIDGE_EXTENSIONS: [&str; 2] = ["gb", "gbc"];
/// Largest licensed cartridge (MBC5, 8 MiB).
pub const MAX_ROM_LEN: u64 = 8 << 20;

/// Cartridge bytes plus a display name derived from the file.
#[derive(Debug)]
pub struct RomFile {
    /// File stem of the cartridge (inside the archive for ZIPs).
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum RomImportError {
    Io { path: PathBuf, source: std::io::Error },
    /// The archive could not be read.
    Zip { path: PathBuf, reason: String },
    /// The archive holds no `.gb`/`.gbc` entry.
    NoCartridge(PathBuf),
    Empty(PathBuf),
    /// An archive entry inflates past [`MAX_ROM_LEN`].
    TooLarge(PathBuf),
}

impl std::fmt::Display for RomImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Zip { path, reason } => write!(f, "{}: invalid ZIP: {reason}", path.display()),
            Self::NoCartridge(path) => {
                write!(f, "{}: archive contains no .gb or .gbc file", path.display())
            }
            Self::Empty(path) => write!(f, "{}: file is empty", path.display()),
            Self::TooLarge(path) => write!(
                f,
                "{}: cartridge is larger than {} bytes",
                path.display(),
                MAX_ROM_LEN
            ),
        }
    }
}

impl std::error::Error for RomImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn has_extension(path: &Path, candidates: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Read a cartridge from `path`.
///
/// `.zip` files are opened as archives; anything else is taken as a raw
/// image. Whether the bytes are a playable cartridge is for the engine to
/// decide.
pub fn read_rom(path: &Path) -> Result<RomFile, RomImportError> {
    let rom = if has_extension(path, &["zip"]) {
        read_from_zip(path)?
    } else {
        let bytes = std::fs::read(path).map_err(|source| RomImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        RomFile {
            name: stem(path),
            bytes,
        }
    };

    if rom.bytes.is_empty() {
        return Err(RomImportError::Empty(path.to_path_buf()));
    }
    tracing::debug!(path = %path.display(), name = %rom.name, bytes = rom.bytes.len(), "ROM read");
    Ok(rom)
}

/// Bytes to reserve for an entry declaring `declared` bytes. The header is
/// untrusted.
fn reserve_len(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_ROM_LEN)).unwrap_or(0)
}

fn read_from_zip(path: &Path) -> Result<RomFile, RomImportError> {
    let io_err = |source| RomImportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let zip_err = |e: zip::result::ZipError| RomImportError::Zip {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let file = File::open(path).map_err(io_err)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let entry_path = PathBuf::from(entry.name());
        if !has_extension(&entry_path, &CARTRIDGE_EXTENSIONS) {
            continue;
        }

        let mut bytes = Vec::with_capacity(reserve_len(entry.size()));
        entry
            .by_ref()
            .take(MAX_ROM_LEN + 1)
            .read_to_end(&mut bytes)
            .map_err(io_err)?;
        if bytes.len() as u64 > MAX_ROM_LEN {
            return Err(RomImportError::TooLarge(path.to_path_buf()));
        }
        return Ok(RomFile {
            name: stem(&entry_path),
            bytes,
        });
    }

    Err(RomImportError::NoCartridge(path.to_path_buf()))
}
