//! Engine registry for front-end discovery.
//!
//! Each engine registers itself via [`inventory::submit!`] with an
//! [`EngineEntry`]; the front end lists and picks engines by name without a
//! central table.

use dotmatrix_core::engine::CoreEngine;

/// A selectable emulation core.
pub struct EngineEntry {
    /// Name used with `--engine` and in the config file.
    pub name: &'static str,
    /// One line for `dotmatrix engines`.
    pub description: &'static str,
    pub create: fn() -> Box<dyn CoreEngine>,
}

impl EngineEntry {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        create: fn() -> Box<dyn CoreEngine>,
    ) -> Self {
        Self {
            name,
            description,
            create,
        }
    }
}

inventory::collect!(EngineEntry);

/// All registered engines, sorted by name.
pub fn all() -> Vec<&'static EngineEntry> {
    let mut entries: Vec<_> = inventory::iter::<EngineEntry>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

pub fn find(name: &str) -> Option<&'static EngineEntry> {
    inventory::iter::<EngineEntry>
        .into_iter()
        .find(|e| e.name == name)
}
