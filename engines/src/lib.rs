pub mod instrumented;
pub mod pattern;
pub mod registry;

pub use instrumented::{EngineStats, Instrumented, StatsSnapshot};
pub use pattern::PatternEngine;
