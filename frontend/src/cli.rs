use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand, ValueEnum};

use dotmatrix_core::engine::CoreEngine;
use dotmatrix_core::error::{ImportError, SessionError};
use dotmatrix_core::library::{GameSort, group_by_recency, import_game, sort_games};
use dotmatrix_core::persistence::{Game, MemoryPersistence, PersistenceError, PersistenceGateway};
use dotmatrix_core::session::{SessionController, SessionOptions};
use dotmatrix_engines::pattern::cartridge_title;
use dotmatrix_engines::{Instrumented, registry};

use crate::config::{Config, ConfigError};
use crate::emulator::{self, PumpOptions};
use crate::input::{InputScript, ScriptError};
use crate::library::{FsLibrary, unix_nanos};
use crate::preview::{self, PreviewError};
use crate::rom_import::{self, RomImportError};

/// Headless Game Boy session runner.
#[derive(Debug, Parser)]
#[command(name = "dotmatrix", version, about)]
pub struct Cli {
    /// Config file (default: <config dir>/dotmatrix/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Library directory, overriding the config file.
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,
    /// Engine name, overriding the config file.
    #[arg(long, global = true)]
    pub engine: Option<String>,
    /// Keep everything in memory for this run.
    #[arg(long, global = true)]
    pub ephemeral: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List available engines.
    Engines,
    /// Print the effective configuration.
    Config,
    /// Add cartridges (.gb, .gbc or .zip) to the library.
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Display name; only with a single path.
        #[arg(long)]
        name: Option<String>,
    },
    /// List the library.
    Games {
        #[arg(long, value_enum, default_value_t = SortArg::Recent)]
        sort: SortArg,
    },
    /// List a game's savestates, newest first.
    Savestates { game: String },
    /// Run a game headless.
    Play {
        /// Game id, id prefix, name, or a cartridge file.
        game: String,
        #[arg(long, default_value_t = 600)]
        frames: u64,
        /// Input script, e.g. `0:start,30:right+a,60:-`.
        #[arg(long)]
        input: Option<String>,
        /// Pause and save a savestate when the run ends.
        #[arg(long)]
        save: bool,
        /// Start fresh instead of resuming the latest savestate.
        #[arg(long)]
        no_resume: bool,
        /// Do not pace frames to the configured rate.
        #[arg(long)]
        unpaced: bool,
    },
    /// Export a savestate preview as PNG.
    Preview {
        game: String,
        /// 0 is the newest savestate.
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long)]
        out: PathBuf,
    },
    /// Remove a game and all of its savestates.
    Remove { game: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Recent,
    Name,
}

impl From<SortArg> for GameSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Recent => GameSort::LastPlayed,
            SortArg::Name => GameSort::Alphabetical,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    UnknownEngine {
        name: String,
        available: Vec<&'static str>,
    },
    Persistence(PersistenceError),
    RomImport(RomImportError),
    Import {
        path: PathBuf,
        source: ImportError,
    },
    /// Some paths of a batch import failed; each was already reported.
    ImportsFailed { failed: usize, total: usize },
    Session(SessionError),
    Script(ScriptError),
    Preview(PreviewError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    GameNotFound(String),
    AmbiguousGame {
        query: String,
        matches: Vec<String>,
    },
    NoSavestate {
        game: String,
        index: usize,
    },
    Usage(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::UnknownEngine { name, available } => write!(
                f,
                "unknown engine {name:?}; available: {}",
                available.join(", ")
            ),
            Self::Persistence(e) => write!(f, "{e}"),
            Self::RomImport(e) => write!(f, "{e}"),
            Self::Import { path, source } => write!(f, "{}: {source}", path.display()),
            Self::ImportsFailed { failed, total } => {
                write!(f, "{failed} of {total} imports failed")
            }
            Self::Session(e) => write!(f, "{e}"),
            Self::Script(e) => write!(f, "input script: {e}"),
            Self::Preview(e) => write!(f, "{e}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::GameNotFound(query) => write!(f, "no game matches {query:?}"),
            Self::AmbiguousGame { query, matches } => write!(
                f,
                "{query:?} matches several games: {}",
                matches.join(", ")
            ),
            Self::NoSavestate { game, index } => {
                write!(f, "{game} has no savestate at index {index}")
            }
            Self::Usage(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::RomImport(e) => Some(e),
            Self::Import { source, .. } => Some(source),
            Self::Session(e) => Some(e),
            Self::Script(e) => Some(e),
            Self::Preview(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<PersistenceError> for CliError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<RomImportError> for CliError {
    fn from(e: RomImportError) -> Self {
        Self::RomImport(e)
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<ScriptError> for CliError {
    fn from(e: ScriptError) -> Self {
        Self::Script(e)
    }
}

impl From<PreviewError> for CliError {
    fn from(e: PreviewError) -> Self {
        Self::Preview(e)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Everything a command needs, resolved once from flags and config.
struct Context {
    config: Config,
    engine_name: String,
    gateway: Arc<dyn PersistenceGateway>,
}

impl Context {
    fn engine(&self) -> Result<Box<dyn CoreEngine>, CliError> {
        let entry = registry::find(&self.engine_name).ok_or_else(|| CliError::UnknownEngine {
            name: self.engine_name.clone(),
            available: registry::all().iter().map(|e| e.name).collect(),
        })?;
        Ok((entry.create)())
    }
}

pub fn run(cli: Cli, mut config: Config) -> Result<(), CliError> {
    if let Some(library) = cli.library {
        config.library_dir = library;
    }
    let engine_name = cli.engine.unwrap_or_else(|| config.engine.clone());

    // Commands that never touch the library.
    match &cli.command {
        Command::Engines => {
            for entry in registry::all() {
                let marker = if entry.name == engine_name { '*' } else { ' ' };
                println!("{marker} {:<12} {}", entry.name, entry.description);
            }
            return Ok(());
        }
        Command::Config => {
            print!("{}", config.to_toml());
            return Ok(());
        }
        _ => {}
    }

    let gateway: Arc<dyn PersistenceGateway> = if cli.ephemeral {
        tracing::info!("ephemeral library: nothing will be written to disk");
        Arc::new(MemoryPersistence::new())
    } else {
        let library = FsLibrary::open(&config.library_dir)?;
        tracing::debug!(root = %library.root().display(), "library opened");
        Arc::new(library)
    };
    let ctx = Context {
        config,
        engine_name,
        gateway,
    };

    match cli.command {
        Command::Engines | Command::Config => Ok(()),
        Command::Import { paths, name } => import(&ctx, &paths, name),
        Command::Games { sort } => games(&ctx, sort.into()),
        Command::Savestates { game } => savestates(&ctx, &game),
        Command::Play {
            game,
            frames,
            input,
            save,
            no_resume,
            unpaced,
        } => {
            let script = match input {
                Some(text) => InputScript::parse(&text)?,
                None => InputScript::default(),
            };
            let options = PumpOptions {
                frames,
                frame_rate: (!unpaced).then_some(ctx.config.frame_rate),
            };
            play(&ctx, &game, &script, options, save, !no_resume)
        }
        Command::Preview { game, index, out } => export_preview(&ctx, &game, index, &out),
        Command::Remove { game } => {
            let game = resolve_game(&ctx, &game)?;
            ctx.gateway.remove_game(&game.id)?;
            println!("removed {} {}", game.id, game.name);
            Ok(())
        }
    }
}

fn import_one(
    ctx: &Context,
    engine: &mut dyn CoreEngine,
    path: &std::path::Path,
    name: Option<&str>,
) -> Result<Game, CliError> {
    let rom = rom_import::read_rom(path)?;
    let name = name
        .map(str::to_string)
        .or_else(|| cartridge_title(&rom.bytes))
        .unwrap_or(rom.name);
    import_game(engine, ctx.gateway.as_ref(), &name, rom.bytes, SystemTime::now()).map_err(
        |source| CliError::Import {
            path: path.to_path_buf(),
            source,
        },
    )
}

fn import(ctx: &Context, paths: &[PathBuf], name: Option<String>) -> Result<(), CliError> {
    if name.is_some() && paths.len() > 1 {
        return Err(CliError::Usage(
            "--name can only be used when importing a single file".to_string(),
        ));
    }
    let mut engine = ctx.engine()?;
    let mut failed = 0;
    for path in paths {
        match import_one(ctx, engine.as_mut(), path, name.as_deref()) {
            Ok(game) => println!("imported {} {}", game.id, game.name),
            Err(err) => {
                failed += 1;
                eprintln!("dotmatrix: {err}");
            }
        }
    }
    if failed > 0 {
        return Err(CliError::ImportsFailed {
            failed,
            total: paths.len(),
        });
    }
    Ok(())
}

/// Find a game by exact id, unique id prefix, or case-insensitive name.
///
/// An existing cartridge file is imported on the fly, which is how
/// `--ephemeral` runs get anything to play.
fn resolve_game(ctx: &Context, query: &str) -> Result<Game, CliError> {
    let games = ctx.gateway.games()?;
    if let Some(game) = games.iter().find(|g| g.id.as_str() == query) {
        return Ok(game.clone());
    }

    let matches: Vec<&Game> = games
        .iter()
        .filter(|g| g.id.as_str().starts_with(query) || g.name.eq_ignore_ascii_case(query))
        .collect();
    match matches.as_slice() {
        [game] => return Ok((*game).clone()),
        [] => {}
        several => {
            return Err(CliError::AmbiguousGame {
                query: query.to_string(),
                matches: several
                    .iter()
                    .map(|g| format!("{} {}", g.id, g.name))
                    .collect(),
            });
        }
    }

    let path = std::path::Path::new(query);
    if path.is_file() {
        let mut engine = ctx.engine()?;
        return match import_one(ctx, engine.as_mut(), path, None) {
            Ok(game) => Ok(game),
            Err(CliError::Import {
                source: ImportError::Persistence(PersistenceError::AlreadyExists(id)),
                ..
            }) => ctx
                .gateway
                .game(&id)?
                .ok_or_else(|| CliError::GameNotFound(query.to_string())),
            Err(err) => Err(err),
        };
    }

    Err(CliError::GameNotFound(query.to_string()))
}

fn ago(at: SystemTime) -> String {
    let Ok(elapsed) = SystemTime::now().duration_since(at) else {
        return "just now".to_string();
    };
    match elapsed.as_secs() {
        s if s < 60 => "just now".to_string(),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn print_game(game: &Game) {
    let played = game
        .last_played_at
        .map_or_else(|| "never played".to_string(), |at| format!("played {}", ago(at)));
    println!("  {}  {:<24} {}", game.id, game.name, played);
}

fn games(ctx: &Context, sort: GameSort) -> Result<(), CliError> {
    let mut games = ctx.gateway.games()?;
    if games.is_empty() {
        println!("library is empty; add cartridges with `dotmatrix import`");
        return Ok(());
    }
    match sort {
        GameSort::LastPlayed => {
            for (heading, members) in group_by_recency(&games, &chrono::Local::now()) {
                println!("{heading}");
                members.iter().for_each(print_game);
            }
        }
        GameSort::Alphabetical => {
            sort_games(&mut games, sort);
            games.iter().for_each(print_game);
        }
    }
    Ok(())
}

fn savestates(ctx: &Context, query: &str) -> Result<(), CliError> {
    let game = resolve_game(ctx, query)?;
    let savestates = ctx.gateway.savestates(&game.id)?;
    if savestates.is_empty() {
        println!("{} has no savestates", game.name);
    }
    for (index, savestate) in savestates.iter().enumerate() {
        println!(
            "{index:>3}  {}  {:<10} {} bytes",
            unix_nanos(savestate.timestamp()),
            ago(savestate.timestamp()),
            savestate.state().len()
        );
    }
    Ok(())
}

fn play(
    ctx: &Context,
    query: &str,
    script: &InputScript,
    options: PumpOptions,
    save: bool,
    resume: bool,
) -> Result<(), CliError> {
    let game = resolve_game(ctx, query)?;
    if !script.is_empty() {
        tracing::debug!(events = script.events().len(), "input script loaded");
    }
    let engine = Instrumented::new(ctx.engine()?);
    let stats = engine.stats();
    let mut session = SessionController::new(Box::new(engine), Arc::clone(&ctx.gateway))
        .with_options(SessionOptions {
            resume_latest: resume && ctx.config.resume_latest,
        });

    let outcome = session.start(&game)?;
    if let Some(err) = &outcome.savestate_error {
        eprintln!("dotmatrix: {err}; starting fresh");
    }
    if let Some(at) = outcome.resumed_from {
        println!("resumed from savestate {}", unix_nanos(at));
    }

    let report = emulator::run(&mut session, script, options)?;
    println!(
        "{} frames in {:.2?} ({} late), last frame crc {:08x}",
        report.frames, report.elapsed, report.late_frames, report.last_frame_crc
    );

    if save {
        session.pause()?;
        if let Some(savestate) = session.save()? {
            println!("saved savestate {}", unix_nanos(savestate.timestamp()));
        }
    }
    session.quit()?;

    let stats = stats.snapshot();
    tracing::debug!(?stats, "engine calls");
    if stats.live_buffers() != 0 || stats.live_instances() != 0 {
        tracing::warn!(?stats, "engine resources outstanding after quit");
    }
    Ok(())
}

fn export_preview(
    ctx: &Context,
    query: &str,
    index: usize,
    out: &std::path::Path,
) -> Result<(), CliError> {
    let game = resolve_game(ctx, query)?;
    let savestates = ctx.gateway.savestates(&game.id)?;
    let savestate = savestates.get(index).ok_or_else(|| CliError::NoSavestate {
        game: game.name.clone(),
        index,
    })?;

    let io_err = |source: std::io::Error| CliError::Io {
        path: out.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(out).map_err(io_err)?;
    let mut writer = std::io::BufWriter::new(file);
    preview::write_png(savestate.preview(), &mut writer)?;
    std::io::Write::flush(&mut writer).map_err(io_err)?;
    println!("wrote {}", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dotmatrix",
            "play",
            "tetris",
            "--frames",
            "30",
            "--ephemeral",
            "--engine",
            "pattern",
        ])
        .unwrap();
        assert!(cli.ephemeral);
        assert_eq!(cli.engine.as_deref(), Some("pattern"));
        let Command::Play { game, frames, .. } = cli.command else {
            panic!("expected play");
        };
        assert_eq!(game, "tetris");
        assert_eq!(frames, 30);
    }

    #[test]
    fn import_requires_a_path() {
        assert!(Cli::try_parse_from(["dotmatrix", "import"]).is_err());
    }

    #[test]
    fn sort_names() {
        let cli = Cli::try_parse_from(["dotmatrix", "games", "--sort", "name"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Games {
                sort: SortArg::Name
            }
        ));
    }
}
