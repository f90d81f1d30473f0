//! Process-wide log backend for the task tree core.
//!
//! # Responsibility
//! - Start one rolling file logger per process and report what it runs with.
//! - Route panics through the log before the default hook prints them.
//!
//! # Invariants
//! - Log lines carry ids, kinds and counts only. Titles and notes stay out.
//! - Starting again with identical settings is a no-op; different settings
//!   are refused.
//! - Nothing in here panics.

use crate::config::CoreConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const FILE_BASENAME: &str = "gtd";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 5;
const PANIC_TEXT_LIMIT: usize = 160;
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

#[derive(Debug)]
pub enum LogError {
    UnknownLevel(String),
    RelativeDir(PathBuf),
    CreateDir { dir: PathBuf, source: std::io::Error },
    Backend(flexi_logger::FlexiLoggerError),
    /// Already running with other settings.
    Conflict { active: LogSettings, requested: LogSettings },
}

impl Display for LogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(level) => write!(
                f,
                "unknown log level `{level}`; expected one of {}",
                LEVELS.join("|")
            ),
            Self::RelativeDir(dir) => {
                write!(f, "log directory `{}` is not absolute", dir.display())
            }
            Self::CreateDir { dir, source } => {
                write!(f, "cannot create log directory `{}`: {source}", dir.display())
            }
            Self::Backend(err) => write!(f, "log backend failed to start: {err}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already runs as {active}; cannot switch to {requested}"
            ),
        }
    }
}

impl Error for LogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::UnknownLevel(_) | Self::RelativeDir(_) | Self::Conflict { .. } => None,
        }
    }
}

/// Normalized level plus absolute target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: &'static str,
    pub dir: PathBuf,
}

impl LogSettings {
    pub fn new(level: &str, dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        if !dir.is_absolute() {
            return Err(LogError::RelativeDir(dir.to_path_buf()));
        }
        Ok(Self {
            level: normalize_level(level)?,
            dir: dir.to_path_buf(),
        })
    }
}

impl Display for LogSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "level={} dir={}", self.level, self.dir.display())
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under `dir`.
///
/// # Errors
/// - `UnknownLevel` / `RelativeDir` for bad input.
/// - `CreateDir` / `Backend` when the logger cannot start.
/// - `Conflict` when logging already runs with other settings.
pub fn init_logging(level: &str, dir: impl AsRef<Path>) -> Result<(), LogError> {
    let requested = LogSettings::new(level, dir)?;
    let active = ACTIVE.get_or_try_init(|| start(requested.clone()))?;
    if active.settings != requested {
        return Err(LogError::Conflict {
            active: active.settings.clone(),
            requested,
        });
    }
    Ok(())
}

/// Starts logging with the level and log directory of `config`.
pub fn init_from_config(config: &CoreConfig) -> Result<(), LogError> {
    init_logging(config.log_level(), config.log_dir())
}

/// Settings of the running logger, if any.
pub fn logging_status() -> Option<LogSettings> {
    ACTIVE.get().map(|active| active.settings.clone())
}

/// `debug` in debug builds, `info` in release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn normalize_level(level: &str) -> Result<&'static str, LogError> {
    let wanted = level.trim().to_ascii_lowercase();
    let wanted = if wanted == "warning" { "warn" } else { wanted.as_str() };
    LEVELS
        .into_iter()
        .find(|known| *known == wanted)
        .ok_or_else(|| LogError::UnknownLevel(level.trim().to_string()))
}

fn start(settings: LogSettings) -> Result<ActiveLogger, LogError> {
    std::fs::create_dir_all(&settings.dir).map_err(|source| LogError::CreateDir {
        dir: settings.dir.clone(),
        source,
    })?;

    let handle = Logger::try_with_str(settings.level)
        .map_err(LogError::Backend)?
        .log_to_file(
            FileSpec::default()
                .directory(settings.dir.as_path())
                .basename(FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LogError::Backend)?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok level={} os={} debug_build={} version={}",
        settings.level,
        std::env::consts::OS,
        cfg!(debug_assertions),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        settings,
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let chained = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map_or_else(
            || "unknown".to_string(),
            |location| format!("{}:{}", location.file(), location.line()),
        );
        error!(
            "event=panic module=logging status=error location={} payload={}",
            location,
            panic_payload_text(info.payload())
        );
        chained(info);
    }));
}

/// One-line, length-capped text of a panic payload.
pub(crate) fn panic_payload_text(payload: &(dyn Any + Send)) -> String {
    let raw = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    let mut text = String::with_capacity(raw.len().min(PANIC_TEXT_LIMIT + 3));
    for (index, ch) in raw.chars().enumerate() {
        if index == PANIC_TEXT_LIMIT {
            text.push_str("...");
            break;
        }
        text.push(if matches!(ch, '\n' | '\r') { ' ' } else { ch });
    }
    text
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_level, panic_payload_text, LogError,
        LogSettings, PANIC_TEXT_LIMIT,
    };

    #[test]
    fn levels_are_normalized() {
        assert_eq!(normalize_level(" TRACE ").unwrap(), "trace");
        assert_eq!(normalize_level("Warning").unwrap(), "warn");
        assert!(matches!(
            normalize_level("loud"),
            Err(LogError::UnknownLevel(level)) if level == "loud"
        ));
    }

    #[test]
    fn settings_require_absolute_dir() {
        assert!(matches!(
            LogSettings::new("info", "logs/dev"),
            Err(LogError::RelativeDir(_))
        ));
    }

    #[test]
    fn panic_text_is_single_line_and_capped() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang\nline"));
        let borrowed: Box<dyn std::any::Any + Send> = Box::new("boom");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        let long: Box<dyn std::any::Any + Send> = Box::new("x".repeat(PANIC_TEXT_LIMIT + 10));

        assert_eq!(panic_payload_text(owned.as_ref()), "bang line");
        assert_eq!(panic_payload_text(borrowed.as_ref()), "boom");
        assert_eq!(panic_payload_text(other.as_ref()), "non-string panic payload");
        let capped = panic_payload_text(long.as_ref());
        assert!(capped.ends_with("..."));
        assert_eq!(capped.chars().count(), PANIC_TEXT_LIMIT + 3);
    }

    #[test]
    fn repeated_init_is_accepted_and_conflicts_are_refused() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        init_logging("info", first.path()).unwrap();
        init_logging("INFO", first.path()).unwrap();

        assert!(matches!(
            init_logging("debug", first.path()),
            Err(LogError::Conflict { .. })
        ));
        assert!(matches!(
            init_logging("info", second.path()),
            Err(LogError::Conflict { .. })
        ));

        let active = logging_status().unwrap();
        assert_eq!(active.level, "info");
        assert_eq!(active.dir, first.path());
    }
}
