//! Logger setup.
//!
//! Verbosity is decided while parsing the command line and handed to [`init`]
//! once, before anything is logged.  `RUST_LOG` still overrides it.

use log::{LevelFilter, SetLoggerError};

/// Offset from the default `Info` level: each `-v` adds one, each `-q`
/// subtracts one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity(i16);

impl Verbosity {
    pub fn new(verbose: u8, quiet: u8) -> Self {
        Self(i16::from(verbose) - i16::from(quiet))
    }

    pub const fn level_filter(self) -> LevelFilter {
        match self.0 {
            i16::MIN..=-3 => LevelFilter::Off,
            -2 => LevelFilter::Error,
            -1 => LevelFilter::Warn,
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

pub fn init(verbosity: Verbosity) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(verbosity.level_filter())
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .try_init()
}
