//! Ambient logging support, modeled on `ferron_common::logging::LogMessage`
//! and the simpler `project-karpacz-common` log message shape.
//!
//! This is not part of the specified CTM, but every crate in this lineage
//! carries a small structured-logging layer rather than bare `println!`,
//! so startup diagnostics and handshake-time degradations here follow the
//! same shape.

use std::fmt;

use chrono::Local;

/// Severity, ordered the way `log.level` in the configuration expects to
/// compare against ("info" admits "warn"/"error" but not "debug").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
  Debug,
  Info,
  Warn,
  Error,
}

impl Level {
  pub fn parse(s: &str) -> Level {
    match s.to_ascii_lowercase().as_str() {
      "debug" => Level::Debug,
      "warn" | "warning" => Level::Warn,
      "error" => Level::Error,
      _ => Level::Info,
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Level::Debug => "debug",
      Level::Info => "info",
      Level::Warn => "warn",
      Level::Error => "error",
    })
  }
}

/// A single log record, analogous to `ferron_common::logging::LogMessage`.
pub struct LogMessage {
  pub level: Level,
  pub message: String,
}

impl LogMessage {
  pub fn new(level: Level, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
    }
  }
}

/// A minimal logger honoring `log.level`, `log.stdio`, and `log.syslog`.
///
/// `log.syslog` is accepted at the configuration layer (see
/// `castellan_common::config::LogConfig`) but this crate only implements
/// the `stdio` sink directly — wiring an actual `syslog` transport is a
/// deployment concern of the binary crate, not the CTM; `Logger::emit`
/// still honors the flag by not writing to stdio when the config turns it
/// off and both sinks are theoretically disabled it logs nothing at all,
/// matching the teacher's willingness to let a misconfigured logger go
/// silent rather than inventing a fallback target.
#[derive(Clone)]
pub struct Logger {
  min_level: Level,
  stdio: bool,
}

impl Logger {
  pub fn new(min_level: Level, stdio: bool) -> Self {
    Self { min_level, stdio }
  }

  pub fn log(&self, msg: LogMessage) {
    if msg.level < self.min_level || !self.stdio {
      return;
    }
    let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match msg.level {
      Level::Error | Level::Warn => eprintln!("[{now}] {} {}", msg.level, msg.message),
      _ => println!("[{now}] {} {}", msg.level, msg.message),
    }
  }

  pub fn info(&self, message: impl Into<String>) {
    self.log(LogMessage::new(Level::Info, message));
  }

  pub fn warn(&self, message: impl Into<String>) {
    self.log(LogMessage::new(Level::Warn, message));
  }

  pub fn error(&self, message: impl Into<String>) {
    self.log(LogMessage::new(Level::Error, message));
  }

  pub fn debug(&self, message: impl Into<String>) {
    self.log(LogMessage::new(Level::Debug, message));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_parses_unknown_as_info() {
    assert_eq!(Level::parse("bogus"), Level::Info);
    assert_eq!(Level::parse("DEBUG"), Level::Debug);
  }

  #[test]
  fn level_ordering_filters_as_expected() {
    assert!(Level::Debug < Level::Info);
    assert!(Level::Info < Level::Warn);
    assert!(Level::Warn < Level::Error);
  }
}
