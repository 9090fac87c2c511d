//! Logging.
//!
//! Diagnostics go through the `log` facade into the one [`Logger`]
//! registered by [`Logger::init`]. Until the configuration has been read,
//! the logger writes to stderr. [`Logger::switch_logging`] then directs it
//! to the sink the user asked for.
//!
//! Answers to requests are never logged. They go to stdout, so a sink
//! writing to stderr never mixes with them.

use std::{fs, io};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use log::{Level, LevelFilter, Log, Metadata, Record};
use crate::config::{Config, LogTarget};
use crate::error::Failed;
use crate::utils::date::format_local_iso_date;
use crate::utils::sync::Mutex;


//------------ Logger --------------------------------------------------------

/// The process-wide logger.
pub struct Logger {
    /// The configured sink.
    ///
    /// If this is unset, messages go to stderr.
    sink: OnceLock<Mutex<Sink>>,
}

static LOGGER: Logger = Logger { sink: OnceLock::new() };

impl Logger {
    /// Registers the logger with the `log` crate.
    ///
    /// Only warnings and errors are shown until the configuration is
    /// applied.
    pub fn init() -> Result<(), Failed> {
        log::set_max_level(LevelFilter::Warn);
        log::set_logger(&LOGGER).map_err(|err| {
            eprintln!("Failed to set up logging: {}", err);
            Failed
        })
    }

    /// Applies the logging configuration.
    ///
    /// The `daemon` flag is set by commands that keep running and answer
    /// requests for somebody else. For those, the default target is
    /// syslog. One-shot commands log to stderr by default.
    pub fn switch_logging(
        config: &Config, daemon: bool
    ) -> Result<(), Failed> {
        let sink = Sink::open(&config.log_target, daemon)?;
        if LOGGER.sink.set(Mutex::new(sink)).is_err() {
            log::error!("Logging has been configured twice.");
            return Err(Failed)
        }
        log::set_max_level(config.log_level);
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return
        }
        match self.sink.get() {
            Some(sink) => sink.lock().emit(record),
            None => Sink::Stderr.emit(record),
        }
    }

    fn flush(&self) {
        if let Some(sink) = self.sink.get() {
            sink.lock().flush()
        }
    }
}


//------------ Sink ----------------------------------------------------------

/// Where log messages end up.
enum Sink {
    /// Plain lines on stderr.
    Stderr,

    /// Timestamped lines appended to a file.
    File {
        path: PathBuf,
        file: fs::File,
    },

    /// The local syslog daemon.
    #[cfg(unix)]
    Syslog(syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>),
}

impl Sink {
    /// Opens the sink for a log target.
    #[cfg_attr(not(unix), allow(unused_variables))]
    fn open(target: &LogTarget, daemon: bool) -> Result<Self, Failed> {
        match *target {
            #[cfg(unix)]
            LogTarget::Default(facility) => {
                if daemon {
                    Self::syslog(facility)
                }
                else {
                    Ok(Sink::Stderr)
                }
            }
            #[cfg(unix)]
            LogTarget::Syslog(facility) => Self::syslog(facility),
            LogTarget::File(ref path) => Self::file(path),
            LogTarget::Stderr => Ok(Sink::Stderr),
        }
    }

    fn file(path: &Path) -> Result<Self, Failed> {
        match fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Ok(Sink::File { path: path.into(), file }),
            Err(err) => {
                log::error!(
                    "Cannot open log file {}: {}", path.display(), err
                );
                Err(Failed)
            }
        }
    }

    /// Connects to syslog via the local socket.
    #[cfg(unix)]
    fn syslog(facility: syslog::Facility) -> Result<Self, Failed> {
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process: "authprofile".into(),
            pid: std::process::id(),
        };
        syslog::unix(formatter).map(Sink::Syslog).map_err(|err| {
            log::error!("Cannot connect to syslog: {}", err);
            Failed
        })
    }

    /// Writes a record.
    ///
    /// If the sink fails, the record and the reason are written to stderr
    /// instead so that nothing gets lost.
    fn emit(&mut self, record: &Record) {
        if let Err(err) = self.write(record) {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(
                stderr, "[{}] {}", record.level(), record.args()
            );
            let _ = writeln!(
                stderr, "[ERROR] Logging to {} failed: {}",
                self.describe(), err
            );
        }
    }

    fn write(&mut self, record: &Record) -> Result<(), io::Error> {
        match *self {
            Sink::Stderr => {
                writeln!(
                    io::stderr().lock(), "[{}] {}",
                    record.level(), record.args()
                )
            }
            Sink::File { ref mut file, .. } => {
                writeln!(
                    file, "{} [{}] {}",
                    format_local_iso_date(chrono::Local::now()),
                    record.level(), record.args()
                )
            }
            #[cfg(unix)]
            Sink::Syslog(ref mut logger) => {
                let args = record.args();
                match record.level() {
                    Level::Error => logger.err(args),
                    Level::Warn => logger.warning(args),
                    Level::Info => logger.info(args),
                    Level::Debug | Level::Trace => logger.debug(args),
                }.map_err(|err| io::Error::other(err.to_string()))
            }
        }
    }

    fn flush(&mut self) {
        let _ = match *self {
            Sink::Stderr => io::stderr().flush(),
            Sink::File { ref mut file, .. } => file.flush(),
            #[cfg(unix)]
            Sink::Syslog(ref mut logger) => logger.backend.flush(),
        };
    }

    /// Names the sink in error messages.
    fn describe(&self) -> String {
        match *self {
            Sink::Stderr => "stderr".into(),
            Sink::File { ref path, .. } => {
                format!("log file {}", path.display())
            }
            #[cfg(unix)]
            Sink::Syslog(_) => "syslog".into(),
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn warn_record(f: impl FnOnce(&Record)) {
        f(&Record::builder()
            .level(Level::Warn)
            .args(format_args!("CA '{}' is untrusted", "CN=X"))
            .build()
        )
    }

    #[test]
    fn file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authprofile.log");
        let mut sink = Sink::open(&LogTarget::File(path.clone()), true)
            .unwrap();
        warn_record(|record| sink.emit(record));
        warn_record(|record| sink.emit(record));
        sink.flush();
        assert_eq!(sink.describe(), format!("log file {}", path.display()));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let (stamp, rest) = line.split_once(' ').unwrap();
            assert_eq!(stamp.len(), "1994-11-06T08:49:37".len());
            assert_eq!(rest, "[WARN] CA 'CN=X' is untrusted");
        }
    }

    #[test]
    fn unwritable_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Sink::open(
            &LogTarget::File(dir.path().join("missing").join("ap.log")),
            false
        ).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn default_target_for_one_shot_commands() {
        assert!(matches!(
            Sink::open(&LogTarget::default(), false).unwrap(),
            Sink::Stderr
        ));
        assert!(matches!(
            Sink::open(&LogTarget::Stderr, true).unwrap(),
            Sink::Stderr
        ));
    }
}
