//! Engine logging.
//!
//! The engine logs through the `log` facade. [`ChannelLogger`] is the sink the applications
//! install: records are forwarded over a crossbeam channel so the thread owning the console (or
//! a test) decides what to do with them, and worker threads never block on I/O.

use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{Level, Metadata, Record, SetLoggerError};

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
}

pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    level: Level,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.try_send(LogMessage {
                level: record.level(),
                target: record.target().to_string(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>, level: Level) -> Self {
        Self { sender, level }
    }

    pub fn with_receiver(level: Level) -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender, level), receiver)
    }
}

/// Install a [`ChannelLogger`] as the global logger and return the receiving end.
///
/// Fails if a global logger was already installed.
pub fn init(level: Level) -> Result<Receiver<LogMessage>, SetLoggerError> {
    let (logger, receiver) = ChannelLogger::with_receiver(level);
    log::set_logger(Box::leak(Box::new(logger)))?;
    log::set_max_level(level.to_level_filter());
    Ok(receiver)
}
