use log::{Level, Log, Metadata, Record};
use std::sync::{Arc, RwLock};

pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub msg: String,
}

/// Prints to stdout and retains all lines for post-run inspection.
pub struct Logger {
    pub lines: Arc<RwLock<Vec<LogLine>>>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(RwLock::new(vec![])),
        }
    }

    /// Install this logger as the global log sink.
    pub fn init() -> anyhow::Result<Arc<RwLock<Vec<LogLine>>>> {
        let logger = Logger::new();
        let lines = logger.lines.clone();
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| anyhow::anyhow!("Could not install logger: {}", e))?;
        log::set_max_level(log::LevelFilter::Info);
        Ok(lines)
    }

    pub fn drain_lines(&self) -> Vec<LogLine> {
        self.lines.write().unwrap().drain(..).collect()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "{} {} - {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            );
        }
        self.lines.write().unwrap().push(LogLine {
            level: record.level(),
            target: record.target().to_string(),
            msg: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}
