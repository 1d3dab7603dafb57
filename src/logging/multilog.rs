use log::{LevelFilter, Log, Metadata, Record};

/// A logger sink with its own level ceiling.
struct Sink {
    logger: Box<dyn Log>,
    max_level: LevelFilter,
}

impl Sink {
    fn accepts(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level && self.logger.enabled(metadata)
    }
}

/// Fans every record out to all sinks whose level admits it.
#[derive(Default)]
pub struct MultiLogger {
    sinks: Vec<Sink>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>, max_level: LevelFilter) -> Self {
        self.add_logger(logger, max_level);
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>, max_level: LevelFilter) {
        self.sinks.push(Sink { logger, max_level });
    }

    /// Most verbose level any sink wants.
    pub fn max_level(&self) -> LevelFilter {
        self.sinks
            .iter()
            .map(|sink| sink.max_level)
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    /// Installs the logger globally.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.max_level();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.sinks.iter().any(|sink| sink.accepts(metadata))
    }

    fn log(&self, record: &Record) {
        self.sinks
            .iter()
            .filter(|sink| sink.accepts(record.metadata()))
            .for_each(|sink| sink.logger.log(record));
    }

    fn flush(&self) {
        self.sinks.iter().for_each(|sink| sink.logger.flush());
    }
}
