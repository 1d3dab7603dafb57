use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    sync::Mutex,
};

use chrono::Utc;
use log::{Log, Metadata, Record};

use super::LogEntry;

/// Writes records as JSON lines to a file, truncating it on creation.
pub struct FileLog {
    file: Mutex<File>,
}

impl FileLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        let mut serialized = serde_json::to_string(&LogEntry::new(record, Utc::now()))?;
        serialized.push('\n');

        let mut file = self.file.lock()?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

impl Log for FileLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        // Losing a log line must not abort the run
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}
