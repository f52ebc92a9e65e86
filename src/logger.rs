use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::info;

use crate::config::LogSettings;

/// Copies every log line to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Install the process-wide logger. Call once, at startup.
pub fn init(settings: &LogSettings) -> Result<()> {
    if let Some(parent) = settings.file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)
        .with_context(|| format!("opening log file {:?}", settings.file))?;

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, settings.level)
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .context("logger already initialized")?;

    info!("Logger initialized ({}, {:?}).", settings.level, settings.file);
    Ok(())
}

pub fn log_mining(stage: &str, details: &str) {
    info!("[MINING] {} - {}", stage, details);
}

pub fn log_download(name: &str, size: u64, status: &str) {
    info!("[DOWNLOAD] {} - {} bytes - {}", name, size, status);
}
