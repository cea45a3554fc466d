//! Log installation and run reporting.
//!
//! LoggingContext::install() is the one place that touches the global
//! logger. It wires env_logger into a tee of a size-bounded rotating file
//! and stdout. Everything else logs through the `log` macros, and the
//! simulation loop reports through a RunReporter handed to it, which can
//! also keep the lines it reports for inspection.

use crate::{
    error::{SimError, SimResult},
    simulation::{Emission, IterationFailure, RecordOutcome, RunMetrics},
    types::RecordIndex,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_LOG_FILE: &str = "simulator.log";
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_BACKUPS: usize = 5;
pub const DEFAULT_RUN_NAME: &str = "TrafficSimulator";

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub run_name: String,
    pub file: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
    pub console: bool,
    pub level: log::LevelFilter,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            run_name: DEFAULT_RUN_NAME.into(),
            file: PathBuf::from(DEFAULT_LOG_FILE),
            max_bytes: DEFAULT_MAX_BYTES,
            backups: DEFAULT_BACKUPS,
            console: true,
            level: log::LevelFilter::Info,
        }
    }
}

/// Append-only file writer that rolls over at `max_bytes`, keeping
/// `path.1` .. `path.N` as backups (`.1` newest). `max_bytes == 0`
/// disables rollover.
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups > 0 {
            let oldest = self.backup_path(self.backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..self.backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        } else {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Mirrors every write to the rotating file and, optionally, stdout.
struct TeeWriter {
    file: RotatingFileWriter,
    console: Option<io::Stdout>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        if let Some(out) = self.console.as_mut() {
            out.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if let Some(out) = self.console.as_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

/// Handle proving the global logger has been installed.
#[derive(Debug)]
pub struct LoggingContext {
    run_name: String,
    file: PathBuf,
}

impl LoggingContext {
    /// Install the process-wide logger. May only succeed once.
    /// `RUST_LOG` overrides `settings.level`.
    pub fn install(settings: LogSettings) -> SimResult<Self> {
        let writer = TeeWriter {
            file: RotatingFileWriter::open(&settings.file, settings.max_bytes, settings.backups)?,
            console: settings.console.then(io::stdout),
        };
        let run_name = settings.run_name.clone();
        env_logger::Builder::new()
            .filter_level(settings.level)
            .parse_default_env()
            .write_style(env_logger::WriteStyle::Never)
            .format(move |buf, record| {
                writeln!(
                    buf,
                    "{} - {} - {} - {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                    run_name,
                    record.level(),
                    record.args()
                )
            })
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init()
            .map_err(|_| SimError::LoggingInitialized)?;

        Ok(Self {
            run_name: settings.run_name,
            file: settings.file,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn reporter(&self) -> RunReporter {
        RunReporter::new(self.run_name.clone())
    }
}

/// Emits the per-record, progress and completion lines of one run.
/// A capturing reporter also keeps every line it logs, shared across
/// clones, so callers can read back what a run reported.
#[derive(Debug, Clone)]
pub struct RunReporter {
    run_name: String,
    capture: Option<Arc<Mutex<Vec<String>>>>,
}

impl RunReporter {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            capture: None,
        }
    }

    pub fn capturing(run_name: impl Into<String>) -> Self {
        Self {
            capture: Some(Arc::default()),
            ..Self::new(run_name)
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Lines reported so far. Empty unless built with `capturing`.
    pub fn captured(&self) -> Vec<String> {
        self.capture
            .as_ref()
            .and_then(|lines| lines.lock().ok().map(|l| l.clone()))
            .unwrap_or_default()
    }

    fn emit(&self, level: log::Level, line: String) {
        log::log!(level, "{line}");
        if let Some(lines) = &self.capture {
            if let Ok(mut lines) = lines.lock() {
                lines.push(line);
            }
        }
    }

    pub fn started(&self, flag_key: &str, num_records: u64, seed: u64) {
        self.emit(
            log::Level::Info,
            format!(
                "Starting {}: flag={flag_key} records={num_records} seed={seed}",
                self.run_name
            ),
        );
    }

    pub fn record(&self, index: RecordIndex, outcome: &RecordOutcome) {
        let status = match outcome.emission {
            Emission::Tracked => "tracked",
            Emission::NotSelected => "not selected",
            Emission::TrackingDisabled => "tracking disabled",
        };
        self.emit(
            log::Level::Info,
            format!(
                "Record {index}: user {} - {} - flag={} ({}) probability={:.2} - {status}",
                outcome.user.key(),
                outcome.user.describe(),
                outcome.decision.value,
                outcome.decision.reason,
                outcome.probability,
            ),
        );
    }

    pub fn failure(&self, failure: &IterationFailure) {
        self.emit(
            log::Level::Error,
            format!("Error processing record {}: {}", failure.index, failure.message),
        );
    }

    pub fn progress(&self, processed: u64) {
        self.emit(log::Level::Info, format!("Processed {processed} records"));
    }

    pub fn completed(&self, metrics: &RunMetrics) {
        self.emit(
            log::Level::Info,
            format!(
                "Simulation completed successfully: processed={} tracked={} not_selected={} disabled={} failed={}",
                metrics.processed,
                metrics.tracked,
                metrics.not_selected,
                metrics.tracking_disabled,
                metrics.failed(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("flagsim-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rotating_writer_rolls_over_and_caps_backups() {
        let dir = scratch_dir("rotate");
        let path = dir.join("sim.log");
        let mut writer = RotatingFileWriter::open(&path, 16, 2).unwrap();

        for i in 0..5 {
            writer.write_all(format!("line-{i:010}\n").as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        assert!(path.exists());
        assert!(dir.join("sim.log.1").exists());
        assert!(dir.join("sim.log.2").exists());
        assert!(!dir.join("sim.log.3").exists(), "backup count must be bounded");

        let newest = fs::read_to_string(&path).unwrap();
        assert_eq!(newest, "line-0000000004\n");
        let previous = fs::read_to_string(dir.join("sim.log.1")).unwrap();
        assert_eq!(previous, "line-0000000003\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn capturing_reporter_shares_lines_across_clones() {
        let reporter = RunReporter::capturing("Run");
        let handle = reporter.clone();
        reporter.progress(100);
        reporter.failure(&IterationFailure {
            index: 7,
            message: "boom".into(),
        });
        assert_eq!(
            handle.captured(),
            vec!["Processed 100 records", "Error processing record 7: boom"]
        );
        assert!(RunReporter::new("Run").captured().is_empty());
    }

    #[test]
    fn zero_max_bytes_never_rotates() {
        let dir = scratch_dir("norotate");
        let path = dir.join("sim.log");
        let mut writer = RotatingFileWriter::open(&path, 0, 3).unwrap();
        for _ in 0..100 {
            writer.write_all(b"0123456789\n").unwrap();
        }
        writer.flush().unwrap();
        assert!(!dir.join("sim.log.1").exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 1100);
        fs::remove_dir_all(&dir).unwrap();
    }
}
