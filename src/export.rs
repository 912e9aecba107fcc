/// RR-interval accumulation and CSV export
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::models::RrSample;
use crate::utils::format_clock_time;

pub const CSV_HEADER: &str = "RR intervals [ms], time [hh:mm:ss]";
pub const DEFAULT_EXPORT_FILE: &str = "RRintervals_1.csv";

/// Session-scoped RR sample log
///
/// Cloning yields another handle to the same log. The notification path is
/// the only appender. An export claims every logged sample in one step
/// before writing, so overlapping exports never share a sample, and values
/// arriving during a slow write stay for the next export.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: Arc<Mutex<Vec<RrSample>>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RrSample>> {
        // A panic elsewhere never leaves the Vec half-written
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, samples: &[RrSample]) {
        if samples.is_empty() {
            return;
        }
        self.lock().extend_from_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<RrSample> {
        self.lock().clone()
    }

    /// Write the log as CSV to `writer`, removing what was written
    ///
    /// On a write error the claimed samples go back to the front of the log.
    ///
    /// # Returns
    /// Number of samples exported
    pub fn export_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let samples = std::mem::take(&mut *self.lock());

        if let Err(e) = write_csv(writer, &samples).and_then(|()| writer.flush()) {
            let mut log = self.lock();
            let newer = std::mem::replace(&mut *log, samples);
            log.extend(newer);
            return Err(e);
        }

        Ok(samples.len())
    }

    /// Export to a file, replacing any existing content
    pub fn export_to_file(&self, path: &Path) -> io::Result<usize> {
        let mut writer = BufWriter::new(File::create(path)?);
        let exported = self.export_to(&mut writer)?;
        info!("Saved {} RR intervals to {}", exported, path.display());
        Ok(exported)
    }
}

/// Render samples in the export format
///
/// Header line, one blank line, then `<value> , <HH:MM:SS.fff>` per sample.
pub fn write_csv<W: Write>(writer: &mut W, samples: &[RrSample]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    writeln!(writer)?;
    for sample in samples {
        writeln!(
            writer,
            "{} , {}",
            sample.interval_ms,
            format_clock_time(&sample.captured_at)
        )?;
    }
    Ok(())
}
