use anyhow::{Result, Context};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::crawler::task::Document;

/// What was already in the sink file when it was opened
#[derive(Debug, Clone, Default)]
pub struct SinkScan {
    /// Complete, parseable records
    pub records: u64,

    /// Fingerprints of those records
    pub fingerprints: Vec<String>,

    /// Bytes of a partial trailing line removed on open
    pub truncated_bytes: u64,

    /// Complete non-blank lines that are not records. They stay in the
    /// file but are excluded from `records`.
    pub unreadable_lines: u64,
}

#[derive(Deserialize)]
struct FingerprintOnly {
    fingerprint: String,
}

/// Append-only JSON-lines writer for accepted documents.
///
/// `append` returns only after the record has been handed to the OS
/// (and fsynced when `sync_writes` is set), so callers may count it.
pub struct OutputSink {
    path: PathBuf,
    file: File,
    sync_writes: bool,
    records: u64,
}

impl OutputSink {
    /// Open a sink for appending. With `fresh` the file is truncated,
    /// otherwise existing records are scanned and a torn last line is cut off.
    pub fn open(path: &Path, fresh: bool, sync_writes: bool) -> Result<(Self, SinkScan)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create output directory: {}", parent.display()))?;
            }
        }

        let scan = if fresh {
            File::create(path)
                .context(format!("Failed to truncate output file: {}", path.display()))?;
            SinkScan::default()
        } else {
            Self::scan(path)?
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Failed to open output file: {}", path.display()))?;

        info!("Output sink {} opened with {} existing records", path.display(), scan.records);

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                sync_writes,
                records: scan.records,
            },
            scan,
        ))
    }

    /// Read existing records and repair a partially written tail
    fn scan(path: &Path) -> Result<SinkScan> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SinkScan::default()),
            Err(e) => return Err(e).context(format!("Failed to read output file: {}", path.display())),
        };

        let mut reader = BufReader::new(file);
        let mut scan = SinkScan::default();
        let mut line = Vec::new();
        let mut complete_len: u64 = 0;
        let mut total_len: u64 = 0;

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)
                .context(format!("Failed to read output file: {}", path.display()))?;
            if read == 0 {
                break;
            }
            total_len += read as u64;

            if line.last() != Some(&b'\n') {
                // Torn write from a crash: not a record
                break;
            }
            complete_len = total_len;

            match serde_json::from_slice::<FingerprintOnly>(&line) {
                Ok(record) => {
                    scan.records += 1;
                    scan.fingerprints.push(record.fingerprint);
                }
                Err(e) => {
                    if line.iter().any(|b| !b.is_ascii_whitespace()) {
                        scan.unreadable_lines += 1;
                        error!("Unreadable line in {}: {}", path.display(), e);
                    }
                }
            }
        }

        if scan.unreadable_lines > 0 {
            error!(
                "{} lines in {} are not records; the document count covers the {} readable records only",
                scan.unreadable_lines,
                path.display(),
                scan.records
            );
        }

        if total_len > complete_len {
            scan.truncated_bytes = total_len - complete_len;
            warn!(
                "Output file {} ends with a partial record ({} bytes), truncating",
                path.display(),
                scan.truncated_bytes
            );

            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .context(format!("Failed to open output file for repair: {}", path.display()))?;
            file.set_len(complete_len)
                .context(format!("Failed to truncate output file: {}", path.display()))?;
        }

        Ok(scan)
    }

    /// Write one record and flush it before returning
    pub fn append(&mut self, doc: &Document) -> Result<()> {
        let mut line = serde_json::to_vec(doc)
            .context("Failed to serialize document")?;
        line.push(b'\n');

        self.file.write_all(&line)
            .context(format!("Failed to write to {}", self.path.display()))?;
        self.file.flush()
            .context(format!("Failed to flush {}", self.path.display()))?;

        if self.sync_writes {
            self.file.sync_data()
                .context(format!("Failed to sync {}", self.path.display()))?;
        }

        self.records += 1;
        debug!("Appended document {} from unit {}", doc.fingerprint, doc.parent_unit_id);

        Ok(())
    }

    /// Records durably written, including those found on open
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Count complete records in a sink file without opening it for writing
    pub fn count_records(path: &Path) -> Result<u64> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context(format!("Failed to read output file: {}", path.display())),
        };

        let mut count = 0;
        for line in BufReader::new(file).lines() {
            let line = line.context(format!("Failed to read output file: {}", path.display()))?;
            if serde_json::from_str::<FingerprintOnly>(&line).is_ok() {
                count += 1;
            }
        }

        Ok(count)
    }
}
