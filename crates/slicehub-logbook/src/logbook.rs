//! The logbook: append-only ADIF file plus the in-memory worked-index.
//!
//! The logbook exclusively owns the ADIF file handle and the worked-index.
//! Writes are synchronous and flushed; a disk failure surfaces as an error
//! to the caller, but the worked-index still updates so duplicate
//! detection keeps working for the rest of the session.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use slicehub_core::types::{QsoRecord, StationProfile};
use slicehub_core::{Error, Result};

use crate::adif;

/// Default logbook location under the per-user data directory.
pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slicehub")
        .join("logbook.adi")
}

/// Append-only ADIF logbook with duplicate index.
pub struct Logbook {
    path: PathBuf,
    station: StationProfile,
    worked: HashMap<String, DateTime<Utc>>,
}

impl Logbook {
    /// Open (or create) the logbook at `path` and build the worked-index
    /// from its records.
    ///
    /// A file that cannot be read as text at all is backed up with a
    /// timestamped suffix and replaced by a fresh log; individually
    /// malformed records are skipped.
    pub fn open(path: impl Into<PathBuf>, station: StationProfile) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Logbook(format!("cannot create log directory: {e}")))?;
        }

        let mut book = Logbook {
            path,
            station,
            worked: HashMap::new(),
        };

        if book.path.exists() {
            match fs::read(&book.path) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(content) => book.scan(&content),
                    Err(_) => {
                        tracing::error!(path = %book.path.display(), "logbook unreadable, backing up");
                        book.backup()?;
                        book.init_file()?;
                    }
                },
                Err(e) => {
                    return Err(Error::Logbook(format!("cannot read logbook: {e}")));
                }
            }
        } else {
            book.init_file()?;
        }

        tracing::info!(
            path = %book.path.display(),
            worked = book.worked.len(),
            "logbook ready"
        );
        Ok(book)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct (call, band, mode) keys in the index.
    pub fn worked_count(&self) -> usize {
        self.worked.len()
    }

    fn scan(&mut self, content: &str) {
        for record in adif::parse_records(content) {
            let (Some(call), Some(band), Some(mode)) = (
                record.get("CALL"),
                record.get("BAND"),
                record.get("MODE"),
            ) else {
                continue;
            };
            let Some(ts) = adif::record_timestamp(&record) else {
                tracing::debug!(call = %call, "skipping record without usable timestamp");
                continue;
            };
            self.worked.insert(adif::worked_key(call, band, mode), ts);
        }
    }

    fn init_file(&self) -> Result<()> {
        let mut f = File::create(&self.path)
            .map_err(|e| Error::Logbook(format!("cannot create logbook: {e}")))?;
        f.write_all(adif::file_header().as_bytes())
            .map_err(|e| Error::Logbook(format!("cannot write logbook header: {e}")))?;
        f.sync_data()
            .map_err(|e| Error::Logbook(format!("cannot flush logbook: {e}")))?;
        Ok(())
    }

    /// Move the current file aside with a timestamped suffix.
    fn backup(&self) -> Result<()> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let backup = self.path.with_extension(format!("adi.bak-{stamp}"));
        fs::rename(&self.path, &backup)
            .map_err(|e| Error::Logbook(format!("cannot back up logbook: {e}")))?;
        tracing::warn!(backup = %backup.display(), "logbook backed up");
        Ok(())
    }

    /// Append one QSO and update the worked-index.
    ///
    /// The index is updated even when the disk write fails, so in-session
    /// duplicate detection survives disk trouble.
    pub fn log_qso(&mut self, qso: &QsoRecord) -> Result<()> {
        self.worked
            .insert(adif::worked_key(&qso.callsign, &qso.band, &qso.mode), qso.end);

        let line = adif::format_record(qso, &self.station);
        let write = || -> std::io::Result<()> {
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            if f.metadata()?.len() == 0 {
                f.write_all(adif::file_header().as_bytes())?;
            }
            f.write_all(line.as_bytes())?;
            f.sync_data()
        };
        write().map_err(|e| {
            tracing::error!(
                call = %qso.callsign,
                path = %self.path.display(),
                error = %e,
                "failed to persist QSO"
            );
            Error::Logbook(format!("failed to persist QSO for {}: {e}", qso.callsign))
        })
    }

    /// Whether (call, band, mode) is in the worked-index.
    pub fn is_worked(&self, call: &str, band: &str, mode: &str) -> bool {
        self.worked.contains_key(&adif::worked_key(call, band, mode))
    }

    /// Whether the call was worked on a band in any mode.
    pub fn is_worked_on_band(&self, call: &str, band: &str) -> bool {
        let prefix = format!("{}:{}:", call.to_uppercase(), band.to_lowercase());
        self.worked.keys().any(|k| k.starts_with(&prefix))
    }

    /// Whether the call was worked at all.
    pub fn is_worked_anywhere(&self, call: &str) -> bool {
        let prefix = format!("{}:", call.to_uppercase());
        self.worked.keys().any(|k| k.starts_with(&prefix))
    }

    /// Last-contact time for (call, band, mode), if worked.
    pub fn worked_at(&self, call: &str, band: &str, mode: &str) -> Option<DateTime<Utc>> {
        self.worked.get(&adif::worked_key(call, band, mode)).copied()
    }

    /// Back up the current file and start a fresh, empty log.
    pub fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            self.backup()?;
        }
        self.init_file()?;
        self.worked.clear();
        Ok(())
    }

    /// Copy the current log to `dest`.
    pub fn export_to_file(&self, dest: impl AsRef<Path>) -> Result<()> {
        fs::copy(&self.path, dest.as_ref())
            .map_err(|e| Error::Logbook(format!("export failed: {e}")))?;
        Ok(())
    }

    /// Scan an external ADIF file and merge keys not yet in the index.
    /// Returns how many new keys were added.
    pub fn import_from_file(&mut self, src: impl AsRef<Path>) -> Result<usize> {
        let content = fs::read_to_string(src.as_ref())
            .map_err(|e| Error::Logbook(format!("import failed: {e}")))?;
        let mut added = 0;
        for record in adif::parse_records(&content) {
            let (Some(call), Some(band), Some(mode)) = (
                record.get("CALL"),
                record.get("BAND"),
                record.get("MODE"),
            ) else {
                continue;
            };
            let key = adif::worked_key(call, band, mode);
            if self.worked.contains_key(&key) {
                continue;
            }
            let Some(ts) = adif::record_timestamp(&record) else {
                continue;
            };
            self.worked.insert(key, ts);
            added += 1;
        }
        tracing::info!(added = added, "imported external log");
        Ok(added)
    }
}
