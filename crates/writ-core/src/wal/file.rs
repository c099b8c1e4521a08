//! Durable NDJSON WAL backend.
//!
//! One canonical JSON object per line. Appends are flushed and fsynced
//! before the gate operation is acknowledged unless async durability is
//! configured. Reads stream the file and skip malformed lines with a
//! warning rather than aborting the scan.

use super::{Wal, WalError, WalEvent, WalFilter};
use crate::context::sha256_hex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Optional mirror of every appended event to an external sink (SIEM
/// ingestion). Mirror failures are logged, never propagated: a slow or
/// broken mirror must not take the gate down.
struct Mirror {
    file: Mutex<File>,
    redact: bool,
}

pub struct FileWal {
    path: PathBuf,
    file: Mutex<File>,
    seq: AtomicU64,
    sync: bool,
    mirror: Option<Mirror>,
}

impl FileWal {
    /// Open (or create) the journal at `path`. Existing events are scanned
    /// once to recover the sequence counter.
    pub fn open(path: &Path, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WalError::Append(format!("open {}: {e}", path.display())))?;
        let last_seq = scan_last_seq(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            seq: AtomicU64::new(last_seq),
            sync,
            mirror: None,
        })
    }

    pub fn with_mirror(mut self, path: &Path, redact: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WalError::Append(format!("open mirror {}: {e}", path.display())))?;
        self.mirror = Some(Mirror {
            file: Mutex::new(file),
            redact,
        });
        Ok(self)
    }

    fn mirror_event(&self, event: &WalEvent) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let emitted = if mirror.redact {
            redact(event.clone())
        } else {
            event.clone()
        };
        let line = match emitted.to_canonical_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "audit mirror serialization failed");
                return;
            }
        };
        let mut file = mirror.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(error = %e, "audit mirror write failed");
        }
    }
}

/// Replace caller identities with digests before emission to an external
/// sink.
fn redact(mut event: WalEvent) -> WalEvent {
    event.session_key = format!("sha256:{}", sha256_hex(&event.session_key));
    if let Some(tenant) = event.tenant_id.take() {
        event.tenant_id = Some(format!("sha256:{}", sha256_hex(&tenant)));
    }
    event
}

fn scan_last_seq(path: &Path) -> Result<u64, WalError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(WalError::Read(format!("open {}: {e}", path.display()))),
    };
    let mut last = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| WalError::Read(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEvent>(&line) {
            Ok(event) => last = last.max(event.seq),
            Err(_) => continue,
        }
    }
    Ok(last)
}

impl Wal for FileWal {
    fn append(&self, mut event: WalEvent) -> Result<WalEvent, WalError> {
        {
            // Seq assignment and the write share the lock so on-disk order
            // matches seq order.
            let mut file = self.file.lock().unwrap();
            event.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let line = event.to_canonical_line()?;
            writeln!(file, "{line}").map_err(|e| WalError::Append(e.to_string()))?;
            file.flush().map_err(|e| WalError::Append(e.to_string()))?;
            if self.sync {
                file.sync_data().map_err(|e| WalError::Append(e.to_string()))?;
            }
        }
        self.mirror_event(&event);
        Ok(event)
    }

    fn query(&self, filter: &WalFilter) -> Result<Vec<WalEvent>, WalError> {
        let file = File::open(&self.path)
            .map_err(|e| WalError::Read(format!("open {}: {e}", self.path.display())))?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut events = Vec::new();
        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            if events.len() >= limit {
                break;
            }
            let line = line.map_err(|e| WalError::Read(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEvent>(&line) {
                Ok(event) => {
                    if filter.matches(&event) {
                        events.push(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(line = line_number + 1, error = %e, "skipping malformed wal line");
                }
            }
        }
        Ok(events)
    }

    fn durable(&self) -> bool {
        true
    }
}
