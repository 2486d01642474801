//! ==============================================================================
//! archive.rs - raw request body archive
//! ==============================================================================
//!
//! purpose:
//!     keeps every accepted ingest body byte for byte, one file per message,
//!     so a batch can be replayed or inspected after the normalized form has
//!     been trimmed out of memory.
//!
//! layout:
//!     <data_dir>/raw/sensor_messages_<YYYYmmdd_HHMMSS_mmm>_<seq>.json
//!
//!     the timestamp is the message's received_at. seq is a per-process
//!     counter so two bodies in the same millisecond never collide.
//!
//! relationships:
//!     - used by: web.rs (detached after the ingest response)
//!     - enabled by: storage.archive_raw
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RawArchive {
    dir: PathBuf,
    seq: AtomicU64,
}

impl RawArchive {
    /// the directory is created on first save
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into(), seq: AtomicU64::new(0) }
    }

    /// blocking; returns the written file
    pub fn save(&self, body: &[u8], received_at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create archive dir {}", self.dir.display()))?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "sensor_messages_{}_{:06}.json",
            received_at.format("%Y%m%d_%H%M%S_%3f"),
            seq
        );
        let path = self.dir.join(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(body)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_save_keeps_body_verbatim() {
        let dir = std::env::temp_dir().join(format!("sensor-hub-archive-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let archive = RawArchive::new(&dir);
        let at = Utc.timestamp_opt(1_751_729_987, 437_000_000).unwrap();

        let first = archive.save(br#"{"messageId":1}"#, at).unwrap();
        let second = archive.save(br#"{"messageId":2}"#, at).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            first.file_name().and_then(|n| n.to_str()),
            Some("sensor_messages_20250705_153947_437_000000.json")
        );
        assert_eq!(fs::read(&first).unwrap(), br#"{"messageId":1}"#);
        assert_eq!(fs::read(&second).unwrap(), br#"{"messageId":2}"#);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
