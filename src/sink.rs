//! ==============================================================================
//! sink.rs - durable storage for normalized messages
//! ==============================================================================
//!
//! purpose:
//!     keeps every ingested message beyond the in-memory window and answers
//!     the /api/db/* queries (recent messages, per-device info, totals).
//!
//! contract:
//!     - save is best-effort from the ingest path: callers log failures and
//!       carry on
//!     - every method is blocking; call from tokio::task::spawn_blocking
//!
//! implementations:
//!     - FileSink: json lines file + in-memory device aggregate
//!     - NullSink: storage disabled
//!
//! ==============================================================================

use crate::domain::NormalizedMessage;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const MESSAGES_FILE: &str = "sensor_messages.jsonl";

/// filter for `PersistenceSink::query`
#[derive(Debug, Clone, Default)]
pub struct SinkQuery {
    pub limit: usize,
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
}

impl SinkQuery {
    fn matches(&self, message: &NormalizedMessage) -> bool {
        let device_ok = self
            .device_id
            .as_deref()
            .map_or(true, |d| message.device_id == d);
        let sensor_ok = self
            .sensor_type
            .as_deref()
            .map_or(true, |s| message.sensor_types.iter().any(|t| t == s));
        device_ok && sensor_ok
    }
}

/// aggregate for one device across everything saved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_messages: u64,
    pub total_readings: u64,
    pub sensor_types: BTreeSet<String>,
    pub sessions: BTreeSet<String>,
}

impl DeviceInfo {
    fn first(message: &NormalizedMessage) -> Self {
        Self {
            device_id: message.device_id.clone(),
            first_seen: message.received_at,
            last_seen: message.received_at,
            total_messages: 0,
            total_readings: 0,
            sensor_types: BTreeSet::new(),
            sessions: BTreeSet::new(),
        }
    }

    fn record(&mut self, message: &NormalizedMessage) {
        self.first_seen = self.first_seen.min(message.received_at);
        self.last_seen = self.last_seen.max(message.received_at);
        self.total_messages += 1;
        self.total_readings += message.total_readings as u64;
        self.sensor_types.extend(message.sensor_types.iter().cloned());
        self.sessions.insert(message.session_id.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkStats {
    pub total_messages: u64,
    pub total_readings: u64,
    pub device_count: usize,
    pub sensor_type_count: usize,
    pub sensor_types: Vec<String>,
    pub latest_received_at: Option<DateTime<Utc>>,
}

pub trait PersistenceSink: Send + Sync {
    fn save(&self, message: &NormalizedMessage) -> Result<()>;

    /// newest first, at most `query.limit`
    fn query(&self, query: &SinkQuery) -> Result<Vec<NormalizedMessage>>;

    /// most recently seen first
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn stats(&self) -> Result<SinkStats>;
}

// ==============================================================================
// null sink
// ==============================================================================

pub struct NullSink;

impl PersistenceSink for NullSink {
    fn save(&self, _message: &NormalizedMessage) -> Result<()> {
        Ok(())
    }

    fn query(&self, _query: &SinkQuery) -> Result<Vec<NormalizedMessage>> {
        Ok(Vec::new())
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }

    fn stats(&self) -> Result<SinkStats> {
        Ok(SinkStats::default())
    }
}

// ==============================================================================
// file sink
// ==============================================================================

#[derive(Default)]
struct Aggregate {
    devices: HashMap<String, DeviceInfo>,
    total_messages: u64,
    total_readings: u64,
    latest_received_at: Option<DateTime<Utc>>,
}

impl Aggregate {
    fn record(&mut self, message: &NormalizedMessage) {
        self.devices
            .entry(message.device_id.clone())
            .or_insert_with(|| DeviceInfo::first(message))
            .record(message);
        self.total_messages += 1;
        self.total_readings += message.total_readings as u64;
        self.latest_received_at = self.latest_received_at.max(Some(message.received_at));
    }
}

/// appends messages as json lines under `data_dir`
pub struct FileSink {
    path: PathBuf,
    // also serializes appends to the file
    aggregate: Mutex<Aggregate>,
}

impl FileSink {
    /// open (or create) the store under `data_dir`, rebuilding device totals
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;

        let path = dir.join(MESSAGES_FILE);
        let mut aggregate = Aggregate::default();
        scan_messages(&path, None, |message| aggregate.record(&message))?;

        info!(
            path = %path.display(),
            messages = aggregate.total_messages,
            devices = aggregate.devices.len(),
            "file sink opened"
        );

        Ok(Self {
            path,
            aggregate: Mutex::new(aggregate),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Aggregate> {
        self.aggregate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// stream stored messages in file order, stopping after `len` bytes when
/// given. lines that do not decode are skipped with a warning.
fn scan_messages<F>(path: &Path, len: Option<u64>, mut visit: F) -> Result<()>
where
    F: FnMut(NormalizedMessage),
{
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file.take(len.unwrap_or(u64::MAX)));

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(message) => visit(message),
            Err(e) => warn!(line = index + 1, error = %e, "skipping unreadable stored message"),
        }
    }
    Ok(())
}

/// keeps the newest `limit` matching messages seen so far.
///
/// the file is in append order, which is received order up to concurrent
/// saves, so the tail is re-sorted by `received_at` at the end.
struct NewestMatches<'q> {
    query: &'q SinkQuery,
    tail: VecDeque<NormalizedMessage>,
}

impl<'q> NewestMatches<'q> {
    fn new(query: &'q SinkQuery) -> Self {
        Self { query, tail: VecDeque::with_capacity(query.limit.min(1024)) }
    }

    fn offer(&mut self, message: NormalizedMessage) {
        if self.query.limit == 0 || !self.query.matches(&message) {
            return;
        }
        if self.tail.len() == self.query.limit {
            self.tail.pop_front();
        }
        self.tail.push_back(message);
    }

    /// newest first
    fn finish(self) -> Vec<NormalizedMessage> {
        let mut found: Vec<_> = self.tail.into();
        // stable sort keeps file order among equal timestamps; reverse after
        found.sort_by_key(|m| m.received_at);
        found.reverse();
        found
    }
}

impl PersistenceSink for FileSink {
    fn save(&self, message: &NormalizedMessage) -> Result<()> {
        let mut line = serde_json::to_string(message).context("failed to encode message")?;
        line.push('\n');

        let mut aggregate = self.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        aggregate.record(message);

        debug!(
            device_id = %message.device_id,
            message_id = message.message_id,
            readings = message.total_readings,
            "message persisted"
        );
        Ok(())
    }

    fn query(&self, query: &SinkQuery) -> Result<Vec<NormalizedMessage>> {
        // saves append whole lines under the lock, so the length taken here
        // ends on a line boundary and the scan below can run unlocked
        let len = {
            let _guard = self.lock();
            match fs::metadata(&self.path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to stat {}", self.path.display()))
                }
            }
        };

        let mut newest = NewestMatches::new(query);
        scan_messages(&self.path, Some(len), |message| newest.offer(message))?;
        Ok(newest.finish())
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices: Vec<_> = self.lock().devices.values().cloned().collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }

    fn stats(&self) -> Result<SinkStats> {
        let aggregate = self.lock();
        let sensor_types: BTreeSet<&String> = aggregate
            .devices
            .values()
            .flat_map(|d| d.sensor_types.iter())
            .collect();

        Ok(SinkStats {
            total_messages: aggregate.total_messages,
            total_readings: aggregate.total_readings,
            device_count: aggregate.devices.len(),
            sensor_type_count: sensor_types.len(),
            sensor_types: sensor_types.into_iter().cloned().collect(),
            latest_received_at: aggregate.latest_received_at,
        })
    }
}
