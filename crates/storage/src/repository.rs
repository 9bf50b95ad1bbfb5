//! Repository Implementation

use crate::alert::{Alert, DedupKey};
use crate::StorageError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Alert read back from a store, with the version to condition writes on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAlert {
    pub alert: Alert,
    pub version: u64,
}

/// Keyed store of the live alert for each dedup key
///
/// Writes are conditional: `expected_version` must match the version last
/// read for the key, and `None` means the key must not exist yet. A lost
/// race returns [`StorageError::ConditionFailed`].
///
/// Calls may block on I/O; async callers run them on a blocking pool.
pub trait AlertStore: Send + Sync {
    /// Current live alert for a key
    fn get(&self, key: &DedupKey) -> Result<Option<StoredAlert>, StorageError>;

    /// Conditionally write the live alert for `key`, returning the new version
    fn put(
        &self,
        key: &DedupKey,
        alert: &Alert,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError>;
}

struct Slot {
    id: String,
    version: u64,
    encoded: Vec<u8>,
}

/// Closed-window alerts, oldest first
#[derive(Default)]
struct Archive {
    alerts: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

/// In-memory alert store
///
/// Alerts are kept postcard-encoded, so every read hands out an
/// independent copy the way a remote store would. Live alerts are kept
/// for as long as their key is live; alerts superseded by a new window are
/// archived up to `max_closed_alerts` (default 10,000), oldest evicted first.
pub struct MemoryStore {
    /// Live alert per dedup key
    live: Mutex<HashMap<DedupKey, Slot>>,
    /// Last snapshot of alerts whose window has closed
    closed: Mutex<Archive>,
    /// Max closed alerts retained
    max_closed_alerts: usize,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    /// Create a store retaining at most `max_closed_alerts` closed alerts
    pub fn with_retention(max_closed_alerts: usize) -> Self {
        info!(max_closed_alerts, "Creating in-memory alert store");
        Self {
            live: Mutex::new(HashMap::with_capacity(1024)),
            closed: Mutex::new(Archive::default()),
            max_closed_alerts,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("Alert store marked unavailable");
        }
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fetch a live or retained closed alert by id
    pub fn get_by_id(&self, id: &str) -> Result<Option<Alert>, StorageError> {
        self.check_available()?;
        let live = self.live.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;
        if let Some(slot) = live.values().find(|slot| slot.id == id) {
            return decode(&slot.encoded).map(Some);
        }

        let closed = self.closed.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;
        closed.alerts.get(id).map(|bytes| decode(bytes)).transpose()
    }

    /// All live alerts
    pub fn snapshot(&self) -> Result<Vec<Alert>, StorageError> {
        self.check_available()?;
        let live = self.live.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;

        live.values().map(|slot| decode(&slot.encoded)).collect()
    }

    /// Number of live alerts
    pub fn len(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retained closed alerts
    pub fn closed_count(&self) -> usize {
        self.closed.lock().map(|c| c.alerts.len()).unwrap_or(0)
    }

    /// Live plus retained closed alerts
    pub fn total_alerts(&self) -> usize {
        self.len() + self.closed_count()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut live) = self.live.lock() {
            live.clear();
        }
        if let Ok(mut closed) = self.closed.lock() {
            closed.alerts.clear();
            closed.order.clear();
        }
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("store offline".to_string()))
        }
    }

    /// Move a superseded alert into the archive, enforcing retention
    fn archive(&self, id: String, encoded: Vec<u8>) -> Result<(), StorageError> {
        let mut closed = self.closed.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;

        if closed.alerts.insert(id.clone(), encoded).is_none() {
            closed.order.push_back(id);
        }
        while closed.alerts.len() > self.max_closed_alerts {
            match closed.order.pop_front() {
                Some(oldest) => {
                    closed.alerts.remove(&oldest);
                    debug!(id = %oldest, "Evicted closed alert");
                }
                None => break,
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore for MemoryStore {
    fn get(&self, key: &DedupKey) -> Result<Option<StoredAlert>, StorageError> {
        self.check_available()?;
        let live = self.live.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;

        live.get(key)
            .map(|slot| -> Result<StoredAlert, StorageError> {
                Ok(StoredAlert {
                    alert: decode(&slot.encoded)?,
                    version: slot.version,
                })
            })
            .transpose()
    }

    fn put(
        &self,
        key: &DedupKey,
        alert: &Alert,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        self.check_available()?;
        let encoded = postcard::to_allocvec(alert)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let mut live = self.live.lock().map_err(|e| {
            StorageError::Unavailable(format!("Lock error: {}", e))
        })?;

        let found = live.get(key).map(|slot| slot.version);
        if found != expected_version {
            debug!(%key, ?expected_version, ?found, "Conditional write rejected");
            return Err(StorageError::ConditionFailed {
                key: key.to_string(),
                expected: expected_version,
                found,
            });
        }

        let version = found.map_or(1, |v| v + 1);
        let previous = live.insert(
            key.clone(),
            Slot {
                id: alert.id.clone(),
                version,
                encoded,
            },
        );

        // Archived under the live lock so a closed alert is always findable by id
        if let Some(previous) = previous.filter(|slot| slot.id != alert.id) {
            self.archive(previous.id, previous.encoded)?;
        }

        debug!(%key, id = %alert.id, version, "Stored alert");
        Ok(version)
    }
}

fn decode(bytes: &[u8]) -> Result<Alert, StorageError> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
}
