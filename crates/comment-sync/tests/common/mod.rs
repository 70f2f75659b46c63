//! Shared fixtures for the flow-level tests.
#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use comment_sync::{
    AnnotationStore, DeleteOutcome, DesiredAnnotation, ExistingAnnotation, Location,
    PermissionLevel, PermissionLookup, Result, Side, SyncError,
};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const BOT: &str = "github-actions[bot]";

/// Failure injected into a list, create, or delete call.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Throttled on every call
    Throttled,
    /// Throttled for the first `n` calls
    ThrottledTimes(u32),
    /// Connection failure for the first `n` calls
    TransportTimes(u32),
    /// Permanent server error
    Server,
    /// Target already gone, reported as an error
    NotFound,
}

impl Fault {
    fn error_on(self, hit: u32) -> Option<SyncError> {
        match self {
            Self::Throttled => Some(throttled()),
            Self::ThrottledTimes(n) => (hit <= n).then(throttled),
            Self::TransportTimes(n) => {
                (hit <= n).then(|| SyncError::Transport("connection reset".to_string()))
            }
            Self::Server => Some(SyncError::Api {
                status: 500,
                message: "internal error".to_string(),
            }),
            Self::NotFound => Some(SyncError::NotFound("comment".to_string())),
        }
    }
}

fn throttled() -> SyncError {
    SyncError::RateLimited {
        message: "secondary rate limit".to_string(),
        retry_after: None,
    }
}

struct Armed {
    fault: Fault,
    hits: u32,
}

fn trip<K: Hash + Eq>(faults: &Mutex<HashMap<K, Armed>>, key: &K) -> Option<SyncError> {
    let mut faults = faults.lock().unwrap();
    let armed = faults.get_mut(key)?;
    armed.hits += 1;
    armed.fault.error_on(armed.hits)
}

/// In-memory pull request with fault injection and an in-flight gauge.
pub struct MemoryStore {
    author: String,
    comments: Mutex<BTreeMap<u64, ExistingAnnotation>>,
    next_id: AtomicU64,
    list_fault: Mutex<Option<Fault>>,
    create_faults: Mutex<HashMap<u32, Armed>>,
    delete_faults: Mutex<HashMap<u64, Armed>>,
    permissions: Mutex<HashMap<String, PermissionLevel>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            author: BOT.to_string(),
            comments: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1000),
            list_fault: Mutex::new(None),
            create_faults: Mutex::new(HashMap::new()),
            delete_faults: Mutex::new(HashMap::new()),
            permissions: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation sleeps this long while counted as in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn seed(&self, location: Location, body: &str, author: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.comments
            .lock()
            .unwrap()
            .insert(id, ExistingAnnotation::new(id, location, body, author));
        id
    }

    pub fn fail_list(&self, fault: Fault) {
        *self.list_fault.lock().unwrap() = Some(fault);
    }

    pub fn fail_create(&self, line: u32, fault: Fault) {
        self.create_faults
            .lock()
            .unwrap()
            .insert(line, Armed { fault, hits: 0 });
    }

    pub fn fail_delete(&self, id: u64, fault: Fault) {
        self.delete_faults
            .lock()
            .unwrap()
            .insert(id, Armed { fault, hits: 0 });
    }

    pub fn grant(&self, user: &str, level: PermissionLevel) {
        self.permissions
            .lock()
            .unwrap()
            .insert(user.to_string(), level);
    }

    pub fn comments(&self) -> Vec<ExistingAnnotation> {
        self.comments.lock().unwrap().values().cloned().collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.comments.lock().unwrap().contains_key(&id)
    }

    /// Number of recorded calls for `op` (`list`, `create`, `update`, `delete`).
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn hold(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn list(&self) -> Result<Vec<ExistingAnnotation>> {
        self.record("list".to_string());
        let fault = *self.list_fault.lock().unwrap();
        if let Some(err) = fault.and_then(|fault| fault.error_on(1)) {
            return Err(err);
        }
        Ok(self.comments())
    }

    async fn create(&self, annotation: &DesiredAnnotation) -> Result<u64> {
        let line = annotation.location.line;
        self.record(format!("create {line}"));
        let _guard = self.hold().await;
        if let Some(err) = trip(&self.create_faults, &line) {
            return Err(err);
        }
        Ok(self.seed(annotation.location.clone(), &annotation.body, &self.author))
    }

    async fn update(&self, id: u64, body: &str) -> Result<u64> {
        self.record(format!("update {id}"));
        let _guard = self.hold().await;
        let mut comments = self.comments.lock().unwrap();
        match comments.get_mut(&id) {
            Some(existing) => {
                *existing = ExistingAnnotation::new(
                    id,
                    existing.location.clone(),
                    body,
                    existing.author.clone(),
                );
                Ok(id)
            }
            None => Err(SyncError::NotFound(format!("comment {id}"))),
        }
    }

    async fn delete(&self, id: u64) -> Result<DeleteOutcome> {
        self.record(format!("delete {id}"));
        let _guard = self.hold().await;
        if let Some(err) = trip(&self.delete_faults, &id) {
            return Err(err);
        }
        match self.comments.lock().unwrap().remove(&id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn check_quota(&self) -> Result<u64> {
        Ok(5000)
    }
}

#[async_trait]
impl PermissionLookup for MemoryStore {
    async fn permission_level(&self, user: &str) -> Result<PermissionLevel> {
        Ok(self
            .permissions
            .lock()
            .unwrap()
            .get(user)
            .copied()
            .unwrap_or(PermissionLevel::None))
    }
}

pub fn location(line: u32) -> Location {
    Location::new("src/main.rs", line, Side::Right)
}

pub fn marked_body(text: &str, key: &str) -> String {
    format!("{text}\n\n<!-- comment-sync:{key} -->")
}

/// Desired comment on `line` carrying marker `key`.
pub fn desired(line: u32, key: &str) -> DesiredAnnotation {
    DesiredAnnotation::new(location(line), marked_body(&format!("finding on line {line}"), key))
}

/// Desired comment without a marker, as used in append mode.
pub fn plain(line: u32, text: &str) -> DesiredAnnotation {
    DesiredAnnotation::new(location(line), text)
}
