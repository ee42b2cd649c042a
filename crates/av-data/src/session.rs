//! Session identifiers.
//!
//! Session directories are named by an injected provider so tests get
//! deterministic paths without depending on the wall clock.

use chrono::Local;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub trait SessionIdProvider: Send + Sync {
    fn next_id(&self) -> String;
}

/// Local wall-clock timestamp, second resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampIds;

impl SessionIdProvider for TimestampIds {
    fn next_id(&self) -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Always the same id. Collisions are resolved by the recorder.
#[derive(Debug, Clone)]
pub struct FixedId(pub String);

impl SessionIdProvider for FixedId {
    fn next_id(&self) -> String {
        self.0.clone()
    }
}

/// `<prefix>-0001`, `<prefix>-0002`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    counter: AtomicUsize,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicUsize::new(0),
        }
    }
}

impl SessionIdProvider for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:04}", self.prefix, n)
    }
}
