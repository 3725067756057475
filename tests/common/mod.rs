#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::{Arc, Mutex, Once};

static INIT_LOGGING: Once = Once::new();

/// Installs the tracing subscriber once per test binary. Verbosity is
/// controlled through `RUST_LOG`.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A shared append-only log for observing side-effect order.
pub type EffectLog = Arc<Mutex<Vec<&'static str>>>;

pub fn effect_log() -> EffectLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn push(log: &EffectLog, entry: &'static str) {
    log.lock().expect("lock poisoned").push(entry);
}

pub fn entries(log: &EffectLog) -> Vec<&'static str> {
    log.lock().expect("lock poisoned").clone()
}

/// Records its tag into the log when dropped.
pub struct DropProbe {
    log: EffectLog,
    tag: &'static str,
}

impl DropProbe {
    pub fn new(log: &EffectLog, tag: &'static str) -> Self {
        Self {
            log: log.clone(),
            tag,
        }
    }
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.log.lock().expect("lock poisoned").push(self.tag);
    }
}
