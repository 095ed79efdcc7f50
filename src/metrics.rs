//! Counters and timers
//!
//! Lightweight sink safe for unit tests and the backend-backed runtime:
//! in-memory aggregation always, write-through to backend hashes when a
//! backend is present.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::backend::KvBackend;

/// Metrics recorder shared by a service's handlers.
pub struct MetricsRecorder {
    backend: Option<Arc<dyn KvBackend>>,
    prefix: String,
    counters: Mutex<HashMap<String, i64>>,
    timers: Mutex<HashMap<String, Vec<f64>>>,
}

impl MetricsRecorder {
    pub fn new(backend: Option<Arc<dyn KvBackend>>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            counters: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, "audit:metrics")
    }

    fn counter_key(&self, name: &str) -> String {
        format!("{}:counter:{name}", self.prefix)
    }

    fn timer_key(&self, name: &str) -> String {
        format!("{}:timer:{name}", self.prefix)
    }

    /// Increment a counter by one.
    pub async fn inc(&self, name: &str) {
        self.inc_by(name, 1).await;
    }

    pub async fn inc_by(&self, name: &str, value: i64) {
        let key = self.counter_key(name);
        *self.counters.lock().await.entry(key.clone()).or_default() += value;
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.hash_incr(&key, "value", value).await {
                warn!("unable to write counter {name}: {e}");
            }
        }
    }

    /// Record one duration observation.
    pub async fn observe(&self, name: &str, duration: Duration) {
        let key = self.timer_key(name);
        let seconds = duration.as_secs_f64();
        self.timers
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .push(seconds);
        if let Some(backend) = &self.backend {
            let last = seconds.to_string();
            if let Err(e) = backend.hash_set(&key, &[("last", last.as_str())]).await {
                warn!("unable to write timer {name}: {e}");
            }
        }
    }

    /// Start a timer; call [`StartedTimer::stop`] to record it.
    pub fn timer(&self, name: &str) -> StartedTimer {
        StartedTimer {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Snapshot of all counters and the last timer observations.
    pub async fn snapshot(&self) -> HashMap<String, f64> {
        let mut data = HashMap::new();
        for (key, value) in self.counters.lock().await.iter() {
            data.insert(key.clone(), *value as f64);
        }
        for (key, samples) in self.timers.lock().await.iter() {
            if let Some(last) = samples.last() {
                data.insert(key.clone(), *last);
            }
        }
        data
    }
}

/// An in-flight timer measurement.
pub struct StartedTimer {
    name: String,
    started: Instant,
}

impl StartedTimer {
    pub async fn stop(self, recorder: &MetricsRecorder) {
        recorder.observe(&self.name, self.started.elapsed()).await;
    }
}
