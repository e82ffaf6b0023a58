//! # Application State Management
//!
//! State shared by every request handler: the configuration, the one loaded
//! transcriber, the admission gate in front of it, and counters for the
//! health endpoint.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Every actix worker gets a clone of `AppState`; the clones share one model
//! - **Arc<dyn Transcriber>**: The state doesn't know (or care) whether the model is
//!   Whisper or a test fake, only that it implements the trait
//!
//! ### Semaphore
//! - **Purpose**: Bounds how many uploads may wait for or hold the model
//! - **try_acquire**: Never waits; a full gate turns into an immediate 503
//! - **Permit guard**: Dropping the permit (at the end of the handler) frees the slot
//!
//! ### RwLock
//! - **Purpose**: Counters are written by every request and read by `/health`

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::transcription::Transcriber;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Configuration as loaded at startup (read-only afterwards)
    pub config: Arc<AppConfig>,

    /// The model host
    pub transcriber: Arc<dyn Transcriber>,

    /// Admission gate in front of the transcriber
    admission: Arc<Semaphore>,

    /// Request and transcription counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// Transcriptions that returned text
    pub transcriptions_succeeded: u64,

    /// Transcriptions that failed after the upload was accepted
    pub transcriptions_failed: u64,

    /// Uploads turned away because the admission gate was full
    pub transcriptions_rejected: u64,

    /// Per-endpoint statistics, keyed like "POST /transcribe"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the state around an already-loaded transcriber.
    pub fn new(config: AppConfig, transcriber: Arc<dyn Transcriber>) -> Self {
        let permits = config.performance.max_pending_requests;
        Self {
            config: Arc::new(config),
            transcriber,
            admission: Arc::new(Semaphore::new(permits)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Take a slot in front of the model, or fail with `Busy`.
    ///
    /// The slot is held until the returned permit is dropped.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(_) => {
                self.with_metrics(|m| m.transcriptions_rejected += 1);
                Err(AppError::Busy)
            }
        }
    }

    /// Uploads currently admitted (waiting for or holding the model).
    pub fn pending_requests(&self) -> usize {
        self.config.performance.max_pending_requests - self.admission.available_permits()
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record the outcome of one admitted transcription.
    pub fn record_transcription(&self, succeeded: bool) {
        self.with_metrics(|m| {
            if succeeded {
                m.transcriptions_succeeded += 1;
            } else {
                m.transcriptions_failed += 1;
            }
        });
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// Get a snapshot of current metrics.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        match self.metrics.read() {
            Ok(metrics) => metrics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Counters are plain integers, so a poisoned lock still holds usable data.
    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = match self.metrics.write() {
            Ok(metrics) => metrics,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut metrics);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::testing::{FakeBehavior, FakeTranscriber};

    fn state_with_permits(permits: usize) -> AppState {
        let mut config = AppConfig::default();
        config.performance.max_pending_requests = permits;
        AppState::new(config, Arc::new(FakeTranscriber::new(FakeBehavior::Reply(String::new()))))
    }

    #[test]
    fn test_admission_is_bounded() {
        let state = state_with_permits(2);
        let first = state.try_admit().unwrap();
        let _second = state.try_admit().unwrap();
        assert_eq!(state.pending_requests(), 2);
        assert!(matches!(state.try_admit(), Err(AppError::Busy)));
        assert_eq!(state.get_metrics_snapshot().transcriptions_rejected, 1);

        drop(first);
        assert_eq!(state.pending_requests(), 1);
        assert!(state.try_admit().is_ok());
    }

    #[test]
    fn test_transcription_counters() {
        let state = state_with_permits(1);
        state.record_transcription(true);
        state.record_transcription(true);
        state.record_transcription(false);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.transcriptions_succeeded, 2);
        assert_eq!(metrics.transcriptions_failed, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state_with_permits(1);
        state.record_endpoint_request("POST /transcribe", 120, false);
        state.record_endpoint_request("POST /transcribe", 80, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["POST /transcribe"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.average_duration_ms(), 100.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }
}
