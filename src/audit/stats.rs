//! Pipeline processing statistics.
//!
//! Counters are updated from the worker and may be read from anywhere, so
//! they live behind atomics in a shared handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for the current worker.
#[derive(Debug)]
pub struct PipelineStats {
    /// Segments handed to the pipeline
    segments_received: AtomicU64,
    /// Segments merged into a window
    segments_merged: AtomicU64,
    /// Segments dropped by the sanity or ordering check
    segments_rejected: AtomicU64,
    /// Feature records extracted
    windows_extracted: AtomicU64,
    /// Successful predictions
    predictions: AtomicU64,
    /// Overlap evictions performed
    evictions: AtomicU64,
    /// Model load or predict failures
    model_failures: AtomicU64,
    /// Worker start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            segments_received: AtomicU64::new(0),
            segments_merged: AtomicU64::new(0),
            segments_rejected: AtomicU64::new(0),
            windows_extracted: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            model_failures: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that accumulate across runs in the file at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous pipeline stats: {e}");
        }

        stats
    }

    pub fn record_received(&self) {
        self.segments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merged(&self) {
        self.segments_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.segments_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_extracted(&self) {
        self.windows_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_failure(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments_received: self.segments_received.load(Ordering::Relaxed),
            segments_merged: self.segments_merged.load(Ordering::Relaxed),
            segments_rejected: self.segments_rejected.load(Ordering::Relaxed),
            windows_extracted: self.windows_extracted.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            model_failures: self.model_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Segments received: {}\n\
             - Segments merged: {}\n\
             - Segments rejected: {}\n\
             - Windows extracted: {}\n\
             - Predictions: {}\n\
             - Evictions: {}\n\
             - Model failures: {}\n\
             - Uptime: {} seconds",
            stats.segments_received,
            stats.segments_merged,
            stats.segments_rejected,
            stats.windows_extracted,
            stats.predictions,
            stats.evictions,
            stats.model_failures,
            stats.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                segments_received: stats.segments_received,
                segments_merged: stats.segments_merged,
                segments_rejected: stats.segments_rejected,
                windows_extracted: stats.windows_extracted,
                predictions: stats.predictions,
                evictions: stats.evictions,
                model_failures: stats.model_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.segments_received
                    .store(persisted.segments_received, Ordering::Relaxed);
                self.segments_merged
                    .store(persisted.segments_merged, Ordering::Relaxed);
                self.segments_rejected
                    .store(persisted.segments_rejected, Ordering::Relaxed);
                self.windows_extracted
                    .store(persisted.windows_extracted, Ordering::Relaxed);
                self.predictions
                    .store(persisted.predictions, Ordering::Relaxed);
                self.evictions.store(persisted.evictions, Ordering::Relaxed);
                self.model_failures
                    .store(persisted.model_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub segments_received: u64,
    pub segments_merged: u64,
    pub segments_rejected: u64,
    pub windows_extracted: u64,
    pub predictions: u64,
    pub evictions: u64,
    pub model_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    segments_received: u64,
    segments_merged: u64,
    segments_rejected: u64,
    windows_extracted: u64,
    predictions: u64,
    evictions: u64,
    model_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats handle.
pub type SharedPipelineStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedPipelineStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedPipelineStats {
    Arc::new(PipelineStats::with_persistence(path))
}
