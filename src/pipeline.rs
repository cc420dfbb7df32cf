//! Segment processing: the read-modify-write cycle for one user's window.
//!
//! For each arriving segment the pipeline loads the user's window, merges
//! the segment if it passes the sanity check, extracts features and predicts
//! for every full window while sliding by the overlap, then writes the window
//! back. Only one segment per user may be in flight at a time; the caller
//! owns that guarantee.

use crate::audit::{
    create_shared_stats_with_persistence, AuditRecord, AuditSink, JsonlAuditLog,
    SharedPipelineStats,
};
use crate::channels::{ChannelDescriptor, SensorSegment};
use crate::config::{Config, ConfigError, StaleWindowPolicy};
use crate::core::{extract_features, FeatureRecord, SegmentError, Window, WindowManager};
use crate::inference::{FileModelLoader, InferenceDispatcher, ModelCache, ModelError, Prediction};
use crate::store::{KvStore, StoreError};
use chrono::Utc;
use std::fmt;

/// One extracted window and the model's verdict on it.
#[derive(Debug, Clone)]
pub struct WindowResult {
    pub features: FeatureRecord,
    pub prediction: Prediction,
}

/// What happened to one segment.
#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub user_id: String,
    /// Why the segment was dropped, if it was
    pub rejection: Option<SegmentError>,
    pub results: Vec<WindowResult>,
    /// Number of overlap slides performed
    pub evictions: usize,
}

impl SegmentOutcome {
    pub fn merged(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Errors that abort processing of a segment.
#[derive(Debug)]
pub enum PipelineError {
    Store(StoreError),
    Model { user_id: String, source: ModelError },
    Config(ConfigError),
    Io(std::io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Store(e) => write!(f, "store error: {e}"),
            PipelineError::Model { user_id, source } => {
                write!(f, "inference failed for user {user_id}: {source}")
            }
            PipelineError::Config(e) => write!(f, "{e}"),
            PipelineError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Store(e) => Some(e),
            PipelineError::Model { source, .. } => Some(source),
            PipelineError::Config(e) => Some(e),
            PipelineError::Io(e) => Some(e),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

/// Single-worker segment processor.
pub struct Pipeline {
    store: KvStore<Window>,
    manager: WindowManager,
    dispatcher: InferenceDispatcher,
    audit: Box<dyn AuditSink>,
    stats: SharedPipelineStats,
    stale_policy: StaleWindowPolicy,
}

impl Pipeline {
    pub fn new(
        store: KvStore<Window>,
        manager: WindowManager,
        dispatcher: InferenceDispatcher,
        audit: Box<dyn AuditSink>,
        stats: SharedPipelineStats,
    ) -> Self {
        Self {
            store,
            manager,
            dispatcher,
            audit,
            stats,
            stale_policy: StaleWindowPolicy::default(),
        }
    }

    /// Build a pipeline from configuration: store file, model directory,
    /// audit log and stats file all come from `config`.
    pub fn from_config(
        config: &Config,
        layout: &'static [ChannelDescriptor],
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let manager = WindowManager::from_config(config, layout)?;
        let store = KvStore::open(&config.store_path)?;
        let dispatcher = InferenceDispatcher::new(
            Box::new(FileModelLoader::new(&config.models_dir)),
            ModelCache::new(config.model_cache_capacity),
        );
        let audit = JsonlAuditLog::open(&config.audit_path)?;
        let stats = create_shared_stats_with_persistence(config.data_path.join("stats.json"));

        Ok(Self::new(store, manager, dispatcher, Box::new(audit), stats)
            .with_stale_policy(config.stale_window_policy))
    }

    pub fn with_stale_policy(mut self, policy: StaleWindowPolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn store(&self) -> &KvStore<Window> {
        &self.store
    }

    pub fn stats(&self) -> &SharedPipelineStats {
        &self.stats
    }

    pub fn manager(&self) -> &WindowManager {
        &self.manager
    }

    /// Current persisted window for a user.
    pub fn window(&self, user_id: &str) -> Result<Option<Window>, PipelineError> {
        Ok(self.store.get(user_id)?)
    }

    /// Process one segment end to end.
    ///
    /// A model failure aborts the readiness loop, but whatever merge and
    /// eviction already happened is still persisted before the error is
    /// returned. No audit record is written for an aborted segment.
    pub fn process_segment(
        &mut self,
        segment: &SensorSegment,
    ) -> Result<SegmentOutcome, PipelineError> {
        let started = Utc::now().timestamp_millis();
        let user_id = segment.user_id.as_str();
        self.stats.record_received();

        let mut window = self
            .store
            .get(user_id)?
            .unwrap_or_else(|| self.manager.empty_window());

        let rejection = match self.manager.ingest(&mut window, segment) {
            Ok(()) => {
                self.stats.record_merged();
                None
            }
            Err(reason) => {
                tracing::warn!(
                    user_id,
                    timestamp = segment.timestamp,
                    connection_id = %segment.connection_id,
                    %reason,
                    "segment rejected"
                );
                self.stats.record_rejected();
                Some(reason)
            }
        };

        let mut outcome = SegmentOutcome {
            user_id: user_id.to_string(),
            rejection,
            results: Vec::new(),
            evictions: 0,
        };

        let run_loop = outcome.merged() || self.stale_policy == StaleWindowPolicy::Rerun;
        let loop_result = if run_loop {
            self.run_windows(&mut window, segment, &mut outcome)
        } else {
            Ok(())
        };

        if let Err(e) = self.store.set(user_id, &window) {
            if let Err(model_err) = &loop_result {
                tracing::error!(user_id, "{model_err}");
            }
            return Err(e.into());
        }
        loop_result?;

        let finished = Utc::now().timestamp_millis();
        tracing::info!(
            user_id,
            created_at = segment.timestamp,
            latency_ms = started - segment.timestamp,
            windows = outcome.results.len(),
            "segment processed"
        );

        let record = AuditRecord {
            connection_id: segment.connection_id.clone(),
            user_id: user_id.to_string(),
            segment_timestamp_ms: segment.timestamp,
            processing_start_ms: started,
            processing_end_ms: finished,
        };
        if let Err(e) = self.audit.record(&record) {
            tracing::warn!(user_id, connection_id = %segment.connection_id, "audit write failed: {e}");
        }

        Ok(outcome)
    }

    /// Extract, predict and slide while a full window is buffered.
    fn run_windows(
        &mut self,
        window: &mut Window,
        segment: &SensorSegment,
        outcome: &mut SegmentOutcome,
    ) -> Result<(), PipelineError> {
        while self.manager.is_ready(window) {
            let features = extract_features(
                &segment.user_id,
                segment.timestamp,
                window,
                self.manager.layout(),
                self.manager.window_size_secs(),
            );
            self.stats.record_window_extracted();

            let prediction = self.dispatcher.dispatch(&features).map_err(|source| {
                self.stats.record_model_failure();
                PipelineError::Model {
                    user_id: segment.user_id.clone(),
                    source,
                }
            })?;
            self.stats.record_prediction();
            outcome.results.push(WindowResult {
                features,
                prediction,
            });

            if !self.manager.can_slide(window) {
                break;
            }
            if self.manager.slide(window) == 0 {
                // zero overlap: sliding makes no progress
                break;
            }
            outcome.evictions += 1;
            self.stats.record_eviction();
        }
        Ok(())
    }

    /// Flush the audit log, save stats, and close the store.
    pub fn shutdown(mut self) -> Result<(), PipelineError> {
        if let Err(e) = self.audit.flush() {
            tracing::warn!("audit flush failed: {e}");
        }
        if let Err(e) = self.stats.save() {
            tracing::warn!("could not save pipeline stats: {e}");
        }
        self.store.close()?;
        tracing::info!("pipeline shut down");
        Ok(())
    }
}
