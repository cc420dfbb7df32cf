//! End-to-end tests for segment processing.

use sensor_window_engine::audit::{create_shared_stats, MemoryAuditHandle, MemoryAuditLog};
use sensor_window_engine::channels::{ChannelDescriptor, ChannelSamples, Samples, SensorSegment};
use sensor_window_engine::core::FeatureVector;
use sensor_window_engine::inference::{
    InferenceDispatcher, LinearModel, Model, ModelCache, ModelError, ModelLoader,
};
use sensor_window_engine::{KvStore, Pipeline, PipelineError, StaleWindowPolicy, Window, WindowManager};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ECG_ONLY: &[ChannelDescriptor] = &[ChannelDescriptor::scalar("ecg", 2)];

/// Scores each window by its mean, so predictions expose what was extracted.
struct MeanLoader {
    loads: Arc<AtomicUsize>,
}

impl ModelLoader for MeanLoader {
    fn load(&self, _user_id: &str) -> Result<Box<dyn Model>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LinearModel::new(
            [("ecg_mean".to_string(), 1.0)].into(),
            0.0,
        )))
    }
}

struct FailingLoader;

impl ModelLoader for FailingLoader {
    fn load(&self, user_id: &str) -> Result<Box<dyn Model>, ModelError> {
        Err(ModelError::NotFound {
            user_id: user_id.to_string(),
        })
    }
}

struct Harness {
    pipeline: Pipeline,
    audit: MemoryAuditHandle,
    loads: Arc<AtomicUsize>,
}

fn harness(store: KvStore<Window>, window_secs: u32, overlap_secs: u32) -> Harness {
    let loads = Arc::new(AtomicUsize::new(0));
    let dispatcher = InferenceDispatcher::new(
        Box::new(MeanLoader {
            loads: loads.clone(),
        }),
        ModelCache::new(None),
    );
    let audit = MemoryAuditLog::new();
    let handle = audit.handle();
    let manager = WindowManager::new(ECG_ONLY, window_secs, overlap_secs).unwrap();
    let pipeline = Pipeline::new(store, manager, dispatcher, Box::new(audit), create_shared_stats());
    Harness {
        pipeline,
        audit: handle,
        loads,
    }
}

fn segment(connection_id: &str, timestamp: i64, values: Vec<f64>) -> SensorSegment {
    let duration_ms = values.len() as u64 * 500;
    SensorSegment::new("user_1", connection_id, timestamp, duration_ms)
        .with_channel("ecg", ChannelSamples::scalar(2, values))
}

fn ecg(pipeline: &Pipeline) -> Vec<f64> {
    match pipeline
        .window("user_1")
        .unwrap()
        .and_then(|w| w.channel("ecg").map(|c| c.samples.clone()))
    {
        Some(Samples::Scalar(values)) => values,
        other => panic!("unexpected ecg samples: {other:?}"),
    }
}

fn temp_store_path() -> PathBuf {
    std::env::temp_dir()
        .join("sensor-window-pipeline-test")
        .join(format!("{}.db", uuid::Uuid::new_v4()))
}

#[test]
fn test_two_second_window_one_second_overlap() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 2, 1);

    let first = h
        .pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    assert!(first.merged());
    assert_eq!(first.results.len(), 1);
    assert!((first.results[0].prediction.score - 2.5).abs() < 1e-9);
    assert_eq!(first.evictions, 1);
    assert_eq!(ecg(&h.pipeline), vec![3.0, 4.0]);

    let second = h
        .pipeline
        .process_segment(&segment("c2", 2_000, vec![5.0, 6.0]))
        .unwrap();
    assert_eq!(second.results.len(), 1);
    let features = &second.results[0].features;
    assert!((features.channel("ecg").unwrap().mean - 4.5).abs() < 1e-9);
    assert_eq!(features.timestamp, 2_000);
    assert_eq!(ecg(&h.pipeline), vec![5.0, 6.0]);

    assert_eq!(h.audit.records().len(), 2);
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);

    let stats = h.pipeline.stats().snapshot();
    assert_eq!(stats.windows_extracted, 2);
    assert_eq!(stats.evictions, 2);
}

#[test]
fn test_not_ready_window_is_only_buffered() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 2, 1);
    let outcome = h
        .pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, 2.0, 3.0]))
        .unwrap();
    assert!(outcome.results.is_empty());
    assert_eq!(ecg(&h.pipeline), vec![1.0, 2.0, 3.0]);
    assert_eq!(h.loads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_nan_segment_twice_leaves_window_unchanged() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 2, 1);
    h.pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, 2.0]))
        .unwrap();
    let before = h.pipeline.window("user_1").unwrap();

    for (i, id) in ["bad1", "bad2"].iter().enumerate() {
        let outcome = h
            .pipeline
            .process_segment(&segment(id, 2_000 + i as i64, vec![3.0, f64::NAN]))
            .unwrap();
        assert!(!outcome.merged());
        assert!(outcome.results.is_empty());
    }

    assert_eq!(h.pipeline.window("user_1").unwrap(), before);
    assert_eq!(h.pipeline.stats().snapshot().segments_rejected, 2);
}

#[test]
fn test_infinite_reading_never_reaches_store() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 1, 1);
    let outcome = h
        .pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, f64::INFINITY]))
        .unwrap();
    assert!(!outcome.merged());

    let outcome = h
        .pipeline
        .process_segment(&segment("c2", 2_000, vec![2.0, 4.0]))
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!((outcome.results[0].prediction.score - 3.0).abs() < 1e-9);
    assert!(ecg(&h.pipeline).is_empty());
}

#[test]
fn test_full_overlap_evicts_whole_window() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 2, 2);
    let outcome = h
        .pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]))
        .unwrap();
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(ecg(&h.pipeline), vec![9.0]);
}

#[test]
fn test_stale_window_policy() {
    // Zero overlap never slides, so the window stays ready after processing.
    for (policy, expected) in [(StaleWindowPolicy::Rerun, 1), (StaleWindowPolicy::Skip, 0)] {
        let h = harness(KvStore::open_in_memory().unwrap(), 1, 0);
        let mut pipeline = h.pipeline.with_stale_policy(policy);

        let first = pipeline
            .process_segment(&segment("c1", 1_000, vec![1.0, 2.0]))
            .unwrap();
        assert_eq!(first.results.len(), 1);
        assert_eq!(first.evictions, 0);

        let stale = pipeline
            .process_segment(&segment("c2", 2_000, vec![f64::NAN]))
            .unwrap();
        assert!(!stale.merged());
        assert_eq!(stale.results.len(), expected, "policy {policy:?}");
    }
}

#[test]
fn test_out_of_order_segment_rejected() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 2, 1);
    h.pipeline
        .process_segment(&segment("c1", 5_000, vec![1.0]))
        .unwrap();
    let late = h
        .pipeline
        .process_segment(&segment("c0", 4_000, vec![2.0]))
        .unwrap();
    assert!(!late.merged());
    assert_eq!(ecg(&h.pipeline), vec![1.0]);
}

#[test]
fn test_model_failure_still_persists_merge() {
    let dispatcher = InferenceDispatcher::new(Box::new(FailingLoader), ModelCache::new(None));
    let audit = MemoryAuditLog::new();
    let records = audit.handle();
    let stats = create_shared_stats();
    let mut pipeline = Pipeline::new(
        KvStore::open_in_memory().unwrap(),
        WindowManager::new(ECG_ONLY, 2, 1).unwrap(),
        dispatcher,
        Box::new(audit),
        stats.clone(),
    );

    let result = pipeline.process_segment(&segment("c1", 1_000, vec![1.0, 2.0, 3.0, 4.0]));
    assert!(matches!(result, Err(PipelineError::Model { .. })));

    // merged but not evicted: the failure happened before the slide
    assert_eq!(ecg(&pipeline), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(records.records().is_empty());
    assert_eq!(stats.snapshot().model_failures, 1);
}

#[test]
fn test_window_survives_restart() {
    let path = temp_store_path();

    let mut h = harness(KvStore::open(&path).unwrap(), 2, 1);
    h.pipeline
        .process_segment(&segment("c1", 1_000, vec![1.0, 2.0, 3.0]))
        .unwrap();
    h.pipeline.shutdown().unwrap();

    let mut h = harness(KvStore::open(&path).unwrap(), 2, 1);
    assert_eq!(ecg(&h.pipeline), vec![1.0, 2.0, 3.0]);

    let outcome = h
        .pipeline
        .process_segment(&segment("c2", 2_000, vec![4.0]))
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!((outcome.results[0].prediction.score - 2.5).abs() < 1e-9);
    h.pipeline.shutdown().unwrap();
}

#[test]
fn test_feature_vector_excludes_identifiers() {
    let mut h = harness(KvStore::open_in_memory().unwrap(), 1, 1);
    let outcome = h
        .pipeline
        .process_segment(&segment("c1", 1_000, vec![2.0, 4.0]))
        .unwrap();
    let vector: FeatureVector = outcome.results[0].features.feature_vector();
    assert_eq!(vector.len(), 4);
    assert!(!vector.contains_key("user_id"));
    assert!((vector["ecg_std"] - 1.0).abs() < 1e-9);
}
