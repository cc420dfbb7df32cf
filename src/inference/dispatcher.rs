//! Per-user model cache and prediction dispatch.

use crate::core::FeatureRecord;
use crate::inference::model::{Model, ModelError, ModelLoader, Prediction};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

/// Loaded models keyed by user, with optional least-recently-used eviction.
pub struct ModelCache {
    capacity: Option<NonZeroUsize>,
    models: HashMap<String, Box<dyn Model>>,
    /// Front is least recently used
    recency: VecDeque<String>,
}

impl ModelCache {
    /// `None` keeps every model loaded.
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            capacity,
            models: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.models.contains_key(user_id)
    }

    /// Return the cached model for `user_id`, loading it on first use.
    pub fn get_or_load(
        &mut self,
        user_id: &str,
        loader: &dyn ModelLoader,
    ) -> Result<&dyn Model, ModelError> {
        if self.models.contains_key(user_id) {
            self.touch(user_id);
        } else {
            let model = loader.load(user_id)?;
            self.insert(user_id.to_string(), model);
        }
        self.models
            .get(user_id)
            .map(|m| m.as_ref())
            .ok_or_else(|| ModelError::NotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Drop a user's model. Returns whether one was cached.
    pub fn evict(&mut self, user_id: &str) -> bool {
        self.recency.retain(|k| k != user_id);
        self.models.remove(user_id).is_some()
    }

    fn touch(&mut self, user_id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == user_id) {
            if let Some(key) = self.recency.remove(pos) {
                self.recency.push_back(key);
            }
        }
    }

    fn insert(&mut self, user_id: String, model: Box<dyn Model>) {
        if let Some(capacity) = self.capacity {
            while self.models.len() >= capacity.get() {
                let Some(oldest) = self.recency.pop_front() else {
                    break;
                };
                self.models.remove(&oldest);
                tracing::debug!(user_id = %oldest, "evicted model from cache");
            }
        }
        self.recency.push_back(user_id.clone());
        self.models.insert(user_id, model);
    }
}

/// Runs predictions on feature records, loading models lazily per user.
pub struct InferenceDispatcher {
    loader: Box<dyn ModelLoader>,
    cache: ModelCache,
}

impl InferenceDispatcher {
    pub fn new(loader: Box<dyn ModelLoader>, cache: ModelCache) -> Self {
        Self { loader, cache }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Predict on one record's identifier-free features and log the outcome.
    pub fn dispatch(&mut self, record: &FeatureRecord) -> Result<Prediction, ModelError> {
        let model = self
            .cache
            .get_or_load(&record.user_id, self.loader.as_ref())?;
        let prediction = model.predict(&record.feature_vector())?;

        tracing::info!(
            user_id = %record.user_id,
            timestamp = record.timestamp,
            label = prediction.label,
            score = prediction.score,
            "prediction"
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChannelFeatures, FeatureVector};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Constant(bool);

    impl Model for Constant {
        fn predict(&self, _features: &FeatureVector) -> Result<Prediction, ModelError> {
            Ok(Prediction {
                label: self.0,
                score: 0.0,
                explanation: Vec::new(),
            })
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, user_id: &str) -> Result<Box<dyn Model>, ModelError> {
            if user_id == "broken" {
                return Err(ModelError::NotFound {
                    user_id: user_id.to_string(),
                });
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Constant(true)))
        }
    }

    fn record(user_id: &str) -> FeatureRecord {
        FeatureRecord {
            user_id: user_id.to_string(),
            timestamp: 1,
            channels: vec![ChannelFeatures {
                channel: "ecg".into(),
                mean: 0.0,
                std: 0.0,
                max: 0.0,
                min: 0.0,
            }],
        }
    }

    #[test]
    fn test_model_loaded_once_per_user() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            loads: loads.clone(),
        };
        let mut dispatcher = InferenceDispatcher::new(Box::new(loader), ModelCache::new(None));

        assert!(dispatcher.dispatch(&record("u1")).unwrap().label);
        dispatcher.dispatch(&record("u1")).unwrap();
        dispatcher.dispatch(&record("u2")).unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.cache().len(), 2);
    }

    #[test]
    fn test_load_failure_propagates() {
        let loader = CountingLoader {
            loads: Arc::new(AtomicUsize::new(0)),
        };
        let mut dispatcher = InferenceDispatcher::new(Box::new(loader), ModelCache::new(None));
        assert!(dispatcher.dispatch(&record("broken")).is_err());
        assert!(dispatcher.cache().is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let loader = CountingLoader {
            loads: Arc::new(AtomicUsize::new(0)),
        };
        let mut cache = ModelCache::new(NonZeroUsize::new(2));
        cache.get_or_load("a", &loader).unwrap();
        cache.get_or_load("b", &loader).unwrap();
        cache.get_or_load("a", &loader).unwrap();
        cache.get_or_load("c", &loader).unwrap();

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);

        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
    }

    #[test]
    fn test_capacity_one_keeps_latest() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            loads: loads.clone(),
        };
        let mut cache = ModelCache::new(NonZeroUsize::new(1));
        cache.get_or_load("a", &loader).unwrap();
        cache.get_or_load("b", &loader).unwrap();
        cache.get_or_load("b", &loader).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
