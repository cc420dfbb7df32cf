//! Feature computation from ready windows.
//!
//! Each channel is summarized by mean, population standard deviation, max
//! and min over exactly one window's worth of leading samples. Vector
//! channels are reduced to per-sample Euclidean norms first.

use crate::channels::ChannelDescriptor;
use crate::core::windowing::Window;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Summary statistics for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFeatures {
    pub channel: String,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

/// All features extracted from one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub user_id: String,
    /// Timestamp of the segment that completed the window
    pub timestamp: i64,
    pub channels: Vec<ChannelFeatures>,
}

/// Named feature columns without identifier columns, in sorted order.
pub type FeatureVector = BTreeMap<String, f64>;

impl FeatureRecord {
    pub fn channel(&self, name: &str) -> Option<&ChannelFeatures> {
        self.channels.iter().find(|c| c.channel == name)
    }

    /// Flatten into `{channel}_{stat}` columns, the shape models consume.
    pub fn feature_vector(&self) -> FeatureVector {
        let mut vector = FeatureVector::new();
        for c in &self.channels {
            vector.insert(format!("{}_mean", c.channel), c.mean);
            vector.insert(format!("{}_std", c.channel), c.std);
            vector.insert(format!("{}_max", c.channel), c.max);
            vector.insert(format!("{}_min", c.channel), c.min);
        }
        vector
    }
}

/// Compute a feature record from the leading `window_size_secs` of `window`.
///
/// # Panics
///
/// Panics if any channel of `layout` has an empty window slice. Callers only
/// extract from windows that passed the readiness check, which rules this out.
pub fn extract_features(
    user_id: &str,
    timestamp: i64,
    window: &Window,
    layout: &[ChannelDescriptor],
    window_size_secs: u32,
) -> FeatureRecord {
    let channels = layout
        .iter()
        .map(|descriptor| {
            let values = window
                .channel(descriptor.name)
                .map(|c| c.samples.leading_magnitudes(c.samples_for(window_size_secs)))
                .unwrap_or_default();
            assert!(
                !values.is_empty(),
                "feature extraction on empty slice for channel {}",
                descriptor.name
            );
            summarize(descriptor.name, &values)
        })
        .collect();

    FeatureRecord {
        user_id: user_id.to_string(),
        timestamp,
        channels,
    }
}

fn summarize(channel: &str, values: &[f64]) -> ChannelFeatures {
    ChannelFeatures {
        channel: channel.to_string(),
        mean: Statistics::mean(values),
        std: Statistics::population_std_dev(values),
        max: Statistics::max(values),
        min: Statistics::min(values),
    }
}
