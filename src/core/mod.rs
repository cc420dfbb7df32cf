//! Core windowing and feature extraction.
//!
//! This module contains:
//! - Per-user window buffers and the sliding-window state machine
//! - Feature computation from ready windows

pub mod features;
pub mod windowing;

// Re-export commonly used types
pub use features::{extract_features, ChannelFeatures, FeatureRecord, FeatureVector};
pub use windowing::{Channel, SegmentError, Window, WindowManager};
