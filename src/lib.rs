//! Sensor Window Engine - per-user sliding-window feature extraction.
//!
//! This library accumulates multi-channel sensor segments into a durable
//! per-user buffer, extracts statistical features whenever a full window is
//! buffered, hands them to a per-user model, and slides the window forward by
//! a fixed overlap.
//!
//! # Guarantees
//!
//! - **Whole-segment merge**: a segment with any NaN or infinite reading is
//!   dropped entirely, never partially applied
//! - **Aligned channels**: a window step happens only when every channel
//!   holds enough samples, so the slowest channel sets the pace
//! - **Durable state**: the window is written back to the store after every
//!   segment, even when inference fails part-way
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Sensor Window Engine                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Segments   │──▶│  Windowing  │──▶│  Features   │        │
//! │  │ (transport) │   │(merge/slide)│   │ (mean/std…) │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                       │     ▲                │               │
//! │                       ▼     │                ▼               │
//! │                 ┌─────────────┐      ┌─────────────┐        │
//! │                 │  KV Store   │      │  Inference  │        │
//! │                 │  (SQLite)   │      │ (per-user)  │        │
//! │                 └─────────────┘      └─────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_window_engine::{channels::CHEST_CHANNELS, Config, Pipeline};
//!
//! let config = Config::load().expect("invalid configuration");
//! let mut pipeline = Pipeline::from_config(&config, CHEST_CHANNELS).expect("startup failed");
//!
//! // Feed decoded segments one at a time with pipeline.process_segment(&segment)
//! pipeline.shutdown().expect("shutdown failed");
//! ```

pub mod audit;
pub mod channels;
pub mod config;
pub mod core;
pub mod inference;
pub mod pipeline;
pub mod store;

// Re-export key types at crate root for convenience
pub use audit::{AuditRecord, AuditSink, JsonlAuditLog, PipelineStats, SharedPipelineStats};
pub use channels::{Axis, ChannelDescriptor, ChannelSamples, Samples, SensorSegment};
pub use config::{Config, ConfigError, StaleWindowPolicy};
pub use crate::core::{extract_features, FeatureRecord, SegmentError, Window, WindowManager};
pub use inference::{InferenceDispatcher, Model, ModelCache, ModelError, ModelLoader, Prediction};
pub use pipeline::{Pipeline, PipelineError, SegmentOutcome};
pub use store::{KvStore, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
