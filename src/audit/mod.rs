//! Audit trail and processing statistics.
//!
//! This module tracks what the worker did with each segment, independent of
//! the window store.

pub mod log;
pub mod stats;

// Re-export commonly used types
pub use log::{AuditRecord, AuditSink, JsonlAuditLog, MemoryAuditHandle, MemoryAuditLog};
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, PipelineStats,
    SharedPipelineStats, StatsSnapshot,
};
