//! Per-user window buffers and the sliding-window state machine.
//!
//! A window holds every channel's accumulated samples, aligned at the same
//! start instant. Elapsed time is never stored: readiness and eviction
//! recompute the required counts from `seconds * rate` on every check, per
//! channel, and a step only happens when every channel qualifies.

use crate::channels::{ChannelDescriptor, SampleShape, Samples, SensorSegment};
use crate::config::{Config, ConfigError};
use crate::store::StoredValue;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One channel's buffered samples.
///
/// Persisted with an explicit `shape`, since an empty run of samples
/// encodes the same way for either shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "StoredChannel")]
pub struct Channel {
    /// Samples per second
    pub rate_hz: u32,
    pub samples: Samples,
}

impl Channel {
    pub fn empty(descriptor: &ChannelDescriptor) -> Self {
        Self {
            rate_hz: descriptor.rate_hz,
            samples: Samples::empty(descriptor.shape),
        }
    }

    /// Whether at least `seconds` worth of samples are buffered.
    pub fn holds(&self, seconds: u32) -> bool {
        self.samples.len() >= self.samples_for(seconds)
    }

    pub fn samples_for(&self, seconds: u32) -> usize {
        seconds as usize * self.rate_hz as usize
    }
}

#[derive(Serialize)]
struct StoredChannelRef<'a> {
    rate_hz: u32,
    shape: SampleShape,
    samples: &'a Samples,
}

#[derive(Deserialize)]
struct StoredChannel {
    rate_hz: u32,
    shape: SampleShape,
    samples: Samples,
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredChannelRef {
            rate_hz: self.rate_hz,
            shape: self.samples.shape(),
            samples: &self.samples,
        }
        .serialize(serializer)
    }
}

impl TryFrom<StoredChannel> for Channel {
    type Error = String;

    fn try_from(stored: StoredChannel) -> Result<Self, Self::Error> {
        let samples = if stored.samples.is_empty() {
            Samples::empty(stored.shape)
        } else if stored.samples.shape() == stored.shape {
            stored.samples
        } else {
            return Err(format!(
                "channel stored as {:?} holds {:?} samples",
                stored.shape,
                stored.samples.shape()
            ));
        };
        Ok(Self {
            rate_hz: stored.rate_hz,
            samples,
        })
    }
}

/// A user's accumulated multi-channel buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub channels: BTreeMap<String, Channel>,
    /// Timestamp of the last merged segment
    #[serde(default)]
    pub last_timestamp: Option<i64>,
    /// Connection id of the last merged segment
    #[serde(default)]
    pub last_connection_id: Option<String>,
}

impl Window {
    /// An empty window with every channel of `layout` present.
    pub fn empty(layout: &[ChannelDescriptor]) -> Self {
        Self {
            channels: layout
                .iter()
                .map(|d| (d.name.to_string(), Channel::empty(d)))
                .collect(),
            last_timestamp: None,
            last_connection_id: None,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Buffered sample count for a channel (0 if absent).
    pub fn sample_count(&self, name: &str) -> usize {
        self.channels.get(name).map_or(0, |c| c.samples.len())
    }

    /// Whether every channel in `layout` holds at least `seconds` of data.
    pub fn holds(&self, layout: &[ChannelDescriptor], seconds: u32) -> bool {
        layout.iter().all(|d| match self.channels.get(d.name) {
            Some(channel) => channel.holds(seconds),
            None => d.samples_for(seconds) == 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.channels.values().all(|c| c.samples.is_empty())
    }

    fn channel_mut(&mut self, descriptor: &ChannelDescriptor) -> &mut Channel {
        self.channels
            .entry(descriptor.name.to_string())
            .or_insert_with(|| Channel::empty(descriptor))
    }
}

impl StoredValue for Window {
    const KIND: &'static str = "window";
    const SCHEMA_VERSION: u32 = 2;
}

/// Why a segment was not merged.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentError {
    /// A channel contains a NaN or infinite reading
    NonFinite { channel: String },
    MissingChannel { channel: String },
    RateMismatch {
        channel: String,
        expected: u32,
        actual: u32,
    },
    ShapeMismatch {
        channel: String,
        expected: SampleShape,
    },
    /// Timestamp is older than the last merged segment
    OutOfOrder { timestamp: i64, last_timestamp: i64 },
    /// Same connection id as the last merged segment
    Duplicate { connection_id: String },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::NonFinite { channel } => {
                write!(f, "channel {channel} has a NaN or infinite value")
            }
            SegmentError::MissingChannel { channel } => write!(f, "channel {channel} is missing"),
            SegmentError::RateMismatch {
                channel,
                expected,
                actual,
            } => write!(f, "channel {channel} sampled at {actual} Hz, expected {expected} Hz"),
            SegmentError::ShapeMismatch { channel, expected } => {
                write!(f, "channel {channel} samples are not {expected:?}")
            }
            SegmentError::OutOfOrder {
                timestamp,
                last_timestamp,
            } => write!(f, "timestamp {timestamp} precedes last merged {last_timestamp}"),
            SegmentError::Duplicate { connection_id } => {
                write!(f, "connection {connection_id} already merged")
            }
        }
    }
}

impl std::error::Error for SegmentError {}

/// Sliding-window rules for one channel layout.
#[derive(Debug, Clone)]
pub struct WindowManager {
    layout: &'static [ChannelDescriptor],
    window_size_secs: u32,
    overlap_size_secs: u32,
    reject_out_of_order: bool,
}

impl WindowManager {
    /// Create a manager. Fails if the overlap is longer than the window.
    pub fn new(
        layout: &'static [ChannelDescriptor],
        window_size_secs: u32,
        overlap_size_secs: u32,
    ) -> Result<Self, ConfigError> {
        validate_sizes(window_size_secs, overlap_size_secs)?;
        Ok(Self {
            layout,
            window_size_secs,
            overlap_size_secs,
            reject_out_of_order: true,
        })
    }

    pub fn from_config(
        config: &Config,
        layout: &'static [ChannelDescriptor],
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(layout, config.window_size_secs, config.overlap_size_secs)?
            .with_ordering_check(config.reject_out_of_order))
    }

    /// Enable or disable rejection of out-of-order and repeated segments.
    pub fn with_ordering_check(mut self, enabled: bool) -> Self {
        self.reject_out_of_order = enabled;
        self
    }

    pub fn layout(&self) -> &'static [ChannelDescriptor] {
        self.layout
    }

    pub fn window_size_secs(&self) -> u32 {
        self.window_size_secs
    }

    pub fn overlap_size_secs(&self) -> u32 {
        self.overlap_size_secs
    }

    pub fn empty_window(&self) -> Window {
        Window::empty(self.layout)
    }

    /// Validate a segment against the layout and the window's ordering state.
    ///
    /// Structural problems and non-finite readings are reported per channel
    /// in layout order; the ordering check runs last.
    pub fn check_segment(&self, window: &Window, segment: &SensorSegment) -> Result<(), SegmentError> {
        for descriptor in self.layout {
            let channel = descriptor.name.to_string();
            let incoming = segment
                .channel(descriptor.name)
                .ok_or_else(|| SegmentError::MissingChannel {
                    channel: channel.clone(),
                })?;

            let expected = window
                .channel(descriptor.name)
                .map_or(descriptor.rate_hz, |c| c.rate_hz);
            if incoming.hz != expected {
                return Err(SegmentError::RateMismatch {
                    channel,
                    expected,
                    actual: incoming.hz,
                });
            }
            if !incoming.value.fits(descriptor.shape) {
                return Err(SegmentError::ShapeMismatch {
                    channel,
                    expected: descriptor.shape,
                });
            }
            if incoming.value.has_non_finite() {
                return Err(SegmentError::NonFinite { channel });
            }
        }

        if self.reject_out_of_order {
            if let Some(last_timestamp) = window.last_timestamp {
                if segment.timestamp < last_timestamp {
                    return Err(SegmentError::OutOfOrder {
                        timestamp: segment.timestamp,
                        last_timestamp,
                    });
                }
            }
            if window.last_connection_id.as_deref() == Some(segment.connection_id.as_str()) {
                return Err(SegmentError::Duplicate {
                    connection_id: segment.connection_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Check the segment and, if it passes, append every channel's samples.
    ///
    /// A rejected segment leaves the window untouched.
    pub fn ingest(&self, window: &mut Window, segment: &SensorSegment) -> Result<(), SegmentError> {
        self.check_segment(window, segment)?;

        for descriptor in self.layout {
            if let Some(incoming) = segment.channel(descriptor.name) {
                let channel = window.channel_mut(descriptor);
                let merged = channel.samples.extend_from(&incoming.value);
                debug_assert!(merged, "shape checked before merge");
            }
        }
        window.last_timestamp = Some(segment.timestamp);
        window.last_connection_id = Some(segment.connection_id.clone());
        Ok(())
    }

    /// A full window is buffered on every channel.
    pub fn is_ready(&self, window: &Window) -> bool {
        window.holds(self.layout, self.window_size_secs)
    }

    /// An overlap's worth is buffered on every channel.
    pub fn can_slide(&self, window: &Window) -> bool {
        window.holds(self.layout, self.overlap_size_secs)
    }

    /// Drop the overlap prefix from every channel. Returns the total number
    /// of samples removed across channels.
    pub fn slide(&self, window: &mut Window) -> usize {
        self.layout
            .iter()
            .map(|descriptor| {
                let channel = window.channel_mut(descriptor);
                let count = channel.samples_for(self.overlap_size_secs);
                channel.samples.drain_front(count)
            })
            .sum()
    }
}

/// Check window/overlap sizes.
pub fn validate_sizes(window_size_secs: u32, overlap_size_secs: u32) -> Result<(), ConfigError> {
    if window_size_secs == 0 {
        return Err(ConfigError::Invalid(
            "window_size_secs must be greater than zero".to_string(),
        ));
    }
    if overlap_size_secs > window_size_secs {
        return Err(ConfigError::Invalid(format!(
            "overlap_size_secs ({overlap_size_secs}) must not exceed window_size_secs ({window_size_secs})"
        )));
    }
    Ok(())
}
