//! Sample and segment types for inbound sensor data.
//!
//! A segment carries one arrival's worth of samples for every channel.
//! On the wire a missing reading may be sent as `null`; it is read back as
//! not-a-number so the sanity check can reject the whole segment.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape of a single sample in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleShape {
    /// One number per sample
    Scalar,
    /// Three numbers per sample (tri-axial measurement)
    Vector3,
}

/// A single tri-axial reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Axis {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the reading.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// An ordered run of samples of one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "WireSamples")]
pub enum Samples {
    Vector3(Vec<Axis>),
    Scalar(Vec<f64>),
}

impl Samples {
    /// An empty run of the given shape.
    pub fn empty(shape: SampleShape) -> Self {
        match shape {
            SampleShape::Scalar => Samples::Scalar(Vec::new()),
            SampleShape::Vector3 => Samples::Vector3(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::Scalar(v) => v.len(),
            Samples::Vector3(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> SampleShape {
        match self {
            Samples::Scalar(_) => SampleShape::Scalar,
            Samples::Vector3(_) => SampleShape::Vector3,
        }
    }

    /// Whether these samples can live in a channel of `shape`.
    ///
    /// An empty run carries no shape information on the wire, so it fits any channel.
    pub fn fits(&self, shape: SampleShape) -> bool {
        self.is_empty() || self.shape() == shape
    }

    /// Check every flattened value (x/y/z for vector samples) for NaN or
    /// infinity. JSON has no encoding for either, so neither may be buffered.
    pub fn has_non_finite(&self) -> bool {
        match self {
            Samples::Scalar(v) => v.iter().any(|s| !s.is_finite()),
            Samples::Vector3(v) => v.iter().any(|a| !a.is_finite()),
        }
    }

    /// Append `other` to the end, preserving order.
    ///
    /// Returns false (and leaves `self` untouched) if the shapes differ.
    pub fn extend_from(&mut self, other: &Samples) -> bool {
        if other.is_empty() {
            return true;
        }
        match (self, other) {
            (Samples::Scalar(dst), Samples::Scalar(src)) => dst.extend_from_slice(src),
            (Samples::Vector3(dst), Samples::Vector3(src)) => dst.extend_from_slice(src),
            _ => return false,
        }
        true
    }

    /// Drop up to `count` samples from the front. Returns how many were dropped.
    pub fn drain_front(&mut self, count: usize) -> usize {
        let count = count.min(self.len());
        match self {
            Samples::Scalar(v) => {
                v.drain(..count);
            }
            Samples::Vector3(v) => {
                v.drain(..count);
            }
        }
        count
    }

    /// Scalar view of the first `count` samples: raw values for scalar
    /// channels, per-sample Euclidean norm for vector channels.
    pub fn leading_magnitudes(&self, count: usize) -> Vec<f64> {
        match self {
            Samples::Scalar(v) => v.iter().take(count).copied().collect(),
            Samples::Vector3(v) => v.iter().take(count).map(Axis::norm).collect(),
        }
    }
}

/// Wire form of a sample run. Readings may be `null`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireSamples {
    Vector3(Vec<WireAxis>),
    Scalar(Vec<Option<f64>>),
}

#[derive(Deserialize)]
struct WireAxis {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

impl From<WireSamples> for Samples {
    fn from(wire: WireSamples) -> Self {
        let read = |v: Option<f64>| v.unwrap_or(f64::NAN);
        match wire {
            WireSamples::Vector3(axes) => Samples::Vector3(
                axes.into_iter()
                    .map(|a| Axis::new(read(a.x), read(a.y), read(a.z)))
                    .collect(),
            ),
            WireSamples::Scalar(values) => Samples::Scalar(values.into_iter().map(read).collect()),
        }
    }
}

/// Samples for one channel within a segment, tagged with their rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSamples {
    /// Sampling rate in samples per second
    pub hz: u32,
    pub value: Samples,
}

impl ChannelSamples {
    pub fn scalar(hz: u32, values: Vec<f64>) -> Self {
        Self {
            hz,
            value: Samples::Scalar(values),
        }
    }

    pub fn vector3(hz: u32, values: Vec<Axis>) -> Self {
        Self {
            hz,
            value: Samples::Vector3(values),
        }
    }
}

/// One arrival of new samples for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSegment {
    pub user_id: String,
    pub connection_id: String,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Duration covered by this segment in milliseconds
    #[serde(alias = "segment_size")]
    pub segment_duration_ms: u64,
    /// Per-channel samples keyed by channel name
    pub value: BTreeMap<String, ChannelSamples>,
}

impl SensorSegment {
    pub fn new(
        user_id: impl Into<String>,
        connection_id: impl Into<String>,
        timestamp: i64,
        segment_duration_ms: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            timestamp,
            segment_duration_ms,
            value: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach one channel's samples.
    pub fn with_channel(mut self, name: impl Into<String>, samples: ChannelSamples) -> Self {
        self.value.insert(name.into(), samples);
        self
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSamples> {
        self.value.get(name)
    }

    /// The capture time as a UTC datetime, if representable.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}
