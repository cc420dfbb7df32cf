//! Channel layout and inbound segment types.
//!
//! The set of channels a device reports is fixed at compile time. Every
//! component that needs to walk channels takes a `&'static [ChannelDescriptor]`
//! instead of discovering fields at runtime.

pub mod types;

pub use types::{Axis, ChannelSamples, SampleShape, Samples, SensorSegment};

/// Static description of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub name: &'static str,
    pub shape: SampleShape,
    /// Samples per second
    pub rate_hz: u32,
}

impl ChannelDescriptor {
    pub const fn scalar(name: &'static str, rate_hz: u32) -> Self {
        Self {
            name,
            shape: SampleShape::Scalar,
            rate_hz,
        }
    }

    pub const fn vector3(name: &'static str, rate_hz: u32) -> Self {
        Self {
            name,
            shape: SampleShape::Vector3,
            rate_hz,
        }
    }

    /// Number of samples this channel produces over `seconds`.
    pub fn samples_for(&self, seconds: u32) -> usize {
        seconds as usize * self.rate_hz as usize
    }
}

/// Nominal sampling rate of the chest device.
pub const CHEST_SAMPLING_RATE_HZ: u32 = 700;

/// Channels reported by the chest device.
pub const CHEST_CHANNELS: &[ChannelDescriptor] = &[
    ChannelDescriptor::vector3("chest_acc", CHEST_SAMPLING_RATE_HZ),
    ChannelDescriptor::scalar("chest_ecg", CHEST_SAMPLING_RATE_HZ),
    ChannelDescriptor::scalar("chest_eda", CHEST_SAMPLING_RATE_HZ),
    ChannelDescriptor::scalar("chest_emg", CHEST_SAMPLING_RATE_HZ),
    ChannelDescriptor::scalar("chest_temp", CHEST_SAMPLING_RATE_HZ),
    ChannelDescriptor::scalar("chest_resp", CHEST_SAMPLING_RATE_HZ),
];

/// Look up a descriptor by channel name.
pub fn find(layout: &[ChannelDescriptor], name: &str) -> Option<ChannelDescriptor> {
    layout.iter().find(|c| c.name == name).copied()
}
