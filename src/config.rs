// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use serde::{Deserialize, Serialize};

/// Frame id used when a configuration leaves it empty.
pub const DEFAULT_FRAME_ID: &str = "camera";

/// Acquisition parameters of the camera node.
///
/// ROI offsets and sizes are in unbinned sensor coordinates; a zero ROI size
/// means the full sensor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub binning_x: u32,
    pub binning_y: u32,
    pub roi_offset_x: u32,
    pub roi_offset_y: u32,
    pub roi_height: u32,
    pub roi_width: u32,
    pub camera_info_url: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_id: DEFAULT_FRAME_ID.to_string(),
            height: 480,
            width: 640,
            binning_x: 1,
            binning_y: 1,
            roi_offset_x: 0,
            roi_offset_y: 0,
            roi_height: 0,
            roi_width: 0,
            camera_info_url: String::new(),
        }
    }
}

/// How disruptive a configuration change is for the device.
///
/// Levels follow the `driver_base` sensor level bitmask: `0` can be applied
/// while streaming, `1` needs streaming stopped and `3` needs the device
/// closed. The first configuration of a node is sent with every bit set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ReconfigureLevel {
    Running,
    Stop,
    Close,
}

impl ReconfigureLevel {
    pub const RECONFIGURE_RUNNING: u32 = 0;
    pub const RECONFIGURE_STOP: u32 = 1;
    pub const RECONFIGURE_CLOSE: u32 = 3;

    pub const fn from_bits(bits: u32) -> Self {
        if bits & Self::RECONFIGURE_CLOSE & !Self::RECONFIGURE_STOP != 0 {
            ReconfigureLevel::Close
        } else if bits & Self::RECONFIGURE_STOP != 0 {
            ReconfigureLevel::Stop
        } else {
            ReconfigureLevel::Running
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            ReconfigureLevel::Running => Self::RECONFIGURE_RUNNING,
            ReconfigureLevel::Stop => Self::RECONFIGURE_STOP,
            ReconfigureLevel::Close => Self::RECONFIGURE_CLOSE,
        }
    }

    /// Whether the device has to be closed and reopened to apply the change.
    pub const fn restarts_device(self) -> bool {
        !matches!(self, ReconfigureLevel::Running)
    }
}

impl From<u32> for ReconfigureLevel {
    fn from(bits: u32) -> Self {
        ReconfigureLevel::from_bits(bits)
    }
}

impl From<ReconfigureLevel> for u32 {
    fn from(level: ReconfigureLevel) -> Self {
        level.bits()
    }
}

/// A reconfiguration as received on the config topic, JSON encoded.
///
/// ```json
/// { "level": 1, "config": { "frame_id": "left", "binning_x": 2 } }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigureRequest {
    #[serde(default = "ReconfigureRequest::default_level")]
    pub level: ReconfigureLevel,
    #[serde(default)]
    pub config: CameraConfig,
}

impl ReconfigureRequest {
    fn default_level() -> ReconfigureLevel {
        ReconfigureLevel::Close
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
