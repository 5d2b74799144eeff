// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{camera::VmbError, pixel::PixelFormat};
use thiserror::Error;

/// Errors produced by the camera node.
///
/// Only [`Error::Connection`] is fatal, and only while the node starts. Every
/// other variant is local to one frame or one reconfiguration attempt and is
/// logged and absorbed by the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// No device resolved from the requested address or identifier.
    #[error("could not open camera (ip: '{address}', guid: '{guid}'): {source}")]
    Connection {
        address: String,
        guid: String,
        source: VmbError,
    },

    /// The session rejected an operation because it is not open.
    #[error("camera session is not open")]
    NotOpen,

    /// A feature value the session does not accept.
    #[error("invalid value for {feature}: {reason}")]
    InvalidFeature {
        feature: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("calibration: {0}")]
    Calibration(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("zenoh: {0}")]
    Zenoh(String),
}

/// A single frame could not be translated into an image message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("received frame with unsupported pixel format {0}")]
    UnsupportedFormat(PixelFormat),

    #[error("frame has zero height")]
    EmptyFrame,

    #[error("frame buffer holds {actual} bytes but {expected} were declared")]
    ShortBuffer { expected: usize, actual: usize },
}
