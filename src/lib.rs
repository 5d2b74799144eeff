// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Vimba Camera Node Library
//!
//! This library bridges a machine-vision camera SDK to Zenoh. It opens one
//! camera session, converts every delivered frame into a
//! `sensor_msgs/Image`, publishes it together with the matching
//! `sensor_msgs/CameraInfo`, and applies acquisition parameter changes at
//! runtime.
//!
//! ## Features
//!
//! - **Camera Sessions**: the vendor SDK sits behind [`camera::CameraSession`];
//!   [`sim::SimulatedCamera`] provides a GigE-like device for development.
//! - **Pixel Formats**: mono, Bayer and RGB vendor formats map to ROS image
//!   encodings.
//! - **Calibration**: ROS calibration YAML and isp-imx dewarp JSON files,
//!   selected by URL and reloaded when the URL changes.
//! - **Conditional Publishing**: frames are only converted while someone is
//!   subscribed.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_vimba_camera::{
//!     calibration::FileCalibrationManager,
//!     camera::DeviceSelector,
//!     config::{CameraConfig, ReconfigureLevel},
//!     node::{CameraNode, Driver},
//!     sim::{SimulatedCamera, SimulatedDevice},
//!     sink::ZenohSink,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let session = zenoh::open(zenoh::Config::default()).await?;
//! let sink = ZenohSink::new(&session, "rt/camera/image", "rt/camera/info").await?;
//! let camera = SimulatedCamera::new(
//!     vec![SimulatedDevice::gige("DEV_0001", "192.168.1.10", 1280, 960)],
//!     30,
//! );
//! let node = CameraNode::new(
//!     camera,
//!     FileCalibrationManager::new("camera"),
//!     sink,
//!     DeviceSelector::new("192.168.1.10", ""),
//! );
//! let driver = Driver::start(node, 4)?;
//! driver
//!     .node()
//!     .on_reconfigure(CameraConfig::default(), ReconfigureLevel::Close);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod error;
pub mod node;
pub mod pixel;
pub mod sim;
pub mod sink;

pub use error::{ConvertError, Error};
