// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{camera::DeviceSelector, config::CameraConfig};
use clap::Parser;
use serde_json::json;
use zenoh::config::{Config, WhatAmI};

/// Command-line arguments for the EdgeFirst Vimba Camera Node.
///
/// The acquisition options form the initial camera configuration, applied
/// when the node starts. Later changes arrive as JSON on the config topic.
/// Arguments can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-vimba-camera --ip 192.168.1.10 --camera-info-url file:///etc/cal/left.yaml
///
/// # Via environment variables
/// export GUID=DEV_000F315B0001
/// export FRAME_ID=left
/// edgefirst-vimba-camera
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera network address, takes priority over --guid
    #[arg(long, env = "IP", default_value = "")]
    pub ip: String,

    /// Camera hardware identifier
    #[arg(long, env = "GUID", default_value = "")]
    pub guid: String,

    /// Calibration URL (file:///path.yaml, /path.json or empty)
    #[arg(long, env = "CAMERA_INFO_URL", default_value = "")]
    pub camera_info_url: String,

    /// TF frame ID of the camera optical frame
    #[arg(long, env = "FRAME_ID", default_value = "camera")]
    pub frame_id: String,

    /// Image resolution in pixels (width height)
    #[arg(
        long,
        env = "CAMERA_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub camera_size: Vec<u32>,

    /// Sensor binning (x y)
    #[arg(
        long,
        env = "BINNING",
        default_value = "1 1",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub binning: Vec<u32>,

    /// Region of interest in unbinned sensor pixels (x y width height), a
    /// zero size selects the full sensor
    #[arg(
        long,
        env = "ROI",
        default_value = "0 0 0 0",
        value_delimiter = ' ',
        num_args = 4
    )]
    pub roi: Vec<u32>,

    /// Frames buffered between the camera thread and the publisher
    #[arg(long, env = "QUEUE_DEPTH", default_value = "4")]
    pub queue_depth: usize,

    /// Frame rate of the simulated camera
    #[arg(long, env = "FPS", default_value = "30")]
    pub fps: u32,

    /// Sensor size of the simulated camera (width height)
    #[arg(
        long,
        env = "SENSOR_SIZE",
        default_value = "1280 960",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub sensor_size: Vec<u32>,

    /// Zenoh topic for raw images (sensor_msgs/Image)
    #[arg(long, default_value = "rt/camera/image")]
    pub image_topic: String,

    /// Zenoh topic for camera calibration info (sensor_msgs/CameraInfo)
    #[arg(long, default_value = "rt/camera/info")]
    pub info_topic: String,

    /// Zenoh topic receiving JSON reconfiguration requests
    #[arg(long, default_value = "rt/camera/config")]
    pub config_topic: String,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,

    /// Zenoh participant mode (peer, client, or router)
    #[arg(long, env = "MODE", default_value = "peer")]
    mode: WhatAmI,

    /// Zenoh endpoints to connect to (can specify multiple)
    #[arg(long, env = "CONNECT")]
    connect: Vec<String>,

    /// Zenoh endpoints to listen on (can specify multiple)
    #[arg(long, env = "LISTEN")]
    listen: Vec<String>,

    /// Disable Zenoh multicast peer discovery
    #[arg(long, env = "NO_MULTICAST_SCOUTING")]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn device(&self) -> DeviceSelector {
        DeviceSelector::new(self.ip.as_str(), self.guid.as_str())
    }

    /// The configuration the node starts with.
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            frame_id: self.frame_id.clone(),
            width: self.camera_size[0],
            height: self.camera_size[1],
            binning_x: self.binning[0],
            binning_y: self.binning[1],
            roi_offset_x: self.roi[0],
            roi_offset_y: self.roi[1],
            roi_width: self.roi[2],
            roi_height: self.roi[3],
            camera_info_url: self.camera_info_url.clone(),
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = zenoh::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}
