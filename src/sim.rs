// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated camera backend.
//!
//! Behaves like a GigE device enumerated by the SDK: it has to be opened by
//! address or id, streams a moving test pattern from its own thread and
//! validates acquisition parameters against its sensor size.

use crate::{
    camera::{
        AccessMode, CameraSession, DeviceInfo, DeviceSelector, Frame, FrameCallback,
        InterfaceType, VmbError,
    },
    config::CameraConfig,
    error::Error,
    pixel::PixelFormat,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};

const MAX_BINNING: u32 = 8;

/// A device the simulated SDK can enumerate.
#[derive(Clone, Debug)]
pub struct SimulatedDevice {
    pub info: DeviceInfo,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pixel_format: PixelFormat,
}

impl SimulatedDevice {
    pub fn gige(id: &str, address: &str, sensor_width: u32, sensor_height: u32) -> Self {
        Self {
            info: DeviceInfo {
                id: id.to_string(),
                name: format!("Simulated {id}"),
                model: "Mako G-125B".to_string(),
                serial: format!("SIM-{}", id.trim_start_matches("DEV_")),
                interface_id: "sim0".to_string(),
                interface: InterfaceType::Ethernet,
                access: AccessMode::FULL,
                address: Some(address.to_string()),
            },
            sensor_width,
            sensor_height,
            pixel_format: PixelFormat::Mono8,
        }
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Checks that `config` can be realised on this sensor.
    pub fn validate(&self, config: &CameraConfig) -> Result<(), Error> {
        let binning = [
            ("BinningHorizontal", config.binning_x),
            ("BinningVertical", config.binning_y),
        ];
        for (feature, value) in binning {
            if value == 0 || value > MAX_BINNING {
                return Err(Error::InvalidFeature {
                    feature,
                    reason: format!("{value} not in 1..={MAX_BINNING}"),
                });
            }
        }

        let binned_width = config.width.checked_mul(config.binning_x);
        if config.width == 0 || binned_width.map_or(true, |w| w > self.sensor_width) {
            return Err(Error::InvalidFeature {
                feature: "Width",
                reason: format!(
                    "{} with binning {} exceeds sensor width {}",
                    config.width, config.binning_x, self.sensor_width
                ),
            });
        }
        let binned_height = config.height.checked_mul(config.binning_y);
        if config.height == 0 || binned_height.map_or(true, |h| h > self.sensor_height) {
            return Err(Error::InvalidFeature {
                feature: "Height",
                reason: format!(
                    "{} with binning {} exceeds sensor height {}",
                    config.height, config.binning_y, self.sensor_height
                ),
            });
        }

        let roi_right = config.roi_offset_x.checked_add(config.roi_width);
        if roi_right.map_or(true, |x| x > self.sensor_width) {
            return Err(Error::InvalidFeature {
                feature: "OffsetX",
                reason: format!(
                    "ROI {}+{} exceeds sensor width {}",
                    config.roi_offset_x, config.roi_width, self.sensor_width
                ),
            });
        }
        let roi_bottom = config.roi_offset_y.checked_add(config.roi_height);
        if roi_bottom.map_or(true, |y| y > self.sensor_height) {
            return Err(Error::InvalidFeature {
                feature: "OffsetY",
                reason: format!(
                    "ROI {}+{} exceeds sensor height {}",
                    config.roi_offset_y, config.roi_height, self.sensor_height
                ),
            });
        }
        Ok(())
    }

    /// Generates one frame of the test pattern at the configured resolution.
    fn render(&self, config: &CameraConfig, frame_id: u64) -> Frame {
        let bytes_per_pixel = self.pixel_format.bits_per_pixel().div_ceil(8).max(1);
        let step = config.width * bytes_per_pixel;
        let image_size = step * config.height;
        let mut buffer = vec![0u8; image_size as usize];
        for (i, px) in buffer.iter_mut().enumerate() {
            let x = (i as u64 % step as u64) / bytes_per_pixel as u64;
            *px = (x + frame_id) as u8;
        }

        Frame {
            frame_id,
            width: config.width,
            height: config.height,
            pixel_format: self.pixel_format,
            image_size,
            buffer,
        }
    }
}

struct Stream {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Camera session over a set of simulated devices.
pub struct SimulatedCamera {
    devices: Vec<SimulatedDevice>,
    frame_interval: Duration,
    callback: Option<FrameCallback>,
    opened: Option<SimulatedDevice>,
    config: Arc<Mutex<Option<CameraConfig>>>,
    frames: Arc<AtomicU64>,
    stream: Option<Stream>,
}

impl SimulatedCamera {
    pub fn new(devices: Vec<SimulatedDevice>, fps: u32) -> Self {
        Self {
            devices,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            callback: None,
            opened: None,
            config: Arc::new(Mutex::new(None)),
            frames: Arc::new(AtomicU64::new(0)),
            stream: None,
        }
    }

    /// Total frames delivered since the camera was created.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn start_stream(&mut self, device: SimulatedDevice) -> Result<(), Error> {
        let callback: FrameCallback = match &self.callback {
            Some(cb) => cb.clone(),
            None => {
                warn!("no frame callback registered, frames will be discarded");
                Arc::new(|_: Frame| {})
            }
        };
        let running = Arc::new(AtomicBool::new(true));
        let config = self.config.clone();
        let frames = self.frames.clone();
        let interval = self.frame_interval;
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(format!("sim-{}", device.info.id))
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    let current = config.lock().ok().and_then(|c| c.clone());
                    if let Some(current) = current {
                        let n = frames.fetch_add(1, Ordering::Relaxed);
                        (*callback)(device.render(&current, n));
                    }
                    thread::sleep(interval);
                }
            })?;

        self.stream = Some(Stream { running, handle });
        Ok(())
    }
}

impl CameraSession for SimulatedCamera {
    fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info.clone()).collect()
    }

    fn open(&mut self, address: &str, guid: &str) -> Result<DeviceInfo, Error> {
        if self.is_open() {
            return Err(Error::InvalidFeature {
                feature: "open",
                reason: "session already open".to_string(),
            });
        }

        let selector = DeviceSelector::new(address, guid);
        let infos = self.list_devices();
        let info = selector.select(&infos).map_err(|source| Error::Connection {
            address: address.to_string(),
            guid: guid.to_string(),
            source,
        })?;
        let device = self
            .devices
            .iter()
            .find(|d| d.info.id == info.id)
            .cloned()
            .ok_or(Error::Connection {
                address: address.to_string(),
                guid: guid.to_string(),
                source: VmbError::NotFound,
            })?;

        {
            let mut config = self.config.lock().map_err(|_| Error::NotOpen)?;
            if config.is_none() {
                *config = Some(CameraConfig {
                    width: device.sensor_width,
                    height: device.sensor_height,
                    ..Default::default()
                });
            }
        }

        let info = device.info.clone();
        self.start_stream(device.clone())?;
        self.opened = Some(device);
        info!("opened camera {} ({})", info.id, info.model);
        Ok(info)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.running.store(false, Ordering::Release);
            if stream.handle.join().is_err() {
                warn!("camera delivery thread panicked");
            }
        }
        if let Some(device) = self.opened.take() {
            info!("closed camera {}", device.info.id);
        }
    }

    fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    fn set_frame_callback(&mut self, callback: FrameCallback) {
        self.callback = Some(callback);
    }

    fn apply_config(&mut self, config: &CameraConfig) -> Result<(), Error> {
        let device = self.opened.as_ref().ok_or(Error::NotOpen)?;
        device.validate(config)?;
        let mut current = self.config.lock().map_err(|_| Error::NotOpen)?;
        *current = Some(config.clone());
        debug!("applied {:?}", config);
        Ok(())
    }

    fn active_config(&self) -> Option<CameraConfig> {
        self.config.lock().ok().and_then(|c| c.clone())
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.close();
    }
}
