// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The camera node: frame publishing and runtime reconfiguration.
//!
//! Frames arrive on the camera's delivery thread and are only stamped and
//! queued there. A frame pump thread drains the queue, converts and
//! publishes. Reconfiguration runs on whichever thread receives the request
//! and is serialised by the camera session lock.

use crate::{
    calibration::{CalibrationManager, CalibrationRecord, StampedCalibration},
    camera::{CameraSession, DeviceInfo, DeviceSelector, Frame, FrameCallback},
    config::{CameraConfig, ReconfigureLevel, DEFAULT_FRAME_ID},
    error::Error,
    pixel::frame_to_image,
    sink::ImageSink,
};
use core::fmt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, info_span, trace, warn};
use unix_ts::Timestamp;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wall clock time as a message stamp.
pub fn now() -> Timestamp {
    let since_the_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(
        since_the_epoch.as_secs() as i64,
        since_the_epoch.subsec_nanos(),
    )
}

/// What happened to a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nobody is listening, the frame was not converted.
    Skipped,
    Published,
    ConvertFailed,
    PublishFailed,
}

/// Frame counters since the node started.
#[derive(Debug, Default)]
pub struct FrameStats {
    converted: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStatsSnapshot {
    /// Frames handed to the converter.
    pub converted: u64,
    pub published: u64,
    pub skipped: u64,
    /// Frames lost because the queue to the frame pump was full.
    pub dropped: u64,
    /// Frames that failed conversion or publishing.
    pub failed: u64,
}

impl FrameStats {
    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            converted: self.converted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Reconfiguration stage that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconfigureStep {
    Restart,
    Apply,
}

impl fmt::Display for ReconfigureStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ReconfigureStep::Restart => "restarting camera",
            ReconfigureStep::Apply => "applying configuration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, ThisError)]
#[error("{step} failed: {source}")]
pub struct ReconfigureError {
    pub step: ReconfigureStep,
    pub source: Error,
}

trait StepExt<T> {
    fn step(self, step: ReconfigureStep) -> Result<T, ReconfigureError>;
}

impl<T> StepExt<T> for Result<T, Error> {
    fn step(self, step: ReconfigureStep) -> Result<T, ReconfigureError> {
        self.map_err(|source| ReconfigureError { step, source })
    }
}

/// What a reconfiguration did to the calibration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalibrationUpdate {
    /// The calibration URL did not change.
    Unchanged,
    Loaded(String),
    /// The new URL was rejected and the previous calibration kept.
    InvalidUrl(String),
    /// The URL could not be loaded and the previous calibration kept.
    LoadFailed(String),
}

/// Summary of a successful reconfiguration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconfigureReport {
    /// The configuration as applied, after defaults were filled in.
    pub config: CameraConfig,
    pub restarted: bool,
    pub calibration: CalibrationUpdate,
    pub do_rectify: bool,
}

/// Camera node state shared by the frame pump and the reconfiguration path.
pub struct CameraNode<C, M, S> {
    camera: Mutex<C>,
    calibration: Mutex<M>,
    sink: S,
    device: DeviceSelector,
    camera_info_url: Mutex<String>,
    publishing: AtomicBool,
    stats: Arc<FrameStats>,
}

impl<C, M, S> CameraNode<C, M, S>
where
    C: CameraSession,
    M: CalibrationManager,
    S: ImageSink,
{
    pub fn new(camera: C, calibration: M, sink: S, device: DeviceSelector) -> Self {
        Self {
            camera: Mutex::new(camera),
            calibration: Mutex::new(calibration),
            sink,
            device,
            camera_info_url: Mutex::new(String::new()),
            publishing: AtomicBool::new(false),
            stats: Arc::new(FrameStats::default()),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot()
    }

    /// The calibration record as it would be published now.
    pub fn calibration(&self) -> CalibrationRecord {
        lock(&self.calibration).current()
    }

    pub fn active_config(&self) -> Option<CameraConfig> {
        lock(&self.camera).active_config()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.camera).is_open()
    }

    pub fn set_frame_callback(&self, callback: FrameCallback) {
        lock(&self.camera).set_frame_callback(callback);
    }

    /// Lists the visible devices and opens the selected one.
    pub fn open(&self) -> Result<DeviceInfo, Error> {
        let mut camera = lock(&self.camera);
        info!("Searching for cameras ...");
        let devices = camera.list_devices();
        if devices.is_empty() {
            warn!("Could not get cameras from the SDK");
        }
        for device in &devices {
            device.log();
        }
        let opened = camera.open(&self.device.address, &self.device.guid)?;
        info!("streaming from camera {}", opened.id);
        Ok(opened)
    }

    pub fn close(&self) {
        lock(&self.camera).close();
    }

    /// Converts and publishes one frame, unless nobody is subscribed.
    ///
    /// The image and its calibration carry the same `stamp` and frame id.
    /// Failures are logged and the frame dropped.
    pub fn handle_frame(&self, frame: &Frame, stamp: Timestamp) -> FrameOutcome {
        let span = info_span!("frame", id = frame.frame_id);
        let _guard = span.enter();

        let subscribed = self.sink.subscriber_count() > 0;
        if self.publishing.swap(subscribed, Ordering::Relaxed) != subscribed {
            if subscribed {
                info!("subscriber attached, publishing frames");
            } else {
                info!("no subscribers, frames will not be converted");
            }
        }
        if !subscribed {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return FrameOutcome::Skipped;
        }

        self.stats.converted.fetch_add(1, Ordering::Relaxed);
        let mut image = match frame_to_image(frame) {
            Ok(image) => image,
            Err(e) => {
                warn!("{e}. No image published.");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return FrameOutcome::ConvertFailed;
            }
        };

        let calibration = self.calibration();
        image.stamp = stamp;
        image.frame_id = calibration.frame_id.clone();
        let info = StampedCalibration { stamp, calibration };

        match self.sink.publish(&image, &info) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                trace!("published {}x{} {}", image.width, image.height, image.encoding);
                FrameOutcome::Published
            }
            Err(e) => {
                warn!("{e}");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::PublishFailed
            }
        }
    }

    /// Applies a new configuration, logging the outcome once.
    ///
    /// Never fails: on error the node keeps whatever was applied before the
    /// failing step. Returns the report of a successful reconfiguration.
    pub fn on_reconfigure(
        &self,
        config: CameraConfig,
        level: ReconfigureLevel,
    ) -> Option<ReconfigureReport> {
        match self.reconfigure(config, level) {
            Ok(report) => {
                info!(
                    "reconfigured {:?}: frame_id={} {}x{} binning={}x{} roi={}+{} {}x{} restarted={} calibration={:?} do_rectify={}",
                    level,
                    report.config.frame_id,
                    report.config.width,
                    report.config.height,
                    report.config.binning_x,
                    report.config.binning_y,
                    report.config.roi_offset_x,
                    report.config.roi_offset_y,
                    report.config.roi_width,
                    report.config.roi_height,
                    report.restarted,
                    report.calibration,
                    report.do_rectify,
                );
                Some(report)
            }
            Err(e) => {
                error!("Error reconfiguring camera node: {e}");
                None
            }
        }
    }

    /// Applies a new configuration to the camera and the calibration record.
    pub fn reconfigure(
        &self,
        mut config: CameraConfig,
        level: ReconfigureLevel,
    ) -> Result<ReconfigureReport, ReconfigureError> {
        if config.frame_id.is_empty() {
            config.frame_id = DEFAULT_FRAME_ID.to_string();
        }

        // held until the calibration is updated so reconfigurations never
        // interleave
        let mut camera = lock(&self.camera);
        let restarted = level.restarts_device();
        if restarted {
            camera.close();
            camera
                .open(&self.device.address, &self.device.guid)
                .step(ReconfigureStep::Restart)?;
        }
        camera.apply_config(&config).step(ReconfigureStep::Apply)?;

        let (calibration, do_rectify) = self.update_camera_info(&config);
        drop(camera);

        Ok(ReconfigureReport {
            config,
            restarted,
            calibration,
            do_rectify,
        })
    }

    /// Brings the calibration record in line with `config`.
    ///
    /// A calibration URL that is invalid or fails to load keeps the previous
    /// intrinsics; the operating fields are updated regardless.
    fn update_camera_info(&self, config: &CameraConfig) -> (CalibrationUpdate, bool) {
        let mut manager = lock(&self.calibration);
        let mut applied_url = lock(&self.camera_info_url);

        let mut record = manager.current();
        let update = if config.camera_info_url != *applied_url {
            if !manager.set_camera_name(&config.frame_id) {
                warn!(
                    "frame id '{}' is not a valid camera name, calibration profile unchanged",
                    config.frame_id
                );
            }
            if !manager.validate_url(&config.camera_info_url) {
                warn!("Camera info URL not valid: {}", config.camera_info_url);
                CalibrationUpdate::InvalidUrl(config.camera_info_url.clone())
            } else {
                match manager.load_url(&config.camera_info_url) {
                    Ok(()) => {
                        record = manager.current();
                        *applied_url = config.camera_info_url.clone();
                        debug!("calibrated: {}", record.is_calibrated());
                        CalibrationUpdate::Loaded(config.camera_info_url.clone())
                    }
                    Err(e) => {
                        warn!(
                            "failed to load camera info from {}: {e}",
                            config.camera_info_url
                        );
                        CalibrationUpdate::LoadFailed(config.camera_info_url.clone())
                    }
                }
            }
        } else {
            CalibrationUpdate::Unchanged
        };

        record.apply_config(config);
        record.roi.do_rectify = record.rectification_eligible(config);
        let do_rectify = record.roi.do_rectify;
        manager.set_current(record);

        (update, do_rectify)
    }
}

/// A frame stamped on arrival, queued for the frame pump.
struct Arrival {
    frame: Frame,
    stamp: Timestamp,
}

/// Owns a running camera node: the registered frame callback, the queue to
/// the frame pump and the pump thread itself.
///
/// Dropping the driver closes the camera, closes the queue and joins the
/// pump.
pub struct Driver<C, M, S>
where
    C: CameraSession + 'static,
    M: CalibrationManager + 'static,
    S: ImageSink + 'static,
{
    node: Arc<CameraNode<C, M, S>>,
    frames: kanal::Sender<Arrival>,
    pump: Option<JoinHandle<()>>,
}

impl<C, M, S> Driver<C, M, S>
where
    C: CameraSession + 'static,
    M: CalibrationManager + 'static,
    S: ImageSink + 'static,
{
    /// Wires the frame callback, starts the frame pump and opens the camera.
    ///
    /// Failing to open the camera is the only fatal error of the node.
    pub fn start(node: CameraNode<C, M, S>, queue_depth: usize) -> Result<Self, Error> {
        let node = Arc::new(node);
        let (tx, rx) = kanal::bounded::<Arrival>(queue_depth.max(1));

        let stats = node.stats.clone();
        let queue = tx.clone();
        node.set_frame_callback(Arc::new(move |frame: Frame| {
            let arrival = Arrival {
                frame,
                stamp: now(),
            };
            match queue.try_send(arrival) {
                Ok(true) => {}
                Ok(false) => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("frame queue full, frame dropped");
                }
                Err(_) => trace!("frame queue closed"),
            }
        }));

        let pump_node = node.clone();
        let pump = thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || {
                while let Ok(arrival) = rx.recv() {
                    pump_node.handle_frame(&arrival.frame, arrival.stamp);
                }
                debug!("frame pump stopped");
            })?;

        let driver = Self {
            node,
            frames: tx,
            pump: Some(pump),
        };
        driver.node.open()?;
        Ok(driver)
    }

    pub fn node(&self) -> &Arc<CameraNode<C, M, S>> {
        &self.node
    }
}

impl<C, M, S> Drop for Driver<C, M, S>
where
    C: CameraSession + 'static,
    M: CalibrationManager + 'static,
    S: ImageSink + 'static,
{
    fn drop(&mut self) {
        self.node.close();
        let _ = self.frames.close();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                error!("frame pump panicked");
            }
        }
    }
}
