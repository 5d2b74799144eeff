// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_vimba_camera::{
    calibration::{CalibrationManager, FileCalibrationManager, StampedCalibration, IDENTITY3},
    camera::{
        AccessMode, CameraSession, DeviceInfo, DeviceSelector, Frame, FrameCallback,
        InterfaceType, VmbError,
    },
    config::{CameraConfig, ReconfigureLevel},
    node::{CalibrationUpdate, CameraNode, Driver, FrameOutcome, ReconfigureStep},
    pixel::{Image, PixelFormat},
    sim::{SimulatedCamera, SimulatedDevice},
    sink::ImageSink,
    Error,
};
use serial_test::serial;
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};
use unix_ts::Timestamp;

const ADDRESS: &str = "192.168.1.10";

#[derive(Default)]
struct MockState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_apply: AtomicBool,
}

struct MockCamera {
    state: Arc<MockState>,
    open: bool,
    config: Option<CameraConfig>,
    callback: Option<FrameCallback>,
}

impl MockCamera {
    fn info() -> DeviceInfo {
        DeviceInfo {
            id: "DEV_MOCK".to_string(),
            name: "mock".to_string(),
            model: "Mock".to_string(),
            serial: "1".to_string(),
            interface_id: "eth0".to_string(),
            interface: InterfaceType::Ethernet,
            access: AccessMode::FULL,
            address: Some(ADDRESS.to_string()),
        }
    }
}

impl CameraSession for MockCamera {
    fn list_devices(&self) -> Vec<DeviceInfo> {
        vec![Self::info()]
    }

    fn open(&mut self, address: &str, guid: &str) -> Result<DeviceInfo, Error> {
        let devices = self.list_devices();
        let info = DeviceSelector::new(address, guid)
            .select(&devices)
            .map_err(|source| Error::Connection {
                address: address.to_string(),
                guid: guid.to_string(),
                source,
            })?
            .clone();
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(info)
    }

    fn close(&mut self) {
        if self.open {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_frame_callback(&mut self, callback: FrameCallback) {
        self.callback = Some(callback);
    }

    fn apply_config(&mut self, config: &CameraConfig) -> Result<(), Error> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        if self.state.fail_apply.load(Ordering::SeqCst) {
            return Err(Error::InvalidFeature {
                feature: "Width",
                reason: "rejected".to_string(),
            });
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn active_config(&self) -> Option<CameraConfig> {
        self.config.clone()
    }
}

#[derive(Default)]
struct RecordingSink {
    subscribers: AtomicUsize,
    fail: AtomicBool,
    published: Mutex<Vec<(Image, StampedCalibration)>>,
}

impl RecordingSink {
    fn published(&self) -> Vec<(Image, StampedCalibration)> {
        self.published.lock().unwrap().clone()
    }
}

impl ImageSink for RecordingSink {
    fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    fn publish(&self, image: &Image, info: &StampedCalibration) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Publish("sink closed".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((image.clone(), info.clone()));
        Ok(())
    }
}

type MockNode = CameraNode<MockCamera, FileCalibrationManager, RecordingSink>;

fn mock_node(subscribers: usize) -> (MockNode, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let camera = MockCamera {
        state: state.clone(),
        open: false,
        config: None,
        callback: None,
    };
    let sink = RecordingSink::default();
    sink.subscribers.store(subscribers, Ordering::SeqCst);
    let node = CameraNode::new(
        camera,
        FileCalibrationManager::new("camera"),
        sink,
        DeviceSelector::new(ADDRESS, ""),
    );
    node.open().unwrap();
    (node, state)
}

fn mono_frame(width: u32, height: u32) -> Frame {
    Frame {
        frame_id: 7,
        width,
        height,
        pixel_format: PixelFormat::Mono8,
        image_size: width * height,
        buffer: vec![0x80; (width * height) as usize],
    }
}

fn config(width: u32, height: u32, roi_width: u32, roi_height: u32, url: &str) -> CameraConfig {
    CameraConfig {
        frame_id: "left".to_string(),
        width,
        height,
        roi_width,
        roi_height,
        camera_info_url: url.to_string(),
        ..Default::default()
    }
}

fn write_yaml(path: &Path, fx: f64) {
    let yaml = format!(
        "image_width: 640
image_height: 480
camera_name: left
camera_matrix:
  rows: 3
  cols: 3
  data: [{fx}, 0.0, 320.0, 0.0, {fx}, 240.0, 0.0, 0.0, 1.0]
distortion_model: plumb_bob
distortion_coefficients:
  rows: 1
  cols: 5
  data: [0.1, -0.25, 0.001, 0.002, 0.0]
rectification_matrix:
  rows: 3
  cols: 3
  data: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
projection_matrix:
  rows: 3
  cols: 4
  data: [{fx}, 0.0, 320.0, 0.0, 0.0, {fx}, 240.0, 0.0, 0.0, 0.0, 1.0, 0.0]
"
    );
    fs::write(path, yaml).unwrap();
}

#[test]
fn empty_frame_id_falls_back_to_camera() {
    let (node, _) = mock_node(1);
    let cfg = CameraConfig {
        frame_id: String::new(),
        ..Default::default()
    };
    let report = node.reconfigure(cfg, ReconfigureLevel::Running).unwrap();
    assert_eq!(report.config.frame_id, "camera");
    assert_eq!(node.calibration().frame_id, "camera");
    assert_eq!(node.active_config().unwrap().frame_id, "camera");
}

#[test]
fn frames_are_not_converted_without_subscribers() {
    let (node, _) = mock_node(0);
    let outcome = node.handle_frame(&mono_frame(64, 48), Timestamp::new(1, 0));
    assert_eq!(outcome, FrameOutcome::Skipped);

    let stats = node.stats();
    assert_eq!(stats.converted, 0);
    assert_eq!(stats.skipped, 1);
    assert!(node.sink().published().is_empty());

    node.sink().subscribers.store(2, Ordering::SeqCst);
    let outcome = node.handle_frame(&mono_frame(64, 48), Timestamp::new(1, 0));
    assert_eq!(outcome, FrameOutcome::Published);
    assert_eq!(node.stats().converted, 1);
}

#[test]
fn image_and_info_share_stamp_and_frame() {
    let (node, _) = mock_node(1);
    node.reconfigure(config(64, 48, 0, 0, ""), ReconfigureLevel::Running)
        .unwrap();

    let stamp = Timestamp::new(1_700_000_123, 456_000_000);
    assert_eq!(
        node.handle_frame(&mono_frame(64, 48), stamp),
        FrameOutcome::Published
    );

    let published = node.sink().published();
    assert_eq!(published.len(), 1);
    let (image, info) = &published[0];
    assert_eq!(image.stamp, stamp);
    assert_eq!(info.stamp, stamp);
    assert_eq!(image.frame_id, "left");
    assert_eq!(info.calibration.frame_id, "left");
    assert_eq!(image.encoding, "mono8");
    assert_eq!((image.width, image.height, image.step), (64, 48, 64));
    assert_eq!((info.calibration.width, info.calibration.height), (64, 48));
}

#[test]
fn conversion_and_publish_failures_drop_the_frame() {
    let (node, _) = mock_node(1);

    let mut yuv = mono_frame(8, 8);
    yuv.pixel_format = PixelFormat::from_code(0x0210_001F);
    assert_eq!(
        node.handle_frame(&yuv, Timestamp::new(0, 0)),
        FrameOutcome::ConvertFailed
    );

    node.sink().fail.store(true, Ordering::SeqCst);
    assert_eq!(
        node.handle_frame(&mono_frame(8, 8), Timestamp::new(0, 0)),
        FrameOutcome::PublishFailed
    );

    let stats = node.stats();
    assert_eq!(stats.converted, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.published, 0);
    assert!(node.sink().published().is_empty());
}

#[test]
fn restart_only_for_stop_and_close() {
    let (node, state) = mock_node(1);
    assert_eq!(state.opens.load(Ordering::SeqCst), 1);

    let report = node
        .reconfigure(CameraConfig::default(), ReconfigureLevel::Running)
        .unwrap();
    assert!(!report.restarted);
    assert_eq!(state.opens.load(Ordering::SeqCst), 1);
    assert_eq!(state.closes.load(Ordering::SeqCst), 0);

    let report = node
        .reconfigure(CameraConfig::default(), ReconfigureLevel::Stop)
        .unwrap();
    assert!(report.restarted);
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);
    assert_eq!(state.closes.load(Ordering::SeqCst), 1);

    let report = node
        .reconfigure(
            CameraConfig::default(),
            ReconfigureLevel::from_bits(ReconfigureLevel::RECONFIGURE_CLOSE),
        )
        .unwrap();
    assert!(report.restarted);
    assert_eq!(state.opens.load(Ordering::SeqCst), 3);
    assert!(node.is_open());
}

#[test]
fn applied_config_reads_back() {
    let (node, _) = mock_node(1);
    let cfg = CameraConfig {
        frame_id: "right".to_string(),
        height: 240,
        width: 320,
        binning_x: 2,
        binning_y: 2,
        roi_offset_x: 32,
        roi_offset_y: 16,
        roi_height: 480,
        roi_width: 640,
        camera_info_url: String::new(),
    };
    let report = node
        .reconfigure(cfg.clone(), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(report.config, cfg);
    assert_eq!(node.active_config(), Some(cfg));

    let cal = node.calibration();
    assert_eq!((cal.binning_x, cal.binning_y), (2, 2));
    assert_eq!((cal.roi.x_offset, cal.roi.y_offset), (32, 16));
    assert_eq!((cal.roi.width, cal.roi.height), (640, 480));
}

#[test]
fn calibration_loaded_only_when_url_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.yaml");
    write_yaml(&path, 500.0);
    let url = format!("file://{}", path.display());

    let (node, _) = mock_node(1);
    let report = node
        .reconfigure(config(640, 480, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(report.calibration, CalibrationUpdate::Loaded(url.clone()));
    let cal = node.calibration();
    assert_eq!(cal.k[0], 500.0);
    assert_eq!(cal.d, vec![0.1, -0.25, 0.001, 0.002, 0.0]);
    assert_eq!(cal.distortion_model, "plumb_bob");
    assert_eq!(cal.frame_id, "left");

    // the file changes on disk but the URL does not
    write_yaml(&path, 900.0);
    let report = node
        .reconfigure(config(320, 240, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(report.calibration, CalibrationUpdate::Unchanged);
    let cal = node.calibration();
    assert_eq!(cal.k[0], 500.0);
    assert_eq!((cal.width, cal.height), (320, 240));
}

#[test]
fn rectification_follows_roi_or_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.yaml");
    write_yaml(&path, 500.0);
    let url = path.display().to_string();

    let (node, _) = mock_node(1);

    let report = node
        .reconfigure(config(640, 480, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();
    assert!(report.do_rectify);
    assert!(node.calibration().roi.do_rectify);

    let report = node
        .reconfigure(config(320, 240, 640, 480, &url), ReconfigureLevel::Running)
        .unwrap();
    assert!(report.do_rectify);

    let report = node
        .reconfigure(config(320, 240, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();
    assert!(!report.do_rectify);
    assert!(!node.calibration().roi.do_rectify);
}

#[test]
fn invalid_url_keeps_previous_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.yaml");
    write_yaml(&path, 500.0);
    let url = format!("file://{}", path.display());

    let (node, _) = mock_node(1);
    node.reconfigure(config(640, 480, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();

    let bad = "package://calibration/left.yaml";
    let report = node
        .reconfigure(config(640, 480, 0, 0, bad), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(report.calibration, CalibrationUpdate::InvalidUrl(bad.to_string()));
    let cal = node.calibration();
    assert!(cal.is_calibrated());
    assert_eq!(cal.k[0], 500.0);
    assert!(report.do_rectify);
}

#[test]
fn failed_load_keeps_intrinsics_and_follows_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.yaml");
    write_yaml(&path, 500.0);
    let url = path.display().to_string();

    let (node, _) = mock_node(1);
    node.reconfigure(config(640, 480, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();

    let missing = "/nonexistent/calibration/left.yaml";
    let mut cfg = config(320, 240, 100, 100, missing);
    cfg.frame_id = "right".to_string();
    cfg.roi_offset_x = 8;
    let report = node
        .reconfigure(cfg.clone(), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(
        report.calibration,
        CalibrationUpdate::LoadFailed(missing.to_string())
    );

    let active = node.active_config().unwrap();
    assert_eq!(active, cfg);
    let cal = node.calibration();
    assert_eq!(cal.frame_id, active.frame_id);
    assert_eq!((cal.width, cal.height), (active.width, active.height));
    assert_eq!(cal.roi.x_offset, active.roi_offset_x);
    assert_eq!((cal.roi.width, cal.roi.height), (active.roi_width, active.roi_height));

    // intrinsics from the earlier load survive
    assert_eq!(cal.k[0], 500.0);
    assert_eq!((cal.calibration_width, cal.calibration_height), (640, 480));
    // 640x480 calibration against 320x240 with a 100x100 ROI
    assert!(!report.do_rectify);
    assert!(!cal.roi.do_rectify);

    // the failed URL is retried, and the same config now qualifies for
    // rectification through its full resolution
    let report = node
        .on_reconfigure(config(640, 480, 100, 100, missing), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(
        report.calibration,
        CalibrationUpdate::LoadFailed(missing.to_string())
    );
    assert!(report.do_rectify);
    assert!(node.calibration().roi.do_rectify);
}

#[test]
#[serial]
fn overflowing_geometry_is_rejected() {
    let camera = SimulatedCamera::new(
        vec![SimulatedDevice::gige("DEV_SIM0001", ADDRESS, 1280, 960)],
        100,
    );
    let node = CameraNode::new(
        camera,
        FileCalibrationManager::new("camera"),
        RecordingSink::default(),
        DeviceSelector::new(ADDRESS, ""),
    );
    node.open().unwrap();
    node.reconfigure(config(640, 480, 0, 0, ""), ReconfigureLevel::Running)
        .unwrap();

    let cfg = CameraConfig {
        width: 0x8000_0000,
        binning_x: 2,
        ..Default::default()
    };
    let err = node
        .reconfigure(cfg.clone(), ReconfigureLevel::Running)
        .unwrap_err();
    assert_eq!(err.step, ReconfigureStep::Apply);
    assert!(matches!(
        err.source,
        Error::InvalidFeature { feature: "Width", .. }
    ));
    assert!(node.on_reconfigure(cfg, ReconfigureLevel::Running).is_none());

    assert_eq!(node.active_config().unwrap().width, 640);
    assert_eq!(node.calibration().width, 640);
    node.close();
}

#[test]
fn rejected_config_stops_reconfiguration() {
    let (node, state) = mock_node(1);
    node.reconfigure(config(640, 480, 0, 0, ""), ReconfigureLevel::Running)
        .unwrap();

    state.fail_apply.store(true, Ordering::SeqCst);
    let err = node
        .reconfigure(config(320, 240, 0, 0, ""), ReconfigureLevel::Running)
        .unwrap_err();
    assert_eq!(err.step, ReconfigureStep::Apply);
    assert_eq!(node.calibration().width, 640);

    state.fail_apply.store(false, Ordering::SeqCst);
    let report = node
        .on_reconfigure(config(320, 240, 0, 0, ""), ReconfigureLevel::Running)
        .unwrap();
    assert_eq!(report.config.width, 320);
    assert_eq!(node.calibration().width, 320);
}

#[test]
fn dewarp_json_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dewarp.json");
    fs::write(
        &path,
        r#"{
            "dewarpConfigArray": [{
                "image_width": 640,
                "image_height": 480,
                "camera_matrix": [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
                "distortion_coeff": [0.1, 0.01, 0.0, 0.0, 0.0]
            }]
        }"#,
    )
    .unwrap();
    let url = path.display().to_string();

    let (node, _) = mock_node(1);
    let report = node
        .reconfigure(config(640, 480, 0, 0, &url), ReconfigureLevel::Running)
        .unwrap();
    assert!(report.do_rectify);

    let cal = node.calibration();
    assert_eq!(cal.r, IDENTITY3);
    assert_eq!(cal.d.len(), 5);
    assert_eq!(&cal.p[..4], &[500.0, 0.0, 320.0, 0.0]);
    assert_eq!(cal.p[11], 0.0);
    assert_eq!((cal.calibration_width, cal.calibration_height), (640, 480));
}

#[test]
fn saved_calibration_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("left.yaml");
    write_yaml(&path, 612.5);

    let mut mgr = FileCalibrationManager::new("left");
    mgr.load_url(&path.display().to_string()).unwrap();
    mgr.save_yaml(&dir.path().join("left_copy.yaml")).unwrap();

    // ${NAME} expands to the camera name
    let mut copy = FileCalibrationManager::new("left");
    let url = format!("file://{}/${{NAME}}_copy.yaml", dir.path().display());
    copy.load_url(&url).unwrap();
    assert_eq!(copy.current(), mgr.current());
}

#[test]
#[serial]
fn driver_publishes_simulated_frames() {
    let camera = SimulatedCamera::new(
        vec![SimulatedDevice::gige("DEV_SIM0001", ADDRESS, 1280, 960)],
        100,
    );
    let sink = RecordingSink::default();
    sink.subscribers.store(1, Ordering::SeqCst);
    let node = CameraNode::new(
        camera,
        FileCalibrationManager::new("camera"),
        sink,
        DeviceSelector::new(ADDRESS, ""),
    );
    let driver = Driver::start(node, 4).unwrap();
    let node = driver.node().clone();
    assert!(node.is_open());

    let report = node
        .on_reconfigure(config(320, 240, 0, 0, ""), ReconfigureLevel::Close)
        .unwrap();
    assert!(report.restarted);

    let deadline = Instant::now() + Duration::from_secs(5);
    let image = loop {
        let found = node
            .sink()
            .published()
            .into_iter()
            .find(|(image, _)| image.width == 320);
        if let Some((image, info)) = found {
            assert_eq!(image.stamp, info.stamp);
            break image;
        }
        assert!(Instant::now() < deadline, "no 320x240 frame published");
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(image.height, 240);
    assert_eq!(image.frame_id, "left");
    assert_eq!(image.data.len(), 320 * 240);

    drop(driver);
    assert!(!node.is_open());
    let published = node.sink().published().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(node.sink().published().len(), published);
}

#[test]
#[serial]
fn driver_fails_when_camera_is_missing() {
    let camera = SimulatedCamera::new(
        vec![SimulatedDevice::gige("DEV_SIM0001", ADDRESS, 1280, 960)],
        100,
    );
    let node = CameraNode::new(
        camera,
        FileCalibrationManager::new("camera"),
        RecordingSink::default(),
        DeviceSelector::new("10.1.1.1", ""),
    );
    assert!(matches!(
        Driver::start(node, 4),
        Err(Error::Connection {
            source: VmbError::NotFound,
            ..
        })
    ));
}
