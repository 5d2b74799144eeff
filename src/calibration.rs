// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera calibration records and the manager that loads them.
//!
//! Calibration files are addressed by URL. Two layouts are understood:
//!
//! - ROS camera calibration YAML (`.yaml` / `.yml`), as written by the
//!   `camera_calibration` tools.
//! - isp-imx dewarp JSON (`.json`), the `dewarpConfigArray` format shipped
//!   with the i.MX8 ISP.
//!
//! `${NAME}` in a URL expands to the current camera name.

use crate::{config::CameraConfig, error::Error};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use unix_ts::Timestamp;

pub const IDENTITY3: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionOfInterest {
    pub x_offset: u32,
    pub y_offset: u32,
    pub height: u32,
    pub width: u32,
    pub do_rectify: bool,
}

/// Calibration and operating metadata published alongside every image.
///
/// `calibration_height`/`calibration_width` hold the image size the
/// intrinsics were computed for and are zero while uncalibrated.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRecord {
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub distortion_model: String,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
    pub binning_x: u32,
    pub binning_y: u32,
    pub roi: RegionOfInterest,
    pub calibration_height: u32,
    pub calibration_width: u32,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            frame_id: String::new(),
            height: 0,
            width: 0,
            distortion_model: String::new(),
            d: Vec::new(),
            k: [0.0; 9],
            r: [0.0; 9],
            p: [0.0; 12],
            binning_x: 0,
            binning_y: 0,
            roi: RegionOfInterest::default(),
            calibration_height: 0,
            calibration_width: 0,
        }
    }
}

impl CalibrationRecord {
    pub fn is_calibrated(&self) -> bool {
        self.calibration_height != 0 && self.calibration_width != 0
    }

    /// Copies the operating parameters of `config` into the record, leaving
    /// the intrinsics untouched.
    pub fn apply_config(&mut self, config: &CameraConfig) {
        self.frame_id = config.frame_id.clone();
        self.height = config.height;
        self.width = config.width;
        self.binning_x = config.binning_x;
        self.binning_y = config.binning_y;
        self.roi.x_offset = config.roi_offset_x;
        self.roi.y_offset = config.roi_offset_y;
        self.roi.height = config.roi_height;
        self.roi.width = config.roi_width;
    }

    /// Whether the stored calibration can be used to rectify images taken
    /// with `config`: its image size must match either the requested ROI or
    /// the requested resolution.
    ///
    /// Matching the full resolution does not prove the ROI is covered by the
    /// calibration; consumers only get a hint.
    pub fn rectification_eligible(&self, config: &CameraConfig) -> bool {
        let (h, w) = (self.calibration_height, self.calibration_width);
        if h == 0 || w == 0 {
            return false;
        }
        let roi_matches = h == config.roi_height && w == config.roi_width;
        let resolution_matches = h == config.height && w == config.width;
        roi_matches || resolution_matches
    }
}

/// A calibration record stamped with the arrival time of the frame it
/// accompanies.
#[derive(Clone, Debug, PartialEq)]
pub struct StampedCalibration {
    pub stamp: Timestamp,
    pub calibration: CalibrationRecord,
}

/// Source of calibration data for the node.
pub trait CalibrationManager: Send {
    fn current(&self) -> CalibrationRecord;

    fn set_current(&mut self, record: CalibrationRecord);

    /// Selects the calibration profile by camera name. Returns `false` and
    /// keeps the previous name when `name` is not a valid camera name; the
    /// caller reports it.
    fn set_camera_name(&mut self, name: &str) -> bool;

    fn validate_url(&self, url: &str) -> bool;

    /// Loads calibration from `url`, replacing the current record. On error
    /// the current record is left untouched.
    fn load_url(&mut self, url: &str) -> Result<(), Error>;
}

/// Where a calibration URL points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalibrationSource {
    /// No calibration.
    Empty,
    Yaml(PathBuf),
    Json(PathBuf),
}

/// Calibration manager backed by local files.
#[derive(Debug)]
pub struct FileCalibrationManager {
    camera_name: String,
    record: CalibrationRecord,
}

impl FileCalibrationManager {
    pub fn new(camera_name: &str) -> Self {
        let mut mgr = Self {
            camera_name: "camera".to_string(),
            record: CalibrationRecord::default(),
        };
        mgr.set_camera_name(camera_name);
        mgr
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    /// Expands `${NAME}` and classifies the URL, `None` if it is not usable.
    pub fn resolve(&self, url: &str) -> Option<CalibrationSource> {
        let url = url.replace("${NAME}", &self.camera_name);
        if url.is_empty() {
            return Some(CalibrationSource::Empty);
        }

        let path = match url.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None if url.starts_with('/') => PathBuf::from(&url),
            None => return None,
        };

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Some(CalibrationSource::Yaml(path)),
            Some("json") => Some(CalibrationSource::Json(path)),
            _ => None,
        }
    }

    /// Writes the current record as ROS calibration YAML.
    pub fn save_yaml(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path)?;
        let doc = YamlCalibration::from_record(&self.record, &self.camera_name);
        serde_yaml::to_writer(file, &doc)?;
        info!("saved calibration for {} to {:?}", self.camera_name, path);
        Ok(())
    }
}

impl CalibrationManager for FileCalibrationManager {
    fn current(&self) -> CalibrationRecord {
        self.record.clone()
    }

    fn set_current(&mut self, record: CalibrationRecord) {
        self.record = record;
    }

    fn set_camera_name(&mut self, name: &str) -> bool {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            self.camera_name = name.to_string();
        } else {
            debug!("invalid camera name '{}', keeping '{}'", name, self.camera_name);
        }
        valid
    }

    fn validate_url(&self, url: &str) -> bool {
        self.resolve(url).is_some()
    }

    fn load_url(&mut self, url: &str) -> Result<(), Error> {
        let source = self
            .resolve(url)
            .ok_or_else(|| Error::Calibration(format!("invalid calibration URL: {url}")))?;

        self.record = match &source {
            CalibrationSource::Empty => CalibrationRecord::default(),
            CalibrationSource::Yaml(path) => load_yaml(path)?,
            CalibrationSource::Json(path) => load_dewarp_json(path)?,
        };
        debug!("loaded calibration {:?}: {:?}", source, self.record);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    fn new(rows: usize, cols: usize, data: &[f64]) -> Self {
        Self {
            rows,
            cols,
            data: data.to_vec(),
        }
    }

    fn fixed<const N: usize>(&self, name: &str) -> Result<[f64; N], Error> {
        if self.rows * self.cols != N {
            return Err(Error::Calibration(format!(
                "{name} is {}x{} but {N} elements are required",
                self.rows, self.cols
            )));
        }
        self.data.as_slice().try_into().map_err(|_| {
            Error::Calibration(format!(
                "{name} has {} elements but {N} are required",
                self.data.len()
            ))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct YamlCalibration {
    image_width: u32,
    image_height: u32,
    #[serde(default)]
    camera_name: String,
    camera_matrix: Matrix,
    #[serde(default = "YamlCalibration::plumb_bob")]
    distortion_model: String,
    distortion_coefficients: Matrix,
    rectification_matrix: Matrix,
    projection_matrix: Matrix,
}

impl YamlCalibration {
    fn plumb_bob() -> String {
        "plumb_bob".to_string()
    }

    fn from_record(record: &CalibrationRecord, camera_name: &str) -> Self {
        Self {
            image_width: record.calibration_width,
            image_height: record.calibration_height,
            camera_name: camera_name.to_string(),
            camera_matrix: Matrix::new(3, 3, &record.k),
            distortion_model: record.distortion_model.clone(),
            distortion_coefficients: Matrix::new(1, record.d.len(), &record.d),
            rectification_matrix: Matrix::new(3, 3, &record.r),
            projection_matrix: Matrix::new(3, 4, &record.p),
        }
    }
}

fn load_yaml(path: &Path) -> Result<CalibrationRecord, Error> {
    let file = File::open(path)?;
    let cal: YamlCalibration = serde_yaml::from_reader(file)?;

    Ok(CalibrationRecord {
        height: cal.image_height,
        width: cal.image_width,
        distortion_model: cal.distortion_model,
        d: cal.distortion_coefficients.data,
        k: cal.camera_matrix.fixed("camera_matrix")?,
        r: cal.rectification_matrix.fixed("rectification_matrix")?,
        p: cal.projection_matrix.fixed("projection_matrix")?,
        calibration_height: cal.image_height,
        calibration_width: cal.image_width,
        ..Default::default()
    })
}

fn load_dewarp_json(path: &Path) -> Result<CalibrationRecord, Error> {
    let file = File::open(path)?;
    let json: serde_json::Value = serde_json::from_reader(file)?;
    let dewarp_configs = &json["dewarpConfigArray"];
    if !dewarp_configs.is_array() {
        return Err(Error::Calibration(
            "Did not find dewarpConfigArray as an array".to_string(),
        ));
    }
    let dewarp_config = &dewarp_configs[0];

    let d: Vec<f64> = match dewarp_config["distortion_coeff"].as_array() {
        Some(v) => v.iter().map(|x| x.as_f64().unwrap_or(0.0)).collect(),
        None => {
            return Err(Error::Calibration(
                "Did not find distortion_coeff as an array".to_string(),
            ))
        }
    };

    let k: Vec<f64> = match dewarp_config["camera_matrix"].as_array() {
        Some(v) => v.iter().map(|x| x.as_f64().unwrap_or(0.0)).collect(),
        None => {
            return Err(Error::Calibration(
                "Did not find camera_matrix as an array".to_string(),
            ))
        }
    };
    let k: [f64; 9] = k.as_slice().try_into().map_err(|_| {
        Error::Calibration(format!(
            "Expected exactly 9 elements in camera_matrix array but found {}",
            k.len()
        ))
    })?;
    let p = [
        k[0], k[1], k[2], 0.0, k[3], k[4], k[5], 0.0, k[6], k[7], k[8], 0.0,
    ];

    let dim = |key: &str| dewarp_config[key].as_u64().unwrap_or(0) as u32;
    let (width, height) = (dim("image_width"), dim("image_height"));

    Ok(CalibrationRecord {
        height,
        width,
        distortion_model: "plumb_bob".to_string(),
        d,
        k,
        r: IDENTITY3,
        p,
        calibration_height: height,
        calibration_width: width,
        ..Default::default()
    })
}
