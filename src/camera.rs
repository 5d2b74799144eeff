// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera session abstraction.
//!
//! The node only ever talks to the vendor SDK through [`CameraSession`]. The
//! SDK owns frame acquisition and delivers every frame on its own thread
//! through the registered [`FrameCallback`].

use crate::{config::CameraConfig, error::Error, pixel::PixelFormat};
use core::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::info;

/// Callback invoked on the session's delivery thread once per frame.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// A frame as delivered by the camera.
///
/// The buffer is owned by the frame so it can be moved off the delivery
/// thread; `image_size` is the size the camera declared, which may include
/// row padding.
#[derive(Clone, Debug)]
pub struct Frame {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub image_size: u32,
    pub buffer: Vec<u8>,
}

/// Physical interface a device is attached through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceType {
    Firewire,
    Ethernet,
    Usb,
    Unknown,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InterfaceType::Firewire => "FireWire",
            InterfaceType::Ethernet => "GigE",
            InterfaceType::Usb => "USB",
            InterfaceType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Access permitted on a device, as the SDK bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessMode(pub u32);

impl AccessMode {
    pub const NONE: AccessMode = AccessMode(0);
    pub const FULL: AccessMode = AccessMode(1);
    pub const READ: AccessMode = AccessMode(2);
    pub const CONFIG: AccessMode = AccessMode(4);
    pub const LITE: AccessMode = AccessMode(8);

    pub const fn contains(self, other: AccessMode) -> bool {
        self.0 & other.0 != 0
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = if self.contains(AccessMode::FULL) {
            "Read and write access"
        } else if self.contains(AccessMode::READ) {
            "Only read access"
        } else if self.contains(AccessMode::CONFIG) {
            "Device configuration access"
        } else if self.contains(AccessMode::LITE) {
            "Device read/write access without feature access (only addresses)"
        } else if *self == AccessMode::NONE {
            "No access"
        } else {
            "Undefined access"
        };
        f.write_str(text)
    }
}

/// Identity of a device found during enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub model: String,
    pub serial: String,
    pub interface_id: String,
    pub interface: InterfaceType,
    pub access: AccessMode,
    /// Network address for GigE devices.
    pub address: Option<String>,
}

impl DeviceInfo {
    /// Logs the device the way the SDK's camera listing does.
    pub fn log(&self) {
        info!("Found camera named {}:", self.name);
        info!(" - Model Name     : {}", self.model);
        info!(" - Camera ID      : {}", self.id);
        info!(" - Serial Number  : {}", self.serial);
        info!(" - Interface ID   : {}", self.interface_id);
        info!(" - Interface type : {}", self.interface);
        info!(" - Access type    : {}", self.access);
    }
}

/// How the node asks the session for its device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceSelector {
    /// Network address, takes priority when set.
    pub address: String,
    /// Hardware identifier (GUID / camera id).
    pub guid: String,
}

impl DeviceSelector {
    pub fn new(address: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            guid: guid.into(),
        }
    }

    /// Picks the requested device out of an enumeration. With neither an
    /// address nor an identifier the first device is used.
    pub fn select<'a, I>(&self, devices: I) -> Result<&'a DeviceInfo, VmbError>
    where
        I: IntoIterator<Item = &'a DeviceInfo>,
    {
        let mut devices = devices.into_iter();
        let found = if !self.address.is_empty() {
            devices.find(|d| d.address.as_deref() == Some(self.address.as_str()))
        } else if !self.guid.is_empty() {
            devices.find(|d| d.id == self.guid)
        } else {
            devices.next()
        };
        found.ok_or(VmbError::NotFound)
    }
}

/// The camera connection this node drives.
///
/// `close` must be idempotent and stop frame delivery before returning.
pub trait CameraSession: Send {
    /// Enumerates the devices visible to the SDK.
    fn list_devices(&self) -> Vec<DeviceInfo>;

    /// Opens the device resolved by `address` or `guid` and starts streaming.
    fn open(&mut self, address: &str, guid: &str) -> Result<DeviceInfo, Error>;

    /// Stops streaming and releases the device.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Registers the per-frame callback. Must be called before `open`.
    fn set_frame_callback(&mut self, callback: FrameCallback);

    /// Applies acquisition parameters to the open device.
    fn apply_config(&mut self, config: &CameraConfig) -> Result<(), Error>;

    /// The configuration currently held by the device.
    fn active_config(&self) -> Option<CameraConfig>;
}

/// SDK status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum VmbError {
    #[error("Unexpected fault in VmbApi or driver.")]
    InternalFault,
    #[error("API not started.")]
    ApiNotStarted,
    #[error("Not found.")]
    NotFound,
    #[error("Invalid handle ")]
    BadHandle,
    #[error("Device not open.")]
    DeviceNotOpen,
    #[error("Invalid access.")]
    InvalidAccess,
    #[error("Bad parameter.")]
    BadParameter,
    #[error("Wrong DLL version.")]
    StructSize,
    #[error("More data returned than memory provided.")]
    MoreData,
    #[error("Wrong type.")]
    WrongType,
    #[error("Invalid value.")]
    InvalidValue,
    #[error("Timeout.")]
    Timeout,
    #[error("TL error.")]
    Other,
    #[error("Resource not available.")]
    Resources,
    #[error("Invalid call.")]
    InvalidCall,
    #[error("TL not loaded.")]
    NoTransportLayer,
    #[error("Not implemented.")]
    NotImplemented,
    #[error("Not supported.")]
    NotSupported,
    #[error("Unsupported error code passed.")]
    Unknown(i32),
}

impl VmbError {
    /// Maps an SDK return code, `None` for success.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => return None,
            -1 => VmbError::InternalFault,
            -2 => VmbError::ApiNotStarted,
            -3 => VmbError::NotFound,
            -4 => VmbError::BadHandle,
            -5 => VmbError::DeviceNotOpen,
            -6 => VmbError::InvalidAccess,
            -7 => VmbError::BadParameter,
            -8 => VmbError::StructSize,
            -9 => VmbError::MoreData,
            -10 => VmbError::WrongType,
            -11 => VmbError::InvalidValue,
            -12 => VmbError::Timeout,
            -13 => VmbError::Other,
            -14 => VmbError::Resources,
            -15 => VmbError::InvalidCall,
            -16 => VmbError::NoTransportLayer,
            -17 => VmbError::NotImplemented,
            -18 => VmbError::NotSupported,
            other => VmbError::Unknown(other),
        };
        Some(err)
    }
}
