// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Vendor pixel formats and the frame to image translation.

use crate::{camera::Frame, error::ConvertError};
use core::fmt;
use unix_ts::Timestamp;

/// ROS `sensor_msgs/image_encodings` names produced by this node.
pub mod encodings {
    pub const MONO8: &str = "mono8";
    pub const MONO16: &str = "mono16";
    pub const BAYER_GRBG8: &str = "bayer_grbg8";
    pub const BAYER_RGGB8: &str = "bayer_rggb8";
    pub const BAYER_GBRG8: &str = "bayer_gbrg8";
    pub const BAYER_BGGR8: &str = "bayer_bggr8";
    pub const RGB8: &str = "rgb8";
    pub const BGR8: &str = "bgr8";
    pub const RGBA8: &str = "rgba8";
    pub const BGRA8: &str = "bgra8";
    pub const TYPE_16SC1: &str = "16SC1";
    pub const TYPE_32SC4: &str = "32SC4";
    pub const TYPE_16UC3: &str = "16UC3";
}

macro_rules! pixel_formats {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// Pixel formats reported by the camera, identified by their GenICam
        /// PFNC code.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum PixelFormat {
            $($name,)+
            /// Any format without a known image encoding (YUV, ARGB, ...).
            Other(u32),
        }

        impl PixelFormat {
            pub const fn from_code(code: u32) -> Self {
                match code {
                    $($code => PixelFormat::$name,)+
                    other => PixelFormat::Other(other),
                }
            }

            pub const fn code(self) -> u32 {
                match self {
                    $(PixelFormat::$name => $code,)+
                    PixelFormat::Other(code) => code,
                }
            }

            pub const fn name(self) -> Option<&'static str> {
                match self {
                    $(PixelFormat::$name => Some(stringify!($name)),)+
                    PixelFormat::Other(_) => None,
                }
            }
        }
    };
}

pixel_formats! {
    Mono8 = 0x0108_0001,
    Mono10 = 0x0110_0003,
    Mono12 = 0x0110_0005,
    Mono12Packed = 0x010C_0006,
    Mono14 = 0x0110_0025,
    Mono16 = 0x0110_0007,
    BayerGR8 = 0x0108_0008,
    BayerRG8 = 0x0108_0009,
    BayerGB8 = 0x0108_000A,
    BayerBG8 = 0x0108_000B,
    BayerGR10 = 0x0110_000C,
    BayerRG10 = 0x0110_000D,
    BayerGB10 = 0x0110_000E,
    BayerBG10 = 0x0110_000F,
    BayerGR12 = 0x0110_0010,
    BayerRG12 = 0x0110_0011,
    BayerGB12 = 0x0110_0012,
    BayerBG12 = 0x0110_0013,
    BayerGR12Packed = 0x010C_002A,
    BayerRG12Packed = 0x010C_002B,
    BayerGB12Packed = 0x010C_002C,
    BayerBG12Packed = 0x010C_002D,
    BayerGR16 = 0x0110_002E,
    BayerRG16 = 0x0110_002F,
    BayerGB16 = 0x0110_0030,
    BayerBG16 = 0x0110_0031,
    Rgb8 = 0x0218_0014,
    Bgr8 = 0x0218_0015,
    Rgba8 = 0x0220_0016,
    Bgra8 = 0x0220_0017,
    Rgb12 = 0x0230_001A,
    Rgb16 = 0x0230_0033,
}

impl PixelFormat {
    /// Image encoding published for this format, `None` when the format has
    /// no equivalent and frames in it are dropped.
    pub const fn encoding(self) -> Option<&'static str> {
        use PixelFormat::*;
        match self {
            Mono8 => Some(encodings::MONO8),
            Mono10 | Mono12 | Mono12Packed | Mono14 | Mono16 => Some(encodings::MONO16),
            BayerGR8 => Some(encodings::BAYER_GRBG8),
            BayerRG8 => Some(encodings::BAYER_RGGB8),
            BayerGB8 => Some(encodings::BAYER_GBRG8),
            BayerBG8 => Some(encodings::BAYER_BGGR8),
            BayerGR10 | BayerRG10 | BayerGB10 | BayerBG10 | BayerGR12 | BayerRG12 | BayerGB12
            | BayerBG12 | BayerGR16 | BayerRG16 | BayerGB16 | BayerBG16 => {
                Some(encodings::TYPE_16SC1)
            }
            BayerGR12Packed | BayerRG12Packed | BayerGB12Packed | BayerBG12Packed => {
                Some(encodings::TYPE_32SC4)
            }
            Rgb8 => Some(encodings::RGB8),
            Bgr8 => Some(encodings::BGR8),
            Rgba8 => Some(encodings::RGBA8),
            Bgra8 => Some(encodings::BGRA8),
            Rgb12 | Rgb16 => Some(encodings::TYPE_16UC3),
            Other(_) => None,
        }
    }

    /// Bits per pixel encoded in the PFNC code.
    pub const fn bits_per_pixel(self) -> u32 {
        (self.code() >> 16) & 0xff
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:#010x}", self.code()),
        }
    }
}

/// A converted camera frame, ready to be published as `sensor_msgs/Image`.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub stamp: Timestamp,
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub encoding: &'static str,
    pub step: u32,
    pub data: Vec<u8>,
}

/// Translates one vendor frame into an image message.
///
/// The row stride is derived from the declared image size, so padded rows
/// are carried through unchanged. The stamp and frame id are left empty for
/// the caller to fill in.
pub fn frame_to_image(frame: &Frame) -> Result<Image, ConvertError> {
    let encoding = frame
        .pixel_format
        .encoding()
        .ok_or(ConvertError::UnsupportedFormat(frame.pixel_format))?;

    if frame.height == 0 {
        return Err(ConvertError::EmptyFrame);
    }

    let step = frame.image_size / frame.height;
    let expected = step as usize * frame.height as usize;
    if frame.buffer.len() < expected {
        return Err(ConvertError::ShortBuffer {
            expected,
            actual: frame.buffer.len(),
        });
    }

    Ok(Image {
        stamp: Timestamp::new(0, 0),
        frame_id: String::new(),
        height: frame.height,
        width: frame.width,
        encoding,
        step,
        data: frame.buffer[..expected].to_vec(),
    })
}
