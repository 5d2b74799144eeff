// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Output channel for image / camera info pairs.

use crate::{calibration::StampedCalibration, error::Error, pixel::Image};
use cdr::{CdrLe, Infinite};
use edgefirst_schemas::{
    builtin_interfaces::Time,
    sensor_msgs::{self, CameraInfo, RegionOfInterest},
    std_msgs::Header,
};
use tracing::warn;
use unix_ts::Timestamp;
use zenoh::{pubsub::Publisher, Session, Wait};

/// Where converted images and their calibration go.
pub trait ImageSink: Send + Sync {
    /// Number of consumers currently attached to the output.
    fn subscriber_count(&self) -> usize;

    /// Publishes one image together with the calibration it was taken with.
    fn publish(&self, image: &Image, info: &StampedCalibration) -> Result<(), Error>;
}

fn header(stamp: &Timestamp, frame_id: &str) -> Header {
    Header {
        stamp: Time {
            sec: stamp.seconds() as i32,
            nanosec: stamp.subsec(9),
        },
        frame_id: frame_id.to_string(),
    }
}

pub fn image_message(image: &Image) -> sensor_msgs::Image {
    sensor_msgs::Image {
        header: header(&image.stamp, &image.frame_id),
        height: image.height,
        width: image.width,
        encoding: image.encoding.to_string(),
        is_bigendian: 0,
        step: image.step,
        data: image.data.clone(),
    }
}

pub fn info_message(info: &StampedCalibration) -> CameraInfo {
    let cal = &info.calibration;
    CameraInfo {
        header: header(&info.stamp, &cal.frame_id),
        height: cal.height,
        width: cal.width,
        distortion_model: cal.distortion_model.clone(),
        d: cal.d.clone(),
        k: cal.k,
        r: cal.r,
        p: cal.p,
        binning_x: cal.binning_x,
        binning_y: cal.binning_y,
        roi: RegionOfInterest {
            x_offset: cal.roi.x_offset,
            y_offset: cal.roi.y_offset,
            height: cal.roi.height,
            width: cal.roi.width,
            do_rectify: cal.roi.do_rectify,
        },
    }
}

/// Publishes CDR encoded `sensor_msgs/Image` and `sensor_msgs/CameraInfo`
/// over Zenoh.
pub struct ZenohSink {
    image: Publisher<'static>,
    info: Publisher<'static>,
}

impl ZenohSink {
    pub async fn new(session: &Session, image_topic: &str, info_topic: &str) -> Result<Self, Error> {
        let image = session
            .declare_publisher(image_topic.to_owned())
            .await
            .map_err(|e| Error::Zenoh(e.to_string()))?;
        let info = session
            .declare_publisher(info_topic.to_owned())
            .await
            .map_err(|e| Error::Zenoh(e.to_string()))?;
        Ok(Self { image, info })
    }

    fn matching(publisher: &Publisher<'static>) -> bool {
        match publisher.matching_status().wait() {
            Ok(status) => status.matching(),
            Err(e) => {
                // unknown status counts as matched
                warn!("matching status for {} failed: {}", publisher.key_expr(), e);
                true
            }
        }
    }

    fn put(publisher: &Publisher<'static>, payload: Vec<u8>) -> Result<(), Error> {
        publisher
            .put(payload)
            .wait()
            .map_err(|e| Error::Zenoh(e.to_string()))
    }
}

impl ImageSink for ZenohSink {
    fn subscriber_count(&self) -> usize {
        [&self.image, &self.info]
            .into_iter()
            .filter(|publisher| Self::matching(publisher))
            .count()
    }

    fn publish(&self, image: &Image, info: &StampedCalibration) -> Result<(), Error> {
        let image_msg = cdr::serialize::<_, _, CdrLe>(&image_message(image), Infinite)
            .map_err(|e| Error::Publish(e.to_string()))?;
        let info_msg = cdr::serialize::<_, _, CdrLe>(&info_message(info), Infinite)
            .map_err(|e| Error::Publish(e.to_string()))?;

        Self::put(&self.image, image_msg)?;
        Self::put(&self.info, info_msg)
    }
}
