// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_vimba_camera::{
    args::Args,
    calibration::FileCalibrationManager,
    config::{ReconfigureLevel, ReconfigureRequest},
    node::{CameraNode, Driver},
    sim::{SimulatedCamera, SimulatedDevice},
    sink::ZenohSink,
};
use std::{error::Error, time::Duration};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};
use zenoh::config::Config;

fn init_logging(args: &Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let console = if args.tokio_console {
        Some(console_subscriber::spawn())
    } else {
        None
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );

    let journald = match tracing_journald::layer() {
        Ok(layer) => Some(layer.with_filter(LevelFilter::INFO)),
        Err(_) => None,
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(console)
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    init_logging(&args)?;
    info!("EdgeFirst Vimba Camera Publisher");

    let session = zenoh::open(Config::try_from(args.clone())?).await?;
    let sink = ZenohSink::new(&session, &args.image_topic, &args.info_topic).await?;

    let address = if args.ip.is_empty() {
        "127.0.0.1"
    } else {
        args.ip.as_str()
    };
    let id = if args.guid.is_empty() {
        "DEV_SIM0001"
    } else {
        args.guid.as_str()
    };
    let device = SimulatedDevice::gige(id, address, args.sensor_size[0], args.sensor_size[1]);
    let camera = SimulatedCamera::new(vec![device], args.fps);

    let node = CameraNode::new(
        camera,
        FileCalibrationManager::new(&args.frame_id),
        sink,
        args.device(),
    );
    let driver = Driver::start(node, args.queue_depth)?;
    let node = driver.node().clone();

    let initial = args.camera_config();
    let first = node.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || {
        first.on_reconfigure(initial, ReconfigureLevel::Close)
    })
    .await
    {
        error!("initial reconfiguration aborted: {e}");
    }

    let subscriber = session
        .declare_subscriber(args.config_topic.clone())
        .await?;
    info!("listening for reconfiguration on {}", args.config_topic);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            sample = subscriber.recv_async() => {
                let sample = match sample {
                    Ok(sample) => sample,
                    Err(e) => {
                        error!("config subscriber closed: {e}");
                        break;
                    }
                };
                match ReconfigureRequest::from_json(&sample.payload().to_bytes()) {
                    Ok(request) => {
                        let node = node.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || {
                            node.on_reconfigure(request.config, request.level)
                        })
                        .await
                        {
                            error!("reconfiguration aborted: {e}");
                        }
                    }
                    Err(e) => warn!("invalid reconfiguration request: {e}"),
                }
            }
            _ = stats_interval.tick() => {
                let stats = node.stats();
                debug!(
                    "frames converted: {} published: {} skipped: {} dropped: {} failed: {}",
                    stats.converted, stats.published, stats.skipped, stats.dropped, stats.failed
                );
            }
        }
    }

    subscriber.undeclare().await?;
    drop(node);
    drop(driver);
    session.close().await?;
    Ok(())
}
