use std::path::Path;

use anyhow::{Context, bail};
use minimap_nav::{BgrImage, DetectionCell, DetectionFeed, DetectorConfig, Region};
use opencv::{
    core::{self, Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{info, warn};

/// Runs the detector on the minimap `region` of every frame of `input` and
/// writes the frames to `output` with the region outlined, the agent ringed in
/// green and every other marker ringed in red.
pub fn annotate(input: &Path, output: &Path, region: Region, config: DetectorConfig) -> anyhow::Result<()> {
    let input = input.to_string_lossy();
    let mut cap = VideoCapture::from_file(&input, videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        bail!("cannot open video {input}");
    }

    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    let fps = cap.get(videoio::CAP_PROP_FPS)?;

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let mut writer = VideoWriter::new(
        &output.to_string_lossy(),
        fourcc,
        fps,
        core::Size::new(width, height),
        true,
    )?;

    let mut feed = DetectionFeed::new(config, DetectionCell::new());
    let stats = feed.stats_handle();
    let outline = Rect::new(region.x as i32, region.y as i32, region.width as i32, region.height as i32);

    let mut frame = Mat::default();
    loop {
        match cap.read(&mut frame) {
            Ok(true) if !frame.empty() => {}
            Ok(_) => break,
            Err(err) => {
                warn!(%err, "frame read failed, stopping");
                break;
            }
        }

        let bytes = frame.data_bytes().context("frame is not continuous")?.to_vec();
        let full = BgrImage::from_raw(width as u32, height as u32, bytes)?;
        let result = feed.process(&full.crop(region));

        let mut annotated = frame.clone();
        imgproc::rectangle(&mut annotated, outline, Scalar::new(255.0, 255.0, 255.0, 0.0), 1, imgproc::LINE_8, 0)?;
        for marker in &result.secondary.positions {
            let centre = Point::new(region.x as i32 + marker.x, region.y as i32 + marker.y);
            imgproc::circle(&mut annotated, centre, 6, Scalar::new(0.0, 0.0, 255.0, 0.0), 2, imgproc::LINE_8, 0)?;
        }
        if let Some(agent) = result.player_position() {
            let centre = Point::new(region.x as i32 + agent.x, region.y as i32 + agent.y);
            imgproc::circle(&mut annotated, centre, 8, Scalar::new(0.0, 255.0, 0.0, 0.0), 2, imgproc::LINE_8, 0)?;
        }
        writer.write(&annotated)?;
    }

    if let Ok(stats) = stats.lock() {
        info!(
            frames = stats.frames,
            over_budget = stats.over_deadline,
            mean_ms = stats.mean_time().as_secs_f64() * 1000.0,
            "video annotated"
        );
    }
    info!(output = %output.display(), "processing complete");
    Ok(())
}
