// src/overlay.rs
//
// Annotated video output: tracked cells tinted per vehicle, raw occupancy
// outlined, and a per-lane banner with trip count and last speed.

use crate::pipeline::frame_report::FrameReport;
use crate::pipeline::RenderSink;
use crate::types::{Frame, GridGeometry};
use crate::video_processor::create_writer;
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::Path;
use tracing::info;

const PALETTE: [(f64, f64, f64); 4] = [
    (0.0, 0.0, 255.0),   // Red
    (0.0, 255.0, 0.0),   // Green
    (255.0, 0.0, 0.0),   // Blue
    (0.0, 255.0, 255.0), // Yellow
];

pub struct OverlayWriter {
    writer: VideoWriter,
    geometry: GridGeometry,
    frames_written: u64,
}

impl OverlayWriter {
    pub fn new(output_dir: &str, input_path: &Path, geometry: GridGeometry, fps: f64) -> Result<Self> {
        let writer = create_writer(
            output_dir,
            input_path,
            geometry.frame_width as i32,
            geometry.frame_height as i32,
            fps,
        )?;
        Ok(Self {
            writer,
            geometry,
            frames_written: 0,
        })
    }

    fn draw(&self, frame: &Frame, report: &FrameReport) -> Result<Mat> {
        let mat = Mat::from_slice(&frame.data)?;
        let mat = mat.reshape(frame.channels as i32, frame.height as i32)?;

        let mut output = Mat::default();
        imgproc::cvt_color(&mat, &mut output, imgproc::COLOR_RGB2BGR, 0)?;

        let g = &self.geometry;
        let white = core::Scalar::new(255.0, 255.0, 255.0, 0.0);

        for lane in &report.lanes {
            let y = g.lanes[lane.lane].y_offset as i32;

            for (column, (occupied, vehicle)) in lane.occupancy.iter().zip(&lane.track).enumerate() {
                let rect = core::Rect::new(
                    (column * g.cell_width) as i32,
                    y,
                    g.cell_width as i32,
                    g.cell_height as i32,
                );

                if let Some(id) = vehicle {
                    let (b, gr, r) = PALETTE[(id.0 as usize) % PALETTE.len()];
                    imgproc::rectangle(
                        &mut output,
                        rect,
                        core::Scalar::new(b, gr, r, 0.0),
                        -1,
                        imgproc::LINE_8,
                        0,
                    )?;
                }
                if *occupied {
                    imgproc::rectangle(&mut output, rect, white, 1, imgproc::LINE_8, 0)?;
                }
            }

            let banner = format!(
                "{}: {} trips | {}",
                lane.name,
                lane.trip_count,
                report.speed_label(lane.lane)
            );
            imgproc::put_text(
                &mut output,
                &banner,
                core::Point::new(4, (y - 4).max(12)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.4,
                white,
                1,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(output)
    }
}

impl RenderSink for OverlayWriter {
    fn render(&mut self, frame: &Frame, report: &FrameReport) -> Result<()> {
        let annotated = self.draw(frame, report)?;
        self.writer
            .write(&annotated)
            .context("Failed to write annotated frame")?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        info!("✓ Annotated video written ({} frames)", self.frames_written);
        Ok(())
    }
}
