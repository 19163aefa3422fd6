// src/video_processor.rs
//
// Frame sources. A directory of stills is always available; decoding video
// files needs the `video` feature (OpenCV).

use crate::types::{Frame, VideoConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[cfg(feature = "video")]
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Anything that yields timestamped RGB frames in order.
pub trait FrameSource {
    fn has_next(&self) -> bool;

    /// `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// (width, height) of every frame this source yields.
    fn dimensions(&self) -> (usize, usize);

    fn fps(&self) -> f64;
}

/// Opens a directory as an image sequence, anything else as a video file.
pub fn open_source(path: &Path, video: &VideoConfig) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path, video.fps)?));
    }

    open_video(path, video.fps)
}

#[cfg(feature = "video")]
fn open_video(path: &Path, fallback_fps: f64) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(VideoReader::open(path, fallback_fps)?))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path, _fallback_fps: f64) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "{} is not a directory; decoding video files requires the `video` feature",
        path.display()
    )
}

// ============================================================================
// IMAGE SEQUENCE
// ============================================================================

pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next_index: usize,
    width: usize,
    height: usize,
    fps: f64,
}

impl ImageSequenceSource {
    /// Frames are ordered by file name.
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let first = paths
            .first()
            .with_context(|| format!("No image frames found in {}", dir.display()))?;
        let (width, height) = image::image_dimensions(first)
            .with_context(|| format!("Failed to read {}", first.display()))?;

        if !(fps > 0.0) {
            anyhow::bail!("frame rate must be positive, got {}", fps);
        }

        info!(
            "Image sequence: {} frames, {}x{} @ {:.1} FPS",
            paths.len(),
            width,
            height,
            fps
        );

        Ok(Self {
            paths,
            next_index: 0,
            width: width as usize,
            height: height as usize,
            fps,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn has_next(&self) -> bool {
        self.next_index < self.paths.len()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.next_index) else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;

        let rgb = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgb8();

        if (rgb.width() as usize, rgb.height() as usize) != (self.width, self.height) {
            anyhow::bail!(
                "{} is {}x{}, sequence is {}x{}",
                path.display(),
                rgb.width(),
                rgb.height(),
                self.width,
                self.height
            );
        }

        Ok(Some(Frame {
            data: rgb.into_raw(),
            width: self.width,
            height: self.height,
            channels: 3,
            timestamp_ms: index as f64 * 1000.0 / self.fps,
        }))
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

// ============================================================================
// VIDEO (OpenCV)
// ============================================================================

#[cfg(feature = "video")]
pub struct VideoReader {
    cap: VideoCapture,
    pub fps: f64,
    pub current_frame: i32,
    pub width: i32,
    pub height: i32,
    exhausted: bool,
}

#[cfg(feature = "video")]
impl VideoReader {
    /// `fallback_fps` is used when the container reports no frame rate.
    pub fn open(path: &Path, fallback_fps: f64) -> Result<Self> {
        info!("Opening video: {}", path.display());

        let path_str = path
            .to_str()
            .with_context(|| format!("Non UTF-8 path: {}", path.display()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file {}", path.display());
        }

        let reported_fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let fps = if reported_fps > 0.0 { reported_fps } else { fallback_fps };
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            cap,
            fps,
            current_frame: 0,
            width,
            height,
            exhausted: false,
        })
    }
}

#[cfg(feature = "video")]
impl FrameSource for VideoReader {
    fn has_next(&self) -> bool {
        !self.exhausted
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let timestamp_ms = self.current_frame as f64 * 1000.0 / self.fps;
        self.current_frame += 1;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(Frame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: self.width as usize,
            height: self.height as usize,
            channels: 3,
            timestamp_ms,
        }))
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

/// `<output_dir>/<input stem>_annotated.mp4`
#[cfg(feature = "video")]
pub fn create_writer(
    output_dir: &str,
    input_path: &Path,
    width: i32,
    height: i32,
    fps: f64,
) -> Result<VideoWriter> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir))?;

    let input_name = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frames");
    let output_path = PathBuf::from(output_dir).join(format!("{}_annotated.mp4", input_name));
    let output_str = output_path
        .to_str()
        .with_context(|| format!("Non UTF-8 path: {}", output_path.display()))?;

    info!("Output video: {}", output_path.display());

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(output_str, fourcc, fps, core::Size::new(width, height), true)?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lane-speed-seq-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_image_sequence_orders_and_timestamps() {
        let dir = temp_dir();
        for (i, shade) in [10u8, 20, 30].iter().enumerate() {
            RgbImage::from_pixel(8, 4, Rgb([*shade, 0, 0]))
                .save(dir.join(format!("frame_{:03}.png", i)))
                .unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(&dir, 25.0).unwrap();
        assert_eq!(source.dimensions(), (8, 4));

        let mut frames = Vec::new();
        while source.has_next() {
            frames.push(source.next_frame().unwrap().unwrap());
        }
        assert!(source.next_frame().unwrap().is_none());

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].data[0], 20);
        assert_eq!(frames[2].timestamp_ms, 80.0);
        assert_eq!(frames[0].data.len(), 8 * 4 * 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mismatched_frame_size_is_rejected() {
        let dir = temp_dir();
        RgbImage::new(8, 4).save(dir.join("a.png")).unwrap();
        RgbImage::new(6, 4).save(dir.join("b.png")).unwrap();

        let mut source = ImageSequenceSource::open(&dir, 10.0).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = temp_dir();
        assert!(ImageSequenceSource::open(&dir, 25.0).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
