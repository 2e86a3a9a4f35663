use anyhow::{Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: String,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub trait VideoSampler {
    /// Decode the frame at the given index, None past the end of stream.
    fn get_image(&mut self, frame_number: u32) -> Result<Option<GrayImage>>;
    fn seek(&mut self, _target_framenumber: u32) -> Result<()> {
        Err(anyhow::anyhow!("Seek not supported"))
    }
}

/// Shared sequential reader over one video. Frames are decoded to luma
/// and optionally downscaled before they reach any tracker.
pub struct FrameSource {
    pub info: VideoInfo,
    frame_number: u32,
    downscale: u32,
    sampler: Box<dyn VideoSampler + Send>,
}

impl FrameSource {
    /// Open a directory of numbered frame images, or a container video
    /// when the opencv-videoio feature is enabled. `fps_hint` supplies
    /// the frame rate for image folders, which carry no timing metadata.
    pub fn open(path: &str, fps_hint: f64, downscale: u32) -> Result<FrameSource> {
        anyhow::ensure!(downscale >= 1, "downscale factor must be at least 1");
        let (sampler, mut info) = if Path::new(path).is_dir() {
            ImageFolderSampler::open(path, fps_hint)?
        } else {
            open_capture(path)?
        };
        if downscale > 1 {
            info.width /= downscale;
            info.height /= downscale;
        }
        anyhow::ensure!(
            info.width > 0 && info.height > 0,
            "{}: empty frames after downscale",
            path
        );
        Ok(FrameSource {
            info,
            frame_number: 0,
            downscale,
            sampler,
        })
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Decode the next frame, None at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<GrayImage>> {
        let frame = match self.sampler.get_image(self.frame_number)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        self.frame_number += 1;
        if self.downscale > 1 {
            Ok(Some(downscale_nearest(&frame, self.downscale)))
        } else {
            Ok(Some(frame))
        }
    }

    pub fn seek(&mut self, target_framenumber: u32) -> Result<()> {
        self.sampler.seek(target_framenumber)?;
        self.frame_number = target_framenumber;
        Ok(())
    }
}

/// Nearest-neighbor downscale by an integer factor.
pub fn downscale_nearest(frame: &GrayImage, factor: u32) -> GrayImage {
    let width = frame.width() / factor;
    let height = frame.height() / factor;
    GrayImage::from_fn(width, height, |x, y| *frame.get_pixel(x * factor, y * factor))
}

struct ImageFolderSampler {
    files: Vec<PathBuf>,
}

const FRAME_EXTENSIONS: [&str; 7] = ["png", "pgm", "jpg", "jpeg", "bmp", "tif", "tiff"];

impl ImageFolderSampler {
    fn open(path: &str, fps_hint: f64) -> Result<(Box<dyn VideoSampler + Send>, VideoInfo)> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("Could not open {}", path))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        anyhow::ensure!(!files.is_empty(), "{}: no frame images found", path);
        files.sort();
        let first = image::open(&files[0])
            .with_context(|| format!("Could not decode {}", files[0].display()))?
            .to_luma8();
        let info = VideoInfo {
            path: path.to_string(),
            frame_count: files.len() as u32,
            width: first.width(),
            height: first.height(),
            fps: fps_hint,
        };
        Ok((Box::new(ImageFolderSampler { files }), info))
    }
}

impl VideoSampler for ImageFolderSampler {
    fn get_image(&mut self, frame_number: u32) -> Result<Option<GrayImage>> {
        let path = match self.files.get(frame_number as usize) {
            Some(path) => path,
            None => return Ok(None),
        };
        let frame = image::open(path)
            .with_context(|| format!("Could not decode {}", path.display()))?
            .to_luma8();
        Ok(Some(frame))
    }

    // frames are addressed by index, repositioning needs no work
    fn seek(&mut self, _target_framenumber: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(not(feature = "opencv-videoio"))]
fn open_capture(path: &str) -> Result<(Box<dyn VideoSampler + Send>, VideoInfo)> {
    Err(anyhow::anyhow!(
        "{}: container formats require the opencv-videoio feature",
        path
    ))
}

#[cfg(feature = "opencv-videoio")]
fn open_capture(path: &str) -> Result<(Box<dyn VideoSampler + Send>, VideoInfo)> {
    CaptureSampler::open(path)
}

#[cfg(feature = "opencv-videoio")]
struct CaptureSampler {
    capture: cv::videoio::VideoCapture,
}

#[cfg(feature = "opencv-videoio")]
unsafe impl Send for CaptureSampler {}

#[cfg(feature = "opencv-videoio")]
impl CaptureSampler {
    fn open(path: &str) -> Result<(Box<dyn VideoSampler + Send>, VideoInfo)> {
        anyhow::ensure!(Path::new(path).exists(), "Could not open {}", path);
        let capture = cv::videoio::VideoCapture::from_file(path, 0)?;
        let frame_count = capture.get(cv::videoio::CAP_PROP_FRAME_COUNT)? as u32;
        let width = capture.get(cv::videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(cv::videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = capture.get(cv::videoio::CAP_PROP_FPS)?;
        let info = VideoInfo {
            path: path.to_string(),
            frame_count,
            width,
            height,
            fps,
        };
        Ok((Box::new(CaptureSampler { capture }), info))
    }
}

#[cfg(feature = "opencv-videoio")]
impl VideoSampler for CaptureSampler {
    fn get_image(&mut self, _frame_number: u32) -> Result<Option<GrayImage>> {
        use cv::prelude::*;
        let mut img = Mat::default();
        if !self.capture.read(&mut img)? || img.empty() {
            return Ok(None);
        }
        let mut gray = Mat::default();
        cv::imgproc::cvt_color(&img, &mut gray, cv::imgproc::COLOR_BGR2GRAY, 0)?;
        let width = gray.cols() as u32;
        let height = gray.rows() as u32;
        let data = gray.data_bytes()?.to_vec();
        GrayImage::from_raw(width, height, data)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Could not convert decoded frame"))
    }

    fn seek(&mut self, target_framenumber: u32) -> Result<()> {
        use cv::prelude::*;
        self.capture
            .set(cv::videoio::CAP_PROP_POS_FRAMES, target_framenumber as f64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            let frame = GrayImage::from_pixel(8, 6, Luma([i * 10]));
            frame
                .save(dir.join(format!("frame_{:04}.png", i)))
                .unwrap();
        }
    }

    #[test]
    fn folder_frames_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let mut source = FrameSource::open(dir.path().to_str().unwrap(), 30.0, 1).unwrap();
        assert_eq!(source.info.frame_count, 3);
        assert_eq!(source.info.width, 8);
        assert_eq!(source.info.height, 6);
        assert!((source.info.fps - 30.0).abs() < 1e-9);
        for i in 0..3u8 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.get_pixel(0, 0)[0], i * 10);
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn folder_seek_repositions() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 5);
        let mut source = FrameSource::open(dir.path().to_str().unwrap(), 30.0, 1).unwrap();
        source.seek(3).unwrap();
        assert_eq!(source.frame_number(), 3);
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.get_pixel(0, 0)[0], 30);
        assert_eq!(source.frame_number(), 4);
    }

    #[test]
    fn downscale_samples_every_other_pixel() {
        let frame = GrayImage::from_fn(8, 6, |x, y| Luma([(x + 10 * y) as u8]));
        let small = downscale_nearest(&frame, 2);
        assert_eq!(small.width(), 4);
        assert_eq!(small.height(), 3);
        assert_eq!(small.get_pixel(1, 1)[0], frame.get_pixel(2, 2)[0]);
        assert_eq!(small.get_pixel(3, 2)[0], frame.get_pixel(6, 4)[0]);
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrameSource::open(dir.path().to_str().unwrap(), 30.0, 1).is_err());
    }

    #[cfg(not(feature = "opencv-videoio"))]
    #[test]
    fn container_without_backend_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        std::fs::write(&path, b"not a real video").unwrap();
        assert!(FrameSource::open(path.to_str().unwrap(), 30.0, 1).is_err());
    }
}
