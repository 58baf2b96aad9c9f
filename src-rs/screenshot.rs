use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};
use serde::Serialize;
use tracing::{debug, warn};

use crate::desktop::RemoteDesktop;
use crate::error::PilotResult;
use crate::scaling::{Resolution, Scaler};

/// PNG frame sized for the planner.
#[derive(Debug, Clone)]
pub struct Frame {
    pub png: Vec<u8>,
    pub size: Resolution,
    pub source: Resolution,
    pub resized: bool,
}

impl Frame {
    pub fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(&self.png)
        )
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            size: self.size,
            source: self.source,
            resized: self.resized,
            bytes: self.png.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub size: Resolution,
    pub source: Resolution,
    pub resized: bool,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ScreenshotTranscoder {
    original: Resolution,
    target: Resolution,
}

impl ScreenshotTranscoder {
    pub fn new(scaler: &Scaler) -> Self {
        Self::from_sizes(scaler.original(), scaler.scaled())
    }

    pub fn from_sizes(original: Resolution, target: Resolution) -> Self {
        Self { original, target }
    }

    pub fn target(&self) -> Resolution {
        self.target
    }

    /// Grabs the current frame. Capture failures propagate; no placeholder is substituted.
    pub fn capture(&self, desktop: &mut dyn RemoteDesktop) -> PilotResult<Frame> {
        let raw = desktop.screenshot()?;
        self.transcode(&raw)
    }

    pub fn transcode(&self, raw: &[u8]) -> PilotResult<Frame> {
        let format = image::guess_format(raw)?;
        let decoded = image::load_from_memory(raw)?;
        let (width, height) = decoded.dimensions();
        let source = Resolution::new(width, height);

        if source != self.original {
            warn!(
                expected = %self.original,
                actual = %source,
                "frame size differs from the session resolution; stretching to target"
            );
        }

        if source == self.target && format == ImageFormat::Png {
            return Ok(Frame {
                png: raw.to_vec(),
                size: source,
                source,
                resized: false,
            });
        }

        let resized = source != self.target;
        let output = if resized {
            decoded.resize_exact(self.target.width, self.target.height, FilterType::Lanczos3)
        } else {
            decoded
        };

        let mut buf = Cursor::new(Vec::new());
        output.write_to(&mut buf, ImageFormat::Png)?;
        debug!(source = %source, target = %self.target, resized, "transcoded frame");

        Ok(Frame {
            png: buf.into_inner(),
            size: self.target,
            source,
            resized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleBounds;
    use crate::desktop::testing::{png_frame, RecordingDesktop};
    use crate::error::PilotError;

    fn transcoder(w: u32, h: u32) -> ScreenshotTranscoder {
        let scaler = Scaler::new(Resolution::new(w, h), &ScaleBounds::default()).unwrap();
        ScreenshotTranscoder::new(&scaler)
    }

    #[test]
    fn identity_frames_pass_through() {
        let raw = png_frame(1024, 768);
        let frame = transcoder(1024, 768).transcode(&raw).unwrap();
        assert!(!frame.resized);
        assert_eq!(frame.png, raw);
        assert_eq!(frame.size, Resolution::new(1024, 768));
    }

    #[test]
    fn oversized_frames_are_stretched_to_target() {
        let t = ScreenshotTranscoder::from_sizes(Resolution::new(400, 250), Resolution::new(216, 135));
        let frame = t.transcode(&png_frame(400, 250)).unwrap();
        assert!(frame.resized);
        assert_eq!(frame.size, Resolution::new(216, 135));
        let decoded = image::load_from_memory(&frame.png).unwrap();
        assert_eq!(decoded.dimensions(), (216, 135));
        assert_eq!(frame.source, Resolution::new(400, 250));
    }

    #[test]
    fn target_follows_the_scaler() {
        assert_eq!(transcoder(2560, 1600).target(), Resolution::new(1728, 1080));
    }

    #[test]
    fn capture_failure_propagates() {
        let mut desktop = RecordingDesktop::new(1024, 768);
        desktop.failing_screenshots = vec![1];
        let err = transcoder(1024, 768).capture(&mut desktop).unwrap_err();
        assert!(matches!(err, PilotError::RemoteSession(_)));
    }

    #[test]
    fn garbage_bytes_are_an_image_error() {
        let err = transcoder(1024, 768).transcode(b"not an image").unwrap_err();
        assert!(matches!(err, PilotError::Image(_)));
    }

    #[test]
    fn data_url_is_base64_png() {
        let frame = transcoder(800, 600).transcode(&png_frame(800, 600)).unwrap();
        assert!(frame.data_url().starts_with("data:image/png;base64,iVBOR"));
    }
}
